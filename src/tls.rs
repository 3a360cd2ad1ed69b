use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Open a PEM file, keeping the error kind but naming the file.
fn open_pem(path: &Path, what: &str) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| io::Error::new(e.kind(), format!("{what} {}: {e}", path.display())))
}

fn read_cert_chain(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let chain: Vec<_> =
        rustls_pemfile::certs(&mut open_pem(path, "certificate")?).collect::<Result<_, _>>()?;
    if chain.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificate found in {}", path.display()),
        ));
    }
    Ok(chain)
}

fn read_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path, "private key")?)?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key found in {}", path.display()),
        )
    })
}

/// TLS acceptor for pgwire from `RACKD_TLS_CERT` / `RACKD_TLS_KEY`.
/// Both paths or neither; neither means plaintext connections only.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (Path::new(c), Path::new(k)),
        (Some(_), None) | (None, Some(_)) => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both RACKD_TLS_CERT and RACKD_TLS_KEY must be set, or neither",
            ));
        }
    };

    let chain = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::debug!("TLS certificate loaded from {}", cert_path.display());
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
