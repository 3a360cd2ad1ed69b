use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Why replay stopped before the end of the file.
#[derive(Debug, PartialEq, Eq)]
enum Tail {
    Clean,
    Truncated,
    BadChecksum,
    BadPayload,
}

/// Read one frame. The inner `Err` says how the log ended.
fn read_frame(reader: &mut impl Read) -> io::Result<Result<Event, Tail>> {
    let mut len_buf = [0u8; 4];
    match read_full(reader, &mut len_buf)? {
        0 => return Ok(Err(Tail::Clean)),
        4 => {}
        _ => return Ok(Err(Tail::Truncated)),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? < len {
        return Ok(Err(Tail::Truncated));
    }
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut crc_buf)? < 4 {
        return Ok(Err(Tail::Truncated));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Err(Tail::BadChecksum));
    }
    Ok(bincode::deserialize::<Event>(&payload).map_err(|_| Tail::BadPayload))
}

/// Like `read_exact`, but reports how much was read before EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Append-only event log for one property.
///
/// Entry format: `[u32 len][bincode Event][u32 crc32]`, little endian. A torn
/// or corrupt tail (crash mid-write) ends replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event; nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All intact events in the log. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        let tail = loop {
            match read_frame(&mut reader)? {
                Ok(event) => events.push(event),
                Err(tail) => break tail,
            }
        };
        if tail != Tail::Clean {
            tracing::warn!(
                "{}: discarded {:?} tail after {} events",
                path.display(),
                tail,
                events.len()
            );
        }
        Ok(events)
    }
}
