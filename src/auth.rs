use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared cleartext password for every user and property.
#[derive(Debug)]
pub struct RackAuthSource {
    password: String,
}

impl RackAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RackAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            "password login for user {:?} on {:?}",
            login.user(),
            login.database()
        );
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
