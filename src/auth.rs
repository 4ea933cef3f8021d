use crate::config::Config;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Authenticated session persisted under the `session` store key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub name: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
}

/// Checks the supplied credentials against the configured ones and
/// issues a fresh session token. The credential check is deliberately
/// opaque; the API surface only sees a token or an authentication
/// failure.
pub fn login(config: &Config, email: &str, password: &str) -> Result<Session, AppError> {
    if email != config.login_email || password != config.login_password {
        return Err(AppError::Authentication("Invalid credentials".to_string()));
    }
    Ok(Session {
        token: issue_token(),
        name: "Admin".to_string(),
        email: email.to_string(),
        issued_at: Utc::now(),
    })
}

/// Opaque bearer token: sha256 over 32 random bytes, hex-encoded.
fn issue_token() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    hex::encode(Sha256::digest(random_bytes))
}
