//! Shared credential checks for client logins.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest the scanner expects in place of the plain password.
pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// The single account clients must present to obtain a watcher id.
#[derive(Debug, Clone)]
pub struct SharedCredential {
    email: String,
    password: String,
    digest: String,
}

impl SharedCredential {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        let password = password.into();
        let digest = password_digest(&password);
        Self {
            email: email.into(),
            password,
            digest,
        }
    }

    /// Accepts the password either in plain form or as its digest, which is what
    /// scanner-native clients send.
    pub fn matches(&self, email: &str, password: &str) -> bool {
        if !self.email.trim().eq_ignore_ascii_case(email.trim()) {
            return false;
        }
        password == self.password || password.eq_ignore_ascii_case(&self.digest)
    }
}
