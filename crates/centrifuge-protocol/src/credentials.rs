//! Connection credentials.

use std::fmt;

/// Credentials presented in the connect handshake.
///
/// The token is derived by the application backend (see `centrifuge_core::signer`).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    timestamp: String,
    token: String,
    info: Option<String>,
}

impl Credentials {
    /// Create credentials without an info blob.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        timestamp: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            timestamp: timestamp.into(),
            token: token.into(),
            info: None,
        }
    }

    /// Attach an opaque info blob.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("timestamp", &self.timestamp)
            .field("token", &"<redacted>")
            .field("info", &self.info)
            .finish()
    }
}
