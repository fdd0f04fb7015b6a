//! Registry authentication.
//!
//! Shared by the WebSocket and HTTP clients: a bearer token when one is
//! configured, otherwise HTTP Basic, otherwise nothing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::infrastructure::config::DittoSettings;

/// Registry credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryAuth {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Authorization: Basic base64(user:pass)`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// No authorization header.
    None,
}

impl RegistryAuth {
    /// Pick the auth scheme from the registry settings.
    #[must_use]
    pub fn from_settings(settings: &DittoSettings) -> Self {
        if !settings.api_token.is_empty() {
            Self::Bearer(settings.api_token.clone())
        } else if !settings.username.is_empty() && !settings.password.is_empty() {
            Self::Basic {
                username: settings.username.clone(),
                password: settings.password.clone(),
            }
        } else {
            Self::None
        }
    }

    /// Value for the `Authorization` header, if any.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::Bearer(token) => Some(format!("Bearer {token}")),
            Self::Basic { username, password } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))))
            }
            Self::None => None,
        }
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}
