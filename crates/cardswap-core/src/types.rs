use std::fmt;

use cardswap_crypto::connection::SEPARATOR;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a persisted identifier was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier contains uppercase characters")]
    NotLowercase,
    #[error("identifier contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Stable random identifier of this installation.
///
/// Generated once (lowercase UUIDv4 text), persisted, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: String,
}

impl LocalIdentity {
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string().to_lowercase(),
        }
    }

    /// Validate a persisted identifier.
    ///
    /// The connection-id separator is refused so that two distinct id pairs
    /// can never produce the same hash input.
    pub fn parse(raw: &str) -> Result<Self, IdentityParseError> {
        if raw.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !c.is_ascii_graphic() || *c == SEPARATOR)
        {
            return Err(IdentityParseError::InvalidChar(c));
        }
        if raw.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(IdentityParseError::NotLowercase);
        }
        Ok(Self { id: raw.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
