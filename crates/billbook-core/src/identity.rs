//! # Identity Namespaces
//!
//! Every record the engine writes lives in one of two identity namespaces.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Identity Lifecycle                               │
//! │                                                                         │
//! │   record_payment()                      remote create succeeds          │
//! │        │                                         │                      │
//! │        ▼                                         ▼                      │
//! │   Local(uuid)  ──────── promote in place ──►  Remote(token)             │
//! │   "local:6f1c…"                               "remote:PAY-8812"         │
//! │                                                                         │
//! │   • generated on device                       • issued by the backend   │
//! │   • never sent as update/delete target        • addressable remotely    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `local:` / `remote:` prefix exists only in the storage and wire
//! encoding. It is parsed in exactly one place ([`Identity::from_str`]);
//! everything else pattern-matches on the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

const LOCAL_PREFIX: &str = "local:";
const REMOTE_PREFIX: &str = "remote:";

/// A record identity, tagged with the namespace that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    /// Generated on this device; the remote store has never seen it.
    Local(Uuid),
    /// Issued by the remote store.
    Remote(String),
}

impl Identity {
    /// Generates a fresh local identity.
    pub fn new_local() -> Self {
        Identity::Local(Uuid::new_v4())
    }

    /// Wraps a token issued by the remote store.
    pub fn remote(token: impl Into<String>) -> Self {
        Identity::Remote(token.into())
    }

    /// Whether this id may be sent as an update or delete target.
    #[inline]
    pub fn is_remote_addressable(&self) -> bool {
        matches!(self, Identity::Remote(_))
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, Identity::Local(_))
    }

    /// The bare token without the namespace prefix.
    ///
    /// For remote ids this is what goes into request paths.
    pub fn token(&self) -> String {
        match self {
            Identity::Local(uuid) => uuid.to_string(),
            Identity::Remote(token) => token.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Local(uuid) => write!(f, "{}{}", LOCAL_PREFIX, uuid),
            Identity::Remote(token) => write!(f, "{}{}", REMOTE_PREFIX, token),
        }
    }
}

impl FromStr for Identity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(LOCAL_PREFIX) {
            let uuid = Uuid::parse_str(rest)
                .map_err(|e| CoreError::invalid_identity(s, format!("bad local uuid: {}", e)))?;
            return Ok(Identity::Local(uuid));
        }

        if let Some(rest) = s.strip_prefix(REMOTE_PREFIX) {
            if rest.trim().is_empty() {
                return Err(CoreError::invalid_identity(s, "empty remote token"));
            }
            return Ok(Identity::Remote(rest.to_string()));
        }

        Err(CoreError::invalid_identity(
            s,
            "expected 'local:' or 'remote:' prefix",
        ))
    }
}

impl TryFrom<String> for Identity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_round_trips_through_string() {
        let id = Identity::new_local();
        let encoded = id.to_string();
        assert!(encoded.starts_with("local:"));
        assert_eq!(encoded.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn test_remote_token_keeps_colons() {
        let id: Identity = "remote:tenant:PAY-1".parse().unwrap();
        assert_eq!(id, Identity::remote("tenant:PAY-1"));
        assert_eq!(id.token(), "tenant:PAY-1");
    }

    #[test]
    fn test_rejects_unprefixed_and_malformed() {
        assert!("PAY-1".parse::<Identity>().is_err());
        assert!("local:not-a-uuid".parse::<Identity>().is_err());
        assert!("remote:".parse::<Identity>().is_err());
    }

    #[test]
    fn test_only_remote_is_addressable() {
        assert!(!Identity::new_local().is_remote_addressable());
        assert!(Identity::remote("PAY-1").is_remote_addressable());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let id = Identity::remote("INV-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"remote:INV-7\"");

        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<Identity>("\"INV-7\"").is_err());
    }
}
