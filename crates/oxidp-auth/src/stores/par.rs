//! Pushed authorization request records (RFC 9126).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use oxidp_core::UnixMillis;

use crate::error::AuthResult;

/// The request_uri prefix minted for stored PAR requests.
pub const PAR_URN_PREFIX: &str = "urn:ietf:params:oauth:request_uri:";

/// A stored pushed authorization request. Single-use, TTL ≤ 60 s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParRecord {
    /// Full request URI (`urn:ietf:params:oauth:request_uri:{id}`).
    pub request_uri: String,

    /// Client that pushed the request.
    pub client_id: String,

    /// The pushed authorization parameters, verbatim.
    pub parameters: HashMap<String, String>,

    /// Creation time.
    pub created_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,
}

impl ParRecord {
    /// Returns `true` past the TTL.
    #[must_use]
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        !now.is_before(self.expires_at)
    }
}

/// Storage for pushed authorization requests.
#[async_trait]
pub trait ParStore: Send + Sync {
    /// Stores a request.
    ///
    /// # Errors
    ///
    /// `conflict` when the request URI already exists.
    async fn put(&self, record: ParRecord) -> AuthResult<()>;

    /// Atomic single-use redemption by request URI.
    ///
    /// # Errors
    ///
    /// Backend failures only; absent/expired/consumed URIs return `None`.
    async fn consume(&self, request_uri: &str) -> AuthResult<Option<ParRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urn_prefix_shape() {
        let uri = format!("{PAR_URN_PREFIX}abc123");
        assert!(uri.starts_with("urn:ietf:params:oauth:request_uri:"));
    }
}
