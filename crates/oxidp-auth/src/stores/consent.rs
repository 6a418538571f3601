//! Materialized consent records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oxidp_core::UnixMillis;

use crate::error::AuthResult;

/// The authoritative record of scopes a user granted a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentRecord {
    /// Granting user.
    pub user_id: Uuid,

    /// Client the grant applies to.
    pub client_id: String,

    /// Granted scopes.
    pub granted_scopes: Vec<String>,

    /// When the grant was made or last extended.
    pub granted_at: UnixMillis,

    /// Terminal revocation flag.
    pub revoked: bool,
}

impl ConsentRecord {
    /// Creates a fresh grant.
    #[must_use]
    pub fn new(user_id: Uuid, client_id: impl Into<String>, granted_scopes: Vec<String>) -> Self {
        Self {
            user_id,
            client_id: client_id.into(),
            granted_scopes,
            granted_at: UnixMillis::now(),
            revoked: false,
        }
    }

    /// Returns `true` when every requested scope is covered by this grant.
    #[must_use]
    pub fn covers(&self, requested: &[String]) -> bool {
        !self.revoked && requested.iter().all(|s| self.granted_scopes.contains(s))
    }
}

/// Storage for consent records, keyed by `(user, client)`.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Inserts or extends a grant.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn upsert(&self, record: ConsentRecord) -> AuthResult<()>;

    /// Looks up the grant for a user/client pair. Revoked grants return
    /// `None`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn find(&self, user_id: Uuid, client_id: &str) -> AuthResult<Option<ConsentRecord>>;

    /// Revokes a grant. Terminal.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke(&self, user_id: Uuid, client_id: &str) -> AuthResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        let record = ConsentRecord::new(
            Uuid::new_v4(),
            "spa",
            vec!["openid".to_string(), "profile".to_string()],
        );
        assert!(record.covers(&["openid".to_string()]));
        assert!(record.covers(&["openid".to_string(), "profile".to_string()]));
        assert!(!record.covers(&["email".to_string()]));

        let mut revoked = record;
        revoked.revoked = true;
        assert!(!revoked.covers(&["openid".to_string()]));
    }
}
