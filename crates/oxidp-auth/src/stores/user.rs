//! User and passkey storage traits.
//!
//! The core and PII partitions are separate storage surfaces on purpose: the
//! PII methods are the only ones touching personal data, and the GDPR
//! deletion path removes the PII row while tombstoning the core row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AuthResult;
use crate::stores::Mutator;
use crate::types::{EmailBlindIndex, PasskeyCredential, UserCore, UserPii};

/// Storage for user records across both partitions.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Creates the core record (`pii_status = pending`).
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate UUID or blind index.
    async fn create(&self, core: UserCore) -> AuthResult<()>;

    /// Looks up a core record by UUID.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, user_id: Uuid) -> AuthResult<Option<UserCore>>;

    /// Looks up a core record by email blind index.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn find_by_email_index(
        &self,
        index: &EmailBlindIndex,
    ) -> AuthResult<Option<UserCore>>;

    /// CAS update of the core record.
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(&self, user_id: Uuid, mutator: Mutator<'_, UserCore>)
    -> AuthResult<UserCore>;

    /// Writes the PII row. The caller flips `pii_status` on the core record
    /// according to the outcome (`active` on success, `failed` on error —
    /// the failed state is retryable through [`UserStore::store_pii`] again).
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn store_pii(&self, pii: UserPii) -> AuthResult<()>;

    /// Reads the PII row.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get_pii(&self, user_id: Uuid) -> AuthResult<Option<UserPii>>;

    /// GDPR deletion: removes the PII row and tombstones the core record.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn delete_user(&self, user_id: Uuid) -> AuthResult<()>;
}

/// Storage for passkey credentials.
#[async_trait]
pub trait PasskeyStore: Send + Sync {
    /// Stores a credential.
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate credential ID.
    async fn put(&self, credential: PasskeyCredential) -> AuthResult<()>;

    /// Looks up a credential.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, credential_id: &str) -> AuthResult<Option<PasskeyCredential>>;

    /// Every credential of a user (for allow-lists).
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn list_by_user(&self, user_id: Uuid) -> AuthResult<Vec<PasskeyCredential>>;

    /// CAS update — the counter write after a successful assertion must go
    /// through here so the check-and-update is atomic.
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        credential_id: &str,
        mutator: Mutator<'_, PasskeyCredential>,
    ) -> AuthResult<PasskeyCredential>;

    /// Removes a credential.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn delete(&self, credential_id: &str) -> AuthResult<()>;
}
