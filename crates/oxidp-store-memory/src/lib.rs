//! # oxidp-store-memory
//!
//! In-memory implementations of the OxIdP storage traits, backed by
//! `DashMap`. Suitable for single-node deployments and tests; the trait
//! boundary is where a clustered backend would plug in.
//!
//! Semantics match the store contract exactly:
//! - every read re-checks `expires_at` (lazy expiry),
//! - `consume` is an atomic remove,
//! - `update` mutates under the shard lock, so CAS races cannot interleave,
//! - per-tenant caps are enforced at insert time.
//!
//! A background [`sweeper`] task prunes expired records so lazily read maps
//! do not grow without bound.

mod keys;
mod stores;
mod sweeper;

pub use keys::{FileKeyStorage, InMemoryKeyStorage};
pub use stores::{
    InMemoryChallengeStore, InMemoryCibaStore, InMemoryCodeStore, InMemoryConsentStore,
    InMemoryDeviceStore, InMemoryParStore, InMemoryPasskeyStore, InMemoryRefreshTokenStore,
    InMemorySessionStore, InMemoryUserStore, MemoryStores,
};
pub use sweeper::spawn_sweeper;
