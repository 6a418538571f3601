//! Typed, TTL-bounded record stores.
//!
//! Every store follows one contract:
//!
//! - `put` fails with `conflict` when the ID is already present, and with
//!   `resource_exhausted` when a per-tenant cap is hit.
//! - `get` returns `None` past the record's TTL and never returns a consumed
//!   record. Every read path re-checks `expires_at`; backend expiry is never
//!   relied on.
//! - `consume` is an atomic fetch-and-delete — the only correct way to
//!   redeem single-use items. Exactly one concurrent caller wins.
//! - `update` is a CAS loop over a pure mutator; persistent conflicts
//!   surface as `contention`.
//! - `revoke` is terminal; later `get`/`consume` return `None`.
//!
//! Cross-component references are opaque string IDs, never pointers.

mod challenge;
mod ciba;
mod code;
mod consent;
mod device;
mod par;
mod refresh;
mod session;
mod user;

pub use challenge::{Challenge, ChallengeKind, ChallengeState, ChallengeStore};
pub use ciba::{CibaDeliveryMode, CibaRequest, CibaStatus, CibaStore, LoginHint};
pub use code::{AuthorizationCode, CodeStore};
pub use consent::{ConsentRecord, ConsentStore};
pub use device::{DeviceGrantRecord, DeviceStore};
pub use par::{PAR_URN_PREFIX, ParRecord, ParStore};
pub use refresh::{RefreshTokenRecord, RefreshTokenStore};
pub use session::{Session, SessionStore};
pub use user::{PasskeyStore, UserStore};

/// Number of CAS attempts before an `update` reports `contention`.
pub const CAS_MAX_ATTEMPTS: u32 = 8;

/// A pure record mutator used by CAS updates. It sees the current record and
/// returns the replacement; it must not perform I/O.
pub type Mutator<'a, R> =
    &'a (dyn Fn(R) -> crate::error::AuthResult<R> + Send + Sync);
