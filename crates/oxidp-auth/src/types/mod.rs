//! Entity and contract types.

mod client;
mod passkey;
mod tenant;
mod user;

pub use client::{
    ClientAuthMethod, ClientContract, ClientType, ClientValidationError, ConsentMode, JweDelivery,
};
pub use passkey::PasskeyCredential;
pub use tenant::{
    CibaPolicy, ConsentPolicy, DeviceFlowPolicy, OAuthPolicy, SecurityPolicy, SecurityTier,
    SessionPolicy, TenantContract, TokenPolicy, UserAuthMethod,
};
pub use user::{EmailBlindIndex, PiiStatus, UserCore, UserPii, UserStatus};
