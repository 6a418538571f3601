//! Token issuance and verification.
//!
//! - [`claims`] - JWT claim sets for access, ID, refresh, and logout tokens
//! - [`issuer`] - The signing/verification service over the key store
//! - [`jwe`] - Compact JWE encryption for confidential delivery

pub mod claims;
pub mod issuer;
pub mod jwe;

pub use claims::{
    AccessTokenClaims, IdTokenClaims, LogoutTokenClaims, RefreshTokenClaims,
    BACKCHANNEL_LOGOUT_EVENT,
};
pub use issuer::{
    IssueContext, IssuedRefreshToken, SignedToken, TokenIssuer, VerifyExpectations, left_half_hash,
};
