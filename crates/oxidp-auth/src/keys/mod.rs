//! Signing-key lifecycle.
//!
//! [`KeyStore`] owns all asymmetric signing material: generation, scheduled
//! and emergency rotation, the public JWKS document, and the authenticated
//! internal path that hands private material to the token issuer — and to
//! nothing else.

mod jwk;
mod keystore;

pub use jwk::{Jwk, Jwks};
pub use keystore::{
    ActiveSigningKey, KeyRecord, KeyStatus, KeyStore, KeyStorage, RotationReason, SigningAlg,
    SigningKeyWithPrivate,
};
