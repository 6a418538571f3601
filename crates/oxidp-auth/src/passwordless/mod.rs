//! Passwordless authentication.
//!
//! - [`webauthn`] - Passkey registration and assertion ceremonies
//! - [`email_otp`] - Email one-time codes with attempt and rate limits

pub mod email_otp;
pub mod webauthn;

pub use email_otp::{EmailOtpService, EmailSender, VerifiedEmail};
pub use webauthn::{PasskeyService, VerifiedPasskey};
