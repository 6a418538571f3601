//! PKCE (Proof Key for Code Exchange).
//!
//! Implements RFC 7636 with the S256 method only; "plain" offers no
//! protection against the attacks PKCE exists for and is rejected at parse
//! time. Public clients must send a challenge on every authorization request.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PkceError {
    /// Verifier length is outside the 43–128 character range.
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("Invalid verifier characters: must be unreserved URI characters")]
    InvalidVerifierCharacters,

    /// Challenge is not valid base64url.
    #[error("Invalid challenge format: must be valid base64url")]
    InvalidChallengeFormat,

    /// Challenge method other than S256.
    #[error("Unsupported challenge method: {0}. Only S256 is supported.")]
    UnsupportedMethod(String),

    /// Verifier does not hash to the stored challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// The OAuth error code for this failure.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::VerificationFailed => "invalid_grant",
            _ => "invalid_request",
        }
    }
}

/// Validates a challenge method string; only "S256" passes.
///
/// # Errors
///
/// `UnsupportedMethod` for "plain" and anything else.
pub fn parse_method(method: &str) -> Result<(), PkceError> {
    match method {
        "S256" => Ok(()),
        other => Err(PkceError::UnsupportedMethod(other.to_string())),
    }
}

/// A PKCE code verifier (RFC 7636 §4.1).
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Validates and wraps a verifier string.
    ///
    /// # Errors
    ///
    /// Length must be 43–128; characters must be unreserved.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }
        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// Generates a random 43-character verifier.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The verifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Wraps a challenge received from a client.
    ///
    /// # Errors
    ///
    /// `InvalidChallengeFormat` when not base64url.
    pub fn new(challenge: String) -> Result<Self, PkceError> {
        if URL_SAFE_NO_PAD.decode(&challenge).is_err() {
            return Err(PkceError::InvalidChallengeFormat);
        }
        Ok(Self(challenge))
    }

    /// Derives the S256 challenge from a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let digest = Sha256::digest(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Verifies a presented verifier against this challenge.
    ///
    /// # Errors
    ///
    /// `VerificationFailed` on mismatch.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        if Self::from_verifier(verifier).0 == self.0 {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// The challenge string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(challenge.as_str(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert!(challenge.verify(&verifier).is_ok());
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(matches!(
            PkceVerifier::new("a".repeat(42)),
            Err(PkceError::InvalidVerifierLength(42))
        ));
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)),
            Err(PkceError::InvalidVerifierLength(129))
        ));
    }

    #[test]
    fn test_verifier_charset() {
        assert!(PkceVerifier::new(format!("{}-._~", "a".repeat(43))).is_ok());
        assert!(matches!(
            PkceVerifier::new(format!("{}!", "a".repeat(43))),
            Err(PkceError::InvalidVerifierCharacters)
        ));
    }

    #[test]
    fn test_plain_method_rejected() {
        assert!(parse_method("S256").is_ok());
        assert!(matches!(
            parse_method("plain"),
            Err(PkceError::UnsupportedMethod(_))
        ));
        assert!(parse_method("S512").is_err());
    }

    #[test]
    fn test_mismatch_is_invalid_grant() {
        let challenge = PkceChallenge::from_verifier(&PkceVerifier::generate());
        let wrong = PkceVerifier::generate();
        let err = challenge.verify(&wrong).unwrap_err();
        assert_eq!(err, PkceError::VerificationFailed);
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[test]
    fn test_generated_verifier_is_valid() {
        let v = PkceVerifier::generate();
        assert!(PkceVerifier::new(v.as_str().to_string()).is_ok());
        // Distinct across generations.
        assert_ne!(PkceVerifier::generate().as_str(), v.as_str());
    }

    #[test]
    fn test_challenge_format_validation() {
        assert!(PkceChallenge::new("not valid base64url!!!".to_string()).is_err());
        assert!(PkceChallenge::new("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string()).is_ok());
    }
}
