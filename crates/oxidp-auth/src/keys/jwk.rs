//! JSON Web Key types.
//!
//! Public keys only. The private CRT parameters (`d`, `p`, `q`, `dp`, `dq`,
//! `qi`) have no fields here, so a JWKS response structurally cannot leak
//! them.

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a key by ID.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Returns the first key usable for the given JWS algorithm.
    #[must_use]
    pub fn find_for_alg(&self, alg: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.alg == alg)
    }

    /// Returns the first key marked for encryption use, if any.
    #[must_use]
    pub fn encryption_key(&self) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.use_ == "enc")
    }
}

/// A public JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Jwk {
    /// Key type: "RSA" or "EC".
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use: "sig" or "enc".
    #[serde(rename = "use")]
    pub use_: String,

    /// Intended algorithm.
    pub alg: String,

    /// RSA modulus, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Creates an RSA signature key.
    #[must_use]
    pub fn rsa(kid: impl Into<String>, alg: impl Into<String>, n: String, e: String) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: kid.into(),
            use_: "sig".to_string(),
            alg: alg.into(),
            n: Some(n),
            e: Some(e),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// Creates a P-256 signature key.
    #[must_use]
    pub fn ec_p256(kid: impl Into<String>, x: String, y: String) -> Self {
        Self {
            kty: "EC".to_string(),
            kid: kid.into(),
            use_: "sig".to_string(),
            alg: "ES256".to_string(),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(x),
            y: Some(y),
        }
    }

    /// Builds a verification key from the public components.
    ///
    /// # Errors
    ///
    /// Returns an error when the key type is unknown or a required component
    /// is missing or malformed.
    pub fn to_decoding_key(&self) -> AuthResult<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| {
                    AuthError::invalid_request("RSA JWK missing modulus")
                })?;
                let e = self.e.as_deref().ok_or_else(|| {
                    AuthError::invalid_request("RSA JWK missing exponent")
                })?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| AuthError::invalid_request(format!("invalid RSA JWK: {err}")))
            }
            "EC" => {
                let x = self
                    .x
                    .as_deref()
                    .ok_or_else(|| AuthError::invalid_request("EC JWK missing x"))?;
                let y = self
                    .y
                    .as_deref()
                    .ok_or_else(|| AuthError::invalid_request("EC JWK missing y"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| AuthError::invalid_request(format!("invalid EC JWK: {err}")))
            }
            other => Err(AuthError::invalid_request(format!(
                "unsupported JWK key type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwks_lookup() {
        let jwks = Jwks {
            keys: vec![
                Jwk::rsa("k1", "RS256", "AQAB".into(), "AQAB".into()),
                Jwk::ec_p256("k2", "eA".into(), "eQ".into()),
            ],
        };
        assert_eq!(jwks.find("k1").unwrap().kty, "RSA");
        assert_eq!(jwks.find_for_alg("ES256").unwrap().kid, "k2");
        assert!(jwks.find("nope").is_none());
        assert!(jwks.encryption_key().is_none());
    }

    #[test]
    fn test_serialization_has_no_private_fields() {
        let jwk = Jwk::rsa("k1", "RS256", "AQAB".into(), "AQAB".into());
        let json = serde_json::to_value(&jwk).unwrap();
        let obj = json.as_object().unwrap();
        for private in ["d", "p", "q", "dp", "dq", "qi"] {
            assert!(!obj.contains_key(private), "field {private} must not exist");
        }
        assert_eq!(obj["use"], "sig");
    }

    #[test]
    fn test_decoding_key_requires_components() {
        let mut jwk = Jwk::rsa("k1", "RS256", "AQAB".into(), "AQAB".into());
        jwk.n = None;
        assert!(jwk.to_decoding_key().is_err());

        let jwk = Jwk {
            kty: "oct".to_string(),
            kid: "k".to_string(),
            use_: "sig".to_string(),
            alg: "HS256".to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        assert!(jwk.to_decoding_key().is_err());
    }
}
