//! Compact JWE encryption.
//!
//! Used when a client contract declares signed-and-encrypted delivery of ID
//! tokens or userinfo responses. Key management is RSA-OAEP-256 against the
//! client's registered encryption JWK; content encryption is A256GCM with the
//! protected header as AAD, per RFC 7516 §5.1.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::error::{AuthError, AuthResult};
use crate::keys::Jwk;

/// Builds an RSA public key from an RSA JWK's `n`/`e` components.
fn rsa_public_key(jwk: &Jwk) -> AuthResult<RsaPublicKey> {
    if jwk.kty != "RSA" {
        return Err(AuthError::invalid_request(format!(
            "JWE recipient key must be RSA, got '{}'",
            jwk.kty
        )));
    }
    let n = jwk
        .n
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("recipient JWK missing modulus"))?;
    let e = jwk
        .e
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("recipient JWK missing exponent"))?;
    let n = URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|_| AuthError::invalid_request("recipient JWK modulus is not base64url"))?;
    let e = URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|_| AuthError::invalid_request("recipient JWK exponent is not base64url"))?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|err| AuthError::invalid_request(format!("invalid recipient key: {err}")))
}

/// Encrypts a signed JWT into a compact JWE for the given recipient key.
///
/// The result is the five-part compact serialization:
/// `header.encrypted_key.iv.ciphertext.tag`.
///
/// # Errors
///
/// Fails when the recipient key is unusable or encryption fails.
pub fn encrypt(signed_jwt: &str, recipient: &Jwk) -> AuthResult<String> {
    let public_key = rsa_public_key(recipient)?;

    let header = serde_json::json!({
        "alg": "RSA-OAEP-256",
        "enc": "A256GCM",
        "cty": "JWT",
        "kid": recipient.kid,
    });
    let protected = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header)
            .map_err(|e| AuthError::server_error(format!("JWE header encoding: {e}")))?,
    );

    let mut cek = [0u8; 32];
    OsRng.fill_bytes(&mut cek);
    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);

    let encrypted_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &cek)
        .map_err(|e| AuthError::server_error(format!("CEK wrap failed: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| AuthError::server_error(format!("AES key setup failed: {e}")))?;
    // RFC 7516: AAD is the ASCII bytes of the encoded protected header.
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: signed_jwt.as_bytes(),
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| AuthError::server_error("content encryption failed"))?;

    // aes-gcm appends the 16-byte tag to the ciphertext.
    let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

    Ok(format!(
        "{protected}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(encrypted_key),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}
