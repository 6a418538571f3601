//! The signing-key store.
//!
//! Owns generation, rotation, and serving of asymmetric key material.
//! Public keys are served unauthenticated via the JWKS document; private
//! material leaves only through [`KeyStore::active_signing_key_with_private`],
//! which is gated on the key-manager bearer secret and called exclusively by
//! the token issuer.
//!
//! Rotation is single-writer: a second concurrent rotation fails with
//! `try_again` rather than queueing. A scheduled rotation keeps the prior key
//! verifying for the configured overlap window; an emergency rotation revokes
//! it immediately and drops it from the JWKS and every cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey as _;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use oxidp_core::{UnixMillis, generate_kid};

use crate::config::SigningConfig;
use crate::error::{AuthError, AuthResult};
use crate::keys::jwk::{Jwk, Jwks};

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlg {
    /// RSA-2048 with SHA-256 (primary).
    RS256,
    /// ECDSA P-256 with SHA-256 (optional).
    ES256,
}

impl SigningAlg {
    /// Parses an algorithm name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything but RS256 / ES256.
    pub fn parse(s: &str) -> AuthResult<Self> {
        match s {
            "RS256" => Ok(Self::RS256),
            "ES256" => Ok(Self::ES256),
            other => Err(AuthError::configuration(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }

    /// Converts to the `jsonwebtoken` algorithm.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
        }
    }

    /// The JOSE name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
        }
    }
}

impl fmt::Display for SigningAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Key Records
// ============================================================================

/// Lifecycle status of a managed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// The current signing key.
    Active,
    /// Superseded; still verifies during the overlap window.
    Rotating,
    /// Past the overlap window; no longer verifies, retained for audit.
    Retired,
    /// Emergency-rotated; never verifies again.
    Revoked,
}

/// Why a rotation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// Routine rotation; prior key keeps verifying for the overlap window.
    Scheduled,
    /// Compromise response; prior key is revoked immediately.
    Emergency,
}

/// A persisted managed key. The private PEM never leaves the store except
/// through the authenticated issuer path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key ID (`key-{unix-ms}-{uuid}`).
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlg,

    /// Lifecycle status.
    pub status: KeyStatus,

    /// PKCS#8 PEM private key.
    pub private_pem: String,

    /// Public JWK for the JWKS document.
    pub public_jwk: Jwk,

    /// Generation time.
    pub created_at: UnixMillis,

    /// When the key left `Active`, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<UnixMillis>,

    /// When a `Rotating` key demotes to `Retired`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retire_at: Option<UnixMillis>,
}

impl KeyRecord {
    /// Generates a fresh key pair for the given algorithm.
    ///
    /// # Errors
    ///
    /// Returns a server error if key generation or encoding fails.
    pub fn generate(algorithm: SigningAlg) -> AuthResult<Self> {
        let kid = generate_kid();
        let (private_pem, public_jwk) = match algorithm {
            SigningAlg::RS256 => {
                let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
                    .map_err(|e| AuthError::server_error(format!("RSA keygen failed: {e}")))?;
                let public_key = private_key.to_public_key();
                let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
                let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
                let pem = private_key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::server_error(format!("PKCS#8 encoding failed: {e}")))?
                    .to_string();
                (pem, Jwk::rsa(&kid, "RS256", n, e))
            }
            SigningAlg::ES256 => {
                let secret = p256::SecretKey::random(&mut OsRng);
                let point = secret.public_key().to_encoded_point(false);
                let x = point
                    .x()
                    .ok_or_else(|| AuthError::server_error("P-256 point missing x"))?;
                let y = point
                    .y()
                    .ok_or_else(|| AuthError::server_error("P-256 point missing y"))?;
                let pem = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| AuthError::server_error(format!("PKCS#8 encoding failed: {e}")))?
                    .to_string();
                (
                    pem,
                    Jwk::ec_p256(
                        &kid,
                        URL_SAFE_NO_PAD.encode(x.as_slice()),
                        URL_SAFE_NO_PAD.encode(y.as_slice()),
                    ),
                )
            }
        };

        Ok(Self {
            kid,
            algorithm,
            status: KeyStatus::Active,
            private_pem,
            public_jwk,
            created_at: UnixMillis::now(),
            rotated_at: None,
            retire_at: None,
        })
    }

    /// Returns `true` if this key may verify signatures right now.
    #[must_use]
    pub fn verifies(&self) -> bool {
        matches!(self.status, KeyStatus::Active | KeyStatus::Rotating)
    }
}

/// Persistence boundary for managed keys. Implementations must survive
/// process restart.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Loads every persisted key.
    async fn load_all(&self) -> AuthResult<Vec<KeyRecord>>;

    /// Inserts or replaces a key record.
    async fn put(&self, record: &KeyRecord) -> AuthResult<()>;
}

// ============================================================================
// Served key shapes
// ============================================================================

/// The active key without private material.
#[derive(Debug, Clone)]
pub struct ActiveSigningKey {
    /// Key ID.
    pub kid: String,
    /// Algorithm.
    pub algorithm: SigningAlg,
    /// Public JWK.
    pub public_jwk: Jwk,
}

/// The active key including its encoding (private) key. Only the token
/// issuer's signing path may hold one.
pub struct SigningKeyWithPrivate {
    /// Key ID.
    pub kid: String,
    /// Algorithm.
    pub algorithm: SigningAlg,
    /// Private encoding key.
    pub encoding_key: Arc<EncodingKey>,
    /// Public JWK.
    pub public_jwk: Jwk,
}

// ============================================================================
// KeyStore
// ============================================================================

/// The signing-key store.
pub struct KeyStore {
    storage: Arc<dyn KeyStorage>,
    /// SHA-256 of the key-manager bearer secret; `None` fails every
    /// privileged call.
    manager_secret_digest: Option<[u8; 32]>,
    keys: RwLock<HashMap<String, KeyRecord>>,
    decoding_cache: moka::sync::Cache<String, Arc<DecodingKey>>,
    encoding_cache: moka::sync::Cache<String, Arc<EncodingKey>>,
    rotation_lock: Mutex<()>,
    overlap: Duration,
    algorithm: SigningAlg,
}

impl KeyStore {
    /// Creates a store over the given persistence backend.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the algorithm name is unsupported.
    pub fn new(
        storage: Arc<dyn KeyStorage>,
        manager_secret: Option<&str>,
        config: &SigningConfig,
    ) -> AuthResult<Self> {
        let algorithm = SigningAlg::parse(&config.algorithm)?;
        let cache_ttl = config.key_cache_ttl;
        Ok(Self {
            storage,
            manager_secret_digest: manager_secret
                .map(|s| Sha256::digest(s.as_bytes()).into()),
            keys: RwLock::new(HashMap::new()),
            decoding_cache: moka::sync::Cache::builder()
                .time_to_live(cache_ttl)
                .max_capacity(64)
                .build(),
            encoding_cache: moka::sync::Cache::builder()
                .time_to_live(cache_ttl)
                .max_capacity(8)
                .build(),
            rotation_lock: Mutex::new(()),
            overlap: config.rotation_overlap,
            algorithm,
        })
    }

    /// Loads persisted keys and generates the first key when none exists.
    ///
    /// # Errors
    ///
    /// Propagates storage and generation failures.
    pub async fn initialize(&self) -> AuthResult<()> {
        let loaded = self.storage.load_all().await?;
        let mut keys = self.keys.write().await;
        for record in loaded {
            keys.insert(record.kid.clone(), record);
        }
        let has_active = keys.values().any(|k| k.status == KeyStatus::Active);
        if !has_active {
            let record = KeyRecord::generate(self.algorithm)?;
            info!(kid = %record.kid, alg = %record.algorithm, "generated initial signing key");
            self.storage.put(&record).await?;
            keys.insert(record.kid.clone(), record);
        }
        Ok(())
    }

    /// Constant-time bearer check. Fails closed when no secret is configured.
    fn authorize(&self, bearer: &str) -> AuthResult<()> {
        let Some(expected) = &self.manager_secret_digest else {
            return Err(AuthError::configuration(
                "key manager secret not configured; all privileged key operations denied",
            ));
        };
        let presented: [u8; 32] = Sha256::digest(bearer.as_bytes()).into();
        if presented.ct_eq(expected).into() {
            Ok(())
        } else {
            Err(AuthError::invalid_client("key manager authentication failed"))
        }
    }

    /// Demotes `Rotating` keys whose overlap window elapsed.
    async fn demote_expired(&self) {
        let now = UnixMillis::now();
        let mut demoted: Vec<KeyRecord> = Vec::new();
        {
            let mut keys = self.keys.write().await;
            for record in keys.values_mut() {
                if record.status == KeyStatus::Rotating
                    && record.retire_at.is_some_and(|t| !now.is_before(t))
                {
                    record.status = KeyStatus::Retired;
                    demoted.push(record.clone());
                }
            }
        }
        for record in demoted {
            self.decoding_cache.invalidate(&record.kid);
            if let Err(e) = self.storage.put(&record).await {
                warn!(kid = %record.kid, error = %e, "failed to persist key demotion");
            }
        }
    }

    /// The public JWKS document: every `Active` and `Rotating` key.
    pub async fn jwks(&self) -> Jwks {
        self.demote_expired().await;
        let keys = self.keys.read().await;
        let mut out: Vec<&KeyRecord> = keys.values().filter(|k| k.verifies()).collect();
        // Stable output: newest first.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Jwks {
            keys: out.into_iter().map(|k| k.public_jwk.clone()).collect(),
        }
    }

    /// The active key, public parts only. Authenticated.
    ///
    /// # Errors
    ///
    /// Fails on bad bearer or when no active key exists.
    pub async fn active_signing_key(&self, bearer: &str) -> AuthResult<ActiveSigningKey> {
        self.authorize(bearer)?;
        let keys = self.keys.read().await;
        let record = keys
            .values()
            .find(|k| k.status == KeyStatus::Active)
            .ok_or_else(|| AuthError::configuration("no active signing key"))?;
        Ok(ActiveSigningKey {
            kid: record.kid.clone(),
            algorithm: record.algorithm,
            public_jwk: record.public_jwk.clone(),
        })
    }

    /// The active key including private material. Authenticated; callable
    /// only by the token issuer.
    ///
    /// # Errors
    ///
    /// Fails on bad bearer, missing active key, or unparseable private PEM.
    pub async fn active_signing_key_with_private(
        &self,
        bearer: &str,
    ) -> AuthResult<SigningKeyWithPrivate> {
        self.authorize(bearer)?;
        let (kid, algorithm, private_pem, public_jwk) = {
            let keys = self.keys.read().await;
            let record = keys
                .values()
                .find(|k| k.status == KeyStatus::Active)
                .ok_or_else(|| AuthError::configuration("no active signing key"))?;
            (
                record.kid.clone(),
                record.algorithm,
                record.private_pem.clone(),
                record.public_jwk.clone(),
            )
        };

        let encoding_key = if let Some(cached) = self.encoding_cache.get(&kid) {
            cached
        } else {
            let key = match algorithm {
                SigningAlg::RS256 => EncodingKey::from_rsa_pem(private_pem.as_bytes()),
                SigningAlg::ES256 => EncodingKey::from_ec_pem(private_pem.as_bytes()),
            }
            .map_err(|e| AuthError::server_error(format!("private key import failed: {e}")))?;
            let key = Arc::new(key);
            self.encoding_cache.insert(kid.clone(), Arc::clone(&key));
            key
        };

        Ok(SigningKeyWithPrivate {
            kid,
            algorithm,
            encoding_key,
            public_jwk,
        })
    }

    /// Rotates the signing key. Authenticated, single-writer.
    ///
    /// Returns the new key ID.
    ///
    /// # Errors
    ///
    /// `try_again` when another rotation is in flight; storage/generation
    /// failures otherwise.
    pub async fn rotate(&self, bearer: &str, reason: RotationReason) -> AuthResult<String> {
        self.authorize(bearer)?;
        let Ok(_guard) = self.rotation_lock.try_lock() else {
            return Err(AuthError::try_again("key rotation already in progress"));
        };

        let new_record = KeyRecord::generate(self.algorithm)?;
        let now = UnixMillis::now();

        let mut superseded: Vec<KeyRecord> = Vec::new();
        {
            let mut keys = self.keys.write().await;
            for record in keys.values_mut() {
                if record.status == KeyStatus::Active {
                    record.rotated_at = Some(now);
                    match reason {
                        RotationReason::Scheduled => {
                            record.status = KeyStatus::Rotating;
                            record.retire_at = Some(now + self.overlap);
                        }
                        RotationReason::Emergency => {
                            record.status = KeyStatus::Revoked;
                            record.retire_at = Some(now);
                        }
                    }
                    superseded.push(record.clone());
                }
            }
            keys.insert(new_record.kid.clone(), new_record.clone());
        }

        // Persist the new key first so a crash cannot leave us keyless.
        self.storage.put(&new_record).await?;
        for record in &superseded {
            if record.status == KeyStatus::Revoked {
                self.decoding_cache.invalidate(&record.kid);
                self.encoding_cache.invalidate(&record.kid);
            }
            self.storage.put(record).await?;
        }

        info!(
            new_kid = %new_record.kid,
            reason = ?reason,
            superseded = superseded.len(),
            "signing key rotated"
        );
        Ok(new_record.kid)
    }

    /// Resolves a verification key by `kid`.
    ///
    /// # Errors
    ///
    /// `invalid_key` for unknown, revoked, or retired key IDs.
    pub async fn verify_key(&self, kid: &str) -> AuthResult<Arc<DecodingKey>> {
        self.demote_expired().await;

        // Cache entries for revoked keys are invalidated on rotation, so a
        // hit here is always servable.
        if let Some(cached) = self.decoding_cache.get(kid) {
            return Ok(cached);
        }

        let keys = self.keys.read().await;
        let record = keys
            .get(kid)
            .ok_or_else(|| AuthError::invalid_token(format!("invalid_key: unknown kid '{kid}'")))?;
        if !record.verifies() {
            return Err(AuthError::invalid_token(format!(
                "invalid_key: key '{kid}' is {:?}",
                record.status
            )));
        }
        let decoding = Arc::new(record.public_jwk.to_decoding_key()?);
        self.decoding_cache.insert(kid.to_string(), Arc::clone(&decoding));
        Ok(decoding)
    }

    /// The configured primary algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlg {
        self.algorithm
    }

    /// Status of a key, for tests and admin introspection.
    pub async fn key_status(&self, kid: &str) -> Option<KeyStatus> {
        self.keys.read().await.get(kid).map(|k| k.status)
    }
}
