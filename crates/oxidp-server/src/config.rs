//! Server configuration.
//!
//! Layered loading: defaults, then an optional TOML file, then `OXIDP_*`
//! environment variables (`__` separates nesting). Secrets come exclusively
//! from the environment; missing ones fail closed at bootstrap, not at first
//! use.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use oxidp_auth::config::AuthConfig;
use oxidp_auth::types::{ClientContract, TenantContract};

/// Root server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,

    /// Key-manager bearer secret. Absent ⇒ every privileged key operation is
    /// denied (fail closed). Environment: `OXIDP_KEY_MANAGER_SECRET`.
    pub key_manager_secret: Option<String>,

    /// HMAC key for the email blind index. Environment:
    /// `OXIDP_BLIND_INDEX_KEY`.
    pub blind_index_key: Option<String>,

    /// HMAC key for policy resolution fingerprints. Environment:
    /// `OXIDP_RESOLVER_SECRET`.
    pub resolver_secret: Option<String>,

    /// Path for persisted signing keys. Unset ⇒ volatile keys (dev only).
    pub keys_file: Option<PathBuf>,

    /// Path to the tenant/client contract seed file.
    pub contracts_file: Option<PathBuf>,

    /// Sweeper interval in seconds.
    pub sweep_interval_secs: u64,

    /// Provider core configuration.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            key_manager_secret: None,
            blind_index_key: None,
            resolver_secret: None,
            keys_file: None,
            contracts_file: None,
            sweep_interval_secs: 60,
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration: defaults ← TOML file ← environment.
    ///
    /// # Errors
    ///
    /// Propagates file parse and deserialization failures.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OXIDP")
                .separator("__")
                .try_parsing(true),
        );
        let loaded: Self = builder.build()?.try_deserialize()?;
        Ok(loaded)
    }
}

/// Contract seed document: the tenants and clients loaded at startup.
/// Runtime mutation goes through the registry's atomic swap.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContractSeed {
    /// Tenant contracts.
    #[serde(default)]
    pub tenants: Vec<TenantContract>,

    /// Client contracts.
    #[serde(default)]
    pub clients: Vec<ClientContract>,
}

impl ContractSeed {
    /// Parses a seed document from TOML.
    ///
    /// # Errors
    ///
    /// TOML parse failures.
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}
