use std::env;
use std::sync::OnceLock;

/// Environment variable key for the optional master key that enables
/// reversible credential storage
const ENV_MASTER_KEY: &str = "SLXDB_KEY_ENCRYPTION_KEY";

/// Environment variable key for the listen address
const ENV_LISTEN_ADDR: &str = "SLXDB_STATE_LISTEN_ADDR";

/// Default listen address
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3004";

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Operator-supplied master key. When absent, envelope encryption is
    /// disabled and credentials are stored hash-only.
    pub master_key: Option<String>,

    /// Address the HTTP surface binds to
    pub listen_addr: String,
}

/// Singleton instance of the ServiceConfig
static SERVICE_CONFIG: OnceLock<ServiceConfig> = OnceLock::new();

impl ServiceConfig {
    /// Create a new ServiceConfig by loading values from environment
    /// variables
    pub fn new() -> Self {
        let master_key = env::var(ENV_MASTER_KEY).ok().filter(|k| !k.is_empty());
        if master_key.is_none() {
            log::info!(
                "{} not set; API keys will be stored hash-only and cannot be redisplayed",
                ENV_MASTER_KEY
            );
        }

        let listen_addr =
            env::var(ENV_LISTEN_ADDR).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

        Self {
            master_key,
            listen_addr,
        }
    }

    /// Get the global ServiceConfig, initializing it from the environment on
    /// first use
    pub fn global() -> &'static ServiceConfig {
        SERVICE_CONFIG.get_or_init(ServiceConfig::new)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}
