pub use models::{Settings, TenantConfig, TlsConfig};
/**
 * Janus configuration root module.
 *
 * - Defines the tenant registry and its JSON file loading.
 * - Uses `models.rs` for the configuration structs and `defaults.rs` for
 *   default helpers.
 */
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub mod defaults;
pub mod models;

/// Read-only mapping from tenant id to its configuration.
///
/// Loaded once at startup from a JSON array of [`TenantConfig`] records.
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    tenants: HashMap<String, TenantConfig>,
}

impl TenantRegistry {
    /// Compute the tenant file path, honoring the `CONFIG_PATH` override.
    pub fn default_path() -> PathBuf {
        if let Some(override_path) = std::env::var_os("CONFIG_PATH") {
            return PathBuf::from(override_path);
        }
        defaults::default_config_path()
    }

    /// Load the registry from a JSON tenant file.
    ///
    /// The file must contain an array of tenant records. Duplicate ids keep
    /// the last record and log a warning.
    ///
    /// # Arguments
    /// * `path` - Path to the tenant file.
    ///
    /// # Returns
    /// The loaded registry, or a ConfigError naming the path and cause.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Reading tenant configuration from {:?}", path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), format!("I/O error: {}", e)))?;
        Self::parse_with_path(path, &text)
    }

    fn parse_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let records: Vec<TenantConfig> = serde_json::from_str(text).map_err(|e| {
            ConfigError::Parse(
                path.to_path_buf(),
                format!(
                    "json error at line {}, column {}: {}",
                    e.line(),
                    e.column(),
                    e
                ),
            )
        })?;

        let mut tenants = HashMap::with_capacity(records.len());
        for tenant in records {
            if tenants.insert(tenant.id.clone(), tenant).is_some() {
                tracing::warn!("Duplicate tenant id in tenant file; keeping the last record");
            }
        }
        Ok(Self { tenants })
    }

    /// Build a registry from in-memory records (tests, embedded setups).
    pub fn from_tenants(records: Vec<TenantConfig>) -> Self {
        let tenants = records.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { tenants }
    }

    /// Look up a tenant by id.
    pub fn lookup(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

// Errors during configuration loading/parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the tenant file.
    ///
    /// Tuple fields:
    /// - 0: Path to the tenant file that failed to load
    /// - 1: Error message from the underlying reader/parser
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),
}
