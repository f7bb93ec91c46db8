//! Adapter configuration via `facetdb.toml`
//!
//! Every tunable of the adapter is an explicit field here and is passed into
//! [`DocumentAdapter::open`](crate::DocumentAdapter::open). Nothing is read
//! from the process environment.

use facetdb_concurrency::{GovernorConfig, DEFAULT_FIND_CONCURRENCY, DEFAULT_TX_CONCURRENCY};
use facetdb_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "facetdb.toml";

/// Default number of operations per bulk write
pub const DEFAULT_BULK_BATCH_SIZE: usize = 500;

/// Default number of computed hashes buffered before a flush
pub const DEFAULT_HASH_FLUSH_THRESHOLD: usize = 500;

/// Default page size of hash iterator scans
pub const DEFAULT_HASH_PAGE_SIZE: usize = 1000;

/// Default bound on nested lookup depth
pub const DEFAULT_MAX_LOOKUP_DEPTH: usize = 8;

/// Adapter configuration loaded from `facetdb.toml`.
///
/// # Example
///
/// ```toml
/// find_concurrency = 100
/// tx_concurrency = 10
/// bulk_batch_size = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Concurrent read requests admitted
    #[serde(default = "default_find_concurrency")]
    pub find_concurrency: usize,
    /// Concurrent transaction batches admitted
    #[serde(default = "default_tx_concurrency")]
    pub tx_concurrency: usize,
    /// Operations per bulk write; longer lists are split
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,
    /// Computed hashes buffered by the hash iterator before a flush
    #[serde(default = "default_hash_flush_threshold")]
    pub hash_flush_threshold: usize,
    /// Documents fetched per hash iterator page
    #[serde(default = "default_hash_page_size")]
    pub hash_page_size: usize,
    /// Deepest nested lookup accepted
    #[serde(default = "default_max_lookup_depth")]
    pub max_lookup_depth: usize,
}

fn default_find_concurrency() -> usize {
    DEFAULT_FIND_CONCURRENCY
}

fn default_tx_concurrency() -> usize {
    DEFAULT_TX_CONCURRENCY
}

fn default_bulk_batch_size() -> usize {
    DEFAULT_BULK_BATCH_SIZE
}

fn default_hash_flush_threshold() -> usize {
    DEFAULT_HASH_FLUSH_THRESHOLD
}

fn default_hash_page_size() -> usize {
    DEFAULT_HASH_PAGE_SIZE
}

fn default_max_lookup_depth() -> usize {
    DEFAULT_MAX_LOOKUP_DEPTH
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            find_concurrency: DEFAULT_FIND_CONCURRENCY,
            tx_concurrency: DEFAULT_TX_CONCURRENCY,
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            hash_flush_threshold: DEFAULT_HASH_FLUSH_THRESHOLD,
            hash_page_size: DEFAULT_HASH_PAGE_SIZE,
            max_lookup_depth: DEFAULT_MAX_LOOKUP_DEPTH,
        }
    }
}

impl AdapterConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# facetdb adapter configuration

# Concurrent read (find) requests admitted at once (default: 100).
# Further requests wait for a slot.
find_concurrency = 100

# Concurrent transaction batches admitted at once (default: 10).
tx_concurrency = 10

# Operations per backend bulk write (default: 500).
bulk_batch_size = 500

# Computed hashes buffered by the hash iterator before they are
# written back (default: 500).
hash_flush_threshold = 500

# Documents fetched per hash iterator page (default: 1000).
hash_page_size = 1000

# Deepest nested lookup accepted (default: 8).
max_lookup_depth = 8
"#
    }

    /// Parse and validate TOML content.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the content cannot be parsed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AdapterConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{} ('{}')", e, path.display())))
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write config file '{}': {}", path.display(), e))
        })
    }

    /// Reject zero capacities and sizes
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("find_concurrency", self.find_concurrency),
            ("tx_concurrency", self.tx_concurrency),
            ("bulk_batch_size", self.bulk_batch_size),
            ("hash_flush_threshold", self.hash_flush_threshold),
            ("hash_page_size", self.hash_page_size),
            ("max_lookup_depth", self.max_lookup_depth),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    /// Admission gate capacities
    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            find_concurrency: self.find_concurrency,
            tx_concurrency: self.tx_concurrency,
        }
    }
}
