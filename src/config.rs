use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub thesaurus: ThesaurusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub traversal: TraversalLimits,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Core settings
#[derive(Debug, Clone, Deserialize)]
pub struct ThesaurusConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Tenant used by the CLI when `--tenant` is not given
    #[serde(default)]
    pub default_tenant: Option<Uuid>,
}

/// SQLite connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// How long a writer waits for the write lock held by another transaction
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Caps applied to every traversal. Requests above a cap are clamped, never rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct TraversalLimits {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_paths")]
    pub default_max_paths: usize,
    #[serde(default = "default_max_paths_limit")]
    pub max_paths_limit: usize,
    /// Upper bound on partial paths held during ancestor path enumeration
    #[serde(default = "default_max_explored_states")]
    pub max_explored_states: usize,
    #[serde(default = "default_graph_max_nodes")]
    pub graph_max_nodes: usize,
    #[serde(default = "default_graph_max_edges")]
    pub graph_max_edges: usize,
    #[serde(default = "default_expand_max_depth")]
    pub expand_max_depth: usize,
    #[serde(default = "default_expand_max_terms")]
    pub expand_max_terms: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            default_max_paths: default_max_paths(),
            max_paths_limit: default_max_paths_limit(),
            max_explored_states: default_max_explored_states(),
            graph_max_nodes: default_graph_max_nodes(),
            graph_max_edges: default_graph_max_edges(),
            expand_max_depth: default_expand_max_depth(),
            expand_max_terms: default_expand_max_terms(),
        }
    }
}

/// Page size settings for keyset-paginated listings
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,
    #[serde(default = "default_page_max_limit")]
    pub max_limit: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_page_max_limit(),
        }
    }
}

impl PaginationConfig {
    /// Resolve a requested page size against the configured default and ceiling.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_depth() -> usize {
    20
}

fn default_max_paths() -> usize {
    10
}

fn default_max_paths_limit() -> usize {
    50
}

fn default_max_explored_states() -> usize {
    10_000
}

fn default_graph_max_nodes() -> usize {
    500
}

fn default_graph_max_edges() -> usize {
    2_000
}

fn default_expand_max_depth() -> usize {
    5
}

fn default_expand_max_terms() -> usize {
    500
}

fn default_page_limit() -> usize {
    50
}

fn default_page_max_limit() -> usize {
    200
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in THESAURUS_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("THESAURUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.thesaurus.db_path.as_os_str().is_empty() {
            anyhow::bail!("thesaurus.db_path must not be empty");
        }

        let t = &self.traversal;
        if t.max_depth == 0 || t.max_depth > 64 {
            anyhow::bail!("traversal.max_depth must be between 1 and 64");
        }
        if t.max_paths_limit == 0 {
            anyhow::bail!("traversal.max_paths_limit must be greater than 0");
        }
        if t.default_max_paths == 0 || t.default_max_paths > t.max_paths_limit {
            anyhow::bail!("traversal.default_max_paths must be between 1 and max_paths_limit");
        }
        if t.max_explored_states < t.max_paths_limit {
            anyhow::bail!("traversal.max_explored_states must be at least max_paths_limit");
        }
        if t.graph_max_nodes == 0 || t.graph_max_edges == 0 {
            anyhow::bail!("traversal.graph_max_nodes and graph_max_edges must be greater than 0");
        }
        if t.expand_max_depth > 5 {
            anyhow::bail!("traversal.expand_max_depth must not exceed 5");
        }
        if t.expand_max_terms == 0 {
            anyhow::bail!("traversal.expand_max_terms must be greater than 0");
        }

        if self.pagination.default_limit == 0 {
            anyhow::bail!("pagination.default_limit must be greater than 0");
        }
        if self.pagination.default_limit > self.pagination.max_limit {
            anyhow::bail!("pagination.default_limit must not exceed pagination.max_limit");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.thesaurus.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.thesaurus.migrations_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const MINIMAL: &str = r#"
[thesaurus]
db_path = "./thesaurus.db"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.thesaurus.log_level, "info");
        assert_eq!(config.migrations_dir(), Path::new("migrations"));
        assert_eq!(config.traversal.max_depth, 20);
        assert_eq!(config.traversal.expand_max_depth, 5);
        assert_eq!(config.pagination.default_limit, 50);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert!(config.thesaurus.default_tenant.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
[thesaurus]
db_path = "/var/lib/thesaurus.db"
log_level = "debug"
default_tenant = "6f1c2d3e-0000-4000-8000-000000000001"

[database]
busy_timeout_ms = 250

[traversal]
max_depth = 10
default_max_paths = 3
max_paths_limit = 5
max_explored_states = 100

[pagination]
default_limit = 20
max_limit = 100
"#,
        )
        .unwrap();
        assert_eq!(config.thesaurus.log_level, "debug");
        assert_eq!(config.traversal.max_depth, 10);
        assert_eq!(config.traversal.graph_max_nodes, 500);
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(config.thesaurus.default_tenant.is_some());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let bad_depth = format!("{}\n[traversal]\nmax_depth = 0\n", MINIMAL);
        assert!(Config::from_toml_str(&bad_depth).is_err());

        let bad_expand = format!("{}\n[traversal]\nexpand_max_depth = 9\n", MINIMAL);
        assert!(Config::from_toml_str(&bad_expand).is_err());

        let bad_page = format!("{}\n[pagination]\ndefault_limit = 500\nmax_limit = 100\n", MINIMAL);
        assert!(Config::from_toml_str(&bad_page).is_err());
    }

    #[test]
    fn test_pagination_clamp() {
        let p = PaginationConfig::default();
        assert_eq!(p.clamp(None), 50);
        assert_eq!(p.clamp(Some(0)), 1);
        assert_eq!(p.clamp(Some(10_000)), 200);
    }

    #[test]
    fn test_config_load_from_env_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, MINIMAL).unwrap();

        let original = std::env::var("THESAURUS_CONFIG").ok();
        std::env::set_var("THESAURUS_CONFIG", config_path.to_str().unwrap());
        let config = Config::load();
        std::env::remove_var("THESAURUS_CONFIG");
        if let Some(v) = original {
            std::env::set_var("THESAURUS_CONFIG", v);
        }

        let config = config.unwrap();
        assert_eq!(config.db_path(), Path::new("./thesaurus.db"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("THESAURUS_CONFIG").ok();
        std::env::set_var("THESAURUS_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("THESAURUS_CONFIG");
        if let Some(v) = original {
            std::env::set_var("THESAURUS_CONFIG", v);
        }
    }
}
