//! Configuration management

use lampi_common::env::{optional_env, parsed_or, require_env, require_parsed};
use lampi_common::{LampiError, Result};
use sqlx::postgres::PgConnectOptions;

use crate::sql;
use crate::storage::StorageConfig;

// ============================================================================
// Restore Configuration Constants
// ============================================================================

/// Well-known key of the manifest object.
pub const DEFAULT_MANIFEST_KEY: &str = "manifest.json";

/// Schema the Koodisto tables are restored into.
pub const DEFAULT_TARGET_SCHEMA: &str = "koodisto";

/// Table objects opened ahead of the COPY currently running.
pub const DEFAULT_IMPORT_PREFETCH: usize = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

const APPLICATION_NAME: &str = "lampi-db-task";

/// Full task configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub restore: RestoreConfig,
}

/// Target PostgreSQL database
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub connect_timeout_secs: u64,
}

/// What to restore and how
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub manifest_key: String,
    pub schema: String,
    /// How many table objects may be open at once, counting the one being copied
    pub import_prefetch: usize,
    /// When set, `public.task_status` gets a completed row for this task name
    pub task_name: Option<String>,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    ///
    /// Values are only parsed here. Call [`Config::validate`] once any
    /// command-line overrides have been applied.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            restore: RestoreConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.storage.validate()?;
        self.restore.validate()
    }
}

impl DatabaseConfig {
    /// Reads `PG_HOST`, `PG_PORT`, `DB_NAME`, `POSTGRES_USER` and
    /// `POSTGRES_PASSWORD`, all required.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: require_env("PG_HOST")?,
            port: require_parsed("PG_PORT")?,
            database: require_env("DB_NAME")?,
            username: require_env("POSTGRES_USER")?,
            password: require_env("POSTGRES_PASSWORD")?,
            connect_timeout_secs: parsed_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LampiError::Config("Database host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(LampiError::Config("Database port must be greater than 0".to_string()));
        }

        if self.connect_timeout_secs == 0 {
            return Err(LampiError::Config(
                "Database connect timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `host:port`, as shown in failure messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .application_name(APPLICATION_NAME)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl RestoreConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            manifest_key: optional_env("MANIFEST_KEY")
                .unwrap_or_else(|| DEFAULT_MANIFEST_KEY.to_string()),
            schema: optional_env("TARGET_SCHEMA")
                .unwrap_or_else(|| DEFAULT_TARGET_SCHEMA.to_string()),
            import_prefetch: parsed_or("IMPORT_PREFETCH", DEFAULT_IMPORT_PREFETCH)?,
            task_name: optional_env("TASK_STATUS_NAME"),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.manifest_key.trim().is_empty() {
            return Err(LampiError::Config("Manifest key cannot be empty".to_string()));
        }

        // The schema script refers to the schema unquoted, so only names that
        // PostgreSQL folds to themselves are accepted.
        if !sql::is_plain_identifier(&self.schema) {
            return Err(LampiError::Config(format!(
                "Target schema {:?} must be a lowercase SQL identifier",
                self.schema
            )));
        }

        if self.import_prefetch == 0 {
            return Err(LampiError::Config(
                "Import prefetch must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.task_name, Some(name) if name.trim().is_empty()) {
            return Err(LampiError::Config("Task name cannot be blank".to_string()));
        }

        Ok(())
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            manifest_key: DEFAULT_MANIFEST_KEY.to_string(),
            schema: DEFAULT_TARGET_SCHEMA.to_string(),
            import_prefetch: DEFAULT_IMPORT_PREFETCH,
            task_name: None,
        }
    }
}
