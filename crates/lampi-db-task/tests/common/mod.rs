//! Shared harness for the restore integration tests
//!
//! Spins up PostgreSQL and MinIO with testcontainers. Every test that uses it
//! needs a running Docker daemon and is marked `#[ignore]`:
//!
//! ```bash
//! cargo test -p lampi-db-task -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client as S3Client,
};
use lampi_db_task::config::{DatabaseConfig, RestoreConfig};
use lampi_db_task::storage::memory::MemoryStore;
use lampi_db_task::storage::StorageConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::{minio::MinIO, postgres::Postgres};
use tracing::{debug, info};

pub const TEST_BUCKET: &str = "oph-lampi-test";

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

pub const SCHEMA_SQL: &str = include_str!("../fixtures/schema.sql");
pub const KOODI_CSV: &str = include_str!("../fixtures/koodi.csv");
pub const RELAATIO_CSV: &str = include_str!("../fixtures/relaatio.csv");
pub const MANIFEST_JSON: &str = include_str!("../fixtures/manifest.json");

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,lampi_db_task=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// Object store holding the Koodisto fixture export
pub fn fixture_store() -> MemoryStore {
    MemoryStore::new(TEST_BUCKET)
        .with_object("manifest.json", MANIFEST_JSON)
        .with_object("schema.sql", SCHEMA_SQL)
        .with_object("koodi.csv", KOODI_CSV)
        .with_object("relaatio.csv", RELAATIO_CSV)
        .with_chunk_size(64)
}

pub fn restore_config() -> RestoreConfig {
    RestoreConfig::default()
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    host: String,
    port: u16,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?
            .to_string();
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            host,
            port,
        })
    }

    /// Pool for assertions, separate from the connection the restore opens
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            host: self.host.clone(),
            port: self.port,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            connect_timeout_secs: 30,
        }
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows in {}", table))?;
        Ok(count)
    }

    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .context("Failed to query schemata")?;
        Ok(exists)
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .context("Failed to execute SQL")?;
        Ok(())
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    container: ContainerAsync<MinIO>,
    client: S3Client,
    endpoint: String,
}

impl TestMinio {
    /// Start MinIO and create [`TEST_BUCKET`]
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = MinIO::default()
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let config = aws_sdk_s3::Config::builder()
            .credentials_provider(Credentials::new(
                MINIO_ACCESS_KEY,
                MINIO_SECRET_KEY,
                None,
                None,
                "static",
            ))
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();
        let client = S3Client::from_conf(config);

        client
            .create_bucket()
            .bucket(TEST_BUCKET)
            .send()
            .await
            .context("Failed to create S3 bucket")?;

        Ok(Self {
            container,
            client,
            endpoint,
        })
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::for_local(&self.endpoint, TEST_BUCKET, MINIO_ACCESS_KEY, MINIO_SECRET_KEY)
    }

    pub async fn upload(&self, key: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.client
            .put_object()
            .bucket(TEST_BUCKET)
            .key(key)
            .body(ByteStream::from(data.into()))
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        Ok(())
    }

    /// Upload the Koodisto fixture export
    pub async fn upload_fixtures(&self) -> Result<()> {
        self.upload("manifest.json", MANIFEST_JSON).await?;
        self.upload("schema.sql", SCHEMA_SQL).await?;
        self.upload("koodi.csv", KOODI_CSV).await?;
        self.upload("relaatio.csv", RELAATIO_CSV).await
    }
}
