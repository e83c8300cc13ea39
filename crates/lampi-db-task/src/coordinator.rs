//! Restore coordinator
//!
//! Owns the one database connection and the one transaction of a restore run:
//!
//! 1. Resolve the manifest and read the schema script (no database yet)
//! 2. Connect and `BEGIN`
//! 3. Drop, recreate and populate the schema from the script
//! 4. `COPY` every table file, one statement at a time
//! 5. `COMMIT`, or `ROLLBACK` on the first failure
//! 6. Close the connection on every path
//!
//! A PostgreSQL connection runs one statement at a time, so the COPYs are
//! sequential. What overlaps is the network side: up to `import_prefetch`
//! table objects are opened ahead of the COPY in progress, each by its own
//! task. The first failure drops the prefetch stream, which aborts the pending
//! fetches and closes every object stream already opened, before the
//! transaction is rolled back.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument, warn};

use crate::config::{DatabaseConfig, RestoreConfig};
use crate::error::{RestoreError, RestoreResult};
use crate::import::{TableImporter, TableReport};
use crate::manifest::{ManifestResolver, SchemaScript, TableImportJob};
use crate::schema::SchemaInstaller;
use crate::storage::{ObjectBody, ObjectStore};
use crate::task_status;

/// Outcome of a committed restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub schema: String,
    pub tables: Vec<TableReport>,
    pub elapsed: Duration,
}

impl RestoreReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

pub struct TransactionCoordinator {
    store: Arc<dyn ObjectStore>,
    database: DatabaseConfig,
    restore: RestoreConfig,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, database: DatabaseConfig, restore: RestoreConfig) -> Self {
        Self {
            store,
            database,
            restore,
        }
    }

    /// Run one complete restore.
    #[instrument(
        skip(self),
        fields(
            bucket = %self.store.bucket(),
            schema = %self.restore.schema,
            database = %self.database.address(),
        )
    )]
    pub async fn run(&self) -> RestoreResult<RestoreReport> {
        let started = Instant::now();
        info!("Starting restore");

        let resolver = ManifestResolver::new(self.store.as_ref(), &self.restore.manifest_key);
        let manifest = resolver.resolve().await?;
        let jobs = manifest.jobs(&self.restore.manifest_key)?;
        let script = resolver.fetch_schema_script(&manifest).await?;

        let mut conn = self.connect().await?;
        let outcome = self.run_in_transaction(&mut conn, &script, &jobs).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        }

        let tables = outcome?;
        let report = RestoreReport {
            schema: self.restore.schema.clone(),
            tables,
            elapsed: started.elapsed(),
        };

        info!(
            tables = report.tables.len(),
            rows = report.total_rows(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Restore committed"
        );

        Ok(report)
    }

    async fn connect(&self) -> RestoreResult<PgConnection> {
        let failed = |source| RestoreError::ConnectionFailed {
            host: self.database.host.clone(),
            port: self.database.port,
            source,
        };

        let timeout = Duration::from_secs(self.database.connect_timeout_secs);
        let options = self.database.connect_options();

        match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => {
                info!("Connected to database");
                Ok(conn)
            },
            Ok(Err(e)) => Err(failed(e)),
            Err(_) => Err(failed(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection after {}s", timeout.as_secs()),
            )))),
        }
    }

    async fn run_in_transaction(
        &self,
        conn: &mut PgConnection,
        script: &SchemaScript,
        jobs: &[TableImportJob],
    ) -> RestoreResult<Vec<TableReport>> {
        let mut tx = conn
            .begin()
            .await
            .map_err(|source| RestoreError::TransactionFailed {
                stage: "BEGIN",
                source,
            })?;

        match self.load(&mut tx, script, jobs).await {
            Ok(tables) => {
                tx.commit()
                    .await
                    .map_err(|source| RestoreError::TransactionFailed {
                        stage: "COMMIT",
                        source,
                    })?;
                Ok(tables)
            },
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Restore failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "ROLLBACK failed");
                }
                Err(e)
            },
        }
    }

    /// Everything that happens between BEGIN and COMMIT
    async fn load(
        &self,
        conn: &mut PgConnection,
        script: &SchemaScript,
        jobs: &[TableImportJob],
    ) -> RestoreResult<Vec<TableReport>> {
        let schema = self.restore.schema.as_str();
        SchemaInstaller::new(schema).install(conn, script).await?;

        let mut sink = CopySink {
            conn: &mut *conn,
            importer: TableImporter::new(schema),
        };
        let tables = import_in_order(
            &self.store,
            jobs,
            self.restore.import_prefetch,
            &mut sink,
        )
        .await?;

        if let Some(task_name) = &self.restore.task_name {
            task_status::mark_completed(conn, task_name).await?;
        }

        Ok(tables)
    }
}

/// Consumes opened table bodies, one at a time, in manifest order
#[async_trait]
pub trait TableSink: Send {
    async fn load(&mut self, job: &TableImportJob, body: ObjectBody) -> RestoreResult<TableReport>;
}

/// `COPY`s each body on the restore transaction
struct CopySink<'c> {
    conn: &'c mut PgConnection,
    importer: TableImporter<'c>,
}

#[async_trait]
impl TableSink for CopySink<'_> {
    async fn load(&mut self, job: &TableImportJob, body: ObjectBody) -> RestoreResult<TableReport> {
        self.importer.import_body(&mut *self.conn, job, body).await
    }
}

/// Feed every job's object to `sink` in order, keeping up to `prefetch`
/// objects open at once, the one being loaded included.
///
/// Fetches run as their own tasks so they progress while `sink` is busy.
/// Returns the first failure. By then every prefetch task has been aborted and
/// every prefetched object stream dropped, so nothing is still reading from
/// the store when the caller rolls back.
pub async fn import_in_order(
    store: &Arc<dyn ObjectStore>,
    jobs: &[TableImportJob],
    prefetch: usize,
    sink: &mut dyn TableSink,
) -> RestoreResult<Vec<TableReport>> {
    let mut bodies = stream::iter(jobs)
        .map(|job| {
            let task = PrefetchTask::spawn(Arc::clone(store), job.clone());
            async move {
                let body = match task.await {
                    Ok(fetched) => fetched,
                    Err(join_err) => Err(RestoreError::table_import(
                        &job.table_name,
                        &job.source_key,
                        join_err,
                    )),
                };
                (job, body)
            }
        })
        .buffered(prefetch.max(1));

    let mut tables = Vec::with_capacity(jobs.len());
    while let Some((job, body)) = bodies.next().await {
        let loaded = match body {
            Ok(body) => sink.load(job, body).await,
            Err(e) => Err(e),
        };

        match loaded {
            Ok(report) => tables.push(report),
            Err(e) => {
                let remaining = jobs.len() - tables.len() - 1;
                if remaining > 0 {
                    warn!(remaining, "Cancelling remaining table imports");
                }
                drop(bodies);
                return Err(e);
            },
        }
    }

    Ok(tables)
}

/// One object fetch running on the runtime. Aborted when dropped.
struct PrefetchTask(JoinHandle<RestoreResult<ObjectBody>>);

impl PrefetchTask {
    fn spawn(store: Arc<dyn ObjectStore>, job: TableImportJob) -> Self {
        Self(tokio::spawn(async move {
            store
                .fetch(&job.source_key, job.version.as_deref())
                .await
                .map_err(|e| RestoreError::table_import(&job.table_name, &job.source_key, e))
        }))
    }
}

impl Future for PrefetchTask {
    type Output = Result<RestoreResult<ObjectBody>, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl Drop for PrefetchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
