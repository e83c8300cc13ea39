//! Streaming CSV import into one table

use sqlx::PgConnection;
use tracing::{debug, info, instrument, warn};

use crate::error::{RestoreError, RestoreResult};
use crate::manifest::TableImportJob;
use crate::sql;
use crate::storage::{ObjectBody, ObjectStore};

/// Result of loading one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub key: String,
    pub rows: u64,
    pub bytes: u64,
}

/// Pipes table objects into `COPY <schema>.<table> FROM STDIN`.
///
/// The object body is forwarded chunk by chunk as it arrives, so memory use
/// stays at roughly one chunk no matter how large the table file is.
pub struct TableImporter<'a> {
    schema: &'a str,
}

impl<'a> TableImporter<'a> {
    pub fn new(schema: &'a str) -> Self {
        Self { schema }
    }

    /// Fetch the job's object and load it.
    pub async fn import_table(
        &self,
        conn: &mut PgConnection,
        store: &dyn ObjectStore,
        job: &TableImportJob,
    ) -> RestoreResult<TableReport> {
        let body = store
            .fetch(&job.source_key, job.version.as_deref())
            .await
            .map_err(|e| RestoreError::table_import(&job.table_name, &job.source_key, e))?;

        self.import_body(conn, job, body).await
    }

    /// Load an already opened object body.
    #[instrument(skip(self, conn, job, body), fields(schema = %self.schema, table = %job.table_name))]
    pub async fn import_body(
        &self,
        conn: &mut PgConnection,
        job: &TableImportJob,
        mut body: ObjectBody,
    ) -> RestoreResult<TableReport> {
        info!(key = %job.source_key, "Importing data for table");

        let failed = |e: sqlx::Error| RestoreError::table_import(&job.table_name, &job.source_key, e);

        let statement = sql::copy_csv_from_stdin(self.schema, &job.table_name);
        let mut copy = conn.copy_in_raw(&statement).await.map_err(failed)?;

        let mut bytes = 0u64;
        while let Some(chunk) = body.next_chunk().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Leave the connection out of COPY mode so ROLLBACK can run.
                    if let Err(abort_err) = copy.abort(format!("source stream failed: {}", e)).await {
                        debug!(error = %abort_err, "COPY abort reported an error");
                    }
                    return Err(RestoreError::table_import(&job.table_name, &job.source_key, e));
                },
            };

            bytes += chunk.len() as u64;
            copy.send(chunk).await.map_err(failed)?;
        }

        let rows = copy.finish().await.map_err(failed)?;

        if rows == 0 {
            warn!(key = %job.source_key, "Table file contained no data rows");
        }
        info!(rows, bytes, "Successfully imported data for table");

        Ok(TableReport {
            table: job.table_name.clone(),
            key: job.source_key.clone(),
            rows,
            bytes,
        })
    }
}
