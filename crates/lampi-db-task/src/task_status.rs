//! Completion marker in `public.task_status`
//!
//! Downstream jobs poll this table to learn that a restore finished. The row is
//! written on the restore transaction itself, so it becomes visible exactly
//! when the restored data does.

use sqlx::PgConnection;
use tracing::{info, instrument};

use crate::error::{RestoreError, RestoreResult};
use crate::sql;

#[instrument(skip(conn))]
pub async fn mark_completed(conn: &mut PgConnection, task_name: &str) -> RestoreResult<()> {
    let failed = |source| RestoreError::TransactionFailed {
        stage: "task status update",
        source,
    };

    sqlx::raw_sql(sql::CREATE_TASK_STATUS_TABLE)
        .execute(&mut *conn)
        .await
        .map_err(failed)?;

    sqlx::query(sql::MARK_TASK_COMPLETED)
        .bind(task_name)
        .execute(&mut *conn)
        .await
        .map_err(failed)?;

    info!("Task marked as completed");
    Ok(())
}
