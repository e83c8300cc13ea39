//! Target schema (re)creation

use sqlx::PgConnection;
use tracing::{info, instrument};

use crate::error::{RestoreError, RestoreResult};
use crate::manifest::SchemaScript;
use crate::sql;

/// Drops and recreates the target schema, then applies the DDL script.
///
/// Runs on the caller's transaction. Every statement goes through the simple
/// query protocol, which lets the DDL script contain several statements and
/// never commits on its own.
pub struct SchemaInstaller<'a> {
    schema: &'a str,
}

impl<'a> SchemaInstaller<'a> {
    pub fn new(schema: &'a str) -> Self {
        Self { schema }
    }

    #[instrument(skip(self, conn, script), fields(schema = %self.schema, key = %script.key))]
    pub async fn install(&self, conn: &mut PgConnection, script: &SchemaScript) -> RestoreResult<()> {
        info!("Creating schema");

        self.execute(conn, &sql::drop_schema(self.schema)).await?;
        self.execute(conn, &sql::create_schema(self.schema)).await?;
        self.execute(conn, &script.sql).await?;

        info!("Schema has been created");
        Ok(())
    }

    async fn execute(&self, conn: &mut PgConnection, statement: &str) -> RestoreResult<()> {
        sqlx::raw_sql(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| RestoreError::schema_install(self.schema, e))?;
        Ok(())
    }
}
