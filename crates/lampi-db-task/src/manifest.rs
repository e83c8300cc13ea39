//! Manifest resolution
//!
//! The manifest is the small JSON index object that names the schema script
//! and every table file of one export:
//!
//! ```json
//! {
//!   "schema": { "key": "schema.sql" },
//!   "tables": [ { "key": "koodi.csv" }, { "key": "relaatio.csv", "version": "3" } ]
//! }
//! ```
//!
//! It is validated completely before anything touches the database, so a
//! broken manifest can never get as far as dropping the target schema.

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::error::{RestoreError, RestoreResult};
use crate::sql;
use crate::storage::ObjectStore;

/// File suffix every table object carries
pub const TABLE_FILE_SUFFIX: &str = ".csv";

/// Reference to one object in the bucket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRef {
    pub key: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl FileRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub schema: FileRef,
    pub tables: Vec<FileRef>,
}

impl Manifest {
    /// Parse and validate a manifest body. `key` is only used in errors.
    pub fn parse(key: &str, body: &[u8]) -> RestoreResult<Self> {
        let manifest: Manifest =
            serde_json::from_slice(body).map_err(|e| malformed(key, e.to_string()))?;
        manifest.validate(key)?;
        Ok(manifest)
    }

    /// One import job per table entry, in manifest order.
    ///
    /// Fails instead of skipping an entry that cannot become a job, and on
    /// two entries that would load the same table.
    pub fn jobs(&self, key: &str) -> RestoreResult<Vec<TableImportJob>> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(self.tables.len());

        for (index, table) in self.tables.iter().enumerate() {
            let Some(job) = TableImportJob::from_file_ref(table) else {
                return Err(malformed(
                    key,
                    format!(
                        "tables[{}].key {:?} does not name a {} file",
                        index, table.key, TABLE_FILE_SUFFIX
                    ),
                ));
            };

            // COPY quotes the table name, so it has to match the DDL's folded name
            if !sql::is_plain_identifier(&job.table_name) {
                return Err(malformed(
                    key,
                    format!(
                        "table name {:?} from {:?} must be a lowercase SQL identifier",
                        job.table_name, table.key
                    ),
                ));
            }

            if !seen.insert(job.table_name.clone()) {
                return Err(malformed(
                    key,
                    format!("table {} is listed more than once", job.table_name),
                ));
            }

            jobs.push(job);
        }

        Ok(jobs)
    }

    fn validate(&self, key: &str) -> RestoreResult<()> {
        if self.schema.key.trim().is_empty() {
            return Err(malformed(key, "schema.key is empty".to_string()));
        }

        self.jobs(key).map(|_| ())
    }
}

/// Table name for an object key: the key without its `.csv` suffix.
///
/// Returns `None` when the key has no such suffix or nothing in front of it.
pub fn table_name_for_key(key: &str) -> Option<&str> {
    key.strip_suffix(TABLE_FILE_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// Work item for loading one table file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableImportJob {
    pub table_name: String,
    pub source_key: String,
    pub version: Option<String>,
}

impl TableImportJob {
    pub fn from_file_ref(file: &FileRef) -> Option<Self> {
        table_name_for_key(&file.key).map(|table_name| Self {
            table_name: table_name.to_string(),
            source_key: file.key.clone(),
            version: file.version.clone(),
        })
    }
}

/// DDL text for the target schema, fetched from the manifest's schema entry
#[derive(Debug, Clone)]
pub struct SchemaScript {
    pub key: String,
    pub sql: String,
}

/// Fetches the manifest and the schema script it points at
pub struct ManifestResolver<'a> {
    store: &'a dyn ObjectStore,
    manifest_key: &'a str,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(store: &'a dyn ObjectStore, manifest_key: &'a str) -> Self {
        Self {
            store,
            manifest_key,
        }
    }

    #[instrument(skip(self), fields(bucket = %self.store.bucket(), key = %self.manifest_key))]
    pub async fn resolve(&self) -> RestoreResult<Manifest> {
        info!("Reading manifest from object storage");

        let missing = |source: RestoreError| RestoreError::ManifestMissing {
            key: self.manifest_key.to_string(),
            source: Box::new(source),
        };

        let body = self
            .store
            .fetch(self.manifest_key, None)
            .await
            .map_err(missing)?;

        let data = body.read_to_end().await.map_err(|e| {
            missing(RestoreError::ObjectStoreUnavailable {
                bucket: self.store.bucket().to_string(),
                key: self.manifest_key.to_string(),
                source: e.into(),
            })
        })?;

        let manifest = Manifest::parse(self.manifest_key, &data)?;

        info!(
            schema = %manifest.schema.key,
            tables = manifest.tables.len(),
            "Manifest resolved"
        );

        Ok(manifest)
    }

    /// Fetch the schema DDL named by `manifest` and read it fully.
    #[instrument(skip(self, manifest), fields(key = %manifest.schema.key))]
    pub async fn fetch_schema_script(&self, manifest: &Manifest) -> RestoreResult<SchemaScript> {
        info!("Reading schema from object storage");

        let file = &manifest.schema;
        let body = self.store.fetch(&file.key, file.version.as_deref()).await?;
        let sql = body
            .read_to_string()
            .await
            .map_err(|e| RestoreError::ObjectStoreUnavailable {
                bucket: self.store.bucket().to_string(),
                key: file.key.clone(),
                source: e.into(),
            })?;

        debug!(bytes = sql.len(), "Schema script loaded");

        Ok(SchemaScript {
            key: file.key.clone(),
            sql,
        })
    }
}

fn malformed(key: &str, reason: String) -> RestoreError {
    RestoreError::ManifestMalformed {
        key: key.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    const MANIFEST: &str = r#"{
        "schema": { "key": "schema.sql" },
        "tables": [ { "key": "koodi.csv" }, { "key": "relaatio.csv", "version": "7" } ]
    }"#;

    fn parse(body: &str) -> RestoreResult<Manifest> {
        Manifest::parse("manifest.json", body.as_bytes())
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = parse(MANIFEST).unwrap();

        assert_eq!(manifest.schema, FileRef::new("schema.sql"));
        assert_eq!(manifest.tables.len(), 2);
        assert_eq!(manifest.tables[1].version.as_deref(), Some("7"));
    }

    #[test]
    fn test_jobs_follow_manifest_order() {
        let jobs = parse(MANIFEST).unwrap().jobs("manifest.json").unwrap();

        assert_eq!(
            jobs,
            vec![
                TableImportJob {
                    table_name: "koodi".to_string(),
                    source_key: "koodi.csv".to_string(),
                    version: None,
                },
                TableImportJob {
                    table_name: "relaatio".to_string(),
                    source_key: "relaatio.csv".to_string(),
                    version: Some("7".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_table_name_for_key() {
        assert_eq!(table_name_for_key("koodi.csv"), Some("koodi"));
        assert_eq!(table_name_for_key("koodi.csv.csv"), Some("koodi.csv"));
        assert_eq!(table_name_for_key("koodi.json"), None);
        assert_eq!(table_name_for_key(".csv"), None);
    }

    #[test]
    fn test_missing_tables_is_malformed() {
        let err = parse(r#"{ "schema": { "key": "schema.sql" } }"#).unwrap_err();
        match err {
            RestoreError::ManifestMalformed { key, reason } => {
                assert_eq!(key, "manifest.json");
                assert!(reason.contains("tables"), "reason: {}", reason);
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_array_tables_is_malformed() {
        let err = parse(r#"{ "schema": { "key": "schema.sql" }, "tables": "koodi.csv" }"#)
            .unwrap_err();
        assert!(matches!(err, RestoreError::ManifestMalformed { .. }));
    }

    #[test]
    fn test_missing_schema_and_wrong_types_are_malformed() {
        for body in [
            r#"{ "tables": [] }"#,
            r#"{ "schema": "schema.sql", "tables": [] }"#,
            r#"{ "schema": { "key": 1 }, "tables": [] }"#,
            r#"{ "schema": { "key": "schema.sql" }, "tables": [ { "version": "1" } ] }"#,
            "not json",
        ] {
            assert!(
                matches!(parse(body), Err(RestoreError::ManifestMalformed { .. })),
                "accepted: {}",
                body
            );
        }
    }

    #[test]
    fn test_non_csv_and_duplicate_tables_are_rejected() {
        let not_csv = r#"{ "schema": { "key": "schema.sql" }, "tables": [ { "key": "koodi.json" } ] }"#;
        assert!(matches!(parse(not_csv), Err(RestoreError::ManifestMalformed { .. })));

        let duplicate = r#"{
            "schema": { "key": "schema.sql" },
            "tables": [ { "key": "koodi.csv" }, { "key": "koodi.csv", "version": "2" } ]
        }"#;
        assert!(matches!(parse(duplicate), Err(RestoreError::ManifestMalformed { .. })));
    }

    #[test]
    fn test_table_names_must_fold_to_themselves() {
        for table in ["Koodi.csv", "koodi-2.csv", "2koodi.csv", "koo di.csv"] {
            let body = format!(
                r#"{{ "schema": {{ "key": "schema.sql" }}, "tables": [ {{ "key": "{}" }} ] }}"#,
                table
            );
            match parse(&body) {
                Err(RestoreError::ManifestMalformed { reason, .. }) => {
                    assert!(reason.contains("lowercase SQL identifier"), "reason: {}", reason)
                },
                other => panic!("{} gave {:?}", table, other),
            }
        }
    }

    #[test]
    fn test_empty_table_list_is_allowed() {
        let manifest = parse(r#"{ "schema": { "key": "schema.sql" }, "tables": [] }"#).unwrap();
        assert!(manifest.jobs("manifest.json").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reports_missing_manifest() {
        let store = MemoryStore::new("oph-lampi-local");
        let err = ManifestResolver::new(&store, "manifest.json")
            .resolve()
            .await
            .unwrap_err();

        match err {
            RestoreError::ManifestMissing { key, source } => {
                assert_eq!(key, "manifest.json");
                assert!(matches!(*source, RestoreError::ObjectNotFound { .. }));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_and_fetch_schema() {
        let store = MemoryStore::new("oph-lampi-local")
            .with_object("manifest.json", MANIFEST)
            .with_object("schema.sql", "CREATE TABLE koodisto.koodi (koodiarvo text);")
            .with_chunk_size(8);
        let resolver = ManifestResolver::new(&store, "manifest.json");

        let manifest = resolver.resolve().await.unwrap();
        let script = resolver.fetch_schema_script(&manifest).await.unwrap();

        assert_eq!(script.key, "schema.sql");
        assert_eq!(script.sql, "CREATE TABLE koodisto.koodi (koodiarvo text);");
        assert_eq!(store.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_object() {
        let store = MemoryStore::new("oph-lampi-local").with_object("manifest.json", MANIFEST);
        let resolver = ManifestResolver::new(&store, "manifest.json");

        let manifest = resolver.resolve().await.unwrap();
        let err = resolver.fetch_schema_script(&manifest).await.unwrap_err();
        assert!(matches!(err, RestoreError::ObjectNotFound { ref key, .. } if key == "schema.sql"));
    }

    #[tokio::test]
    async fn test_broken_schema_stream_is_store_failure() {
        let store = MemoryStore::new("oph-lampi-local")
            .with_object("manifest.json", MANIFEST)
            .with_object("schema.sql", "CREATE TABLE koodisto.koodi (koodiarvo text);")
            .failing_after("schema.sql", 5);
        let resolver = ManifestResolver::new(&store, "manifest.json");

        let manifest = resolver.resolve().await.unwrap();
        let err = resolver.fetch_schema_script(&manifest).await.unwrap_err();

        match err {
            RestoreError::ObjectStoreUnavailable { bucket, key, source } => {
                assert_eq!(bucket, "oph-lampi-local");
                assert_eq!(key, "schema.sql");
                assert!(source.to_string().contains("connection reset"), "{}", source);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_schema_script_must_be_utf8() {
        let store = MemoryStore::new("oph-lampi-local")
            .with_object("manifest.json", MANIFEST)
            .with_object("schema.sql", vec![0xff, 0xfe, b';']);
        let resolver = ManifestResolver::new(&store, "manifest.json");

        let manifest = resolver.resolve().await.unwrap();
        let err = resolver.fetch_schema_script(&manifest).await.unwrap_err();
        assert_eq!(err.kind(), "object_store_unavailable");
    }
}
