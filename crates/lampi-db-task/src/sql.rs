//! SQL statement text used by the restore

/// Quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// True for names PostgreSQL folds to themselves: lowercase ASCII letters,
/// digits and underscores, not starting with a digit, at most 63 bytes.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {},
        _ => return false,
    }
    name.len() <= 63
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

pub fn drop_schema(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema))
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", quote_ident(schema))
}

/// `COPY ... FROM STDIN` for comma-separated data with a header row
pub fn copy_csv_from_stdin(schema: &str, table: &str) -> String {
    format!(
        "COPY {} FROM STDIN WITH (FORMAT csv, HEADER true)",
        qualified(schema, table)
    )
}

pub const CREATE_TASK_STATUS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS public.task_status (
        task_name TEXT PRIMARY KEY,
        status TEXT NOT NULL
    )
"#;

pub const MARK_TASK_COMPLETED: &str = r#"
    INSERT INTO public.task_status (task_name, status)
    VALUES ($1, 'completed')
    ON CONFLICT (task_name) DO UPDATE SET status = EXCLUDED.status
"#;
