//! SQLite schema definitions.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn schema_error(context: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message: format!("{}: {}", context, e),
        source: None,
    })
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Backend(BackendError::MigrationError {
            message: format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        }));
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| schema_error("Failed to clear schema version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| schema_error("Failed to set schema version", e))?;
    Ok(())
}

/// Create the version 1 schema.
///
/// Every stored version is a row of `resources`; `is_history` marks
/// superseded versions. `search_index` holds one row per component of every
/// index entry, grouped by `composite_group`.
fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS resources (
            surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            raw TEXT NOT NULL,
            request_method TEXT NOT NULL,
            request_uri TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            is_history INTEGER NOT NULL DEFAULT 0,
            index_data TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_resources_live
            ON resources(resource_type, resource_id, is_history);
        CREATE INDEX IF NOT EXISTS idx_resources_updated
            ON resources(last_updated);

        CREATE TABLE IF NOT EXISTS search_index (
            resource_surrogate_id INTEGER NOT NULL
                REFERENCES resources(surrogate_id) ON DELETE CASCADE,
            param_name TEXT NOT NULL,
            composite_group INTEGER NOT NULL,
            component_index INTEGER NOT NULL,
            value_string TEXT,
            value_token_system TEXT,
            value_token_code TEXT,
            value_token_text TEXT,
            value_number REAL,
            value_quantity REAL,
            value_quantity_system TEXT,
            value_quantity_code TEXT,
            value_date_start TEXT,
            value_date_end TEXT,
            value_uri TEXT,
            value_reference_base_uri TEXT,
            value_reference_type TEXT,
            value_reference_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_search_index_param
            ON search_index(resource_surrogate_id, param_name);
        CREATE INDEX IF NOT EXISTS idx_search_index_reference
            ON search_index(param_name, value_reference_type, value_reference_id);

        CREATE TABLE IF NOT EXISTS compartment_assignment (
            resource_surrogate_id INTEGER NOT NULL
                REFERENCES resources(surrogate_id) ON DELETE CASCADE,
            compartment_type TEXT NOT NULL,
            compartment_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_compartment_lookup
            ON compartment_assignment(compartment_type, compartment_id);
        ",
    )
    .map_err(|e| schema_error("Failed to create schema", e))
}
