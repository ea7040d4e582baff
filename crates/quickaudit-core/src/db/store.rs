//! Row-level local store over `SQLite`.
//!
//! Rows are JSON objects keyed by column name. Column names are checked
//! against [`schema`](super::schema) before they reach SQL; values are always
//! bound parameters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use super::migrations;
use super::schema::{self, Column, ColumnKind};
use crate::error::{Error, Result};
use crate::models::{EntityKind, SyncStatus};

/// A stored row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Exact-match column filters, combined with AND.
pub type Filters = BTreeMap<String, Value>;

/// Durable, schema-versioned entity storage.
///
/// Cloning is cheap; every clone shares the same connection and all calls
/// serialize through it.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open (or create) the store at `path` and bring its schema up to date.
    ///
    /// A file that is not a database is moved aside as `<name>.corrupt-<ms>`
    /// and a fresh store is created in its place.
    pub async fn initialize(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| Error::StorageInit(format!("{}: {error}", parent.display())))?;
        }

        let conn = match open_connection(&path) {
            Ok(conn) => conn,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is not a database: {}. Moving it aside.",
                    path.display(),
                    error
                );
                quarantine_corrupted_db(&path)?;
                open_connection(&path)?
            }
            Err(error) => return Err(error),
        };

        tracing::info!("Opened local store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(storage_init)?;
        configure(&conn)?;
        migrations::run(&mut conn).map_err(into_storage_init)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    /// Filesystem path of the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(conn)
    }

    /// Rows of `kind` matching every filter, in storage order.
    pub async fn get_all(&self, kind: EntityKind, filters: &Filters) -> Result<Vec<Row>> {
        let mut clauses = Vec::with_capacity(filters.len());
        let mut values = Vec::with_capacity(filters.len());
        for (name, value) in filters {
            let column = known_column(kind, name)?;
            if value.is_null() {
                clauses.push(format!("{} IS NULL", column.name));
            } else {
                clauses.push(format!("{} = ?", column.name));
                values.push(encode_value(kind, column, value)?);
            }
        }

        let mut sql = format!("SELECT {} FROM {}", select_list(kind), kind.table());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");

        self.with_conn(|conn| query_rows(conn, kind, &sql, values))
            .await
    }

    /// Single row by primary key; a missing id is `Ok(None)`.
    pub async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Row>> {
        self.with_conn(|conn| select_by_id(conn, kind, id)).await
    }

    /// Insert a new row; duplicate ids and missing required columns are
    /// `Constraint` errors.
    pub async fn insert(&self, kind: EntityKind, row: &Row) -> Result<Row> {
        self.write_row(kind, row, "INSERT").await
    }

    /// Insert or replace a full row.
    pub async fn upsert(&self, kind: EntityKind, row: &Row) -> Result<Row> {
        self.write_row(kind, row, "INSERT OR REPLACE").await
    }

    async fn write_row(&self, kind: EntityKind, row: &Row, verb: &str) -> Result<Row> {
        let id = row_id(kind, row)?;
        let mut names = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (name, value) in row {
            let column = known_column(kind, name)?;
            names.push(column.name);
            values.push(encode_value(kind, column, value)?);
        }
        if let Some(missing) = schema::columns(kind)
            .iter()
            .find(|column| column.required && row.get(column.name).map_or(true, Value::is_null))
        {
            return Err(Error::Constraint(format!(
                "{}.{} is required",
                kind.table(),
                missing.name
            )));
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "{verb} INTO {} ({}) VALUES ({placeholders})",
            kind.table(),
            names.join(", ")
        );

        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values))
                .map_err(|error| map_constraint(kind, error))?;
            select_by_id(conn, kind, &id)?.ok_or_else(|| Error::NotFound {
                table: kind.table(),
                id: id.clone(),
            })
        })
        .await
    }

    /// Merge `partial` into an existing row and return the merged row.
    pub async fn update(&self, kind: EntityKind, id: &str, partial: &Row) -> Result<Row> {
        let mut assignments = Vec::with_capacity(partial.len());
        let mut values = Vec::with_capacity(partial.len() + 1);
        for (name, value) in partial {
            if name == "id" {
                continue;
            }
            let column = known_column(kind, name)?;
            if column.required && value.is_null() {
                return Err(Error::Constraint(format!(
                    "{}.{} is required",
                    kind.table(),
                    column.name
                )));
            }
            assignments.push(format!("{} = ?", column.name));
            values.push(encode_value(kind, column, value)?);
        }

        self.with_conn(|conn| {
            if !assignments.is_empty() {
                let sql = format!(
                    "UPDATE {} SET {} WHERE id = ?",
                    kind.table(),
                    assignments.join(", ")
                );
                values.push(SqlValue::Text(id.to_string()));
                conn.execute(&sql, params_from_iter(values))
                    .map_err(|error| map_constraint(kind, error))?;
            }
            select_by_id(conn, kind, id)?.ok_or_else(|| Error::NotFound {
                table: kind.table(),
                id: id.to_string(),
            })
        })
        .await
    }

    /// Remove a row; returns whether one existed.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        self.with_conn(|conn| Ok(conn.execute(&sql, [id])? > 0))
            .await
    }

    /// Rows still waiting for remote confirmation.
    pub async fn get_pending_sync(&self, kind: EntityKind) -> Result<Vec<Row>> {
        let mut filters = Filters::new();
        filters.insert(
            "sync_status".to_string(),
            Value::from(SyncStatus::PendingSync.as_str()),
        );
        self.get_all(kind, &filters).await
    }

    /// Flip a row to `synced`; returns whether the row exists.
    pub async fn mark_synced(&self, kind: EntityKind, id: &str) -> Result<bool> {
        self.set_sync_status(kind, id, SyncStatus::Synced).await
    }

    pub async fn set_sync_status(
        &self,
        kind: EntityKind,
        id: &str,
        status: SyncStatus,
    ) -> Result<bool> {
        let sql = format!("UPDATE {} SET sync_status = ?1 WHERE id = ?2", kind.table());
        self.with_conn(|conn| Ok(conn.execute(&sql, [status.as_str(), id])? > 0))
            .await
    }

    /// Engine bookkeeping value stored next to the data.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM sync_meta WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
            Ok(())
        })
        .await
    }

    /// Close the connection. Later calls on any clone fail with `StoreClosed`.
    pub async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, error)| Error::Database(error))?;
            tracing::debug!("Closed local store");
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }
}

fn storage_init(error: rusqlite::Error) -> Error {
    Error::StorageInit(error.to_string())
}

fn into_storage_init(error: Error) -> Error {
    match error {
        Error::StorageInit(_) => error,
        other => Error::StorageInit(other.to_string()),
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).map_err(storage_init)?;
    configure(&conn)?;
    migrations::run(&mut conn).map_err(into_storage_init)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(storage_init)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(storage_init)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(storage_init)?;
    Ok(())
}

fn is_corrupted_db_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("malformed")
}

fn quarantine_corrupted_db(path: &Path) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return Err(Error::StorageInit(format!(
            "cannot quarantine {}",
            path.display()
        )));
    };
    let timestamp = chrono::Utc::now().timestamp_millis();
    let backup_path = path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
    std::fs::rename(path, &backup_path)
        .map_err(|error| Error::StorageInit(format!("{}: {error}", path.display())))?;
    tracing::warn!(
        "Moved corrupted local store from {} to {}",
        path.display(),
        backup_path.display()
    );

    for suffix in ["-wal", "-shm"] {
        let sidecar = path.with_file_name(format!("{file_name}{suffix}"));
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

fn known_column(kind: EntityKind, name: &str) -> Result<&'static Column> {
    schema::column(kind, name).ok_or_else(|| {
        Error::InvalidInput(format!("unknown column {name} for {}", kind.table()))
    })
}

fn row_id(kind: EntityKind, row: &Row) -> Result<String> {
    match row.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(Error::Constraint(format!("{}.id is required", kind.table()))),
    }
}

fn select_list(kind: EntityKind) -> String {
    schema::columns(kind)
        .iter()
        .map(|column| column.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_by_id(conn: &Connection, kind: EntityKind, id: &str) -> Result<Option<Row>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?",
        select_list(kind),
        kind.table()
    );
    Ok(query_rows(conn, kind, &sql, vec![SqlValue::Text(id.to_string())])?
        .into_iter()
        .next())
}

fn query_rows(
    conn: &Connection,
    kind: EntityKind,
    sql: &str,
    values: Vec<SqlValue>,
) -> Result<Vec<Row>> {
    let columns = schema::columns(kind);
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        let mut out = Row::new();
        for (index, column) in columns.iter().enumerate() {
            out.insert(
                column.name.to_string(),
                decode_value(column, row.get_ref(index)?),
            );
        }
        Ok(out)
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn map_constraint(kind: EntityKind, error: rusqlite::Error) -> Error {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Constraint(format!(
                "{}: {}",
                kind.table(),
                message.as_deref().unwrap_or("constraint failed")
            ))
        }
        _ => Error::Database(error),
    }
}

/// The row as it would read back after being written.
///
/// Fails with `InvalidInput` for unknown columns and values the column
/// cannot hold.
pub(crate) fn stored_form(kind: EntityKind, row: &Row) -> Result<Row> {
    row.iter()
        .map(|(name, value)| {
            let column = known_column(kind, name)?;
            let stored = encode_value(kind, column, value)?;
            Ok((name.clone(), decode_value(column, ValueRef::from(&stored))))
        })
        .collect()
}

/// Narrow a JSON value to the storage representation of `column`.
fn encode_value(kind: EntityKind, column: &Column, value: &Value) -> Result<SqlValue> {
    let mismatch = || {
        Error::InvalidInput(format!(
            "{}.{} cannot store {value}",
            kind.table(),
            column.name
        ))
    };

    Ok(match (column.kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnKind::Text, Value::String(text)) => SqlValue::Text(text.clone()),
        (ColumnKind::Text, Value::Number(number)) => SqlValue::Text(number.to_string()),
        (ColumnKind::Integer, Value::Number(number)) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .ok_or_else(mismatch)?,
        (ColumnKind::Integer, Value::Bool(flag)) | (ColumnKind::Bool, Value::Bool(flag)) => {
            SqlValue::Integer(i64::from(*flag))
        }
        (ColumnKind::Bool, Value::Number(number)) => {
            SqlValue::Integer(i64::from(number.as_i64().ok_or_else(mismatch)? != 0))
        }
        (ColumnKind::Json, other) => SqlValue::Text(serde_json::to_string(other)?),
        _ => return Err(mismatch()),
    })
}

/// Read a stored value back to its logical JSON type.
fn decode_value(column: &Column, value: ValueRef<'_>) -> Value {
    match (column.kind, value) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnKind::Bool, ValueRef::Integer(flag)) => Value::Bool(flag != 0),
        (ColumnKind::Json, ValueRef::Text(text)) => {
            let text = String::from_utf8_lossy(text);
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
        }
        (_, ValueRef::Integer(number)) => Value::from(number),
        (_, ValueRef::Real(number)) => Value::from(number),
        (_, ValueRef::Text(text)) => Value::String(String::from_utf8_lossy(text).into_owned()),
        (_, ValueRef::Blob(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
