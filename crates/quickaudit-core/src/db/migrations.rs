//! Database migrations

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version
pub const CURRENT_VERSION: i64 = 3;

/// Run all pending migrations, returning the resulting schema version.
///
/// Each step runs in its own transaction and bumps the version record as its
/// last statement, so a failed step leaves the previous version intact.
pub fn run(conn: &mut Connection) -> Result<i64> {
    let version = get_version(conn)?;

    if version > CURRENT_VERSION {
        return Err(Error::StorageInit(format!(
            "database schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    get_version(conn)
}

/// Get the current schema version (0 when the store is empty)
pub fn get_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version
         WHERE excluded.version > schema_version.version",
        params![version],
    )?;
    Ok(())
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL,
            organization TEXT NOT NULL,
            profile_image TEXT,
            settings TEXT,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            category TEXT NOT NULL,
            sections TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS audits (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            template TEXT NOT NULL,
            location TEXT NOT NULL,
            auditor TEXT NOT NULL,
            supervisor TEXT,
            status TEXT NOT NULL,
            score INTEGER,
            start_time TEXT,
            end_time TEXT,
            sections TEXT,
            notes TEXT,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS actions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            audit TEXT NOT NULL,
            assignee TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            priority TEXT NOT NULL,
            completed_date TEXT,
            attachments TEXT,
            comments TEXT,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            is_uploaded INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    set_version(&tx, 1)?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: findings table and sync-status indexes
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            audit_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            location TEXT,
            assigned_to TEXT,
            due_date TEXT,
            photos TEXT,
            notes TEXT,
            sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_findings_audit ON findings(audit_id);
        CREATE INDEX IF NOT EXISTS idx_users_sync ON users(sync_status);
        CREATE INDEX IF NOT EXISTS idx_templates_sync ON templates(sync_status);
        CREATE INDEX IF NOT EXISTS idx_audits_sync ON audits(sync_status);
        CREATE INDEX IF NOT EXISTS idx_findings_sync ON findings(sync_status);
        CREATE INDEX IF NOT EXISTS idx_actions_sync ON actions(sync_status);
        CREATE INDEX IF NOT EXISTS idx_files_sync ON files(sync_status);
        CREATE INDEX IF NOT EXISTS idx_files_entity ON files(entity_type, entity_id);",
    )?;
    set_version(&tx, 2)?;
    tx.commit()?;

    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: engine bookkeeping
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    set_version(&tx, 3)?;
    tx.commit()?;

    tracing::info!("Migrated database to version 3");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        let version = run(&mut conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_forward_migration_from_v1() {
        let mut conn = setup();
        migrate_v1(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), 1);
        assert!(!table_exists(&conn, "findings"));

        run(&mut conn).unwrap();
        assert!(table_exists(&conn, "findings"));
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_forward_migration_from_v2_adds_sync_meta() {
        let mut conn = setup();
        migrate_v1(&mut conn).unwrap();
        migrate_v2(&mut conn).unwrap();
        assert!(!table_exists(&conn, "sync_meta"));

        assert_eq!(run(&mut conn).unwrap(), 3);
        assert!(table_exists(&conn, "sync_meta"));
    }

    #[test]
    fn test_version_never_decreases() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        set_version(&conn, 1).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
            .unwrap();
        assert!(matches!(run(&mut conn), Err(Error::StorageInit(_))));
    }
}
