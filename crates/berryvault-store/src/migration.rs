//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use berryvault_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::info!(version = CURRENT_VERSION, "vault schema migrated");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Folder tree; parent is an id link, detached when the parent goes away
        CREATE TABLE folders (
            folder_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            owner_id INTEGER NOT NULL,
            parent_id INTEGER REFERENCES folders(folder_id) ON DELETE SET NULL,
            folder_type TEXT NOT NULL DEFAULT 'regular',   -- 'regular' | 'shared'
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- One grant per (folder, grantee)
        CREATE TABLE folder_permissions (
            folder_id INTEGER NOT NULL REFERENCES folders(folder_id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            can_read INTEGER NOT NULL DEFAULT 1,
            can_write INTEGER NOT NULL DEFAULT 0,
            can_delete INTEGER NOT NULL DEFAULT 0,
            inherit INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (folder_id, user_id)
        );

        -- Secrets; folder_id is the real, owner-assigned location
        CREATE TABLE secrets (
            secret_id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            folder_id INTEGER REFERENCES folders(folder_id) ON DELETE SET NULL,
            secret_type TEXT NOT NULL,
            payload_kind TEXT NOT NULL,      -- 'inline' | 'file'
            envelope BLOB,                   -- inline envelope bytes
            file_path TEXT,
            file_name TEXT,
            mime_type TEXT,
            file_size INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- One grant per (secret, grantee)
        CREATE TABLE secret_permissions (
            secret_id INTEGER NOT NULL REFERENCES secrets(secret_id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            can_read INTEGER NOT NULL DEFAULT 0,
            can_write INTEGER NOT NULL DEFAULT 0,
            can_delete INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (secret_id, user_id)
        );

        -- Per-user placement of a secret; NULL folder means unfiled
        CREATE TABLE user_secret_views (
            user_id INTEGER NOT NULL,
            secret_id INTEGER NOT NULL REFERENCES secrets(secret_id) ON DELETE CASCADE,
            folder_id INTEGER REFERENCES folders(folder_id) ON DELETE SET NULL,
            PRIMARY KEY (user_id, secret_id)
        );

        -- Id sequences handed out before a change set is built
        CREATE TABLE id_sequences (
            kind TEXT PRIMARY KEY,
            next_id INTEGER NOT NULL
        );
        INSERT INTO id_sequences (kind, next_id) VALUES ('folder', 1), ('secret', 1);

        CREATE INDEX idx_folders_owner ON folders(owner_id);
        CREATE INDEX idx_folders_parent ON folders(parent_id);
        CREATE INDEX idx_folder_permissions_user ON folder_permissions(user_id);
        CREATE INDEX idx_secrets_owner ON secrets(owner_id);
        CREATE INDEX idx_secrets_folder ON secrets(folder_id);
        CREATE INDEX idx_secret_permissions_user ON secret_permissions(user_id);
        CREATE INDEX idx_views_secret ON user_secret_views(secret_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "folders",
            "folder_permissions",
            "secrets",
            "secret_permissions",
            "user_secret_views",
            "id_sequences",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let on: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }
}
