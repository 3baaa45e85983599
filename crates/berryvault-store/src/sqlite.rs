//! SQLite implementation of the VaultStore trait.
//!
//! This is the primary storage backend for BerryVault. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use berryvault_core::{
    now_millis, Access, ChangeSet, Folder, FolderId, FolderPermission, FolderType, IdKind,
    Mutation, Secret, SecretId, SecretPayload, SecretPermission, UserId, UserSecretView,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::VaultStore;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row Mapping
// ─────────────────────────────────────────────────────────────────────────────

const FOLDER_COLUMNS: &str =
    "folder_id, name, description, owner_id, parent_id, folder_type, created_at, updated_at";

const SECRET_COLUMNS: &str = "secret_id, owner_id, name, description, folder_id, secret_type,
     payload_kind, envelope, file_path, file_name, mime_type, file_size, created_at, updated_at";

fn invalid_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.into(), rusqlite::types::Type::Text)
}

fn row_to_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    let folder_type: String = row.get("folder_type")?;
    Ok(Folder {
        id: FolderId(row.get::<_, i64>("folder_id")? as u64),
        name: row.get("name")?,
        description: row.get("description")?,
        owner: UserId(row.get::<_, i64>("owner_id")? as u64),
        parent: row
            .get::<_, Option<i64>>("parent_id")?
            .map(|p| FolderId(p as u64)),
        folder_type: FolderType::parse(&folder_type)
            .ok_or_else(|| invalid_column(5, "folder_type"))?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_secret(row: &rusqlite::Row<'_>) -> rusqlite::Result<Secret> {
    let payload_kind: String = row.get("payload_kind")?;
    let payload = match payload_kind.as_str() {
        "inline" => SecretPayload::Inline {
            envelope: row.get::<_, Option<Vec<u8>>>("envelope")?.unwrap_or_default(),
        },
        "file" => SecretPayload::File {
            path: row.get("file_path")?,
            original_name: row.get("file_name")?,
            mime_type: row.get("mime_type")?,
            size: row.get::<_, i64>("file_size")? as u64,
        },
        _ => return Err(invalid_column(6, "payload_kind")),
    };

    Ok(Secret {
        id: SecretId(row.get::<_, i64>("secret_id")? as u64),
        owner: UserId(row.get::<_, i64>("owner_id")? as u64),
        name: row.get("name")?,
        description: row.get("description")?,
        folder: row
            .get::<_, Option<i64>>("folder_id")?
            .map(|f| FolderId(f as u64)),
        secret_type: row.get("secret_type")?,
        payload,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_folder_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<FolderPermission> {
    Ok(FolderPermission {
        folder: FolderId(row.get::<_, i64>("folder_id")? as u64),
        grantee: UserId(row.get::<_, i64>("user_id")? as u64),
        access: Access::new(row.get("can_read")?, row.get("can_write")?, row.get("can_delete")?),
        inherit: row.get("inherit")?,
    })
}

fn row_to_secret_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<SecretPermission> {
    Ok(SecretPermission {
        secret: SecretId(row.get::<_, i64>("secret_id")? as u64),
        grantee: UserId(row.get::<_, i64>("user_id")? as u64),
        access: Access::new(row.get("can_read")?, row.get("can_write")?, row.get("can_delete")?),
    })
}

fn row_to_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSecretView> {
    Ok(UserSecretView {
        user: UserId(row.get::<_, i64>("user_id")? as u64),
        secret: SecretId(row.get::<_, i64>("secret_id")? as u64),
        folder: row
            .get::<_, Option<i64>>("folder_id")?
            .map(|f| FolderId(f as u64)),
    })
}

fn opt_id(id: Option<FolderId>) -> Option<i64> {
    id.map(|f| f.0 as i64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutation Application
// ─────────────────────────────────────────────────────────────────────────────

fn apply_mutation(tx: &Transaction<'_>, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::PutFolder(folder) => {
            tx.execute(
                "INSERT INTO folders (folder_id, name, description, owner_id, parent_id,
                                      folder_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(folder_id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    parent_id = excluded.parent_id,
                    folder_type = excluded.folder_type,
                    updated_at = excluded.updated_at",
                params![
                    folder.id.0 as i64,
                    &folder.name,
                    &folder.description,
                    folder.owner.0 as i64,
                    opt_id(folder.parent),
                    folder.folder_type.as_str(),
                    folder.created_at,
                    folder.updated_at,
                ],
            )?;
        }
        Mutation::DeleteFolder(id) => {
            let id = id.0 as i64;
            tx.execute("DELETE FROM folder_permissions WHERE folder_id = ?1", params![id])?;
            tx.execute("UPDATE secrets SET folder_id = NULL WHERE folder_id = ?1", params![id])?;
            tx.execute(
                "UPDATE user_secret_views SET folder_id = NULL WHERE folder_id = ?1",
                params![id],
            )?;
            tx.execute("UPDATE folders SET parent_id = NULL WHERE parent_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM folders WHERE folder_id = ?1", params![id])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("folder {}", id)));
            }
        }
        Mutation::SetFolderType {
            folder,
            folder_type,
        } => {
            let updated = tx.execute(
                "UPDATE folders SET folder_type = ?2, updated_at = ?3 WHERE folder_id = ?1",
                params![folder.0 as i64, folder_type.as_str(), now_millis()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("folder {}", folder)));
            }
        }
        Mutation::UpsertFolderPermission(perm) => {
            tx.execute(
                "INSERT INTO folder_permissions
                    (folder_id, user_id, can_read, can_write, can_delete, inherit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(folder_id, user_id) DO UPDATE SET
                    can_read = excluded.can_read,
                    can_write = excluded.can_write,
                    can_delete = excluded.can_delete,
                    inherit = excluded.inherit",
                params![
                    perm.folder.0 as i64,
                    perm.grantee.0 as i64,
                    perm.access.can_read,
                    perm.access.can_write,
                    perm.access.can_delete,
                    perm.inherit,
                ],
            )?;
        }
        Mutation::DeleteFolderPermission { folder, grantee } => {
            tx.execute(
                "DELETE FROM folder_permissions WHERE folder_id = ?1 AND user_id = ?2",
                params![folder.0 as i64, grantee.0 as i64],
            )?;
        }
        Mutation::PutSecret(secret) => {
            let existing_owner: Option<i64> = tx
                .query_row(
                    "SELECT owner_id FROM secrets WHERE secret_id = ?1",
                    params![secret.id.0 as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = existing_owner {
                if owner as u64 != secret.owner.0 {
                    return Err(StoreError::Constraint(format!(
                        "owner of secret {} is immutable",
                        secret.id
                    )));
                }
            }

            let (kind, envelope, path, name, mime, size) = match &secret.payload {
                SecretPayload::Inline { envelope } => {
                    ("inline", Some(envelope.as_slice()), None, None, None, None)
                }
                SecretPayload::File {
                    path,
                    original_name,
                    mime_type,
                    size,
                } => (
                    "file",
                    None,
                    Some(path.as_str()),
                    Some(original_name.as_str()),
                    Some(mime_type.as_str()),
                    Some(*size as i64),
                ),
            };

            tx.execute(
                "INSERT INTO secrets (secret_id, owner_id, name, description, folder_id,
                    secret_type, payload_kind, envelope, file_path, file_name, mime_type,
                    file_size, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(secret_id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    folder_id = excluded.folder_id,
                    secret_type = excluded.secret_type,
                    payload_kind = excluded.payload_kind,
                    envelope = excluded.envelope,
                    file_path = excluded.file_path,
                    file_name = excluded.file_name,
                    mime_type = excluded.mime_type,
                    file_size = excluded.file_size,
                    updated_at = excluded.updated_at",
                params![
                    secret.id.0 as i64,
                    secret.owner.0 as i64,
                    &secret.name,
                    &secret.description,
                    opt_id(secret.folder),
                    &secret.secret_type,
                    kind,
                    envelope,
                    path,
                    name,
                    mime,
                    size,
                    secret.created_at,
                    secret.updated_at,
                ],
            )?;
        }
        Mutation::SetSecretFolder { secret, folder } => {
            let updated = tx.execute(
                "UPDATE secrets SET folder_id = ?2, updated_at = ?3 WHERE secret_id = ?1",
                params![secret.0 as i64, opt_id(*folder), now_millis()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("secret {}", secret)));
            }
        }
        Mutation::DeleteSecret(id) => {
            let id = id.0 as i64;
            tx.execute("DELETE FROM secret_permissions WHERE secret_id = ?1", params![id])?;
            tx.execute("DELETE FROM user_secret_views WHERE secret_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM secrets WHERE secret_id = ?1", params![id])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("secret {}", id)));
            }
        }
        Mutation::UpsertSecretPermission(perm) => {
            tx.execute(
                "INSERT INTO secret_permissions (secret_id, user_id, can_read, can_write, can_delete)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(secret_id, user_id) DO UPDATE SET
                    can_read = excluded.can_read,
                    can_write = excluded.can_write,
                    can_delete = excluded.can_delete",
                params![
                    perm.secret.0 as i64,
                    perm.grantee.0 as i64,
                    perm.access.can_read,
                    perm.access.can_write,
                    perm.access.can_delete,
                ],
            )?;
        }
        Mutation::DeleteSecretPermission { secret, grantee } => {
            tx.execute(
                "DELETE FROM secret_permissions WHERE secret_id = ?1 AND user_id = ?2",
                params![secret.0 as i64, grantee.0 as i64],
            )?;
        }
        Mutation::SetView(view) => {
            tx.execute(
                "INSERT INTO user_secret_views (user_id, secret_id, folder_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, secret_id) DO UPDATE SET folder_id = excluded.folder_id",
                params![view.user.0 as i64, view.secret.0 as i64, opt_id(view.folder)],
            )?;
        }
        Mutation::DeleteView { user, secret } => {
            tx.execute(
                "DELETE FROM user_secret_views WHERE user_id = ?1 AND secret_id = ?2",
                params![user.0 as i64, secret.0 as i64],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl VaultStore for SqliteStore {
    async fn allocate_id(&self, kind: IdKind) -> Result<u64> {
        self.blocking(move |conn| {
            let id: i64 = conn.query_row(
                "UPDATE id_sequences SET next_id = next_id + 1 WHERE kind = ?1
                 RETURNING next_id - 1",
                params![kind.as_str()],
                |row| row.get(0),
            )?;
            Ok(id as u64)
        })
        .await
    }

    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for mutation in &changes {
                // An error drops `tx`, which rolls the whole batch back.
                apply_mutation(&tx, mutation)?;
            }
            tx.commit()?;
            tracing::debug!(mutations = changes.len(), "change set committed");
            Ok(())
        })
        .await
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE folder_id = ?1"),
                params![id.0 as i64],
                row_to_folder,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {FOLDER_COLUMNS} FROM folders ORDER BY folder_id"))?;
            let folders = stmt
                .query_map([], row_to_folder)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(folders)
        })
        .await
    }

    async fn list_folders_owned_by(&self, owner: UserId) -> Result<Vec<Folder>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FOLDER_COLUMNS} FROM folders WHERE owner_id = ?1 ORDER BY folder_id"
            ))?;
            let folders = stmt
                .query_map(params![owner.0 as i64], row_to_folder)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(folders)
        })
        .await
    }

    async fn get_folder_permission(
        &self,
        folder: FolderId,
        grantee: UserId,
    ) -> Result<Option<FolderPermission>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT folder_id, user_id, can_read, can_write, can_delete, inherit
                 FROM folder_permissions WHERE folder_id = ?1 AND user_id = ?2",
                params![folder.0 as i64, grantee.0 as i64],
                row_to_folder_permission,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_folder_permissions(&self, folder: FolderId) -> Result<Vec<FolderPermission>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT folder_id, user_id, can_read, can_write, can_delete, inherit
                 FROM folder_permissions WHERE folder_id = ?1 ORDER BY user_id",
            )?;
            let perms = stmt
                .query_map(params![folder.0 as i64], row_to_folder_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(perms)
        })
        .await
    }

    async fn list_folder_permissions_for(&self, grantee: UserId) -> Result<Vec<FolderPermission>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT folder_id, user_id, can_read, can_write, can_delete, inherit
                 FROM folder_permissions WHERE user_id = ?1 ORDER BY folder_id",
            )?;
            let perms = stmt
                .query_map(params![grantee.0 as i64], row_to_folder_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(perms)
        })
        .await
    }

    async fn get_secret(&self, id: SecretId) -> Result<Option<Secret>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SECRET_COLUMNS} FROM secrets WHERE secret_id = ?1"),
                params![id.0 as i64],
                row_to_secret,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_secrets_in_folder(&self, folder: FolderId) -> Result<Vec<Secret>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SECRET_COLUMNS} FROM secrets WHERE folder_id = ?1 ORDER BY secret_id"
            ))?;
            let secrets = stmt
                .query_map(params![folder.0 as i64], row_to_secret)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(secrets)
        })
        .await
    }

    async fn list_secrets_owned_by(&self, owner: UserId) -> Result<Vec<Secret>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SECRET_COLUMNS} FROM secrets WHERE owner_id = ?1 ORDER BY secret_id"
            ))?;
            let secrets = stmt
                .query_map(params![owner.0 as i64], row_to_secret)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(secrets)
        })
        .await
    }

    async fn get_secret_permission(
        &self,
        secret: SecretId,
        grantee: UserId,
    ) -> Result<Option<SecretPermission>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT secret_id, user_id, can_read, can_write, can_delete
                 FROM secret_permissions WHERE secret_id = ?1 AND user_id = ?2",
                params![secret.0 as i64, grantee.0 as i64],
                row_to_secret_permission,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_secret_permissions(&self, secret: SecretId) -> Result<Vec<SecretPermission>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT secret_id, user_id, can_read, can_write, can_delete
                 FROM secret_permissions WHERE secret_id = ?1 ORDER BY user_id",
            )?;
            let perms = stmt
                .query_map(params![secret.0 as i64], row_to_secret_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(perms)
        })
        .await
    }

    async fn list_secret_permissions_for(&self, grantee: UserId) -> Result<Vec<SecretPermission>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT secret_id, user_id, can_read, can_write, can_delete
                 FROM secret_permissions WHERE user_id = ?1 ORDER BY secret_id",
            )?;
            let perms = stmt
                .query_map(params![grantee.0 as i64], row_to_secret_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(perms)
        })
        .await
    }

    async fn get_view(&self, user: UserId, secret: SecretId) -> Result<Option<UserSecretView>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT user_id, secret_id, folder_id FROM user_secret_views
                 WHERE user_id = ?1 AND secret_id = ?2",
                params![user.0 as i64, secret.0 as i64],
                row_to_view,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_views_for(&self, user: UserId) -> Result<Vec<UserSecretView>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, secret_id, folder_id FROM user_secret_views
                 WHERE user_id = ?1 ORDER BY secret_id",
            )?;
            let views = stmt
                .query_map(params![user.0 as i64], row_to_view)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(views)
        })
        .await
    }
}
