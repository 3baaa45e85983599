//! The vault data model.
//!
//! Folders and secrets are exclusively owned by their creator. Permission
//! rows and views are weak relations: they reference a folder or secret
//! and are removed together with it.

use serde::{Deserialize, Serialize};

use crate::types::{FolderId, SecretId, UserId};

/// Folder mode. A SHARED folder propagates its grants to contained secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    #[default]
    Regular,
    Shared,
}

impl FolderType {
    /// Stable storage name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FolderType::Regular => "regular",
            FolderType::Shared => "shared",
        }
    }

    /// Parse a storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(FolderType::Regular),
            "shared" => Some(FolderType::Shared),
            _ => None,
        }
    }
}

/// A folder in a user's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub description: Option<String>,
    pub owner: UserId,
    /// Parent folder, stored as an id rather than a reference.
    pub parent: Option<FolderId>,
    pub folder_type: FolderType,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Folder {
    /// True iff the folder is in SHARED mode.
    pub fn is_shared(&self) -> bool {
        self.folder_type == FolderType::Shared
    }
}

/// One of the three grantable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Delete,
}

/// The fixed read/write/delete triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Access {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
}

impl Access {
    pub const NONE: Self = Self::new(false, false, false);
    pub const READ: Self = Self::new(true, false, false);
    pub const FULL: Self = Self::new(true, true, true);

    pub const fn new(can_read: bool, can_write: bool, can_delete: bool) -> Self {
        Self {
            can_read,
            can_write,
            can_delete,
        }
    }

    /// Whether this triple grants `action`.
    pub const fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Write => self.can_write,
            Action::Delete => self.can_delete,
        }
    }

    /// Bitwise union of two grants.
    pub const fn union(self, other: Self) -> Self {
        Self::new(
            self.can_read || other.can_read,
            self.can_write || other.can_write,
            self.can_delete || other.can_delete,
        )
    }
}

/// A folder-level grant. At most one per (folder, grantee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPermission {
    pub folder: FolderId,
    pub grantee: UserId,
    pub access: Access,
    /// Reserved for multi-level inheritance; carried but not interpreted.
    pub inherit: bool,
}

impl FolderPermission {
    /// A grant with the folder-share defaults: read-only, inheriting.
    pub fn with_defaults(folder: FolderId, grantee: UserId) -> Self {
        Self {
            folder,
            grantee,
            access: Access::READ,
            inherit: true,
        }
    }
}

/// Where a secret's encrypted bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SecretPayload {
    /// Envelope bytes stored inline.
    Inline { envelope: Vec<u8> },
    /// Envelope bytes stored in an upload file.
    File {
        path: String,
        original_name: String,
        mime_type: String,
        size: u64,
    },
}

impl SecretPayload {
    pub fn is_file(&self) -> bool {
        matches!(self, SecretPayload::File { .. })
    }
}

/// A secret. `folder` is its real, owner-assigned location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub owner: UserId,
    pub name: String,
    pub description: Option<String>,
    pub folder: Option<FolderId>,
    pub secret_type: String,
    pub payload: SecretPayload,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A secret-level grant. At most one per (secret, grantee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretPermission {
    pub secret: SecretId,
    pub grantee: UserId,
    pub access: Access,
}

/// A user's private placement of a secret. `folder == None` means unfiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSecretView {
    pub user: UserId,
    pub secret: SecretId,
    pub folder: Option<FolderId>,
}

/// What a user may do with a folder or secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub is_owner: bool,
}

impl EffectivePermissions {
    pub const OWNER: Self = Self {
        can_read: true,
        can_write: true,
        can_delete: true,
        is_owner: true,
    };

    /// Non-owner permissions from an access triple.
    pub const fn granted(access: Access) -> Self {
        Self {
            can_read: access.can_read,
            can_write: access.can_write,
            can_delete: access.can_delete,
            is_owner: false,
        }
    }

    pub const fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Write => self.can_write,
            Action::Delete => self.can_delete,
        }
    }

    /// True if any action is allowed.
    pub const fn any(&self) -> bool {
        self.can_read || self.can_write || self.can_delete
    }
}
