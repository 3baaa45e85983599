//! Change sets: ordered batches of vault mutations.
//!
//! Permission planning is pure and produces a [`ChangeSet`]; a store commits
//! the whole set in one transaction or none of it.
//!
//! Cascade rules applied by every store:
//!
//! - `DeleteFolder` removes the folder's permission rows, unfiles contained
//!   secrets, clears views pointing at it and detaches child folders.
//! - `DeleteSecret` removes the secret's permission rows and views.

use crate::model::{
    Folder, FolderPermission, FolderType, Secret, SecretPermission, UserSecretView,
};
use crate::types::{FolderId, SecretId, UserId};

/// A single state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace a folder record.
    PutFolder(Folder),
    DeleteFolder(FolderId),
    SetFolderType {
        folder: FolderId,
        folder_type: FolderType,
    },
    /// Update in place if a row exists for (folder, grantee), else insert.
    UpsertFolderPermission(FolderPermission),
    DeleteFolderPermission {
        folder: FolderId,
        grantee: UserId,
    },
    /// Insert or replace a secret record.
    PutSecret(Secret),
    SetSecretFolder {
        secret: SecretId,
        folder: Option<FolderId>,
    },
    DeleteSecret(SecretId),
    /// Update in place if a row exists for (secret, grantee), else insert.
    UpsertSecretPermission(SecretPermission),
    DeleteSecretPermission {
        secret: SecretId,
        grantee: UserId,
    },
    /// Upsert keyed by (user, secret).
    SetView(UserSecretView),
    DeleteView {
        user: UserId,
        secret: SecretId,
    },
}

/// An ordered list of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    mutations: Vec<Mutation>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Builder-style push.
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.push(mutation);
        self
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.mutations.extend(other.mutations);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }

    pub fn into_vec(self) -> Vec<Mutation> {
        self.mutations
    }
}

impl IntoIterator for ChangeSet {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}

impl FromIterator<Mutation> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        Self {
            mutations: iter.into_iter().collect(),
        }
    }
}
