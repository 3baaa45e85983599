//! Folder tree traversal and cycle guard.
//!
//! Folders form an arena indexed by id; the parent link is an id, never a
//! reference. Every walk carries an explicit visited-set so a cycle that
//! slipped into storage terminates the walk instead of looping.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};
use crate::model::Folder;
use crate::types::FolderId;

/// The part of a folder the hierarchy cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub name: String,
    pub parent: Option<FolderId>,
}

/// Folder tree arena.
#[derive(Debug, Default, Clone)]
pub struct FolderArena {
    nodes: HashMap<FolderId, FolderNode>,
}

impl FolderArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena from folder records.
    pub fn from_folders<'a>(folders: impl IntoIterator<Item = &'a Folder>) -> Self {
        let mut arena = Self::new();
        for folder in folders {
            arena.insert(folder.id, folder.name.clone(), folder.parent);
        }
        arena
    }

    pub fn insert(&mut self, id: FolderId, name: impl Into<String>, parent: Option<FolderId>) {
        self.nodes.insert(
            id,
            FolderNode {
                name: name.into(),
                parent,
            },
        );
    }

    pub fn get(&self, id: FolderId) -> Option<&FolderNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: FolderId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Overwrite a folder's parent link without validation.
    pub fn set_parent(&mut self, id: FolderId, parent: Option<FolderId>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(CoreError::UnknownFolder(id))?;
        node.parent = parent;
        Ok(())
    }

    /// Walk from `start` towards the root, calling `visit` on each folder.
    ///
    /// Returns `false` if the walk stopped on a revisit (a cycle) and `true`
    /// if it reached a root or an unknown id. `visit` returning `false` ends
    /// the walk early and also yields `true`.
    pub fn walk_up<'a, F>(&'a self, start: FolderId, visited: &mut HashSet<FolderId>, mut visit: F) -> bool
    where
        F: FnMut(FolderId, &'a FolderNode) -> bool,
    {
        let mut current = Some(start);
        while let Some(id) = current {
            if !visited.insert(id) {
                tracing::debug!(folder = %id, "cycle detected during folder walk");
                return false;
            }
            let Some(node) = self.nodes.get(&id) else {
                return true;
            };
            if !visit(id, node) {
                return true;
            }
            current = node.parent;
        }
        true
    }

    /// Full path of a folder, `"/" + names joined root to leaf`.
    ///
    /// Returns `None` for an unknown folder. A cycle truncates the path at
    /// the first repeated folder.
    pub fn full_path(&self, id: FolderId) -> Option<String> {
        if !self.contains(id) {
            return None;
        }
        let mut names = Vec::new();
        let mut visited = HashSet::new();
        self.walk_up(id, &mut visited, |_, node| {
            names.push(node.name.as_str());
            true
        });
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: FolderId) -> Vec<FolderId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.walk_up(id, &mut visited, |fid, _| {
            if fid != id {
                out.push(fid);
            }
            true
        });
        out
    }

    /// Direct children of `id`.
    pub fn children(&self, id: FolderId) -> Vec<FolderId> {
        let mut out: Vec<FolderId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == Some(id))
            .map(|(fid, _)| *fid)
            .collect();
        out.sort();
        out
    }

    /// Check that `folder` may be moved under `new_parent`.
    ///
    /// Fails with `InvalidHierarchy` when `new_parent == folder`, and with
    /// `CircularReference` when `folder` appears in the ancestor chain of
    /// `new_parent` or the chain revisits a folder.
    pub fn validate_reparent(&self, folder: FolderId, new_parent: Option<FolderId>) -> Result<()> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == folder {
            return Err(CoreError::InvalidHierarchy(
                "a folder cannot be its own parent".into(),
            ));
        }
        if !self.contains(parent) {
            return Err(CoreError::UnknownFolder(parent));
        }

        let mut found = false;
        let mut visited = HashSet::new();
        let completed = self.walk_up(parent, &mut visited, |fid, _| {
            if fid == folder {
                found = true;
                return false;
            }
            true
        });

        if found || !completed {
            return Err(CoreError::CircularReference { folder, parent });
        }
        Ok(())
    }
}
