//! Permission propagation.
//!
//! Every grantee of a SHARED folder holds an equivalent SecretPermission on
//! each secret inside it, plus a view pointing at the folder when the grant
//! is readable. The planners here keep that true across share, unshare, type
//! changes, moves and creates.
//!
//! Planners are pure: they take a loaded snapshot and return a [`ChangeSet`]
//! that the store applies in one transaction, so a propagation either lands
//! together with its triggering write or not at all.
//!
//! The secret's owner never receives a permission row or a propagated view.

use berryvault_core::{
    Access, Action, ChangeSet, EffectivePermissions, Folder, FolderArena, FolderId,
    FolderPermission, FolderType, Mutation, Secret, SecretPermission, UserId,
};
use berryvault_store::VaultStore;

use crate::error::{PermsError, Result};
use crate::guard::{allows, not_self, owner_only, require, Guard};
use crate::views::set_view;

/// A folder with its grants and the secrets really filed in it.
#[derive(Debug, Clone)]
pub struct FolderContents {
    pub folder: Folder,
    pub grants: Vec<FolderPermission>,
    pub secrets: Vec<Secret>,
}

impl FolderContents {
    /// Load a folder snapshot.
    pub async fn load<S: VaultStore + ?Sized>(store: &S, id: FolderId) -> Result<Self> {
        let folder = store
            .get_folder(id)
            .await?
            .ok_or_else(|| PermsError::NotFound(format!("folder {}", id)))?;
        let grants = store.list_folder_permissions(id).await?;
        let secrets = store.list_secrets_in_folder(id).await?;
        Ok(Self {
            folder,
            grants,
            secrets,
        })
    }

    /// The grant held by `user`, if any.
    pub fn grant_for(&self, user: UserId) -> Option<&FolderPermission> {
        self.grants.iter().find(|g| g.grantee == user)
    }
}

/// Bits and flags for a folder share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderShare {
    pub access: Access,
    pub inherit: bool,
}

impl Default for FolderShare {
    fn default() -> Self {
        Self {
            access: Access::READ,
            inherit: true,
        }
    }
}

/// A partial secret share: `None` keeps the existing bit (false on insert).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecretShare {
    pub can_read: Option<bool>,
    pub can_write: Option<bool>,
    pub can_delete: Option<bool>,
}

impl SecretShare {
    /// Merge over an existing triple.
    pub fn merge(&self, existing: Access) -> Access {
        Access::new(
            self.can_read.unwrap_or(existing.can_read),
            self.can_write.unwrap_or(existing.can_write),
            self.can_delete.unwrap_or(existing.can_delete),
        )
    }
}

impl From<Access> for SecretShare {
    fn from(access: Access) -> Self {
        Self {
            can_read: Some(access.can_read),
            can_write: Some(access.can_write),
            can_delete: Some(access.can_delete),
        }
    }
}

/// Requested changes to a folder. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub parent: Option<Option<FolderId>>,
    pub folder_type: Option<FolderType>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Propagation primitives
// ─────────────────────────────────────────────────────────────────────────────

/// Mirror one folder grant onto `secrets` (rule: share / grant change).
fn propagate_grant(
    folder: FolderId,
    secrets: &[Secret],
    grant: &FolderPermission,
    changes: &mut ChangeSet,
) {
    for secret in secrets.iter().filter(|s| s.owner != grant.grantee) {
        changes.push(Mutation::UpsertSecretPermission(SecretPermission {
            secret: secret.id,
            grantee: grant.grantee,
            access: grant.access,
        }));
        if grant.access.can_read {
            changes.push(set_view(grant.grantee, secret, Some(folder)));
        }
    }
}

/// Mirror every grant onto `secrets` (rule: folder becomes SHARED).
fn propagate_all(
    folder: FolderId,
    secrets: &[Secret],
    grants: &[FolderPermission],
    changes: &mut ChangeSet,
) {
    for grant in grants {
        propagate_grant(folder, secrets, grant, changes);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Folder planners
// ─────────────────────────────────────────────────────────────────────────────

/// Create a folder. A parent must be owned or writable by the creator.
pub fn plan_create_folder(
    folder: Folder,
    parent_perms: Option<EffectivePermissions>,
) -> Result<ChangeSet> {
    if folder.parent.is_some() {
        let perms = parent_perms
            .ok_or_else(|| PermsError::NotFound("parent folder".into()))?;
        require(&perms, Action::Write, "add a folder here")?;
    }
    Ok(ChangeSet::new().with(Mutation::PutFolder(folder)))
}

/// Change a folder's mode, propagating every grant on REGULAR → SHARED.
pub fn plan_set_folder_type(contents: &FolderContents, folder_type: FolderType) -> ChangeSet {
    let mut changes = ChangeSet::new();
    if contents.folder.folder_type == folder_type {
        return changes;
    }
    changes.push(Mutation::SetFolderType {
        folder: contents.folder.id,
        folder_type,
    });
    if folder_type == FolderType::Shared {
        propagate_all(
            contents.folder.id,
            &contents.secrets,
            &contents.grants,
            &mut changes,
        );
    }
    changes
}

/// Rename, describe, re-parent or retype a folder.
///
/// Owner or writer only. Re-parenting is checked against `arena` for
/// cycles, and the new parent must be owned or writable by `actor`
/// (`parent_perms`). Mode changes are the owner's alone; a writer's
/// requested mode is ignored.
pub fn plan_update_folder(
    contents: &FolderContents,
    arena: &FolderArena,
    actor: UserId,
    actor_perms: EffectivePermissions,
    parent_perms: Option<EffectivePermissions>,
    update: FolderUpdate,
) -> Result<ChangeSet> {
    require(&actor_perms, Action::Write, "update this folder")?;

    let mut folder = contents.folder.clone();

    if let Some(name) = update.name {
        let name = name.trim();
        if !name.is_empty() {
            folder.name = name.to_string();
        }
    }
    if let Some(description) = update.description {
        folder.description = description;
    }
    if let Some(parent) = update.parent {
        arena.validate_reparent(folder.id, parent)?;
        if parent.is_some() {
            let perms = parent_perms
                .ok_or_else(|| PermsError::NotFound("parent folder".into()))?;
            require(&perms, Action::Write, "move this folder here")?;
        }
        folder.parent = parent;
    }

    let became_shared = match update.folder_type {
        Some(folder_type) if folder.owner == actor => {
            let was_shared = folder.is_shared();
            folder.folder_type = folder_type;
            !was_shared && folder.is_shared()
        }
        Some(_) => {
            tracing::debug!(folder = %folder.id, user = %actor, "mode change by non-owner ignored");
            false
        }
        None => false,
    };

    folder.updated_at = berryvault_core::now_millis();
    let mut changes = ChangeSet::new().with(Mutation::PutFolder(folder));
    if became_shared {
        propagate_all(
            contents.folder.id,
            &contents.secrets,
            &contents.grants,
            &mut changes,
        );
    }
    Ok(changes)
}

/// Share a folder with `grantee` (new grant or changed bits).
///
/// Owner only; never with oneself. A triple with no bits set is promoted to
/// read-only. A REGULAR folder becomes SHARED and every grant propagates;
/// an already SHARED folder propagates the new grant only.
pub fn plan_share_folder(
    contents: &FolderContents,
    actor: UserId,
    grantee: UserId,
    share: FolderShare,
) -> Result<ChangeSet> {
    let folder = &contents.folder;
    owner_only::<Folder>("share this folder")
        .and(not_self(grantee, "share a folder"))
        .check(actor, folder)?;

    let mut access = share.access;
    if !(access.can_read || access.can_write || access.can_delete) {
        access.can_read = true;
    }
    let grant = FolderPermission {
        folder: folder.id,
        grantee,
        access,
        inherit: share.inherit,
    };

    let mut changes = ChangeSet::new().with(Mutation::UpsertFolderPermission(grant));
    if folder.is_shared() {
        propagate_grant(folder.id, &contents.secrets, &grant, &mut changes);
    } else {
        changes.push(Mutation::SetFolderType {
            folder: folder.id,
            folder_type: FolderType::Shared,
        });
        let grants: Vec<FolderPermission> = contents
            .grants
            .iter()
            .filter(|g| g.grantee != grantee)
            .copied()
            .chain(std::iter::once(grant))
            .collect();
        propagate_all(folder.id, &contents.secrets, &grants, &mut changes);
    }

    tracing::info!(folder = %folder.id, grantee = %grantee, secrets = contents.secrets.len(), "folder shared");
    Ok(changes)
}

/// Remove `grantee`'s grant, their secret permissions and their views for
/// every secret in the folder. The last grant out reverts the folder to REGULAR.
pub fn plan_unshare_folder(
    contents: &FolderContents,
    actor: UserId,
    grantee: UserId,
) -> Result<ChangeSet> {
    let folder = &contents.folder;
    owner_only::<Folder>("unshare this folder").check(actor, folder)?;
    if contents.grant_for(grantee).is_none() {
        return Err(PermsError::NotFound(format!(
            "folder {} is not shared with user {}",
            folder.id, grantee
        )));
    }

    let mut changes = ChangeSet::new().with(Mutation::DeleteFolderPermission {
        folder: folder.id,
        grantee,
    });
    for secret in contents.secrets.iter().filter(|s| s.owner != grantee) {
        changes.push(Mutation::DeleteSecretPermission {
            secret: secret.id,
            grantee,
        });
        changes.push(Mutation::DeleteView {
            user: grantee,
            secret: secret.id,
        });
    }

    let remaining = contents.grants.iter().filter(|g| g.grantee != grantee).count();
    if remaining == 0 && folder.is_shared() {
        changes.push(Mutation::SetFolderType {
            folder: folder.id,
            folder_type: FolderType::Regular,
        });
    }

    tracing::info!(folder = %folder.id, grantee = %grantee, remaining, "folder unshared");
    Ok(changes)
}

/// Delete a folder. Owner or `can_delete` grantee.
pub fn plan_delete_folder(folder: &Folder, actor_perms: EffectivePermissions) -> Result<ChangeSet> {
    require(&actor_perms, Action::Delete, "delete this folder")?;
    Ok(ChangeSet::new().with(Mutation::DeleteFolder(folder.id)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Secret planners
// ─────────────────────────────────────────────────────────────────────────────

/// Create a secret, set its owner's view, and inherit a SHARED folder's grants.
///
/// The destination must be owned by the creator or writable via a grant.
pub fn plan_create_secret(secret: Secret, dest: Option<&FolderContents>) -> Result<ChangeSet> {
    if secret.folder != dest.map(|d| d.folder.id) {
        return Err(PermsError::InvalidInput(
            "secret folder does not match destination".into(),
        ));
    }

    let mut changes = ChangeSet::new();
    if let Some(dest) = dest {
        if dest.folder.owner != secret.owner {
            let writable = dest
                .grant_for(secret.owner)
                .map(|g| g.access.can_write)
                .unwrap_or(false);
            if !writable {
                return Err(PermsError::AccessDenied(
                    "cannot add secrets to this folder".into(),
                ));
            }
        }
    }

    changes.push(Mutation::PutSecret(secret.clone()));
    changes.push(set_view(secret.owner, &secret, secret.folder));
    if let Some(dest) = dest.filter(|d| d.folder.is_shared()) {
        propagate_all(
            dest.folder.id,
            std::slice::from_ref(&secret),
            &dest.grants,
            &mut changes,
        );
    }
    Ok(changes)
}

/// Move a secret.
///
/// The owner changes the real folder and their own view; moving into a
/// SHARED folder replays its grants, moving anywhere else forces `can_read`
/// on every remaining grant so no grantee silently loses the secret.
///
/// A non-owner with any permission row only relocates their own view.
///
/// In both cases the destination must be none, owned by the actor, or
/// readable through a folder grant.
pub fn plan_move_secret(
    secret: &Secret,
    actor: UserId,
    secret_grants: &[SecretPermission],
    dest: Option<&FolderContents>,
) -> Result<ChangeSet> {
    let is_owner = secret.owner == actor;
    if !is_owner && !secret_grants.iter().any(|g| g.grantee == actor) {
        return Err(PermsError::AccessDenied(
            "you don't have access to this secret".into(),
        ));
    }

    if let Some(dest) = dest {
        let reachable = dest.folder.owner == actor
            || dest
                .grant_for(actor)
                .map(|g| g.access.can_read)
                .unwrap_or(false);
        if !reachable {
            return Err(PermsError::AccessDenied(
                "you don't have permission to access this folder".into(),
            ));
        }
    }

    let dest_id = dest.map(|d| d.folder.id);
    let mut changes = ChangeSet::new();

    if !is_owner {
        changes.push(set_view(actor, secret, dest_id));
        tracing::debug!(secret = %secret.id, user = %actor, "view relocated");
        return Ok(changes);
    }

    changes.push(Mutation::SetSecretFolder {
        secret: secret.id,
        folder: dest_id,
    });
    changes.push(set_view(actor, secret, dest_id));

    match dest.filter(|d| d.folder.is_shared()) {
        Some(shared) => {
            propagate_all(
                shared.folder.id,
                std::slice::from_ref(secret),
                &shared.grants,
                &mut changes,
            );
        }
        None => {
            for grant in secret_grants
                .iter()
                .filter(|g| g.grantee != secret.owner && !g.access.can_read)
            {
                let mut residual = *grant;
                residual.access.can_read = true;
                changes.push(Mutation::UpsertSecretPermission(residual));
            }
        }
    }

    tracing::info!(secret = %secret.id, from = ?secret.folder, to = ?dest_id, "secret moved");
    Ok(changes)
}

/// Replace a secret's name, description, type or payload.
///
/// Owner or writer only. The real folder is changed through a move, so it is
/// carried over from `current` whatever `updated` says.
pub fn plan_update_secret(
    current: &Secret,
    mut updated: Secret,
    actor_perms: EffectivePermissions,
) -> Result<ChangeSet> {
    require(&actor_perms, Action::Write, "update this secret")?;
    if updated.id != current.id || updated.owner != current.owner {
        return Err(PermsError::InvalidInput(
            "secret id and owner are immutable".into(),
        ));
    }
    updated.folder = current.folder;
    updated.created_at = current.created_at;
    Ok(ChangeSet::new().with(Mutation::PutSecret(updated)))
}

/// Delete a secret. Its permissions and views go with it.
pub fn plan_delete_secret(secret: &Secret, actor_perms: EffectivePermissions) -> Result<ChangeSet> {
    require(&actor_perms, Action::Delete, "delete this secret")?;
    Ok(ChangeSet::new().with(Mutation::DeleteSecret(secret.id)))
}

/// Share a secret directly.
///
/// Owner or writer; never with oneself or the owner. Unsupplied bits keep
/// their existing value (false on insert). A new readable grant gets an
/// unfiled view.
pub fn plan_share_secret(
    secret: &Secret,
    actor: UserId,
    actor_perms: EffectivePermissions,
    grantee: UserId,
    existing: Option<&SecretPermission>,
    share: SecretShare,
) -> Result<ChangeSet> {
    allows::<Secret>(actor_perms, Action::Write, "share this secret")
        .and(not_self(grantee, "share a secret"))
        .check(actor, secret)?;
    if grantee == secret.owner {
        return Err(PermsError::InvalidInput(
            "the owner already has full access".into(),
        ));
    }

    let base = existing.map(|p| p.access).unwrap_or(Access::NONE);
    let access = share.merge(base);
    let mut changes = ChangeSet::new().with(Mutation::UpsertSecretPermission(SecretPermission {
        secret: secret.id,
        grantee,
        access,
    }));
    if existing.is_none() && access.can_read {
        changes.push(set_view(grantee, secret, None));
    }

    tracing::info!(secret = %secret.id, grantee = %grantee, "secret shared");
    Ok(changes)
}

/// Revoke a direct secret grant and the grantee's view.
pub fn plan_unshare_secret(
    secret: &Secret,
    actor_perms: EffectivePermissions,
    grantee: UserId,
    existing: Option<&SecretPermission>,
) -> Result<ChangeSet> {
    require(&actor_perms, Action::Write, "unshare this secret")?;
    if existing.is_none() {
        return Err(PermsError::NotFound(format!(
            "secret {} is not shared with user {}",
            secret.id, grantee
        )));
    }
    tracing::info!(secret = %secret.id, grantee = %grantee, "secret unshared");
    Ok(ChangeSet::new()
        .with(Mutation::DeleteSecretPermission {
            secret: secret.id,
            grantee,
        })
        .with(Mutation::DeleteView {
            user: grantee,
            secret: secret.id,
        }))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use berryvault_core::{SecretId, SecretPayload};
    use proptest::prelude::*;

    fn shared_folder_with(secret_owners: &[u64]) -> FolderContents {
        FolderContents {
            folder: Folder {
                id: FolderId(1),
                name: "shared".into(),
                description: None,
                owner: UserId(1),
                parent: None,
                folder_type: FolderType::Shared,
                created_at: 0,
                updated_at: 0,
            },
            grants: vec![],
            secrets: secret_owners
                .iter()
                .enumerate()
                .map(|(i, owner)| Secret {
                    id: SecretId(i as u64 + 1),
                    owner: UserId(*owner),
                    name: format!("s{i}"),
                    description: None,
                    folder: Some(FolderId(1)),
                    secret_type: "note".into(),
                    payload: SecretPayload::Inline { envelope: vec![] },
                    created_at: 0,
                    updated_at: 0,
                })
                .collect(),
        }
    }

    proptest! {
        #[test]
        fn prop_share_mirrors_bits(
            read: bool,
            write: bool,
            delete: bool,
            owners in proptest::collection::vec(1u64..4, 0..12),
        ) {
            let grantee = UserId(2);
            let contents = shared_folder_with(&owners);
            let share = FolderShare { access: Access::new(read, write, delete), inherit: true };
            let changes = plan_share_folder(&contents, UserId(1), grantee, share).unwrap();

            let expected_access = if read || write || delete {
                Access::new(read, write, delete)
            } else {
                Access::READ
            };
            let eligible = owners.iter().filter(|o| **o != grantee.0).count();

            let mut perms = 0;
            let mut views = 0;
            for m in &changes {
                match m {
                    Mutation::UpsertSecretPermission(p) => {
                        prop_assert_eq!(p.grantee, grantee);
                        prop_assert_eq!(p.access, expected_access);
                        perms += 1;
                    }
                    Mutation::SetView(v) => {
                        prop_assert_eq!(v.folder, Some(FolderId(1)));
                        views += 1;
                    }
                    _ => {}
                }
            }
            prop_assert_eq!(perms, eligible);
            prop_assert_eq!(views, if expected_access.can_read { eligible } else { 0 });
        }
    }
}
