//! Authorization checks.
//!
//! `can(user, action, resource)` holds iff the user owns the resource, or a
//! permission row grants the action directly, or (secrets only) the secret's
//! real folder grants it. Folder grants reach exactly one level: a grant on a
//! parent folder says nothing about a grandchild.

use berryvault_core::{
    Access, Action, EffectivePermissions, Folder, FolderPermission, Secret, SecretPermission,
    UserId,
};
use berryvault_store::VaultStore;

use crate::error::Result;

/// A folder or secret being checked.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Folder(&'a Folder),
    Secret(&'a Secret),
}

impl<'a> From<&'a Folder> for Resource<'a> {
    fn from(folder: &'a Folder) -> Self {
        Resource::Folder(folder)
    }
}

impl<'a> From<&'a Secret> for Resource<'a> {
    fn from(secret: &'a Secret) -> Self {
        Resource::Secret(secret)
    }
}

/// Effective permissions on a folder, from its owner and the user's grant.
pub fn folder_access(
    user: UserId,
    folder: &Folder,
    grant: Option<&FolderPermission>,
) -> EffectivePermissions {
    if folder.owner == user {
        return EffectivePermissions::OWNER;
    }
    grant
        .filter(|g| g.folder == folder.id && g.grantee == user)
        .map(|g| EffectivePermissions::granted(g.access))
        .unwrap_or_default()
}

/// The grant-derived inputs to a secret check, loaded once per request.
#[derive(Debug, Clone, Default)]
pub struct SecretGrants {
    /// The user's direct grant on the secret.
    pub secret: Option<SecretPermission>,
    /// The user's grant on the secret's real folder.
    pub folder: Option<FolderPermission>,
    /// Owner of the secret's real folder.
    pub folder_owner: Option<UserId>,
}

/// Effective permissions on a secret.
///
/// The direct grant and the real folder's grant are unioned. Owning the
/// folder a secret was filed into by someone else yields read access.
pub fn secret_access(user: UserId, secret: &Secret, grants: &SecretGrants) -> EffectivePermissions {
    if secret.owner == user {
        return EffectivePermissions::OWNER;
    }

    let mut access = Access::NONE;
    if let Some(grant) = grants.secret.filter(|g| g.secret == secret.id && g.grantee == user) {
        access = access.union(grant.access);
    }
    if let Some(folder) = secret.folder {
        if let Some(grant) = grants.folder.filter(|g| g.folder == folder && g.grantee == user) {
            access = access.union(grant.access);
        }
        if grants.folder_owner == Some(user) {
            access = access.union(Access::READ);
        }
    }
    EffectivePermissions::granted(access)
}

/// Load the grants relevant to `user` on `secret`.
pub async fn load_secret_grants<S: VaultStore + ?Sized>(
    store: &S,
    user: UserId,
    secret: &Secret,
) -> Result<SecretGrants> {
    let direct = store.get_secret_permission(secret.id, user).await?;
    let (folder, folder_owner) = match secret.folder {
        Some(folder_id) => {
            let grant = store.get_folder_permission(folder_id, user).await?;
            let owner = store.get_folder(folder_id).await?.map(|f| f.owner);
            (grant, owner)
        }
        None => (None, None),
    };
    Ok(SecretGrants {
        secret: direct,
        folder,
        folder_owner,
    })
}

/// Effective permissions of `user` on a folder or secret.
pub async fn effective_permissions<S: VaultStore + ?Sized>(
    store: &S,
    user: UserId,
    resource: Resource<'_>,
) -> Result<EffectivePermissions> {
    match resource {
        Resource::Folder(folder) => {
            if folder.owner == user {
                return Ok(EffectivePermissions::OWNER);
            }
            let grant = store.get_folder_permission(folder.id, user).await?;
            Ok(folder_access(user, folder, grant.as_ref()))
        }
        Resource::Secret(secret) => {
            if secret.owner == user {
                return Ok(EffectivePermissions::OWNER);
            }
            let grants = load_secret_grants(store, user, secret).await?;
            Ok(secret_access(user, secret, &grants))
        }
    }
}

/// Whether `user` may perform `action` on `resource`.
pub async fn can<S: VaultStore + ?Sized>(
    store: &S,
    user: UserId,
    action: Action,
    resource: Resource<'_>,
) -> Result<bool> {
    let perms = effective_permissions(store, user, resource).await?;
    tracing::debug!(user = %user, ?action, allowed = perms.allows(action), "access check");
    Ok(perms.allows(action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use berryvault_core::{FolderId, FolderType, SecretId, SecretPayload};

    fn folder(id: u64, owner: u64) -> Folder {
        Folder {
            id: FolderId(id),
            name: "f".into(),
            description: None,
            owner: UserId(owner),
            parent: None,
            folder_type: FolderType::Shared,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn secret(owner: u64, folder: Option<u64>) -> Secret {
        Secret {
            id: SecretId(1),
            owner: UserId(owner),
            name: "s".into(),
            description: None,
            folder: folder.map(FolderId),
            secret_type: "password".into(),
            payload: SecretPayload::Inline { envelope: vec![] },
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_owner_has_everything() {
        let s = secret(1, None);
        let perms = secret_access(UserId(1), &s, &SecretGrants::default());
        for action in [Action::Read, Action::Write, Action::Delete] {
            assert!(perms.allows(action));
        }
        assert!(perms.is_owner);
    }

    #[test]
    fn test_stranger_has_nothing() {
        let s = secret(1, Some(5));
        let perms = secret_access(UserId(2), &s, &SecretGrants::default());
        assert!(!perms.any());
    }

    #[test]
    fn test_direct_and_folder_grants_union() {
        let s = secret(1, Some(5));
        let grants = SecretGrants {
            secret: Some(SecretPermission {
                secret: SecretId(1),
                grantee: UserId(2),
                access: Access::READ,
            }),
            folder: Some(FolderPermission {
                folder: FolderId(5),
                grantee: UserId(2),
                access: Access::new(false, false, true),
                inherit: true,
            }),
            folder_owner: Some(UserId(1)),
        };
        let perms = secret_access(UserId(2), &s, &grants);
        assert!(perms.can_read);
        assert!(!perms.can_write);
        assert!(perms.can_delete);
        assert!(!perms.is_owner);
    }

    #[test]
    fn test_folder_grant_ignored_for_unfiled_secret() {
        let s = secret(1, None);
        let grants = SecretGrants {
            folder: Some(FolderPermission::with_defaults(FolderId(5), UserId(2))),
            ..Default::default()
        };
        assert!(!secret_access(UserId(2), &s, &grants).any());
    }

    #[test]
    fn test_folder_access_requires_matching_grant() {
        let f = folder(5, 1);
        let other = FolderPermission::with_defaults(FolderId(6), UserId(2));
        assert!(!folder_access(UserId(2), &f, Some(&other)).any());

        let grant = FolderPermission::with_defaults(FolderId(5), UserId(2));
        let perms = folder_access(UserId(2), &f, Some(&grant));
        assert!(perms.can_read);
        assert!(!perms.can_write);
    }
}
