//! Per-user placement of secrets.
//!
//! A view is a user's private answer to "which folder do I see this secret
//! in". It never touches the secret's real folder or anyone else's view.

use berryvault_core::{FolderId, Mutation, Secret, UserId, UserSecretView};
use berryvault_store::VaultStore;

use crate::error::Result;

/// Resolve the folder `user` sees `secret` in, given their view row (if any).
///
/// An explicit row wins, including an explicit `None` (unfiled). Without a
/// row the owner sees the real folder and everyone else sees it unfiled.
pub fn resolve_view(
    user: UserId,
    secret: &Secret,
    view: Option<&UserSecretView>,
) -> Option<FolderId> {
    match view {
        Some(view) if view.user == user && view.secret == secret.id => view.folder,
        _ if secret.owner == user => secret.folder,
        _ => None,
    }
}

/// Look up the view row and resolve it.
pub async fn load_view<S: VaultStore + ?Sized>(
    store: &S,
    user: UserId,
    secret: &Secret,
) -> Result<Option<FolderId>> {
    let view = store.get_view(user, secret.id).await?;
    Ok(resolve_view(user, secret, view.as_ref()))
}

/// Upsert keyed by (user, secret).
///
/// Reachability of `folder` is the caller's responsibility.
pub fn set_view(user: UserId, secret: &Secret, folder: Option<FolderId>) -> Mutation {
    Mutation::SetView(UserSecretView {
        user,
        secret: secret.id,
        folder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use berryvault_core::{SecretId, SecretPayload};

    fn secret() -> Secret {
        Secret {
            id: SecretId(7),
            owner: UserId(1),
            name: "s".into(),
            description: None,
            folder: Some(FolderId(3)),
            secret_type: "note".into(),
            payload: SecretPayload::Inline { envelope: vec![] },
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_owner_falls_back_to_real_folder() {
        assert_eq!(resolve_view(UserId(1), &secret(), None), Some(FolderId(3)));
    }

    #[test]
    fn test_other_user_without_row_is_unfiled() {
        assert_eq!(resolve_view(UserId(2), &secret(), None), None);
    }

    #[test]
    fn test_explicit_row_wins() {
        let s = secret();
        let view = UserSecretView {
            user: UserId(2),
            secret: s.id,
            folder: Some(FolderId(9)),
        };
        assert_eq!(resolve_view(UserId(2), &s, Some(&view)), Some(FolderId(9)));

        let owner_unfiled = UserSecretView {
            user: UserId(1),
            secret: s.id,
            folder: None,
        };
        assert_eq!(resolve_view(UserId(1), &s, Some(&owner_unfiled)), None);
    }

    #[test]
    fn test_foreign_row_ignored() {
        let s = secret();
        let view = UserSecretView {
            user: UserId(2),
            secret: s.id,
            folder: Some(FolderId(9)),
        };
        assert_eq!(resolve_view(UserId(1), &s, Some(&view)), Some(FolderId(3)));
    }

    #[tokio::test]
    async fn test_set_view_does_not_move_secret() {
        use berryvault_core::ChangeSet;
        use berryvault_store::MemoryStore;

        let store = MemoryStore::new();
        let mut s = secret();
        s.folder = None;
        store
            .apply(
                ChangeSet::new()
                    .with(Mutation::PutSecret(s.clone()))
                    .with(set_view(UserId(2), &s, None)),
            )
            .await
            .unwrap();

        assert_eq!(load_view(&store, UserId(2), &s).await.unwrap(), None);
        assert_eq!(store.get_secret(s.id).await.unwrap().unwrap().folder, None);
    }
}
