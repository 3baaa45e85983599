//! Proptest generators for property-based testing.

use proptest::prelude::*;

use berryvault_core::{
    Access, Folder, FolderArena, FolderId, FolderPermission, FolderType, Secret, SecretId,
    SecretPayload, UserId,
};
use berryvault_envelope::EnvelopeHeader;
use berryvault_perms::{FolderContents, FolderShare, SecretShare};

/// Generate a user id.
pub fn user_id() -> impl Strategy<Value = UserId> {
    (1u64..10_000).prop_map(UserId)
}

/// Generate a read/write/delete triple.
pub fn access() -> impl Strategy<Value = Access> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(r, w, d)| Access::new(r, w, d))
}

pub fn folder_share() -> impl Strategy<Value = FolderShare> {
    (access(), any::<bool>()).prop_map(|(access, inherit)| FolderShare { access, inherit })
}

/// A partial secret share; each bit may be left out.
pub fn secret_share() -> impl Strategy<Value = SecretShare> {
    (
        any::<Option<bool>>(),
        any::<Option<bool>>(),
        any::<Option<bool>>(),
    )
        .prop_map(|(can_read, can_write, can_delete)| SecretShare {
            can_read,
            can_write,
            can_delete,
        })
}

/// Generate any of the three envelope header forms.
pub fn envelope_header() -> impl Strategy<Value = EnvelopeHeader> {
    prop_oneof![
        Just(EnvelopeHeader::Untagged),
        any::<u64>().prop_map(|id| EnvelopeHeader::User(UserId(id))),
        "[a-z][a-z0-9_]{0,23}\\.sealed".prop_map(EnvelopeHeader::Legacy),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

pub fn folder_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 _-]{0,31}".prop_map(String::from)
}

/// Parent links for `1..=max` folders. Links may form cycles.
pub fn parent_links(max: usize) -> impl Strategy<Value = Vec<Option<usize>>> {
    (1..=max).prop_flat_map(|n| prop::collection::vec(prop::option::of(0..n), n))
}

/// Build an arena from [`parent_links`]; folder `i` gets id `i + 1`.
pub fn arena_from_links(links: &[Option<usize>]) -> FolderArena {
    let mut arena = FolderArena::new();
    for (i, parent) in links.iter().enumerate() {
        arena.insert(
            FolderId(i as u64 + 1),
            format!("f{}", i),
            parent.map(|p| FolderId(p as u64 + 1)),
        );
    }
    arena
}

/// A secret with an empty inline envelope.
pub fn secret_in(id: u64, owner: UserId, folder: Option<FolderId>) -> Secret {
    Secret {
        id: SecretId(id),
        owner,
        name: format!("secret-{}", id),
        description: None,
        folder,
        secret_type: "password".into(),
        payload: SecretPayload::Inline {
            envelope: Vec::new(),
        },
        created_at: 0,
        updated_at: 0,
    }
}

/// A folder, its current grants and secrets, and one new share to plan.
#[derive(Debug, Clone)]
pub struct ShareScenario {
    pub owner: UserId,
    pub folder_type: FolderType,
    pub existing: Vec<(UserId, Access)>,
    /// Owner of each secret in the folder.
    pub secret_owners: Vec<UserId>,
    pub grantee: UserId,
    pub share: FolderShare,
}

impl ShareScenario {
    pub const FOLDER: FolderId = FolderId(1);

    /// The folder snapshot the planners take.
    pub fn contents(&self) -> FolderContents {
        let folder = Folder {
            id: Self::FOLDER,
            name: "scenario".into(),
            description: None,
            owner: self.owner,
            parent: None,
            folder_type: self.folder_type,
            created_at: 0,
            updated_at: 0,
        };
        let grants = self
            .existing
            .iter()
            .map(|(grantee, access)| FolderPermission {
                folder: Self::FOLDER,
                grantee: *grantee,
                access: *access,
                inherit: true,
            })
            .collect();
        let secrets = self
            .secret_owners
            .iter()
            .enumerate()
            .map(|(i, owner)| secret_in(i as u64 + 1, *owner, Some(Self::FOLDER)))
            .collect();
        FolderContents {
            folder,
            grants,
            secrets,
        }
    }
}

/// Generate a share scenario with up to `max_grants` existing grantees and
/// `max_secrets` secrets.
pub fn share_scenario(max_grants: usize, max_secrets: usize) -> impl Strategy<Value = ShareScenario> {
    (
        prop::collection::btree_set(2u64..1000, 0..=max_grants),
        prop::collection::vec(access(), max_grants),
        prop::collection::vec(any::<prop::sample::Index>(), 0..=max_secrets),
        prop_oneof![Just(FolderType::Regular), Just(FolderType::Shared)],
        folder_share(),
    )
        .prop_map(|(grantees, accesses, picks, folder_type, share)| {
            let owner = UserId(1);
            let existing: Vec<(UserId, Access)> = grantees
                .iter()
                .zip(accesses)
                .map(|(id, access)| (UserId(*id), access))
                .collect();
            let mut filers = vec![owner];
            filers.extend(existing.iter().map(|(id, _)| *id));
            let secret_owners = picks.iter().map(|pick| *pick.get(&filers)).collect();
            ShareScenario {
                owner,
                folder_type,
                existing,
                secret_owners,
                grantee: UserId(5000),
                share,
            }
        })
}
