//! Composable authorization guards.
//!
//! A guard is a pure `(identity, resource) -> Result<()>` check. Guards
//! combine with [`Guard::and`] / [`Guard::or`] and wrap a handler with
//! [`guarded`], so an operation only runs once its checks pass.

use berryvault_core::{Action, EffectivePermissions, Folder, Secret, UserId};

use crate::error::{PermsError, Result};

/// Fail with `AccessDenied` unless `perms` allows `action`.
///
/// `what` completes the sentence "you don't have permission to ...".
pub fn require(perms: &EffectivePermissions, action: Action, what: &str) -> Result<()> {
    if perms.allows(action) {
        Ok(())
    } else {
        Err(PermsError::AccessDenied(format!(
            "you don't have permission to {}",
            what
        )))
    }
}

/// Anything with a single owning user.
pub trait Owned {
    fn owner(&self) -> UserId;
}

impl Owned for Folder {
    fn owner(&self) -> UserId {
        self.owner
    }
}

impl Owned for Secret {
    fn owner(&self) -> UserId {
        self.owner
    }
}

/// A pure authorization check.
pub trait Guard<R: ?Sized> {
    fn check(&self, user: UserId, resource: &R) -> Result<()>;

    /// Both guards must pass.
    fn and<G: Guard<R>>(self, other: G) -> And<Self, G>
    where
        Self: Sized,
    {
        And(self, other)
    }

    /// Either guard may pass; the second's error is reported.
    fn or<G: Guard<R>>(self, other: G) -> Or<Self, G>
    where
        Self: Sized,
    {
        Or(self, other)
    }
}

impl<R: ?Sized, F> Guard<R> for F
where
    F: Fn(UserId, &R) -> Result<()>,
{
    fn check(&self, user: UserId, resource: &R) -> Result<()> {
        self(user, resource)
    }
}

pub struct And<A, B>(A, B);

impl<R: ?Sized, A: Guard<R>, B: Guard<R>> Guard<R> for And<A, B> {
    fn check(&self, user: UserId, resource: &R) -> Result<()> {
        self.0.check(user, resource)?;
        self.1.check(user, resource)
    }
}

pub struct Or<A, B>(A, B);

impl<R: ?Sized, A: Guard<R>, B: Guard<R>> Guard<R> for Or<A, B> {
    fn check(&self, user: UserId, resource: &R) -> Result<()> {
        match self.0.check(user, resource) {
            Ok(()) => Ok(()),
            Err(_) => self.1.check(user, resource),
        }
    }
}

/// Passes only for the resource's owner.
///
/// `what` completes "only the owner can ...".
pub fn owner_only<R: Owned + ?Sized>(what: &'static str) -> impl Guard<R> {
    move |user: UserId, resource: &R| {
        if resource.owner() == user {
            Ok(())
        } else {
            Err(PermsError::AccessDenied(format!("only the owner can {}", what)))
        }
    }
}

/// Passes when the precomputed permissions allow `action`; see [`require`].
pub fn allows<R: ?Sized>(
    perms: EffectivePermissions,
    action: Action,
    what: &'static str,
) -> impl Guard<R> {
    move |_user: UserId, _resource: &R| require(&perms, action, what)
}

/// Passes when the acting user is not `other`.
///
/// `what` completes "cannot ... with yourself".
pub fn not_self<R: ?Sized>(other: UserId, what: &'static str) -> impl Guard<R> {
    move |user: UserId, _resource: &R| {
        if user != other {
            Ok(())
        } else {
            Err(PermsError::InvalidInput(format!("cannot {} with yourself", what)))
        }
    }
}

/// Run `handler` only if `guard` passes.
pub fn guarded<R: ?Sized, T, G, H>(guard: &G, user: UserId, resource: &R, handler: H) -> Result<T>
where
    G: Guard<R>,
    H: FnOnce(&R) -> Result<T>,
{
    guard.check(user, resource)?;
    handler(resource)
}
