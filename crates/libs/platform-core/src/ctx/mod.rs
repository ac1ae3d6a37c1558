//! Request context for authentication and authorization.
//!
//! [`Ctx`] is passed to every BMC method to identify the user making the
//! call and the role they hold, so BMC methods and the [`crate::authz`]
//! engine can make authorization decisions without threading a session
//! object through every layer.

use crate::types::UserId;

/// Coarse-grained role carried on the context, distinct from the
/// per-resource [`crate::model::grant::Role`] a user may hold on a
/// specific repository. `Root` is reserved for background jobs
/// (migrations, the event bus, the sandbox runner) that act on behalf of
/// the system rather than a signed-in user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtxRole {
    Root,
    User,
}

/// Request context containing user identification and role.
///
/// # Examples
///
/// ```
/// use platform_core::ctx::Ctx;
///
/// let ctx = Ctx::root_ctx();
/// assert!(ctx.is_root());
///
/// let user_ctx = Ctx::new(42);
/// assert_eq!(user_ctx.user_id().get(), 42);
/// ```
#[derive(Clone, Debug)]
pub struct Ctx {
    user_id: UserId,
    role: CtxRole,
}

impl Ctx {
    /// Creates a root context for system-level operations: migrations,
    /// the event bus dispatcher, the sandbox runner's status callbacks.
    pub fn root_ctx() -> Self {
        Ctx {
            user_id: UserId::new(0),
            role: CtxRole::Root,
        }
    }

    /// Creates a context for a specific authenticated user.
    pub fn new(user_id: i64) -> Self {
        Ctx {
            user_id: UserId::new(user_id),
            role: CtxRole::User,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_root(&self) -> bool {
        matches!(self.role, CtxRole::Root)
    }
}
