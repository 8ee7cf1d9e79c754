//! Authenticated caller identity and the lease authorization predicate.

use super::Lease;

/// Identity of the party invoking an operation.
///
/// `username` is `None` for service-originated calls that carry no user
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Caller {
    /// Authenticated user name, if any.
    pub username: Option<String>,
    /// Whether the caller belongs to the administrator group.
    pub is_admin: bool,
}

impl Caller {
    /// A non-administrator user.
    #[must_use]
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            is_admin: false,
        }
    }

    /// An administrator user.
    #[must_use]
    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            is_admin: true,
        }
    }

    /// Returns `true` if the caller acts as `principal_id`.
    #[must_use]
    pub fn is_principal(&self, principal_id: &str) -> bool {
        self.username.as_deref() == Some(principal_id)
    }

    /// Administrators may act on any lease; everyone else only on leases
    /// where they are the principal.
    #[must_use]
    pub fn may_act_on(&self, lease: &Lease) -> bool {
        self.is_admin || self.is_principal(&lease.principal_id)
    }

    /// Administrators may act for any principal; everyone else only for
    /// themselves.
    #[must_use]
    pub fn may_act_for(&self, principal_id: &str) -> bool {
        self.is_admin || self.is_principal(principal_id)
    }
}
