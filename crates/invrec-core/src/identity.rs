//! Identity/authorization collaborator.
//!
//! Supplies the acting caller for audit fields and gates privileged
//! lifecycle operations. Consumed only; never implemented beyond the
//! static variant here.

use std::fmt;

/// Operations gated by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegedAction {
    Finalize,
    Delete,
}

impl fmt::Display for PrivilegedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegedAction::Finalize => write!(f, "finalize"),
            PrivilegedAction::Delete => write!(f, "delete"),
        }
    }
}

/// Caller identity for `last_modified_by` and deletion audit entries.
pub trait IdentityProvider: Send + Sync {
    /// The acting caller.
    fn current_actor(&self) -> String;

    /// Whether the caller may perform a privileged operation.
    fn authorize(&self, action: PrivilegedAction) -> bool;
}

/// Fixed identity, used by the CLI and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    actor: String,
    privileged: bool,
}

impl StaticIdentity {
    /// Identity allowed to finalize and delete.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            privileged: true,
        }
    }

    /// Identity denied all privileged operations.
    pub fn read_only(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            privileged: false,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> String {
        self.actor.clone()
    }

    fn authorize(&self, _action: PrivilegedAction) -> bool {
        self.privileged
    }
}
