//! Share permissions and the per-page access variant.
//!
//! DESIGN
//! ======
//! `Permission` is the level stored on a share record. `PageAccess` is what a
//! given viewer gets on a given page, computed once per load from ownership
//! and the viewer's share (if any). Editor gating and the dashboard both
//! consume `PageAccess` instead of re-deriving it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

impl Permission {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "view" => Some(Self::View),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
        }
    }

    /// `edit` grants everything `view` does.
    #[must_use]
    pub fn satisfies(self, required: Permission) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAccess {
    Owned,
    SharedView,
    SharedEdit,
}

impl PageAccess {
    /// Resolve a viewer's access. `None` when the viewer neither owns the
    /// page nor holds a share on it.
    #[must_use]
    pub fn resolve(owner_id: Uuid, viewer_id: Uuid, permission: Option<Permission>) -> Option<Self> {
        if owner_id == viewer_id {
            return Some(Self::Owned);
        }
        match permission? {
            Permission::View => Some(Self::SharedView),
            Permission::Edit => Some(Self::SharedEdit),
        }
    }

    #[must_use]
    pub fn permission(self) -> Permission {
        match self {
            Self::Owned | Self::SharedEdit => Permission::Edit,
            Self::SharedView => Permission::View,
        }
    }

    #[must_use]
    pub fn can_edit(self) -> bool {
        self.permission().satisfies(Permission::Edit)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::SharedView => "shared_view",
            Self::SharedEdit => "shared_edit",
        }
    }
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
