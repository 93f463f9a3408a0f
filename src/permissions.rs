//! Role-based permission policy.
//!
//! Resolution order for `has_permission`:
//! 1) role `admin` is allowed everything
//! 2) the permission set fetched from the gateway for the role, when loaded
//! 3) the built-in fallback table (degraded mode, pure function of role)

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::session::SessionUser;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageProjects,
    ManageTasks,
    ManageOwnTasks,
    ManageTeam,
    ManageDocuments,
    ViewReports,
    ManageSettings,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::ManageProjects,
        Permission::ManageTasks,
        Permission::ManageOwnTasks,
        Permission::ManageTeam,
        Permission::ManageDocuments,
        Permission::ViewReports,
        Permission::ManageSettings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ManageProjects => "manage_projects",
            Permission::ManageTasks => "manage_tasks",
            Permission::ManageOwnTasks => "manage_own_tasks",
            Permission::ManageTeam => "manage_team",
            Permission::ManageDocuments => "manage_documents",
            Permission::ViewReports => "view_reports",
            Permission::ManageSettings => "manage_settings",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Permission::ALL
            .iter()
            .copied()
            .find(|permission| permission.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown permission '{trimmed}'")))
    }
}

/// Store mutations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Degraded-mode permissions for a role when the gateway has not supplied a set.
pub fn fallback_permissions(role: &str) -> &'static [Permission] {
    match role.trim().to_ascii_lowercase().as_str() {
        ADMIN_ROLE => Permission::ALL,
        "manager" | "project_manager" => &[
            Permission::ManageProjects,
            Permission::ManageTasks,
            Permission::ManageOwnTasks,
            Permission::ManageTeam,
            Permission::ManageDocuments,
            Permission::ViewReports,
        ],
        "member" | "developer" => &[Permission::ManageOwnTasks, Permission::ManageDocuments],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    granted: Option<HashSet<Permission>>,
}

impl PermissionPolicy {
    /// Policy that only consults the fallback table.
    pub fn fallback() -> Self {
        Self { granted: None }
    }

    /// Policy backed by an explicit permission set.
    pub fn with_granted(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            granted: Some(permissions.into_iter().collect()),
        }
    }

    /// Fetch the role's permission set once. Failures degrade to the fallback table.
    pub async fn load(gateway: &Gateway, role: &str, cancel: &CancellationToken) -> Self {
        if role.trim().eq_ignore_ascii_case(ADMIN_ROLE) {
            return Self::fallback();
        }
        match gateway.role_permissions(role, cancel).await {
            Ok(raw) => {
                let mut granted = HashSet::new();
                for entry in raw {
                    match entry.parse::<Permission>() {
                        Ok(permission) => {
                            granted.insert(permission);
                        }
                        Err(_) => debug!(permission = %entry, "ignoring unknown permission"),
                    }
                }
                Self::with_granted(granted)
            }
            Err(err) => {
                warn!(role, error = %err, "permission fetch failed; using fallback table");
                Self::fallback()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.granted.is_some()
    }

    pub fn has_permission(&self, subject: &SessionUser, action: Permission) -> bool {
        if subject.role.trim().eq_ignore_ascii_case(ADMIN_ROLE) {
            return true;
        }
        match &self.granted {
            Some(granted) => granted.contains(&action),
            None => fallback_permissions(&subject.role).contains(&action),
        }
    }
}
