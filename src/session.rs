//! Session context.
//!
//! The signed-in user and their permission policy are passed explicitly to
//! every store instead of being read from ambient global state.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::permissions::{Permission, PermissionPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: SessionUser,
    pub token: Option<String>,
    pub policy: PermissionPolicy,
}

impl SessionContext {
    pub fn new(user: SessionUser, policy: PermissionPolicy) -> Self {
        Self {
            user,
            token: None,
            policy,
        }
    }

    /// Session for the configured user, using the fallback permission table
    /// until a policy is loaded.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            user: SessionUser {
                id: config.user_id,
                name: config.name.clone(),
                role: config.role.clone(),
            },
            token: config.token.clone(),
            policy: PermissionPolicy::fallback(),
        }
    }

    pub fn with_policy(mut self, policy: PermissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.policy.has_permission(&self.user, permission)
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                role: self.user.role.clone(),
                permission: permission.to_string(),
            })
        }
    }
}
