//! User directory: role membership and contact details.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ADMINISTRATOR;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login identifier.
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

pub trait UserDirectory: Send + Sync {
    /// Enabled holders of `role`, excluding `Administrator`, without duplicates.
    fn users_with_role(&self, role: &str) -> Vec<String>;

    fn has_role(&self, user: &str, role: &str) -> bool;

    fn is_enabled(&self, user: &str) -> bool;

    fn email(&self, user: &str) -> Option<String>;

    /// Display name, falling back to the login identifier.
    fn full_name(&self, user: &str) -> String;
}

/// Directory backed by a fixed list of users.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: BTreeMap<String, UserRecord>,
}

impl StaticDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn users_with_role(&self, role: &str) -> Vec<String> {
        self.users
            .values()
            .filter(|u| u.enabled && u.name != ADMINISTRATOR)
            .filter(|u| u.roles.iter().any(|r| r == role))
            .map(|u| u.name.clone())
            .collect()
    }

    fn has_role(&self, user: &str, role: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|u| u.roles.iter().any(|r| r == role))
    }

    fn is_enabled(&self, user: &str) -> bool {
        self.users.get(user).is_some_and(|u| u.enabled)
    }

    fn email(&self, user: &str) -> Option<String> {
        self.users.get(user).and_then(|u| u.email.clone())
    }

    fn full_name(&self, user: &str) -> String {
        self.users
            .get(user)
            .and_then(|u| u.full_name.clone())
            .unwrap_or_else(|| user.to_string())
    }
}
