//! Caller and acting-user identities.
//!
//! There is no ambient "current user". Whoever triggers a reconciliation or
//! applies an action is passed down explicitly as an [`ActingUser`].

use std::fmt;

use crate::{ADMINISTRATOR, GUEST};

/// Who is calling an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// No session; authority comes from a signed link.
    Guest,
    /// Authenticated session for a user.
    User(String),
}

impl Caller {
    /// Identity to act as when applying a link issued to `link_user`.
    ///
    /// Guests act as the link's user. A logged-in caller keeps acting as
    /// themselves, so downstream checks see who really clicked.
    pub fn acting_as(&self, link_user: &str) -> ActingUser {
        match self {
            Caller::Guest => ActingUser::new(link_user),
            Caller::User(user) => ActingUser::new(user.clone()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Caller::Guest => GUEST,
            Caller::User(user) => user,
        }
    }
}

/// Identity under which a workflow operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActingUser(String);

impl ActingUser {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_administrator(&self) -> bool {
        self.0 == ADMINISTRATOR
    }
}

impl fmt::Display for ActingUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
