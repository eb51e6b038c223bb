//! Which action records a user may see.

use super::record::WorkflowActionRecord;
use crate::ADMINISTRATOR;

/// Row filter applied to action record queries on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionVisibility {
    /// Every record.
    All,
    /// Only records assigned to this user.
    AssignedTo(String),
}

impl ActionVisibility {
    /// Administrator sees everything, everyone else only their own actions.
    pub fn for_user(user: &str) -> Self {
        if user == ADMINISTRATOR {
            ActionVisibility::All
        } else {
            ActionVisibility::AssignedTo(user.to_string())
        }
    }

    pub fn allows(&self, record: &WorkflowActionRecord) -> bool {
        match self {
            ActionVisibility::All => true,
            ActionVisibility::AssignedTo(user) => &record.user == user,
        }
    }
}

/// Single-record read check: Administrator or the assignee.
pub fn can_read(record: &WorkflowActionRecord, user: &str) -> bool {
    ActionVisibility::for_user(user).allows(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::record::ReconcileKey;
    use countersign_core::DocumentRef;

    fn record_for(user: &str) -> WorkflowActionRecord {
        let key = ReconcileKey::new(DocumentRef::new("Leave Application", "LA-1"), "Pending");
        WorkflowActionRecord::open(&key, user)
    }

    #[test]
    fn test_administrator_sees_all() {
        assert_eq!(ActionVisibility::for_user(ADMINISTRATOR), ActionVisibility::All);
        assert!(can_read(&record_for("mona"), ADMINISTRATOR));
    }

    #[test]
    fn test_users_see_only_their_own() {
        let visibility = ActionVisibility::for_user("mona");
        assert!(visibility.allows(&record_for("mona")));
        assert!(!visibility.allows(&record_for("max")));
        assert!(!can_read(&record_for("max"), "mona"));
    }
}
