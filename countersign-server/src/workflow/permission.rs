//! Permission gate: who may act on a document right now.
//!
//! Two independent checks decide eligibility, and a user must pass both:
//! - [`ApprovalAccess`]: the workflow's approval rule, which may forbid
//!   self-approval.
//! - [`DocumentPermissions`]: generic access to the document.
//!
//! The gate has no Administrator bypass of its own. Administrator is removed
//! from candidate lists when role membership is resolved.

use std::sync::Arc;

use tracing::debug;

use countersign_core::Document;

use super::graph::WorkflowGraph;
use crate::directory::UserDirectory;
use crate::ADMINISTRATOR;

/// Generic document access as decided by the permission subsystem.
pub trait DocumentPermissions: Send + Sync {
    fn has_permission(&self, doc: &Document, user: &str) -> bool;
}

/// Approval policy of the workflow, including any self-approval restriction.
pub trait ApprovalAccess: Send + Sync {
    fn has_approval_access(&self, user: &str, doc: &Document) -> bool;
}

#[derive(Clone)]
pub struct PermissionGate {
    permissions: Arc<dyn DocumentPermissions>,
    approval: Arc<dyn ApprovalAccess>,
}

impl PermissionGate {
    pub fn new(
        permissions: Arc<dyn DocumentPermissions>,
        approval: Arc<dyn ApprovalAccess>,
    ) -> Self {
        Self {
            permissions,
            approval,
        }
    }

    /// Keep only the candidates allowed to act on `doc`, preserving order.
    pub fn filter_eligible_users(&self, candidates: Vec<String>, doc: &Document) -> Vec<String> {
        candidates
            .into_iter()
            .filter(|user| {
                let eligible = self.approval.has_approval_access(user, doc)
                    && self.permissions.has_permission(doc, user);
                if !eligible {
                    debug!(
                        "User {} not eligible to act on {}",
                        user,
                        doc.doc_ref()
                    );
                }
                eligible
            })
            .collect()
    }
}

/// Read access from the workflow's `read_roles`, checked against the
/// directory. Owners can always read their own documents.
pub struct RoleBasedPermissions {
    graph: Arc<dyn WorkflowGraph>,
    directory: Arc<dyn UserDirectory>,
}

impl RoleBasedPermissions {
    pub fn new(graph: Arc<dyn WorkflowGraph>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { graph, directory }
    }
}

impl DocumentPermissions for RoleBasedPermissions {
    fn has_permission(&self, doc: &Document, user: &str) -> bool {
        if user == ADMINISTRATOR {
            return true;
        }
        if !self.directory.is_enabled(user) {
            return false;
        }
        if doc.owner == user {
            return true;
        }

        let read_roles = self
            .graph
            .workflow_name(&doc.doctype)
            .map(|workflow| self.graph.read_roles(&workflow))
            .unwrap_or_default();

        read_roles.is_empty()
            || read_roles
                .iter()
                .any(|role| self.directory.has_role(user, role))
    }
}

/// Forbids owners from acting on their own documents unless the workflow
/// allows self-approval.
pub struct OwnerApprovalRule {
    graph: Arc<dyn WorkflowGraph>,
}

impl OwnerApprovalRule {
    pub fn new(graph: Arc<dyn WorkflowGraph>) -> Self {
        Self { graph }
    }
}

impl ApprovalAccess for OwnerApprovalRule {
    fn has_approval_access(&self, user: &str, doc: &Document) -> bool {
        if user == ADMINISTRATOR || doc.owner != user {
            return true;
        }
        self.graph
            .workflow_name(&doc.doctype)
            .is_some_and(|workflow| self.graph.allows_self_approval(&workflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{StaticDirectory, UserRecord};
    use crate::workflow::graph::{StaticWorkflowGraph, WorkflowDefinition};

    struct Fixed(bool);

    impl DocumentPermissions for Fixed {
        fn has_permission(&self, _doc: &Document, _user: &str) -> bool {
            self.0
        }
    }

    impl ApprovalAccess for Fixed {
        fn has_approval_access(&self, _user: &str, _doc: &Document) -> bool {
            self.0
        }
    }

    struct DenyUser(&'static str);

    impl ApprovalAccess for DenyUser {
        fn has_approval_access(&self, user: &str, _doc: &Document) -> bool {
            user != self.0
        }
    }

    impl DocumentPermissions for DenyUser {
        fn has_permission(&self, _doc: &Document, user: &str) -> bool {
            user != self.0
        }
    }

    fn candidates() -> Vec<String> {
        vec!["ann".to_string(), "bob".to_string(), "cid".to_string()]
    }

    fn workflow(allow_self_approval: bool, read_roles: &[&str]) -> Arc<dyn WorkflowGraph> {
        Arc::new(StaticWorkflowGraph::new(
            vec![WorkflowDefinition {
                name: "Expense Approval".to_string(),
                document_type: "Expense Claim".to_string(),
                workflow_state_field: "workflow_state".to_string(),
                is_active: true,
                send_email_alert: false,
                allow_self_approval,
                read_roles: read_roles.iter().map(|r| r.to_string()).collect(),
                states: vec![],
                transitions: vec![],
            }],
            vec![],
        ))
    }

    fn directory() -> Arc<dyn UserDirectory> {
        let user = |name: &str, roles: &[&str], enabled: bool| UserRecord {
            name: name.to_string(),
            full_name: None,
            email: None,
            enabled,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        Arc::new(StaticDirectory::new(vec![
            user("ann", &["Accounts"], true),
            user("bob", &["Employee"], true),
            user("cid", &["Accounts"], false),
        ]))
    }

    #[test]
    fn test_both_checks_required() {
        let doc = Document::new("Expense Claim", "EC-1");

        let gate = PermissionGate::new(Arc::new(Fixed(true)), Arc::new(DenyUser("bob")));
        assert_eq!(gate.filter_eligible_users(candidates(), &doc), vec!["ann", "cid"]);

        let gate = PermissionGate::new(Arc::new(DenyUser("ann")), Arc::new(Fixed(true)));
        assert_eq!(gate.filter_eligible_users(candidates(), &doc), vec!["bob", "cid"]);

        let gate = PermissionGate::new(Arc::new(Fixed(false)), Arc::new(Fixed(true)));
        assert!(gate.filter_eligible_users(candidates(), &doc).is_empty());
    }

    #[test]
    fn test_gate_has_no_administrator_bypass() {
        let doc = Document::new("Expense Claim", "EC-1");
        let gate = PermissionGate::new(Arc::new(Fixed(false)), Arc::new(Fixed(true)));
        assert!(gate
            .filter_eligible_users(vec![ADMINISTRATOR.to_string()], &doc)
            .is_empty());
    }

    #[test]
    fn test_owner_rule_forbids_self_approval() {
        let doc = Document::new("Expense Claim", "EC-1").with_owner("bob");

        let strict = OwnerApprovalRule::new(workflow(false, &[]));
        assert!(!strict.has_approval_access("bob", &doc));
        assert!(strict.has_approval_access("ann", &doc));

        let relaxed = OwnerApprovalRule::new(workflow(true, &[]));
        assert!(relaxed.has_approval_access("bob", &doc));
    }

    #[test]
    fn test_role_based_permissions() {
        let doc = Document::new("Expense Claim", "EC-1").with_owner("bob");
        let permissions = RoleBasedPermissions::new(workflow(false, &["Accounts"]), directory());

        assert!(permissions.has_permission(&doc, "ann"));
        // Owner reads without holding a read role
        assert!(permissions.has_permission(&doc, "bob"));
        // Disabled users never pass
        assert!(!permissions.has_permission(&doc, "cid"));
        assert!(!permissions.has_permission(&doc, "stranger"));

        let open = RoleBasedPermissions::new(workflow(false, &[]), directory());
        let other = Document::new("Expense Claim", "EC-2").with_owner("ann");
        assert!(open.has_permission(&other, "bob"));
    }
}
