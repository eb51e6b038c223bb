//! Read-only access to externally configured workflow definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use countersign_core::Document;

fn default_state_field() -> String {
    "workflow_state".to_string()
}

fn default_true() -> bool {
    true
}

/// One edge of a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    /// Source state.
    pub state: String,
    /// Action label shown to users.
    pub action: String,
    pub next_state: String,
    /// Role whose holders may take this action.
    pub allowed: String,
}

/// Per-state settings of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDocumentState {
    pub state: String,
    /// Email template used to notify next actors once a document enters
    /// this state.
    #[serde(default)]
    pub next_action_email_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub document_type: String,
    #[serde(default = "default_state_field")]
    pub workflow_state_field: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub send_email_alert: bool,
    /// Whether a document owner may act on their own document.
    #[serde(default)]
    pub allow_self_approval: bool,
    /// Roles with read access to documents of this type. Empty means every
    /// enabled user may read them.
    #[serde(default)]
    pub read_roles: Vec<String>,
    #[serde(default)]
    pub states: Vec<WorkflowDocumentState>,
    #[serde(default)]
    pub transitions: Vec<WorkflowTransition>,
}

/// Lookup of workflow definitions by document type and name.
///
/// All methods are pure reads.
pub trait WorkflowGraph: Send + Sync {
    /// Name of the active workflow for `doctype`, if any.
    fn workflow_name(&self, doctype: &str) -> Option<String>;

    /// Document attribute holding the current workflow state.
    fn workflow_state_field(&self, workflow: &str) -> Option<String>;

    /// Transitions leaving `state`, in definition order.
    fn next_transitions(&self, workflow: &str, state: &str) -> Vec<WorkflowTransition>;

    fn send_email_alert(&self, workflow: &str) -> bool;

    fn allows_self_approval(&self, workflow: &str) -> bool;

    fn read_roles(&self, workflow: &str) -> Vec<String>;

    /// Template for the "next action" email of `state`, if one is configured.
    fn next_action_email_template(&self, workflow: &str, state: &str) -> Option<EmailTemplate>;
}

/// Workflow state of `doc`, or `None` if it has no workflow or no state.
pub fn doc_workflow_state(graph: &dyn WorkflowGraph, doc: &Document) -> Option<String> {
    let workflow = graph.workflow_name(&doc.doctype)?;
    let field = graph.workflow_state_field(&workflow)?;
    doc.get_str(&field).map(str::to_string)
}

/// Workflow graph built from in-memory definitions.
#[derive(Debug, Default)]
pub struct StaticWorkflowGraph {
    workflows: HashMap<String, WorkflowDefinition>,
    /// Active workflow name per document type.
    active: HashMap<String, String>,
    templates: HashMap<String, EmailTemplate>,
}

impl StaticWorkflowGraph {
    pub fn new(workflows: Vec<WorkflowDefinition>, templates: Vec<EmailTemplate>) -> Self {
        let mut active = HashMap::new();
        for workflow in workflows.iter().filter(|w| w.is_active) {
            // First active workflow per document type wins
            active
                .entry(workflow.document_type.clone())
                .or_insert_with(|| workflow.name.clone());
        }

        Self {
            workflows: workflows.into_iter().map(|w| (w.name.clone(), w)).collect(),
            active,
            templates: templates.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn definition(&self, workflow: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow)
    }
}

impl WorkflowGraph for StaticWorkflowGraph {
    fn workflow_name(&self, doctype: &str) -> Option<String> {
        self.active.get(doctype).cloned()
    }

    fn workflow_state_field(&self, workflow: &str) -> Option<String> {
        self.definition(workflow)
            .map(|w| w.workflow_state_field.clone())
    }

    fn next_transitions(&self, workflow: &str, state: &str) -> Vec<WorkflowTransition> {
        self.definition(workflow)
            .map(|w| {
                w.transitions
                    .iter()
                    .filter(|t| t.state == state)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn send_email_alert(&self, workflow: &str) -> bool {
        self.definition(workflow)
            .is_some_and(|w| w.send_email_alert)
    }

    fn allows_self_approval(&self, workflow: &str) -> bool {
        self.definition(workflow)
            .is_some_and(|w| w.allow_self_approval)
    }

    fn read_roles(&self, workflow: &str) -> Vec<String> {
        self.definition(workflow)
            .map(|w| w.read_roles.clone())
            .unwrap_or_default()
    }

    fn next_action_email_template(&self, workflow: &str, state: &str) -> Option<EmailTemplate> {
        let template_name = self
            .definition(workflow)?
            .states
            .iter()
            .find(|s| s.state == state)?
            .next_action_email_template
            .as_ref()?;
        self.templates.get(template_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(state: &str, action: &str, next: &str, allowed: &str) -> WorkflowTransition {
        WorkflowTransition {
            state: state.to_string(),
            action: action.to_string(),
            next_state: next.to_string(),
            allowed: allowed.to_string(),
        }
    }

    fn leave_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "Leave Approval".to_string(),
            document_type: "Leave Application".to_string(),
            workflow_state_field: "workflow_state".to_string(),
            is_active: true,
            send_email_alert: true,
            allow_self_approval: false,
            read_roles: vec![],
            states: vec![
                WorkflowDocumentState {
                    state: "Draft".to_string(),
                    next_action_email_template: None,
                },
                WorkflowDocumentState {
                    state: "Pending Approval".to_string(),
                    next_action_email_template: Some("Leave Pending".to_string()),
                },
            ],
            transitions: vec![
                transition("Draft", "Submit", "Pending Approval", "Employee"),
                transition("Pending Approval", "Approve", "Approved", "Manager"),
                transition("Pending Approval", "Reject", "Rejected", "Manager"),
            ],
        }
    }

    fn graph() -> StaticWorkflowGraph {
        StaticWorkflowGraph::new(
            vec![leave_workflow()],
            vec![EmailTemplate {
                name: "Leave Pending".to_string(),
                subject: "Leave {{ name }} needs you".to_string(),
                response: "Please review.".to_string(),
            }],
        )
    }

    #[test]
    fn test_workflow_name_for_unknown_doctype_is_none() {
        assert_eq!(graph().workflow_name("Sales Invoice"), None);
        assert_eq!(
            graph().workflow_name("Leave Application"),
            Some("Leave Approval".to_string())
        );
    }

    #[test]
    fn test_inactive_workflow_is_ignored() {
        let mut inactive = leave_workflow();
        inactive.is_active = false;
        let graph = StaticWorkflowGraph::new(vec![inactive], vec![]);
        assert_eq!(graph.workflow_name("Leave Application"), None);
    }

    #[test]
    fn test_next_transitions_keep_definition_order() {
        let actions: Vec<_> = graph()
            .next_transitions("Leave Approval", "Pending Approval")
            .into_iter()
            .map(|t| t.action)
            .collect();
        assert_eq!(actions, vec!["Approve", "Reject"]);

        assert!(graph()
            .next_transitions("Leave Approval", "Approved")
            .is_empty());
    }

    #[test]
    fn test_email_template_lookup() {
        let graph = graph();
        let template = graph
            .next_action_email_template("Leave Approval", "Pending Approval")
            .unwrap();
        assert_eq!(template.name, "Leave Pending");
        assert!(graph
            .next_action_email_template("Leave Approval", "Draft")
            .is_none());
    }

    #[test]
    fn test_doc_workflow_state() {
        let graph = graph();
        let doc = Document::new("Leave Application", "LA-1").with_field("workflow_state", "Draft");
        assert_eq!(doc_workflow_state(&graph, &doc), Some("Draft".to_string()));

        let no_state = Document::new("Leave Application", "LA-2");
        assert_eq!(doc_workflow_state(&graph, &no_state), None);

        let other = Document::new("Sales Invoice", "SI-1").with_field("workflow_state", "Draft");
        assert_eq!(doc_workflow_state(&graph, &other), None);
    }
}
