//! Workflow definitions and the rules deciding who may act next.

pub mod graph;
pub mod permission;

pub use graph::{
    doc_workflow_state, EmailTemplate, StaticWorkflowGraph, WorkflowDefinition,
    WorkflowDocumentState, WorkflowGraph, WorkflowTransition,
};
pub use permission::{
    ApprovalAccess, DocumentPermissions, OwnerApprovalRule, PermissionGate, RoleBasedPermissions,
};
