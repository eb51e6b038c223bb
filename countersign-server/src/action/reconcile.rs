//! The action reconciler.
//!
//! Runs once per document save. Given the saved document and the user who
//! saved it, it brings the open action records in line with the document's
//! workflow state and queues mail for whoever may act next.
//!
//! Record changes go to the repository as one [`ReconciliationPlan`] and are
//! committed before anything is queued, so a mail is never sent for a record
//! that does not exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use countersign_core::{
    ActionLinkParams, Document, LinkSigner, ReconcileOutcomeKind, ReconcileSummary,
};

use super::record::{PlanOutcome, ReconcileKey, ReconciliationPlan};
use super::repository::{ActionRepository, RepositoryError};
use crate::directory::UserDirectory;
use crate::identity::ActingUser;
use crate::notify::{
    DispatchJob, NotificationQueue, PossibleAction, UiNotifier, UserActionBundle,
};
use crate::workflow::{doc_workflow_state, PermissionGate, WorkflowGraph};

pub struct Reconciler {
    graph: Arc<dyn WorkflowGraph>,
    directory: Arc<dyn UserDirectory>,
    gate: PermissionGate,
    actions: Arc<dyn ActionRepository>,
    signer: Arc<LinkSigner>,
    ui: Arc<dyn UiNotifier>,
    queue: NotificationQueue,
}

impl Reconciler {
    pub fn new(
        graph: Arc<dyn WorkflowGraph>,
        directory: Arc<dyn UserDirectory>,
        gate: PermissionGate,
        actions: Arc<dyn ActionRepository>,
        signer: Arc<LinkSigner>,
        ui: Arc<dyn UiNotifier>,
        queue: NotificationQueue,
    ) -> Self {
        Self {
            graph,
            directory,
            gate,
            actions,
            signer,
            ui,
            queue,
        }
    }

    /// Reconcile action records after `doc` was saved by `triggered_by`.
    ///
    /// Returns an error only when the record store fails; in that case no
    /// record changed and nothing was queued.
    pub async fn process_state_change(
        &self,
        doc: &Document,
        triggered_by: &ActingUser,
    ) -> Result<ReconcileSummary, RepositoryError> {
        let Some(workflow) = self.graph.workflow_name(&doc.doctype) else {
            return Ok(ReconcileSummary::skipped(ReconcileOutcomeKind::NoWorkflow));
        };
        let Some(state) = doc_workflow_state(self.graph.as_ref(), doc) else {
            debug!("{} has no workflow state, nothing to reconcile", doc.doc_ref());
            return Ok(ReconcileSummary::skipped(ReconcileOutcomeKind::NoState));
        };

        let key = ReconcileKey::new(doc.doc_ref(), state);

        // Skips link signing on repeated events. `reconcile` re-checks this
        // under its own lock.
        if self.actions.has_open_for_state(&key).await? {
            debug!("Open actions already exist for {}", key);
            return Ok(ReconcileSummary::skipped(
                ReconcileOutcomeKind::AlreadyReconciled,
            ));
        }

        let bundles = self.next_action_bundles(&workflow, &key.state, doc);
        let plan = ReconciliationPlan {
            key: key.clone(),
            triggered_by: triggered_by.name().to_string(),
            assignees: bundles.keys().cloned().collect(),
        };

        let (removed, completed, created) = match self.actions.reconcile(&plan).await? {
            PlanOutcome::AlreadyReconciled => {
                debug!("Lost reconciliation race for {}", key);
                return Ok(ReconcileSummary::skipped(
                    ReconcileOutcomeKind::AlreadyReconciled,
                ));
            }
            PlanOutcome::Applied {
                removed,
                completed,
                created,
            } => (removed, completed, created),
        };

        self.ui.clear_action_notifications(&key.document);

        info!(
            "Reconciled {} (triggered by {}): {} created, {} completed, {} removed",
            key, triggered_by, created, completed, removed
        );

        let mut notified = false;
        if created > 0 && self.graph.send_email_alert(&workflow) {
            let job = DispatchJob {
                workflow,
                state: key.state.clone(),
                document: doc.clone(),
                bundles: bundles.into_values().collect(),
            };
            match self.queue.enqueue(job) {
                Ok(()) => notified = true,
                Err(e) => warn!("Could not queue action emails for {}: {}", key, e),
            }
        }

        Ok(ReconcileSummary {
            outcome: ReconcileOutcomeKind::Reconciled,
            created,
            completed,
            removed,
            notified,
        })
    }

    /// Eligible next actors of `doc` in `state`, each with the actions they
    /// may take and a signed link per action. Keyed and ordered by user.
    fn next_action_bundles(
        &self,
        workflow: &str,
        state: &str,
        doc: &Document,
    ) -> BTreeMap<String, UserActionBundle> {
        let mut bundles: BTreeMap<String, UserActionBundle> = BTreeMap::new();
        let now = Utc::now().timestamp();

        for transition in self.graph.next_transitions(workflow, state) {
            let candidates = self.directory.users_with_role(&transition.allowed);
            for user in self.gate.filter_eligible_users(candidates, doc) {
                let bundle = bundles.entry(user.clone()).or_insert_with(|| UserActionBundle {
                    user: user.clone(),
                    email: self.directory.email(&user),
                    possible_actions: Vec::new(),
                });
                if bundle
                    .possible_actions
                    .iter()
                    .any(|a| a.action_name == transition.action)
                {
                    continue;
                }

                let params = ActionLinkParams {
                    action: transition.action.clone(),
                    doctype: doc.doctype.clone(),
                    docname: doc.name.clone(),
                    current_state: state.to_string(),
                    user,
                };
                bundle.possible_actions.push(PossibleAction {
                    action_name: transition.action.clone(),
                    action_link: self.signer.issue(&params, now),
                });
            }
        }

        bundles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::record::ActionStatus;
    use crate::action::repository::InMemoryRepository;
    use crate::action::visibility::ActionVisibility;
    use crate::directory::{StaticDirectory, UserRecord};
    use crate::notify::LoggingUiNotifier;
    use crate::workflow::{
        OwnerApprovalRule, RoleBasedPermissions, StaticWorkflowGraph, WorkflowDefinition,
        WorkflowTransition,
    };
    use async_trait::async_trait;
    use countersign_core::{parse_link_query, DocumentRef};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SECRET: &str = "reconcile-test-secret";

    fn transition(state: &str, action: &str, next: &str, allowed: &str) -> WorkflowTransition {
        WorkflowTransition {
            state: state.to_string(),
            action: action.to_string(),
            next_state: next.to_string(),
            allowed: allowed.to_string(),
        }
    }

    fn graph(send_email_alert: bool) -> Arc<dyn WorkflowGraph> {
        Arc::new(StaticWorkflowGraph::new(
            vec![WorkflowDefinition {
                name: "Leave Approval".to_string(),
                document_type: "Leave Application".to_string(),
                workflow_state_field: "workflow_state".to_string(),
                is_active: true,
                send_email_alert,
                allow_self_approval: false,
                read_roles: vec![],
                states: vec![],
                transitions: vec![
                    transition("Draft", "Submit", "Pending Approval", "Employee"),
                    transition("Pending Approval", "Approve", "Approved", "Manager"),
                    transition("Pending Approval", "Reject", "Rejected", "Manager"),
                ],
            }],
            vec![],
        ))
    }

    fn directory() -> Arc<dyn UserDirectory> {
        let user = |name: &str, roles: &[&str], enabled: bool| UserRecord {
            name: name.to_string(),
            full_name: None,
            email: Some(format!("{}@example.com", name)),
            enabled,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        Arc::new(StaticDirectory::new(vec![
            user("emma", &["Employee"], true),
            user("mona", &["Manager"], true),
            user("max", &["Manager"], true),
            user("retired", &["Manager"], false),
            user(crate::ADMINISTRATOR, &["Manager"], true),
        ]))
    }

    struct Harness {
        reconciler: Reconciler,
        actions: Arc<InMemoryRepository>,
        jobs: mpsc::UnboundedReceiver<DispatchJob>,
        signer: Arc<LinkSigner>,
    }

    fn harness_with(
        send_email_alert: bool,
        actions: Arc<dyn ActionRepository>,
    ) -> (Reconciler, mpsc::UnboundedReceiver<DispatchJob>, Arc<LinkSigner>) {
        let graph = graph(send_email_alert);
        let directory = directory();
        let gate = PermissionGate::new(
            Arc::new(RoleBasedPermissions::new(graph.clone(), directory.clone())),
            Arc::new(OwnerApprovalRule::new(graph.clone())),
        );
        let signer = Arc::new(
            LinkSigner::new(SECRET, "https://erp.example.com", Duration::from_secs(3600)).unwrap(),
        );
        let (queue, jobs) = NotificationQueue::channel();
        let reconciler = Reconciler::new(
            graph,
            directory,
            gate,
            actions,
            signer.clone(),
            Arc::new(LoggingUiNotifier),
            queue,
        );
        (reconciler, jobs, signer)
    }

    fn harness(send_email_alert: bool) -> Harness {
        let actions = Arc::new(InMemoryRepository::new());
        let (reconciler, jobs, signer) = harness_with(send_email_alert, actions.clone());
        Harness {
            reconciler,
            actions,
            jobs,
            signer,
        }
    }

    fn leave(owner: &str, state: &str) -> Document {
        Document::new("Leave Application", "LA-0001")
            .with_owner(owner)
            .with_field("workflow_state", state)
    }

    fn emma() -> ActingUser {
        ActingUser::new("emma")
    }

    async fn open_users(actions: &InMemoryRepository) -> Vec<String> {
        let mut users: Vec<_> = actions
            .list(&ActionVisibility::All, Some(ActionStatus::Open))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.user)
            .collect();
        users.sort();
        users
    }

    #[tokio::test]
    async fn test_no_workflow_is_noop() {
        let mut h = harness(true);
        let doc = Document::new("Purchase Order", "PO-1").with_field("workflow_state", "Draft");

        let summary = h.reconciler.process_state_change(&doc, &emma()).await.unwrap();

        assert_eq!(summary.outcome, ReconcileOutcomeKind::NoWorkflow);
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_state_is_noop() {
        let h = harness(true);
        let doc = Document::new("Leave Application", "LA-0001").with_owner("emma");

        let summary = h.reconciler.process_state_change(&doc, &emma()).await.unwrap();
        assert_eq!(summary.outcome, ReconcileOutcomeKind::NoState);
    }

    #[tokio::test]
    async fn test_submit_creates_one_open_action_per_enabled_manager() {
        let mut h = harness(true);

        let summary = h
            .reconciler
            .process_state_change(&leave("emma", "Pending Approval"), &emma())
            .await
            .unwrap();

        assert_eq!(summary.outcome, ReconcileOutcomeKind::Reconciled);
        assert_eq!(summary.created, 2);
        assert!(summary.notified);
        assert_eq!(open_users(&h.actions).await, vec!["max", "mona"]);

        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.state, "Pending Approval");
        assert_eq!(job.bundles.len(), 2);

        let mona = job.bundles.iter().find(|b| b.user == "mona").unwrap();
        assert_eq!(mona.email.as_deref(), Some("mona@example.com"));
        let actions: Vec<_> = mona
            .possible_actions
            .iter()
            .map(|a| a.action_name.as_str())
            .collect();
        assert_eq!(actions, vec!["Approve", "Reject"]);

        let query = parse_link_query(&mona.possible_actions[0].action_link).unwrap();
        let verified = h.signer.verify(&query, Utc::now().timestamp()).unwrap();
        assert_eq!(verified.params.user, "mona");
        assert_eq!(verified.params.current_state, "Pending Approval");
        assert_eq!(verified.params.action, "Approve");
    }

    #[tokio::test]
    async fn test_repeated_event_reconciles_once() {
        let mut h = harness(true);
        let doc = leave("emma", "Pending Approval");

        h.reconciler.process_state_change(&doc, &emma()).await.unwrap();
        let again = h.reconciler.process_state_change(&doc, &emma()).await.unwrap();

        assert_eq!(again.outcome, ReconcileOutcomeKind::AlreadyReconciled);
        assert_eq!(open_users(&h.actions).await.len(), 2);
        assert!(h.jobs.try_recv().is_ok());
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_owner_excluded_when_self_approval_forbidden() {
        let mut h = harness(true);

        // mona files her own leave; only max may approve it
        h.reconciler
            .process_state_change(&leave("mona", "Pending Approval"), &ActingUser::new("mona"))
            .await
            .unwrap();

        assert_eq!(open_users(&h.actions).await, vec!["max"]);
        assert_eq!(h.jobs.try_recv().unwrap().bundles.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_creates_nothing_and_sends_nothing() {
        let mut h = harness(true);

        let summary = h
            .reconciler
            .process_state_change(&leave("emma", "Approved"), &emma())
            .await
            .unwrap();

        assert_eq!(summary.created, 0);
        assert!(!summary.notified);
        assert!(open_users(&h.actions).await.is_empty());
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transition_completes_actor_and_clears_others() {
        let mut h = harness(true);
        h.reconciler
            .process_state_change(&leave("emma", "Pending Approval"), &emma())
            .await
            .unwrap();
        let _ = h.jobs.try_recv();

        let summary = h
            .reconciler
            .process_state_change(&leave("emma", "Approved"), &ActingUser::new("mona"))
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.removed, 1);
        let records = h
            .actions
            .for_document(&DocumentRef::new("Leave Application", "LA-0001"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "mona");
        assert_eq!(records[0].status, ActionStatus::Completed);
        assert_eq!(records[0].completed_by.as_deref(), Some("mona"));
    }

    #[tokio::test]
    async fn test_email_alerts_disabled_still_creates_records() {
        let mut h = harness(false);

        let summary = h
            .reconciler
            .process_state_change(&leave("emma", "Pending Approval"), &emma())
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert!(!summary.notified);
        assert!(h.jobs.try_recv().is_err());
    }

    struct BrokenStore;

    #[async_trait]
    impl ActionRepository for BrokenStore {
        async fn has_open_for_state(&self, _key: &ReconcileKey) -> Result<bool, RepositoryError> {
            Ok(false)
        }

        async fn reconcile(&self, _plan: &ReconciliationPlan) -> Result<PlanOutcome, RepositoryError> {
            Err(RepositoryError::storage("reconcile", "disk full"))
        }

        async fn for_document(
            &self,
            _document: &DocumentRef,
        ) -> Result<Vec<crate::action::record::WorkflowActionRecord>, RepositoryError> {
            Ok(vec![])
        }

        async fn list(
            &self,
            _visibility: &ActionVisibility,
            _status: Option<ActionStatus>,
        ) -> Result<Vec<crate::action::record::WorkflowActionRecord>, RepositoryError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_storage_failure_propagates_and_queues_nothing() {
        let (reconciler, mut jobs, _) = harness_with(true, Arc::new(BrokenStore));

        let err = reconciler
            .process_state_change(&leave("emma", "Pending Approval"), &emma())
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Storage { .. }));
        assert!(jobs.try_recv().is_err());
    }
}
