//! In-memory implementation of `ActionRepository`.
//!
//! All records are held in memory and lost on restart.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use countersign_core::DocumentRef;

use super::{ActionRepository, RepositoryError};
use crate::action::record::{
    ActionStatus, PlanOutcome, ReconcileKey, ReconciliationPlan, WorkflowActionRecord,
};
use crate::action::visibility::ActionVisibility;

/// In-memory action repository.
///
/// Records live in a `Vec` behind a `RwLock`. `reconcile` holds the write
/// lock for the whole pass, which serialises concurrent passes.
pub struct InMemoryRepository {
    records: RwLock<Vec<WorkflowActionRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn is_open_for_key(record: &WorkflowActionRecord, key: &ReconcileKey) -> bool {
    record.is_open() && record.is_for(&key.document) && record.workflow_state == key.state
}

#[async_trait]
impl ActionRepository for InMemoryRepository {
    async fn has_open_for_state(&self, key: &ReconcileKey) -> Result<bool, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().any(|r| is_open_for_key(r, key)))
    }

    async fn reconcile(&self, plan: &ReconciliationPlan) -> Result<PlanOutcome, RepositoryError> {
        let mut records = self.records.write().await;

        if records.iter().any(|r| is_open_for_key(r, &plan.key)) {
            return Ok(PlanOutcome::AlreadyReconciled);
        }

        let document = &plan.key.document;
        let before = records.len();
        records.retain(|r| !(r.is_open() && r.is_for(document) && r.user != plan.triggered_by));
        let removed = before - records.len();

        let mut completed = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.is_open() && r.is_for(document) && r.user == plan.triggered_by)
        {
            record.status = ActionStatus::Completed;
            record.completed_by = Some(plan.triggered_by.clone());
            completed += 1;
        }

        let mut seen = HashSet::new();
        let mut created = 0;
        for user in plan.assignees.iter().filter(|u| seen.insert(u.as_str())) {
            records.push(WorkflowActionRecord::open(&plan.key, user.clone()));
            created += 1;
        }

        Ok(PlanOutcome::Applied {
            removed,
            completed,
            created,
        })
    }

    async fn for_document(
        &self,
        document: &DocumentRef,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.is_for(document)).cloned().collect())
    }

    async fn list(
        &self,
        visibility: &ActionVisibility,
        status: Option<ActionStatus>,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| visibility.allows(r))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn doc() -> DocumentRef {
        DocumentRef::new("Leave Application", "LA-1")
    }

    fn plan(state: &str, triggered_by: &str, assignees: &[&str]) -> ReconciliationPlan {
        ReconciliationPlan {
            key: ReconcileKey::new(doc(), state),
            triggered_by: triggered_by.to_string(),
            assignees: assignees.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_creates_open_actions() {
        let repo = InMemoryRepository::new();

        let outcome = repo
            .reconcile(&plan("Pending", "emma", &["mona", "max"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PlanOutcome::Applied {
                removed: 0,
                completed: 0,
                created: 2
            }
        );

        let records = repo.for_document(&doc()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_open() && r.workflow_state == "Pending"));
    }

    #[tokio::test]
    async fn test_second_reconcile_for_same_state_is_noop() {
        let repo = InMemoryRepository::new();
        repo.reconcile(&plan("Pending", "emma", &["mona"]))
            .await
            .unwrap();

        let outcome = repo
            .reconcile(&plan("Pending", "emma", &["mona", "max"]))
            .await
            .unwrap();
        assert_eq!(outcome, PlanOutcome::AlreadyReconciled);
        assert_eq!(repo.for_document(&doc()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_next_state_completes_own_and_removes_others() {
        let repo = InMemoryRepository::new();
        repo.reconcile(&plan("Pending", "emma", &["mona", "max"]))
            .await
            .unwrap();

        let outcome = repo.reconcile(&plan("Approved", "mona", &[])).await.unwrap();
        assert_eq!(
            outcome,
            PlanOutcome::Applied {
                removed: 1,
                completed: 1,
                created: 0
            }
        );

        let records = repo.for_document(&doc()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "mona");
        assert_eq!(records[0].status, ActionStatus::Completed);
        assert_eq!(records[0].completed_by.as_deref(), Some("mona"));
    }

    #[tokio::test]
    async fn test_duplicate_assignees_collapse() {
        let repo = InMemoryRepository::new();
        repo.reconcile(&plan("Pending", "emma", &["mona", "mona"]))
            .await
            .unwrap();
        assert_eq!(repo.for_document(&doc()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_create_once() {
        let repo = Arc::new(InMemoryRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.reconcile(&plan("Pending", "emma", &["mona", "max"]))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), PlanOutcome::Applied { .. }) {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(repo.for_document(&doc()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_respects_visibility_and_status() {
        let repo = InMemoryRepository::new();
        repo.reconcile(&plan("Pending", "emma", &["mona", "max"]))
            .await
            .unwrap();
        repo.reconcile(&plan("Approved", "mona", &[])).await.unwrap();

        let all = repo.list(&ActionVisibility::All, None).await.unwrap();
        assert_eq!(all.len(), 1);

        let open = repo
            .list(&ActionVisibility::All, Some(ActionStatus::Open))
            .await
            .unwrap();
        assert!(open.is_empty());

        let max_view = repo
            .list(&ActionVisibility::AssignedTo("max".to_string()), None)
            .await
            .unwrap();
        assert!(max_view.is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        const STATES: [&str; 3] = ["Pending", "Approved", "Rejected"];
        const USERS: [&str; 4] = ["emma", "mona", "max", "old"];

        fn arb_plan() -> impl Strategy<Value = ReconciliationPlan> {
            (
                0..STATES.len(),
                0..USERS.len(),
                proptest::collection::vec(0..USERS.len(), 0..5),
            )
                .prop_map(|(state, trigger, assignees)| {
                    let assignees: Vec<&str> = assignees.into_iter().map(|i| USERS[i]).collect();
                    plan(STATES[state], USERS[trigger], &assignees)
                })
        }

        proptest! {
            #[test]
            fn open_records_belong_to_one_state_without_duplicates(
                plans in proptest::collection::vec(arb_plan(), 1..12)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                let records = runtime.block_on(async {
                    let repo = InMemoryRepository::new();
                    for plan in &plans {
                        repo.reconcile(plan).await.unwrap();
                    }
                    repo.for_document(&doc()).await.unwrap()
                });

                let open: Vec<_> = records.iter().filter(|r| r.is_open()).collect();
                let states: HashSet<_> = open.iter().map(|r| r.workflow_state.as_str()).collect();
                prop_assert!(states.len() <= 1);

                let users: HashSet<_> = open.iter().map(|r| r.user.as_str()).collect();
                prop_assert_eq!(users.len(), open.len());
            }
        }
    }
}
