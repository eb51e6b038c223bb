//! Synchronous SQL for the `workflow_actions` table.
//!
//! Everything here runs on a blocking thread with the connection mutex held.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use tracing::warn;

use countersign_core::DocumentRef;

use crate::action::record::{
    ActionStatus, PlanOutcome, ReconcileKey, ReconciliationPlan, WorkflowActionRecord,
};

const SELECT_COLUMNS: &str = "id, reference_doctype, reference_name, workflow_state, user, \
                              status, completed_by, created_at";

pub(super) enum Selection<'a> {
    All,
    Document(&'a DocumentRef),
    User(&'a str),
}

pub(super) fn has_open_for_state_sync(conn: &Connection, key: &ReconcileKey) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM workflow_actions
            WHERE reference_doctype = ?1 AND reference_name = ?2
              AND workflow_state = ?3 AND status = 'Open'
        )",
        params![key.document.doctype, key.document.name, key.state],
        |row| row.get(0),
    )
}

pub(super) fn reconcile_sync(
    conn: &mut Connection,
    plan: &ReconciliationPlan,
) -> rusqlite::Result<PlanOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let doc = &plan.key.document;

    if has_open_for_state_sync(&tx, &plan.key)? {
        // Dropping the transaction rolls it back; nothing was written.
        return Ok(PlanOutcome::AlreadyReconciled);
    }

    let removed = tx.execute(
        "DELETE FROM workflow_actions
         WHERE reference_doctype = ?1 AND reference_name = ?2
           AND status = 'Open' AND user != ?3",
        params![doc.doctype, doc.name, plan.triggered_by],
    )?;

    let completed = tx.execute(
        "UPDATE workflow_actions SET status = 'Completed', completed_by = ?3
         WHERE reference_doctype = ?1 AND reference_name = ?2
           AND status = 'Open' AND user = ?3",
        params![doc.doctype, doc.name, plan.triggered_by],
    )?;

    let mut created = 0;
    {
        // The partial unique index turns repeated assignees into no-ops.
        let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO workflow_actions
                (id, reference_doctype, reference_name, workflow_state, user,
                 status, completed_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
        )?;
        for user in &plan.assignees {
            let record = WorkflowActionRecord::open(&plan.key, user.clone());
            created += insert.execute(params![
                record.id,
                record.reference_doctype,
                record.reference_name,
                record.workflow_state,
                record.user,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
            ])?;
        }
    }

    tx.commit()?;

    Ok(PlanOutcome::Applied {
        removed,
        completed,
        created,
    })
}

struct RawRecord {
    id: String,
    reference_doctype: String,
    reference_name: String,
    workflow_state: String,
    user: String,
    status: String,
    completed_by: Option<String>,
    created_at: String,
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        reference_doctype: row.get(1)?,
        reference_name: row.get(2)?,
        workflow_state: row.get(3)?,
        user: row.get(4)?,
        status: row.get(5)?,
        completed_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Option<WorkflowActionRecord> {
        let Some(status) = ActionStatus::parse(&self.status) else {
            warn!(
                "Skipping action {} with unknown status '{}'",
                self.id, self.status
            );
            return None;
        };
        let created_at = match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    "Skipping action {} with unparseable created_at '{}': {}",
                    self.id, self.created_at, e
                );
                return None;
            }
        };
        Some(WorkflowActionRecord {
            id: self.id,
            reference_doctype: self.reference_doctype,
            reference_name: self.reference_name,
            workflow_state: self.workflow_state,
            user: self.user,
            status,
            completed_by: self.completed_by,
            created_at,
        })
    }
}

/// Load records matching `selection`, oldest first. Rows that fail to
/// decode are logged and skipped.
pub(super) fn select_sync(
    conn: &Connection,
    selection: Selection<'_>,
    status: Option<ActionStatus>,
) -> rusqlite::Result<Vec<WorkflowActionRecord>> {
    let status = status.map(|s| s.as_str());
    let order = "ORDER BY created_at, rowid";

    let raws = match selection {
        Selection::All => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM workflow_actions
                 WHERE (?1 IS NULL OR status = ?1) {order}"
            ))?;
            let rows = stmt.query_map(params![status], raw_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        Selection::Document(doc) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM workflow_actions
                 WHERE reference_doctype = ?1 AND reference_name = ?2
                   AND (?3 IS NULL OR status = ?3) {order}"
            ))?;
            let rows = stmt.query_map(params![doc.doctype, doc.name, status], raw_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        Selection::User(user) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM workflow_actions
                 WHERE user = ?1 AND (?2 IS NULL OR status = ?2) {order}"
            ))?;
            let rows = stmt.query_map(params![user, status], raw_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };

    Ok(raws.into_iter().filter_map(RawRecord::into_record).collect())
}
