//! SQLite implementation of `ActionRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Uniqueness
//!
//! A partial unique index allows at most one `Open` row per
//! `(reference_doctype, reference_name, workflow_state, user)`. Reconciliation
//! runs in a `BEGIN IMMEDIATE` transaction so the existence check and the
//! inserts of one pass cannot interleave with another pass.

mod actions;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use countersign_core::DocumentRef;

use super::{ActionRepository, RepositoryError};
use crate::action::record::{
    ActionStatus, PlanOutcome, ReconcileKey, ReconciliationPlan, WorkflowActionRecord,
};
use crate::action::visibility::ActionVisibility;

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed action repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    /// Runs any pending migrations if the database exists but has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` so committed action records survive power loss
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // Action links are bearer credentials once mailed; keep the store private (Unix only)
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently keep DELETE mode on filesystems without shared
        // memory support, so check what we actually got. In-memory databases
        // report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        // 0 if table is empty = fresh database
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS workflow_actions (
                    id TEXT PRIMARY KEY,
                    reference_doctype TEXT NOT NULL,
                    reference_name TEXT NOT NULL,
                    workflow_state TEXT NOT NULL,
                    user TEXT NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('Open', 'Completed')),
                    completed_by TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_actions_document
                    ON workflow_actions(reference_doctype, reference_name);
                CREATE INDEX IF NOT EXISTS idx_actions_user
                    ON workflow_actions(user);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_open_unique
                    ON workflow_actions(reference_doctype, reference_name, workflow_state, user)
                    WHERE status = 'Open';
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

// =============================================================================
// ActionRepository trait implementation
// =============================================================================

#[async_trait]
impl ActionRepository for SqliteRepository {
    async fn has_open_for_state(&self, key: &ReconcileKey) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let key = key.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "has_open_for_state")?;
            actions::has_open_for_state_sync(&conn, &key)
                .map_err(|e| RepositoryError::storage("has_open_for_state", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("has_open_for_state", e.to_string()))?
    }

    async fn reconcile(&self, plan: &ReconciliationPlan) -> Result<PlanOutcome, RepositoryError> {
        let conn = self.conn.clone();
        let plan = plan.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn, "reconcile")?;
            actions::reconcile_sync(&mut conn, &plan)
                .map_err(|e| RepositoryError::storage("reconcile", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("reconcile", e.to_string()))?
    }

    async fn for_document(
        &self,
        document: &DocumentRef,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError> {
        let conn = self.conn.clone();
        let document = document.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "for_document")?;
            actions::select_sync(&conn, actions::Selection::Document(&document), None)
                .map_err(|e| RepositoryError::storage("for_document", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("for_document", e.to_string()))?
    }

    async fn list(
        &self,
        visibility: &ActionVisibility,
        status: Option<ActionStatus>,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError> {
        let conn = self.conn.clone();
        let visibility = visibility.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "list")?;
            let selection = match &visibility {
                ActionVisibility::All => actions::Selection::All,
                ActionVisibility::AssignedTo(user) => actions::Selection::User(user),
            };
            actions::select_sync(&conn, selection, status)
                .map_err(|e| RepositoryError::storage("list", e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage("list", e.to_string()))?
    }
}
