//! Workflow configuration file.
//!
//! Workflows, email templates, the user directory and any seed documents
//! are configured outside this service. They are loaded once at startup
//! from a single JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use countersign_core::Document;

use crate::directory::UserRecord;
use crate::workflow::{EmailTemplate, WorkflowDefinition};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    pub email_templates: Vec<EmailTemplate>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid workflow file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(raw)?;
        fixture.validate()?;
        Ok(fixture)
    }

    /// Every transition must name states the workflow declares, when it
    /// declares any.
    fn validate(&self) -> Result<()> {
        for workflow in &self.workflows {
            if workflow.states.is_empty() {
                continue;
            }
            let known = |state: &str| workflow.states.iter().any(|s| s.state == state);
            for t in &workflow.transitions {
                if !known(&t.state) || !known(&t.next_state) {
                    anyhow::bail!(
                        "workflow '{}': transition '{}' from '{}' to '{}' uses an undeclared state",
                        workflow.name,
                        t.action,
                        t.state,
                        t.next_state
                    );
                }
            }
        }
        Ok(())
    }
}
