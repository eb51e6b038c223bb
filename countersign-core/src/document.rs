//! Generic business documents as seen by the workflow layer.
//!
//! The workflow layer never owns documents. It only reads the state field,
//! the owner and the last modifier, and hands the whole field map to
//! templates when rendering notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies a document across document types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doctype: String,
    pub name: String,
}

impl DocumentRef {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.doctype, self.name)
    }
}

/// Snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doctype: String,
    pub name: String,
    /// User who created the document.
    #[serde(default)]
    pub owner: String,
    /// User who last saved the document.
    #[serde(default)]
    pub modified_by: String,
    /// Remaining document attributes, including the workflow state field.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            name: name.into(),
            owner: String::new(),
            modified_by: String::new(),
            fields: Map::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        self.modified_by = owner.clone();
        self.owner = owner;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn doc_ref(&self) -> DocumentRef {
        DocumentRef::new(&self.doctype, &self.name)
    }

    /// String value of a field, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Flat JSON object used as rendering context: every field plus
    /// `doctype`, `name`, `owner` and `modified_by`.
    pub fn to_context(&self) -> Map<String, Value> {
        let mut context = self.fields.clone();
        context.insert("doctype".to_string(), Value::from(self.doctype.clone()));
        context.insert("name".to_string(), Value::from(self.name.clone()));
        context.insert("owner".to_string(), Value::from(self.owner.clone()));
        context.insert(
            "modified_by".to_string(),
            Value::from(self.modified_by.clone()),
        );
        context
    }
}
