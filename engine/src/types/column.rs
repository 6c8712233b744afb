//! Kanban column configuration
//!
//! A user's board is one ordered list of columns. Columns may map to a remote
//! label; the virtual `inbox` column has no config entry and stands for the
//! provider's inbox label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::EngineError;
use crate::types::email::INBOX_COLUMN_ID;

/// How a column's label mapping was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// Column is not tied to a label
    #[default]
    None,
    /// Mapped to a label that already existed remotely
    Existing,
    /// Mapped to a label created for this column
    Created,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    pub order: i32,
    #[serde(default)]
    pub mapped_label: Option<String>,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default)]
    pub remove_source_label_on_enter: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub has_label_error: bool,
    #[serde(default)]
    pub label_error_message: Option<String>,
    #[serde(default)]
    pub label_error_detected_at: Option<DateTime<Utc>>,
}

fn default_visible() -> bool {
    true
}

impl Column {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            mapped_label: None,
            mapping_type: MappingType::None,
            auto_archive: false,
            remove_source_label_on_enter: false,
            color: None,
            visible: true,
            has_label_error: false,
            label_error_message: None,
            label_error_detected_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.mapped_label = Some(label.into());
        self.mapping_type = MappingType::Existing;
        self
    }

    pub fn clear_label_error(&mut self) {
        self.has_label_error = false;
        self.label_error_message = None;
        self.label_error_detected_at = None;
    }
}

/// The part of a column the move path needs, for configured and virtual
/// columns alike
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub id: String,
    pub mapped_label: Option<String>,
    pub auto_archive: bool,
    pub remove_source_label_on_enter: bool,
}

impl ColumnRef {
    pub fn inbox() -> Self {
        Self {
            id: INBOX_COLUMN_ID.to_string(),
            mapped_label: None,
            auto_archive: false,
            remove_source_label_on_enter: false,
        }
    }

    pub fn is_inbox(&self) -> bool {
        self.id == INBOX_COLUMN_ID
    }
}

impl From<&Column> for ColumnRef {
    fn from(column: &Column) -> Self {
        Self {
            id: column.id.clone(),
            mapped_label: column.mapped_label.clone(),
            auto_archive: column.auto_archive,
            remove_source_label_on_enter: column.remove_source_label_on_enter,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KanbanColumnConfig {
    pub columns: Vec<Column>,
}

impl KanbanColumnConfig {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    /// Resolve a column id, falling back to the virtual inbox column.
    pub fn resolve(&self, id: &str) -> Result<ColumnRef, EngineError> {
        match self.column(id) {
            Some(column) => Ok(column.into()),
            None if id == INBOX_COLUMN_ID => Ok(ColumnRef::inbox()),
            None => Err(EngineError::ColumnNotFound(id.to_string())),
        }
    }

    /// Column a newly observed message lands in: the first visible column (by
    /// order) whose mapped label the message carries, otherwise the inbox.
    pub fn column_for_labels(&self, labels: &BTreeSet<String>) -> String {
        let mut ordered: Vec<&Column> = self.columns.iter().collect();
        ordered.sort_by_key(|c| c.order);

        ordered
            .into_iter()
            .find(|c| c.visible && c.mapped_label.as_ref().is_some_and(|l| labels.contains(l)))
            .map(|c| c.id.clone())
            .unwrap_or_else(|| INBOX_COLUMN_ID.to_string())
    }

    pub fn label_error_count(&self) -> u32 {
        self.columns.iter().filter(|c| c.has_label_error).count() as u32
    }

    /// Check the write-time invariants: unique ids, unique names (ignoring
    /// case) and no label mapped by two columns.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut labels = HashSet::new();

        for column in &self.columns {
            if column.id.trim().is_empty() {
                return Err(EngineError::InvalidInput("Column id cannot be empty".into()));
            }
            if !ids.insert(column.id.as_str()) {
                return Err(EngineError::InvalidInput(format!(
                    "Duplicate column id: {}",
                    column.id
                )));
            }

            let name = column.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "Column {} has no name",
                    column.id
                )));
            }
            if !names.insert(name) {
                return Err(EngineError::InvalidInput(format!(
                    "Duplicate column name: {}",
                    column.name
                )));
            }

            if let Some(label) = &column.mapped_label {
                if !labels.insert(label.as_str()) {
                    return Err(EngineError::InvalidInput(format!(
                        "Label {} is mapped by more than one column",
                        label
                    )));
                }
            }
        }

        Ok(())
    }
}
