//! Fixing columns whose mapped label went missing
//!
//! A column flagged with `has_label_error` is fixed either by pointing it at
//! another existing label or by creating a new one. Both clear the flag.

use tracing::info;

use crate::adapters::provider::{RemoteLabel, SharedProvider};
use crate::adapters::sqlite::{columns, DbPool};
use crate::error::EngineError;
use crate::types::{Column, MappingType};

/// Map `column_id` to an existing remote label, by id.
pub async fn remap_column_label(
    pool: &DbPool,
    provider: &SharedProvider,
    user_id: &str,
    column_id: &str,
    label_id: &str,
) -> Result<Column, EngineError> {
    let labels = provider.list_labels(user_id).await?;
    if !labels.iter().any(|l| l.id == label_id) {
        return Err(EngineError::InvalidInput(format!(
            "Label {} does not exist",
            label_id
        )));
    }

    let column = assign_label(pool, user_id, column_id, label_id, MappingType::Existing)?;
    info!(
        "Remapped column {} of user {} to label {}",
        column_id, user_id, label_id
    );
    Ok(column)
}

/// Map `column_id` to a label called `name`, creating it unless a label with
/// that name (ignoring case) already exists.
pub async fn create_column_label(
    pool: &DbPool,
    provider: &SharedProvider,
    user_id: &str,
    column_id: &str,
    name: &str,
    color: Option<&str>,
) -> Result<Column, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidInput("Label name cannot be empty".into()));
    }

    let existing: Option<RemoteLabel> = provider
        .list_labels(user_id)
        .await?
        .into_iter()
        .find(|l| l.name.eq_ignore_ascii_case(name));

    let (label, mapping) = match existing {
        Some(label) => {
            info!("Reusing existing label {} ({}) for column {}", label.name, label.id, column_id);
            (label, MappingType::Existing)
        }
        None => {
            let label = provider.create_label(user_id, name, color).await?;
            info!("Created label {} ({}) for column {}", label.name, label.id, column_id);
            (label, MappingType::Created)
        }
    };

    assign_label(pool, user_id, column_id, &label.id, mapping)
}

fn assign_label(
    pool: &DbPool,
    user_id: &str,
    column_id: &str,
    label_id: &str,
    mapping: MappingType,
) -> Result<Column, EngineError> {
    columns::update_column(pool, user_id, column_id, |column| {
        column.mapped_label = Some(label_id.to_string());
        column.mapping_type = mapping;
        column.clear_label_error();
    })
}
