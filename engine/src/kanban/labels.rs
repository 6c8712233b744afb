//! Label delta for a column-to-column move

use serde::{Deserialize, Serialize};

use crate::types::ColumnRef;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Labels to add and remove when a card goes from `from` to `to`.
///
/// Entering a column adds its mapped label (the inbox column adds the inbox
/// label). Leaving a column removes its mapped label. Entering an
/// auto-archive or remove-source column also drops the inbox label. A label
/// that would be both added and removed is left alone.
pub fn compute_label_delta(from: &ColumnRef, to: &ColumnRef, inbox_label: &str) -> LabelDelta {
    let mut add = Vec::new();
    let mut remove = Vec::new();

    if let Some(label) = &to.mapped_label {
        add.push(label.clone());
    }
    if to.is_inbox() {
        add.push(inbox_label.to_string());
    }

    if let Some(label) = &from.mapped_label {
        if label != inbox_label {
            remove.push(label.clone());
        }
    }
    if to.auto_archive || to.remove_source_label_on_enter {
        remove.push(inbox_label.to_string());
    }

    dedup_in_order(&mut add);
    dedup_in_order(&mut remove);

    let overlap: Vec<String> = add.iter().filter(|l| remove.contains(l)).cloned().collect();
    add.retain(|l| !overlap.contains(l));
    remove.retain(|l| !overlap.contains(l));

    LabelDelta { add, remove }
}

fn dedup_in_order(labels: &mut Vec<String>) {
    let mut seen = Vec::with_capacity(labels.len());
    labels.retain(|l| {
        if seen.contains(l) {
            false
        } else {
            seen.push(l.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(id: &str, label: Option<&str>) -> ColumnRef {
        ColumnRef {
            id: id.to_string(),
            mapped_label: label.map(|l| l.to_string()),
            auto_archive: false,
            remove_source_label_on_enter: false,
        }
    }

    #[test]
    fn test_move_between_mapped_columns() {
        let delta = compute_label_delta(
            &column("todo", Some("Label_todo")),
            &column("done", Some("Label_done")),
            "INBOX",
        );
        assert_eq!(delta.add, vec!["Label_done"]);
        assert_eq!(delta.remove, vec!["Label_todo"]);
    }

    #[test]
    fn test_move_into_inbox_adds_inbox_label() {
        let delta = compute_label_delta(&column("todo", Some("Label_todo")), &ColumnRef::inbox(), "INBOX");
        assert_eq!(delta.add, vec!["INBOX"]);
        assert_eq!(delta.remove, vec!["Label_todo"]);
    }

    #[test]
    fn test_auto_archive_removes_inbox_label() {
        let mut archive = column("archive", Some("Label_archive"));
        archive.auto_archive = true;

        let delta = compute_label_delta(&ColumnRef::inbox(), &archive, "INBOX");
        assert_eq!(delta.add, vec!["Label_archive"]);
        assert_eq!(delta.remove, vec!["INBOX"]);
    }

    #[test]
    fn test_column_mapped_to_inbox_label_is_never_removed() {
        let delta = compute_label_delta(
            &column("main", Some("INBOX")),
            &column("later", Some("Label_later")),
            "INBOX",
        );
        assert_eq!(delta.add, vec!["Label_later"]);
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn test_overlap_cancels_out() {
        // Mapped to the inbox label and removing it on enter: nothing to do
        let mut odd = column("odd", Some("INBOX"));
        odd.remove_source_label_on_enter = true;

        let delta = compute_label_delta(&column("plain", None), &odd, "INBOX");
        assert!(delta.is_empty());
    }

    #[test]
    fn test_unmapped_columns_have_empty_delta() {
        let delta = compute_label_delta(&column("a", None), &column("b", None), "INBOX");
        assert!(delta.is_empty());
    }
}
