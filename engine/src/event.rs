//! Change events delivered to list consumers.

use crate::SectionKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Position of a row: section index, then row index within the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.section, self.row)
    }
}

/// Which fields of a record changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldChanges {
    /// Exactly these fields differ
    Known(BTreeSet<String>),
    /// Field-level tracking is off; any field may have changed
    Unspecified,
}

impl FieldChanges {
    /// True when `field` is known to have changed, or tracking is off.
    pub fn may_include(&self, field: &str) -> bool {
        match self {
            FieldChanges::Known(fields) => fields.contains(field),
            FieldChanges::Unspecified => true,
        }
    }

    /// True when tracking is on and no field changed.
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldChanges::Known(fields) if fields.is_empty())
    }
}

/// One structural change between two snapshots.
///
/// `Deletion::from`, `Move::from` and `SectionDeletion::index` address the old
/// snapshot; every other position addresses the new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeEvent {
    Insertion {
        at: IndexPath,
    },
    Deletion {
        from: IndexPath,
    },
    Update {
        at: IndexPath,
        changes: FieldChanges,
    },
    Move {
        from: IndexPath,
        to: IndexPath,
        changes: FieldChanges,
    },
    /// A section appeared (grouped queries only)
    SectionInsertion {
        index: usize,
        key: SectionKey,
    },
    /// A section disappeared (grouped queries only)
    SectionDeletion {
        index: usize,
    },
}

impl ChangeEvent {
    /// Whether this event addresses a whole section rather than a row.
    pub fn is_section_event(&self) -> bool {
        matches!(
            self,
            ChangeEvent::SectionInsertion { .. } | ChangeEvent::SectionDeletion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_paths_order_by_section_then_row() {
        assert!(IndexPath::new(0, 9) < IndexPath::new(1, 0));
        assert!(IndexPath::new(1, 0) < IndexPath::new(1, 1));
        assert_eq!(IndexPath::new(2, 3).to_string(), "(2, 3)");
    }

    #[test]
    fn field_changes_queries() {
        let known = FieldChanges::Known(["score".to_string()].into_iter().collect());
        assert!(known.may_include("score"));
        assert!(!known.may_include("name"));
        assert!(!known.is_empty());
        assert!(FieldChanges::Unspecified.may_include("name"));
        assert!(!FieldChanges::Unspecified.is_empty());
        assert!(FieldChanges::Known(BTreeSet::new()).is_empty());
    }

    #[test]
    fn event_serialization() {
        let event = ChangeEvent::Move {
            from: IndexPath::new(0, 1),
            to: IndexPath::new(0, 0),
            changes: FieldChanges::Known(["score".to_string()].into_iter().collect()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "move",
                "from": {"section": 0, "row": 1},
                "to": {"section": 0, "row": 0},
                "changes": {"known": ["score"]}
            })
        );

        let event = ChangeEvent::SectionInsertion {
            index: 2,
            key: json!("B"),
        };
        assert!(event.is_section_event());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"kind": "sectionInsertion", "index": 2, "key": "B"})
        );
    }
}
