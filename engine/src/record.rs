//! Record types for storing data.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Name reserved for the identity key. It never appears inside [`Fields`].
pub const IDENTITY_FIELD: &str = "id";

/// Mutable fields of a record, keyed by name.
///
/// A BTreeMap keeps serialization and field iteration deterministic.
pub type Fields = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// A stored record: an immutable identity plus mutable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity assigned by the store at insert time
    pub id: RecordId,
    /// Everything else
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Create a record from an identity and its fields.
    pub fn new(id: RecordId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Build a record from a JSON object such as `{"name": "Arthur", "score": 250}`.
    pub fn from_json(id: RecordId, value: Value) -> Result<Self> {
        Ok(Self::new(id, fields_from_json(value)?))
    }

    /// Value of a field, `null` when absent.
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Merge `changes` into this record's fields (last write wins).
    pub fn merge(&mut self, changes: Fields) {
        self.fields.extend(changes);
    }

    /// Names of fields whose values differ between `self` and `other`.
    ///
    /// A field present on one side only counts as changed.
    pub fn changed_fields(&self, other: &Record) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, value) in &self.fields {
            if other.fields.get(name) != Some(value) {
                changed.insert(name.clone());
            }
        }
        for name in other.fields.keys() {
            if !self.fields.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        changed
    }
}

/// Convert a JSON object into [`Fields`], rejecting anything else.
pub fn fields_from_json(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => {
            let fields: Fields = map.into_iter().collect();
            validate_fields(&fields)?;
            Ok(fields)
        }
        other => Err(Error::InvalidFields(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Reject field maps that try to set the identity.
pub fn validate_fields(fields: &Fields) -> Result<()> {
    if fields.contains_key(IDENTITY_FIELD) {
        return Err(Error::InvalidFields(format!(
            "'{}' is the identity key and cannot be written",
            IDENTITY_FIELD
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_record() {
        let record = Record::from_json(1, json!({"name": "Arthur", "score": 250})).unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.get("name"), &json!("Arthur"));
        assert_eq!(record.get("score"), &json!(250));
        assert_eq!(record.get("missing"), &Value::Null);
    }

    #[test]
    fn identity_cannot_be_a_field() {
        let result = Record::from_json(1, json!({"id": 9, "name": "Arthur"}));
        assert!(matches!(result, Err(Error::InvalidFields(_))));

        let result = fields_from_json(json!([1, 2]));
        assert!(matches!(result, Err(Error::InvalidFields(_))));
    }

    #[test]
    fn merge_is_last_write_wins() {
        let mut record = Record::from_json(1, json!({"name": "Arthur", "score": 250})).unwrap();
        record.merge(fields_from_json(json!({"score": 300, "team": "red"})).unwrap());

        assert_eq!(record.get("name"), &json!("Arthur"));
        assert_eq!(record.get("score"), &json!(300));
        assert_eq!(record.get("team"), &json!("red"));
    }

    #[test]
    fn changed_fields_covers_both_sides() {
        let old = Record::from_json(1, json!({"name": "Arthur", "score": 250, "team": "red"}))
            .unwrap();
        let new = Record::from_json(1, json!({"name": "Arthur", "score": 300, "rank": 2})).unwrap();

        let changed: Vec<_> = old.changed_fields(&new).into_iter().collect();
        assert_eq!(changed, vec!["rank", "score", "team"]);
        assert!(old.changed_fields(&old).is_empty());
    }

    #[test]
    fn serialization_flattens_fields() {
        let record = Record::from_json(4, json!({"name": "Barbara", "score": 750})).unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"id": 4, "name": "Barbara", "score": 750}));

        let parsed: Record = serde_json::from_value(json).unwrap();
        assert_eq!(record, parsed);
    }
}
