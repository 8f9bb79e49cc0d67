//! Query specifications: ordering and section grouping.
//!
//! A [`QuerySpec`] fully determines the order of a snapshot. Every ordering is
//! made total by comparing identities last, so two builds over the same record
//! set always produce the same rows in the same places.

use crate::{error::Result, record::IDENTITY_FIELD, Error, Record, SectionKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// How string values compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collation {
    /// Plain byte order
    #[default]
    Binary,
    /// Lowercase forms first, byte order as the tiebreak
    CaseInsensitive,
}

/// One sort key of an ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub collation: Collation,
}

impl SortKey {
    /// Ascending key on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
            collation: Collation::Binary,
        }
    }

    /// Descending key on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            direction: Direction::Descending,
            ..Self::asc(field)
        }
    }

    /// Compare strings of this key without regard to case.
    pub fn case_insensitive(mut self) -> Self {
        self.collation = Collation::CaseInsensitive;
        self
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = if self.field == IDENTITY_FIELD {
            a.id.cmp(&b.id)
        } else {
            compare_values(a.get(&self.field), b.get(&self.field), self.collation)
        };
        self.apply_direction(ordering)
    }

    fn apply_direction(&self, ordering: Ordering) -> Ordering {
        match self.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

/// How records are partitioned into sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grouping {
    /// One section per distinct value of the field
    Field(String),
    /// One section per uppercased first character of a string field
    Initial(String),
}

impl Grouping {
    /// The field this grouping reads.
    pub fn field(&self) -> &str {
        match self {
            Grouping::Field(field) | Grouping::Initial(field) => field,
        }
    }

    /// Section key of a record under this grouping.
    pub fn key_of(&self, record: &Record) -> SectionKey {
        match self {
            Grouping::Field(field) => record.get(field).clone(),
            Grouping::Initial(field) => match record.get(field) {
                Value::String(s) => Value::String(
                    s.chars()
                        .next()
                        .map(|c| c.to_uppercase().collect())
                        .unwrap_or_default(),
                ),
                _ => Value::Null,
            },
        }
    }
}

/// A tracked query: an ordering plus optional grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub ordering: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
}

impl QuerySpec {
    /// Query ordered by a single key.
    pub fn ordered_by(key: SortKey) -> Self {
        Self {
            ordering: vec![key],
            grouping: None,
        }
    }

    /// Append a secondary sort key.
    pub fn then_by(mut self, key: SortKey) -> Self {
        self.ordering.push(key);
        self
    }

    /// Partition results into sections.
    pub fn grouped_by(mut self, grouping: Grouping) -> Self {
        self.grouping = Some(grouping);
        self
    }

    /// Check the spec before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.ordering.is_empty() {
            return Err(Error::InvalidQuery("ordering is empty".into()));
        }
        if self.ordering.iter().any(|key| key.field.is_empty()) {
            return Err(Error::InvalidQuery("sort key with empty field name".into()));
        }
        if let Some(grouping) = &self.grouping {
            if grouping.field().is_empty() {
                return Err(Error::InvalidQuery("grouping with empty field name".into()));
            }
        }
        Ok(())
    }

    /// Total order over records: every sort key, then identity ascending.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.ordering
            .iter()
            .map(|key| key.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }

    /// Section key of a record (`null` for the implicit section).
    pub fn section_key(&self, record: &Record) -> SectionKey {
        match &self.grouping {
            Some(grouping) => grouping.key_of(record),
            None => Value::Null,
        }
    }

    /// Order of two section keys.
    ///
    /// Uses the first sort key on the grouping field when there is one, so a
    /// descending score ordering also lists score sections descending.
    pub fn compare_sections(&self, a: &SectionKey, b: &SectionKey) -> Ordering {
        let key = self
            .grouping
            .as_ref()
            .and_then(|g| self.ordering.iter().find(|k| k.field == g.field()));
        match key {
            Some(key) => key.apply_direction(compare_values(a, b, key.collation)),
            None => compare_values(a, b, Collation::Binary),
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values.
///
/// Values of different types order by type (null, bool, number, string,
/// array, object). Objects compare by their serialized form.
pub fn compare_values(a: &Value, b: &Value, collation: Collation) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => match collation {
            Collation::Binary => x.cmp(y),
            Collation::CaseInsensitive => x
                .to_lowercase()
                .cmp(&y.to_lowercase())
                .then_with(|| x.cmp(y)),
        },
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(x, y, collation))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
