//! Sectioned query snapshots and the builder that produces them.
//!
//! A snapshot is the materialized result of a [`QuerySpec`] at one commit.
//! Builds are deterministic: the same record set and spec always give the
//! same sections and rows, because ordering ends on the identity tiebreak.

use crate::{error::Result, IndexPath, QuerySpec, ReadRecords, Record, RecordId, SectionKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One section of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Grouping value shared by every record of the section
    pub key: SectionKey,
    /// Records in query order
    pub records: Vec<Record>,
}

impl Section {
    pub fn new(key: SectionKey, records: Vec<Record>) -> Self {
        Self { key, records }
    }

    /// Number of records in the section.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An ordered, sectioned query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    sections: Vec<Section>,
}

impl Snapshot {
    /// Snapshot made of the given sections, taken as already ordered.
    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Snapshot with a single implicit section.
    pub fn single(records: Vec<Record>) -> Self {
        Self::from_sections(vec![Section::new(SectionKey::Null, records)])
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Rows in `section`, zero when out of range.
    pub fn row_count(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, Section::len)
    }

    /// Record at a position.
    pub fn record_at(&self, path: IndexPath) -> Option<&Record> {
        self.sections.get(path.section)?.records.get(path.row)
    }

    /// Total number of records across sections.
    pub fn record_count(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// Every record with its position, in order.
    pub fn iter(&self) -> impl Iterator<Item = (IndexPath, &Record)> {
        self.sections.iter().enumerate().flat_map(|(s, section)| {
            section
                .records
                .iter()
                .enumerate()
                .map(move |(r, record)| (IndexPath::new(s, r), record))
        })
    }

    /// Position of a record by identity.
    pub fn position_of(&self, id: RecordId) -> Option<IndexPath> {
        self.iter()
            .find(|(_, record)| record.id == id)
            .map(|(path, _)| path)
    }

    /// Identities in snapshot order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.iter().map(|(_, record)| record.id).collect()
    }
}

/// Run `spec` against a read view and materialize the result.
pub fn build<R: ReadRecords + ?Sized>(reader: &R, spec: &QuerySpec) -> Result<Snapshot> {
    spec.validate()?;
    let records = reader.execute_query(spec)?;
    Ok(arrange(records, spec))
}

/// Sort and section records according to `spec`.
///
/// Store order is not trusted: records are re-sorted with the spec's total
/// order before sections are cut.
pub fn arrange(mut records: Vec<Record>, spec: &QuerySpec) -> Snapshot {
    records.sort_by(|a, b| spec.compare(a, b));

    if spec.grouping.is_none() {
        return Snapshot::single(records);
    }

    let mut keyed: Vec<(SectionKey, Record)> = records
        .into_iter()
        .map(|record| (spec.section_key(&record), record))
        .collect();
    // Stable: rows keep query order inside each section.
    keyed.sort_by(|(a, _), (b, _)| spec.compare_sections(a, b));

    let mut sections: Vec<Section> = Vec::new();
    for (key, record) in keyed {
        match sections.last_mut() {
            Some(section) if spec.compare_sections(&section.key, &key) == Ordering::Equal => {
                section.records.push(record)
            }
            _ => sections.push(Section::new(key, vec![record])),
        }
    }
    Snapshot::from_sections(sections)
}
