//! Identity-based positional diff between two snapshots.
//!
//! # Algorithm
//!
//! 1. Align sections by key, comparing keys the way grouping does (so `500`
//!    and `500.0` are one section). Surviving sections whose relative order is
//!    kept (longest increasing run of new indices) are paired; the others
//!    count as deleted and re-inserted.
//! 2. Index every record by identity on both sides. A duplicate identity is a
//!    broken snapshot and fails the diff.
//! 3. Old-only records, and records whose section pair changed, are
//!    deletions. New-only records, and records that arrived from another
//!    section, are insertions.
//! 4. Inside a section pair, the records whose relative order is unchanged stay
//!    put; every other survivor is a move. Records already sitting at their
//!    old position always stay put, so no move ever lands where it started.
//!    Among equally long choices the engine keeps unchanged records in place,
//!    so the record that was edited is the one reported as moving.
//! 5. Survivors that stay put but differ in some field are updates.
//!
//! Events come out as: deletions (descending), section deletions
//! (descending), section insertions, insertions, moves (by destination),
//! updates, the last four ascending.

use crate::{
    error::Result,
    query::{compare_values, Collation},
    ChangeEvent, Error, FieldChanges, IndexPath, Record, RecordId, Snapshot,
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap};

/// Whether diffs report which fields changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldTracking {
    /// Report the names of differing fields
    #[default]
    Enabled,
    /// Report [`FieldChanges::Unspecified`]
    Disabled,
}

/// A change event with the record it concerns.
///
/// `record` is the old version for deletions, the new version for every
/// other row event, and `None` for section events.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<'a> {
    pub event: ChangeEvent,
    pub record: Option<&'a Record>,
}

/// Events turning `old` into `new`, with field tracking enabled.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Result<Vec<ChangeEvent>> {
    diff_with(old, new, FieldTracking::Enabled)
}

/// Events turning `old` into `new`.
pub fn diff_with(
    old: &Snapshot,
    new: &Snapshot,
    tracking: FieldTracking,
) -> Result<Vec<ChangeEvent>> {
    Ok(changes(old, new, tracking)?
        .into_iter()
        .map(|change| change.event)
        .collect())
}

/// Events turning `old` into `new`, each paired with its record.
pub fn changes<'a>(
    old: &'a Snapshot,
    new: &'a Snapshot,
    tracking: FieldTracking,
) -> Result<Vec<Change<'a>>> {
    let old_index = index(old, "old")?;
    let new_index = index(new, "new")?;

    let section_pairs = align_sections(old, new);
    let mut paired_new = vec![false; new.section_count()];
    for target in section_pairs.iter().flatten() {
        paired_new[*target] = true;
    }
    let same_section =
        |from: IndexPath, to: IndexPath| section_pairs[from.section] == Some(to.section);

    let mut deletions = Vec::new();
    let mut insertions = Vec::new();
    // Survivors per old section, in old row order.
    let mut survivors: Vec<Vec<Survivor<'a>>> = vec![Vec::new(); old.section_count()];

    for (from, record) in old.iter() {
        match new_index.get(&record.id) {
            Some(&(to, new_record)) if same_section(from, to) => {
                let unchanged = match tracking {
                    FieldTracking::Enabled => record.changed_fields(new_record).is_empty(),
                    FieldTracking::Disabled => record == new_record,
                };
                survivors[from.section].push(Survivor {
                    from,
                    to,
                    old: record,
                    new: new_record,
                    unchanged,
                });
            }
            _ => deletions.push((from, record)),
        }
    }
    for (to, record) in new.iter() {
        match old_index.get(&record.id) {
            Some(&(from, _)) if same_section(from, to) => {}
            _ => insertions.push((to, record)),
        }
    }

    let mut moves = Vec::new();
    let mut updates = Vec::new();
    for section in &survivors {
        let sequence: Vec<Candidate> = section
            .iter()
            .map(|s| Candidate {
                target: s.to.row,
                pinned: s.from == s.to,
                preferred: s.unchanged,
            })
            .collect();
        let stays = stable_subsequence(&sequence);
        for (survivor, stays) in section.iter().zip(stays) {
            if !stays {
                moves.push(survivor);
            } else if !survivor.unchanged {
                updates.push(survivor);
            }
        }
    }

    deletions.sort_by(|a, b| b.0.cmp(&a.0));
    insertions.sort_by_key(|(to, _)| *to);
    moves.sort_by_key(|s| s.to);
    updates.sort_by_key(|s| s.to);

    let mut out =
        Vec::with_capacity(deletions.len() + insertions.len() + moves.len() + updates.len());
    out.extend(deletions.into_iter().map(|(from, record)| Change {
        event: ChangeEvent::Deletion { from },
        record: Some(record),
    }));
    out.extend(
        section_pairs
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, pair)| pair.is_none())
            .map(|(index, _)| Change {
                event: ChangeEvent::SectionDeletion { index },
                record: None,
            }),
    );
    out.extend(
        new.sections()
            .iter()
            .enumerate()
            .filter(|(index, _)| !paired_new[*index])
            .map(|(index, section)| Change {
                event: ChangeEvent::SectionInsertion {
                    index,
                    key: section.key.clone(),
                },
                record: None,
            }),
    );
    out.extend(insertions.into_iter().map(|(at, record)| Change {
        event: ChangeEvent::Insertion { at },
        record: Some(record),
    }));
    out.extend(moves.into_iter().map(|s| Change {
        event: ChangeEvent::Move {
            from: s.from,
            to: s.to,
            changes: s.field_changes(tracking),
        },
        record: Some(s.new),
    }));
    out.extend(updates.into_iter().map(|s| Change {
        event: ChangeEvent::Update {
            at: s.to,
            changes: s.field_changes(tracking),
        },
        record: Some(s.new),
    }));
    Ok(out)
}

#[derive(Debug, Clone)]
struct Survivor<'a> {
    from: IndexPath,
    to: IndexPath,
    old: &'a Record,
    new: &'a Record,
    unchanged: bool,
}

impl Survivor<'_> {
    fn field_changes(&self, tracking: FieldTracking) -> FieldChanges {
        match tracking {
            FieldTracking::Enabled => FieldChanges::Known(self.old.changed_fields(self.new)),
            FieldTracking::Disabled => FieldChanges::Unspecified,
        }
    }
}

fn index<'a>(
    snapshot: &'a Snapshot,
    side: &'static str,
) -> Result<HashMap<RecordId, (IndexPath, &'a Record)>> {
    let mut index = HashMap::with_capacity(snapshot.record_count());
    for (path, record) in snapshot.iter() {
        if index.insert(record.id, (path, record)).is_some() {
            return Err(Error::DuplicateIdentity {
                id: record.id,
                side,
            });
        }
    }
    Ok(index)
}

/// Section keys are equal when grouping would put them in one section.
/// Collation and direction never make distinct values equal.
fn compare_keys(a: &crate::SectionKey, b: &crate::SectionKey) -> Ordering {
    compare_values(a, b, Collation::Binary)
}

/// For each old section, the new section it is paired with.
fn align_sections(old: &Snapshot, new: &Snapshot) -> Vec<Option<usize>> {
    let sections = new.sections();
    let mut by_key: Vec<usize> = (0..sections.len()).collect();
    // Stable, so equal keys resolve to the first such section.
    by_key.sort_by(|&a, &b| compare_keys(&sections[a].key, &sections[b].key));

    let candidates: Vec<(usize, usize)> = old
        .sections()
        .iter()
        .enumerate()
        .filter_map(|(old_index, section)| {
            let first = by_key
                .partition_point(|&i| compare_keys(&sections[i].key, &section.key).is_lt());
            by_key
                .get(first)
                .filter(|&&i| compare_keys(&sections[i].key, &section.key).is_eq())
                .map(|&new_index| (old_index, new_index))
        })
        .collect();
    let sequence: Vec<Candidate> = candidates
        .iter()
        .map(|&(_, to)| Candidate {
            target: to,
            pinned: false,
            preferred: true,
        })
        .collect();
    let keep = stable_subsequence(&sequence);

    let mut pairs = vec![None; old.section_count()];
    for ((from, to), keep) in candidates.into_iter().zip(keep) {
        if keep {
            pairs[from] = Some(to);
        }
    }
    pairs
}

/// One entry of [`stable_subsequence`].
#[derive(Debug, Clone, Copy)]
struct Candidate {
    target: usize,
    /// Already at its final position
    pinned: bool,
    /// Kept over equally long alternatives
    preferred: bool,
}

/// Marks a strictly increasing subsequence of targets.
///
/// Every pinned entry is kept. Pinned entries must be increasing among
/// themselves, which holds when target and source position coincide. After
/// that length wins, then the number of preferred entries, then the earliest
/// entries.
fn stable_subsequence(sequence: &[Candidate]) -> Vec<bool> {
    let n = sequence.len();
    let mut keep = vec![false; n];
    if n == 0 {
        return keep;
    }

    // A pinned entry outweighs any number of members, and every member
    // outweighs all preference bonuses combined.
    let unit = n as u64 + 1;
    let pin = unit * (unit + 1);
    let weight = |i: usize| {
        let candidate = sequence[i];
        u64::from(candidate.pinned) * pin + unit + u64::from(candidate.preferred)
    };

    let mut best = vec![0u64; n];
    let mut prev = vec![None; n];
    for i in 0..n {
        best[i] = weight(i);
        for j in 0..i {
            if sequence[j].target < sequence[i].target && best[j] + weight(i) > best[i] {
                best[i] = best[j] + weight(i);
                prev[i] = Some(j);
            }
        }
    }

    let mut end = 0;
    for i in 1..n {
        if best[i] > best[end] {
            end = i;
        }
    }
    let mut cursor = Some(end);
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = prev[i];
    }
    keep
}
