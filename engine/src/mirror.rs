//! A consumer that mirrors the delivered list.
//!
//! [`ListMirror`] collects the events of a batch and applies them when the
//! batch ends, the same way a list view would update its rows. After every
//! batch its content equals the controller's snapshot.

use crate::{
    controller::{ChangeConsumer, ConsumerResult},
    error::Result,
    ChangeEvent, Error, Generation, IndexPath, Record, Section, Snapshot,
};
use parking_lot::Mutex;

/// An event with the record it carries, as handed to a consumer.
pub type BatchEntry = (ChangeEvent, Option<Record>);

#[derive(Debug, Default)]
struct MirrorState {
    snapshot: Snapshot,
    pending: Option<Vec<BatchEntry>>,
    batches: usize,
    generation: Generation,
}

/// Sectioned copy of a controller's list, kept current by replaying batches.
#[derive(Debug, Default)]
pub struct ListMirror {
    state: Mutex<MirrorState>,
}

impl ListMirror {
    /// Mirror starting from `snapshot`, usually the controller's snapshot
    /// right after its initial fetch.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(MirrorState {
                snapshot,
                ..MirrorState::default()
            }),
        }
    }

    /// Replace the mirrored content.
    pub fn reset(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        state.snapshot = snapshot;
        state.pending = None;
    }

    /// The mirrored content.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn sections(&self) -> Vec<Section> {
        self.state.lock().snapshot.sections().to_vec()
    }

    /// Number of batches applied so far.
    pub fn batches(&self) -> usize {
        self.state.lock().batches
    }

    /// Generation of the last applied batch.
    pub fn generation(&self) -> Generation {
        self.state.lock().generation
    }
}

impl ChangeConsumer for ListMirror {
    fn on_begin(&self, generation: Generation) -> ConsumerResult {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(format!("batch {} began before the previous one ended", generation).into());
        }
        state.pending = Some(Vec::new());
        Ok(())
    }

    fn on_event(&self, event: &ChangeEvent, record: Option<&Record>) -> ConsumerResult {
        let mut state = self.state.lock();
        let pending = state
            .pending
            .as_mut()
            .ok_or("event delivered outside of a batch")?;
        pending.push((event.clone(), record.cloned()));
        Ok(())
    }

    fn on_end(&self, generation: Generation) -> ConsumerResult {
        let mut state = self.state.lock();
        let batch = state
            .pending
            .take()
            .ok_or("batch ended without beginning")?;
        state.snapshot = replay(&state.snapshot, &batch)?;
        state.batches += 1;
        state.generation = generation;
        Ok(())
    }
}

/// Apply one batch to `base`.
///
/// Sources are removed in descending old order, then section changes are
/// applied, then destinations are inserted in ascending new order and updated
/// rows are replaced in place.
pub fn replay(base: &Snapshot, batch: &[BatchEntry]) -> Result<Snapshot> {
    let mut sections = base.sections().to_vec();

    let mut removals = Vec::new();
    let mut dropped = Vec::new();
    let mut added = Vec::new();
    let mut placements = Vec::new();
    let mut updates = Vec::new();

    for (event, record) in batch {
        match event {
            ChangeEvent::Deletion { from } => removals.push(*from),
            ChangeEvent::Move { from, to, .. } => {
                removals.push(*from);
                placements.push((*to, carried(event, record)?));
            }
            ChangeEvent::Insertion { at } => placements.push((*at, carried(event, record)?)),
            ChangeEvent::Update { at, .. } => updates.push((*at, carried(event, record)?)),
            ChangeEvent::SectionDeletion { index } => dropped.push(*index),
            ChangeEvent::SectionInsertion { index, key } => added.push((*index, key.clone())),
        }
    }

    removals.sort_unstable_by(|a, b| b.cmp(a));
    for from in removals {
        let rows = rows_mut(&mut sections, from)?;
        if from.row >= rows.len() {
            return Err(out_of_range("remove", from));
        }
        rows.remove(from.row);
    }

    dropped.sort_unstable_by(|a, b| b.cmp(a));
    for index in dropped {
        if index >= sections.len() {
            return Err(Error::InvalidBatch(format!("no section {} to delete", index)));
        }
        sections.remove(index);
    }

    added.sort_by_key(|(index, _)| *index);
    for (index, key) in added {
        if index > sections.len() {
            return Err(Error::InvalidBatch(format!("cannot insert section {}", index)));
        }
        sections.insert(index, Section::new(key, Vec::new()));
    }

    placements.sort_by_key(|(to, _)| *to);
    for (to, record) in placements {
        let rows = rows_mut(&mut sections, to)?;
        if to.row > rows.len() {
            return Err(out_of_range("insert", to));
        }
        rows.insert(to.row, record.clone());
    }

    for (at, record) in updates {
        let slot = rows_mut(&mut sections, at)?
            .get_mut(at.row)
            .ok_or_else(|| out_of_range("update", at))?;
        *slot = record.clone();
    }

    Ok(Snapshot::from_sections(sections))
}

fn carried<'a>(event: &ChangeEvent, record: &'a Option<Record>) -> Result<&'a Record> {
    record
        .as_ref()
        .ok_or_else(|| Error::InvalidBatch(format!("{:?} carries no record", event)))
}

fn rows_mut(sections: &mut [Section], path: IndexPath) -> Result<&mut Vec<Record>> {
    sections
        .get_mut(path.section)
        .map(|section| &mut section.records)
        .ok_or_else(|| out_of_range("address", path))
}

fn out_of_range(action: &str, path: IndexPath) -> Error {
    Error::InvalidBatch(format!("cannot {} row at {}", action, path))
}
