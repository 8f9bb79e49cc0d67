//! End-to-end tests for roster-engine
//!
//! Writes go through the serializer; the controller delivers batches to a
//! recorder and a mirror, and both are checked against fresh builds.

use parking_lot::Mutex;
use roster_engine::{
    record::fields_from_json, snapshot, ChangeConsumer, ChangeEvent, Completion,
    ConsumerResult, ControllerOptions, FieldChanges, FieldTracking, Generation, Grouping,
    IndexPath, ListMirror, MemoryStore, QuerySpec, ReadRecords, Record, RecordId,
    RecordsController, SortKey, StoreTransaction, TransactionSerializer,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

type Serializer = TransactionSerializer<MemoryStore>;

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<(Generation, Vec<ChangeEvent>)>>,
    open: Mutex<Option<Vec<ChangeEvent>>>,
}

impl Recorder {
    fn take(&self) -> Vec<(Generation, Vec<ChangeEvent>)> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl ChangeConsumer for Recorder {
    fn on_begin(&self, _generation: Generation) -> ConsumerResult {
        *self.open.lock() = Some(Vec::new());
        Ok(())
    }

    fn on_event(&self, event: &ChangeEvent, _record: Option<&Record>) -> ConsumerResult {
        self.open
            .lock()
            .as_mut()
            .ok_or("no open batch")?
            .push(event.clone());
        Ok(())
    }

    fn on_end(&self, generation: Generation) -> ConsumerResult {
        let events = self.open.lock().take().ok_or("no open batch")?;
        self.batches.lock().push((generation, events));
        Ok(())
    }
}

/// Fans callbacks out to a recorder and a mirror.
struct Both {
    recorder: Arc<Recorder>,
    mirror: Arc<ListMirror>,
}

impl ChangeConsumer for Both {
    fn on_begin(&self, generation: Generation) -> ConsumerResult {
        self.recorder.on_begin(generation)?;
        self.mirror.on_begin(generation)
    }

    fn on_event(&self, event: &ChangeEvent, record: Option<&Record>) -> ConsumerResult {
        self.recorder.on_event(event, record)?;
        self.mirror.on_event(event, record)
    }

    fn on_end(&self, generation: Generation) -> ConsumerResult {
        self.recorder.on_end(generation)?;
        self.mirror.on_end(generation)
    }
}

struct Harness {
    serializer: Arc<Serializer>,
    controller: RecordsController<MemoryStore>,
    recorder: Arc<Recorder>,
    mirror: Arc<ListMirror>,
    _consumer: Arc<dyn ChangeConsumer>,
}

impl Harness {
    async fn start(query: QuerySpec, options: ControllerOptions) -> Self {
        let serializer = Arc::new(TransactionSerializer::new(MemoryStore::new()));
        Self::with_serializer(serializer, query, options).await
    }

    async fn with_serializer(
        serializer: Arc<Serializer>,
        query: QuerySpec,
        options: ControllerOptions,
    ) -> Self {
        let recorder = Arc::new(Recorder::default());
        let mirror = Arc::new(ListMirror::default());
        let consumer: Arc<dyn ChangeConsumer> = Arc::new(Both {
            recorder: recorder.clone(),
            mirror: mirror.clone(),
        });
        let controller = RecordsController::new(
            serializer.clone(),
            query,
            Arc::downgrade(&consumer),
            options,
        )
        .unwrap();
        controller.perform_initial_fetch().await.unwrap();
        mirror.reset(controller.snapshot().as_ref().clone());

        Self {
            serializer,
            controller,
            recorder,
            mirror,
            _consumer: consumer,
        }
    }

    /// Wait for delivery and check every view agrees with a fresh build.
    async fn settle(&self) {
        self.controller.sync().await.unwrap();
        let (_, reader) = self.serializer.latest();
        let fresh = snapshot::build(&reader, &self.controller.query()).unwrap();
        assert_eq!(*self.controller.snapshot(), fresh);
        assert_eq!(self.mirror.snapshot(), fresh);
    }
}

fn insert(
    txn: &mut impl StoreTransaction,
    value: serde_json::Value,
) -> roster_engine::error::Result<RecordId> {
    txn.insert(fields_from_json(value)?)
}

fn by_score() -> QuerySpec {
    QuerySpec::ordered_by(SortKey::desc("score")).then_by(SortKey::asc("name"))
}

fn by_name() -> QuerySpec {
    QuerySpec::ordered_by(SortKey::asc("name"))
}

fn changed(fields: &[&str]) -> FieldChanges {
    FieldChanges::Known(fields.iter().map(|f| f.to_string()).collect::<BTreeSet<_>>())
}

// ============================================================================
// Delivery Scenarios
// ============================================================================

#[tokio::test]
async fn raising_a_score_moves_one_record() {
    let query = QuerySpec::ordered_by(SortKey::desc("score"));
    let h = Harness::start(query, ControllerOptions::default()).await;
    let (first, _second) = h
        .serializer
        .write(|txn| {
            let a = insert(txn, json!({"score": 10}))?;
            let b = insert(txn, json!({"score": 20}))?;
            Ok((a, b))
        })
        .await
        .unwrap();
    h.settle().await;
    h.recorder.take();

    h.serializer
        .write(|txn| txn.update(first, fields_from_json(json!({"score": 30}))?))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(
        h.recorder.take(),
        vec![(
            2,
            vec![ChangeEvent::Move {
                from: IndexPath::new(0, 1),
                to: IndexPath::new(0, 0),
                changes: changed(&["score"]),
            }]
        )]
    );
}

#[tokio::test]
async fn insert_then_delete_is_two_batches() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    h.serializer
        .write(|txn| insert(txn, json!({"name": "Barbara", "score": 750})))
        .await
        .unwrap();
    h.settle().await;
    let before = h.controller.snapshot();
    h.recorder.take();

    let id = h
        .serializer
        .write(|txn| insert(txn, json!({"name": "Arthur", "score": 250})))
        .await
        .unwrap();
    h.serializer.write(|txn| txn.delete(id)).await.unwrap();
    h.settle().await;

    let batches = h.recorder.take();
    assert_eq!(
        batches,
        vec![
            (2, vec![ChangeEvent::Insertion { at: IndexPath::new(0, 0) }]),
            (3, vec![ChangeEvent::Deletion { from: IndexPath::new(0, 0) }]),
        ]
    );
    assert_eq!(*h.controller.snapshot(), *before);
}

#[tokio::test]
async fn resort_emits_only_moves() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    h.serializer
        .write(|txn| {
            for (name, score) in [("Arthur", 250), ("Barbara", 750), ("Craig", 500)] {
                insert(txn, json!({"name": name, "score": score}))?;
            }
            Ok(())
        })
        .await
        .unwrap();
    h.settle().await;
    h.recorder.take();

    h.controller.set_query(by_score()).await.unwrap();
    h.settle().await;

    let batches = h.recorder.take();
    assert_eq!(batches.len(), 1);
    let (_, events) = &batches[0];
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| matches!(e, ChangeEvent::Move { .. })));

    let names: Vec<_> = h
        .controller
        .sections()[0]
        .records
        .iter()
        .map(|r| r.get("name").clone())
        .collect();
    assert_eq!(names, vec![json!("Barbara"), json!("Craig"), json!("Arthur")]);
}

#[tokio::test]
async fn deleting_missing_record_emits_nothing() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    let id = h
        .serializer
        .write(|txn| insert(txn, json!({"name": "Arthur"})))
        .await
        .unwrap();
    h.serializer.write(|txn| txn.delete(id)).await.unwrap();
    h.settle().await;
    h.recorder.take();

    let existed = h.serializer.write(|txn| txn.delete(id)).await.unwrap();
    assert!(!existed);
    h.settle().await;

    assert!(h.recorder.take().is_empty());
    assert_eq!(h.controller.generation(), 3);
}

#[tokio::test]
async fn rollback_and_failed_writes_emit_nothing() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;

    h.serializer
        .transaction(|txn| {
            insert(txn, json!({"name": "Arthur"}))?;
            Ok(Completion::Rollback)
        })
        .await
        .unwrap();
    let failed = h
        .serializer
        .write(|txn| {
            insert(txn, json!({"name": "Barbara"}))?;
            txn.update(404, fields_from_json(json!({"name": "nobody"}))?)
        })
        .await;
    assert!(failed.is_err());
    h.settle().await;

    assert!(h.recorder.take().is_empty());
    assert_eq!(h.serializer.generation(), 0);
    assert_eq!(h.controller.row_count(0), 0);
}

#[tokio::test]
async fn grouped_query_reports_section_changes() {
    let grouped = by_name().grouped_by(Grouping::Initial("name".into()));
    let h = Harness::start(grouped, ControllerOptions::default()).await;
    let arthur = h
        .serializer
        .write(|txn| {
            let a = insert(txn, json!({"name": "Arthur"}))?;
            insert(txn, json!({"name": "Barbara"}))?;
            Ok(a)
        })
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.controller.section_count(), 2);
    h.recorder.take();

    h.serializer
        .write(|txn| txn.update(arthur, fields_from_json(json!({"name": "Zed"}))?))
        .await
        .unwrap();
    h.settle().await;

    let batches = h.recorder.take();
    assert_eq!(
        batches[0].1,
        vec![
            ChangeEvent::Deletion { from: IndexPath::new(0, 0) },
            ChangeEvent::SectionDeletion { index: 0 },
            ChangeEvent::SectionInsertion { index: 1, key: json!("Z") },
            ChangeEvent::Insertion { at: IndexPath::new(1, 0) },
        ]
    );
}

#[tokio::test]
async fn disabled_field_tracking_reports_unspecified() {
    let options = ControllerOptions {
        field_tracking: FieldTracking::Disabled,
    };
    let h = Harness::start(by_name(), options).await;
    let id = h
        .serializer
        .write(|txn| insert(txn, json!({"name": "Arthur", "score": 1})))
        .await
        .unwrap();
    h.settle().await;
    h.recorder.take();

    h.serializer
        .write(|txn| txn.update(id, fields_from_json(json!({"score": 2}))?))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(
        h.recorder.take()[0].1,
        vec![ChangeEvent::Update {
            at: IndexPath::new(0, 0),
            changes: FieldChanges::Unspecified,
        }]
    );
}

#[tokio::test]
async fn query_set_before_fetch_is_used_by_fetch() {
    let serializer = Arc::new(TransactionSerializer::new(MemoryStore::new()));
    serializer
        .write(|txn| {
            insert(txn, json!({"name": "Arthur", "score": 250}))?;
            insert(txn, json!({"name": "Barbara", "score": 750}))
        })
        .await
        .unwrap();

    let mirror: Arc<dyn ChangeConsumer> = Arc::new(ListMirror::default());
    let controller = RecordsController::new(
        serializer.clone(),
        by_name(),
        Arc::downgrade(&mirror),
        ControllerOptions::default(),
    )
    .unwrap();
    controller.set_query(by_score()).await.unwrap();
    assert_eq!(controller.section_count(), 0);

    controller.perform_initial_fetch().await.unwrap();
    assert_eq!(controller.query(), by_score());
    assert_eq!(controller.record_at(IndexPath::new(0, 0)).unwrap().id, 2);
}

#[tokio::test]
async fn detached_consumer_stops_receiving() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    let Harness {
        serializer,
        controller,
        recorder,
        _consumer,
        ..
    } = h;
    drop(_consumer);

    serializer
        .write(|txn| insert(txn, json!({"name": "Arthur"})))
        .await
        .unwrap();
    controller.sync().await.unwrap();

    assert!(recorder.take().is_empty());
    assert_eq!(controller.row_count(0), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_serialized() {
    const N: i64 = 50;
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    let counter = h
        .serializer
        .write(|txn| insert(txn, json!({"name": "counter", "value": 0})))
        .await
        .unwrap();

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let serializer = h.serializer.clone();
            tokio::spawn(async move {
                serializer
                    .run_write(|txn| {
                        let record = txn.fetch(counter)?.expect("counter exists");
                        let value = record.get("value").as_i64().unwrap_or(0);
                        txn.update(counter, fields_from_json(json!({"value": value + 1}))?)?;
                        Ok((Completion::Commit, ()))
                    })
                    .await
                    .unwrap()
                    .generation()
                    .unwrap()
            })
        })
        .collect();

    let mut generations = Vec::new();
    for handle in handles {
        generations.push(handle.await.unwrap());
    }
    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), N as usize);

    h.settle().await;
    let value = h
        .controller
        .record_at(IndexPath::new(0, 0))
        .unwrap()
        .get("value")
        .clone();
    assert_eq!(value, json!(N));
    assert_eq!(h.controller.generation(), N as u64 + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mirror_survives_concurrent_stress() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    const NAMES: [&str; 6] = ["Arthur", "Barbara", "Craig", "David", "Eve", "Zed"];

    let h = Harness::start(
        by_score().grouped_by(Grouping::Initial("name".into())),
        ControllerOptions::default(),
    )
    .await;

    let handles: Vec<_> = (0..40u64)
        .map(|seed| {
            let serializer = h.serializer.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                let plan: Vec<(u8, usize, i64)> = (0..4)
                    .map(|_| {
                        (
                            rng.gen_range(0..3),
                            rng.gen_range(0..NAMES.len()),
                            rng.gen_range(0..10),
                        )
                    })
                    .collect();
                serializer
                    .write(|txn| {
                        for (action, name, score) in plan {
                            let all = txn.fetch_all()?;
                            match action {
                                0 => {
                                    insert(txn, json!({"name": NAMES[name], "score": score * 10}))?;
                                }
                                1 if !all.is_empty() => {
                                    txn.delete(all[name % all.len()].id)?;
                                }
                                _ if !all.is_empty() => {
                                    let target = all[name % all.len()].id;
                                    txn.update(target, fields_from_json(json!({"score": score * 10}))?)?;
                                }
                                _ => {}
                            }
                        }
                        Ok(())
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    h.settle().await;
    assert_eq!(h.controller.generation(), 40);
    assert_eq!(h.mirror.generation(), h.controller.generation());
}

#[test]
fn blocking_writers_feed_the_controller() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let h = runtime.block_on(Harness::start(by_name(), ControllerOptions::default()));

    let threads: Vec<_> = (0..4)
        .map(|i| {
            let serializer = h.serializer.clone();
            std::thread::spawn(move || {
                serializer
                    .write_blocking(|txn| insert(txn, json!({"name": format!("worker-{}", i)})))
                    .unwrap()
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    runtime.block_on(h.settle());
    assert_eq!(h.controller.row_count(0), 4);
    assert_eq!(h.mirror.batches(), 4);
}

// ============================================================================
// Edge Cases
// ============================================================================

#[tokio::test]
async fn unicode_and_case_insensitive_names() {
    let query = QuerySpec::ordered_by(SortKey::asc("name").case_insensitive());
    let h = Harness::start(query, ControllerOptions::default()).await;
    h.serializer
        .write(|txn| {
            for name in ["émile", "Zoë", "adam", "Bob", "日本"] {
                insert(txn, json!({ "name": name }))?;
            }
            Ok(())
        })
        .await
        .unwrap();
    h.settle().await;

    let names: Vec<_> = h.controller.sections()[0]
        .records
        .iter()
        .map(|r| r.get("name").as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["adam", "Bob", "Zoë", "émile", "日本"]);
}

#[tokio::test]
async fn missing_sort_field_sorts_first() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    h.serializer
        .write(|txn| {
            insert(txn, json!({"name": "Arthur"}))?;
            insert(txn, json!({"score": 5}))
        })
        .await
        .unwrap();
    h.settle().await;

    let first = h.controller.record_at(IndexPath::new(0, 0)).unwrap();
    assert!(first.get("name").is_null());
}

#[tokio::test]
async fn emptying_the_store_keeps_one_section() {
    let h = Harness::start(by_name(), ControllerOptions::default()).await;
    let ids = h
        .serializer
        .write(|txn| {
            let a = insert(txn, json!({"name": "Arthur"}))?;
            let b = insert(txn, json!({"name": "Barbara"}))?;
            Ok([a, b])
        })
        .await
        .unwrap();
    h.serializer
        .write(|txn| {
            for id in ids {
                txn.delete(id)?;
            }
            Ok(())
        })
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.controller.section_count(), 1);
    assert_eq!(h.controller.row_count(0), 0);
    let batches = h.recorder.take();
    assert_eq!(
        batches.last().map(|(_, events)| events.clone()),
        Some(vec![
            ChangeEvent::Deletion { from: IndexPath::new(0, 1) },
            ChangeEvent::Deletion { from: IndexPath::new(0, 0) },
        ])
    );
}
