//! Demo workloads - seeding, score randomization and the stress test.
//!
//! Every workload is a set of independent write transactions; the live list
//! follows along through the records controller like any other writer.

use rand::{seq::SliceRandom, Rng};
use roster_engine::{Fields, ReadRecords, RecordId, StoreTransaction};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::Players;
use crate::error::Result;

const NAMES: [&str; 50] = [
    "Arthur", "Anita", "Barbara", "Bernard", "Craig", "Chiara", "David", "Dean", "Éric", "Elena",
    "Fatima", "Frederik", "Gilbert", "Georgette", "Henriette", "Hassan", "Ignacio", "Irene",
    "Julie", "Jack", "Karl", "Kristel", "Louis", "Liz", "Masashi", "Mary", "Noam", "Nicole",
    "Ophelie", "Oleg", "Pascal", "Patricia", "Quentin", "Quinn", "Raoul", "Rachel", "Stephan",
    "Susie", "Tristan", "Tatiana", "Ursule", "Urbain", "Victor", "Violette", "Wilfried",
    "Wilhelmina", "Yvon", "Yann", "Zazie", "Zoé",
];

/// Players inserted into an empty store at startup.
const DEMO_PLAYERS: [(&str, i64); 3] = [("Arthur", 250), ("Barbara", 750), ("Craig", 500)];

/// Players inserted by a stress job that finds the store empty.
const REFILL_COUNT: usize = 8;

fn random_name(rng: &mut impl Rng) -> &'static str {
    NAMES.choose(rng).copied().unwrap_or("Arthur")
}

/// A multiple of 10 in `0..=1000`.
fn random_score(rng: &mut impl Rng) -> i64 {
    10 * rng.gen_range(0..=100)
}

fn player_fields(name: &str, score: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), json!(name));
    fields.insert("score".into(), json!(score));
    fields
}

fn score_fields(score: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("score".into(), json!(score));
    fields
}

/// Insert the demo players if the store is empty. Returns how many were added.
pub async fn seed_demo(players: &Players) -> Result<usize> {
    let inserted = players
        .write(|txn| {
            if txn.count()? > 0 {
                return Ok(0);
            }
            for (name, score) in DEMO_PLAYERS {
                txn.insert(player_fields(name, score))?;
            }
            Ok(DEMO_PLAYERS.len())
        })
        .await?;

    tracing::info!(inserted, "Demo players seeded");
    Ok(inserted)
}

/// Give every player a random score, in one transaction.
pub async fn randomize_scores(players: &Players) -> Result<usize> {
    let updated = players
        .write(|txn| {
            let mut rng = rand::thread_rng();
            let ids: Vec<RecordId> = txn.fetch_all()?.into_iter().map(|r| r.id).collect();
            for id in &ids {
                txn.update(*id, score_fields(random_score(&mut rng)))?;
            }
            Ok(ids.len())
        })
        .await?;

    tracing::debug!(updated, "Scores randomized");
    Ok(updated)
}

/// One stress job: refill an empty store, otherwise maybe insert a player,
/// maybe delete one, and re-score about half of them.
pub fn stress_step<T: StoreTransaction>(
    txn: &mut T,
    rng: &mut impl Rng,
) -> roster_engine::error::Result<()> {
    if txn.count()? == 0 {
        for _ in 0..REFILL_COUNT {
            txn.insert(player_fields(random_name(rng), random_score(rng)))?;
        }
        return Ok(());
    }

    if rng.gen_bool(0.5) {
        txn.insert(player_fields(random_name(rng), random_score(rng)))?;
    }

    if rng.gen_bool(0.5) {
        let all = txn.fetch_all()?;
        if let Some(victim) = all.choose(rng) {
            txn.delete(victim.id)?;
        }
    }

    for record in txn.fetch_all()? {
        if rng.gen_bool(0.5) {
            txn.update(record.id, score_fields(random_score(rng)))?;
        }
    }
    Ok(())
}

/// Spawn `jobs` concurrent stress jobs, each one write transaction.
pub fn spawn_stress(players: Arc<Players>, jobs: usize) -> Vec<JoinHandle<()>> {
    tracing::info!(jobs, "Starting stress test");

    (0..jobs)
        .map(|job| {
            let players = Arc::clone(&players);
            tokio::spawn(async move {
                let result = players
                    .write(|txn| stress_step(txn, &mut rand::thread_rng()))
                    .await;
                if let Err(e) = result {
                    tracing::warn!(job, error = %e, "Stress job failed");
                }
            })
        })
        .collect()
}
