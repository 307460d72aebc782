//! Concurrent stress check.
//!
//! Workers insert disjoint job ranges, race to insert a shared set of ids, and
//! race to claim a shared pool of child ids. Afterwards every shared id must
//! have exactly one winner and the registry must verify cleanly.

use super::Registry;
use anyhow::{Result, anyhow, bail, ensure};
use jobman_core::SimpleJob;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Ids every worker tries to insert.
const CONTESTED_IDS: u64 = 16;

/// Child ids every worker tries to claim.
const CHILD_POOL: u64 = 64;
const CHILD_BASE: u64 = 1 << 32;

#[derive(Debug, Default)]
struct WorkerStats {
    inserted: u64,
    contested_wins: Vec<u64>,
    links: u64,
}

fn work(registry: &Registry, worker: u64, workers: u64, jobs: u64) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();

    for id in (1..=jobs).filter(|id| id % workers == worker) {
        registry.insert(id, SimpleJob::shared(id), 0)?;
        stats.inserted += 1;

        match registry.assign_child_id(id, CHILD_BASE + id % CHILD_POOL) {
            Ok(()) => stats.links += 1,
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e.into()),
        }
    }

    for id in jobs + 1..=jobs + CONTESTED_IDS {
        match registry.insert(id, SimpleJob::shared(id), 0) {
            Ok(()) => stats.contested_wins.push(id),
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(stats)
}

pub async fn stress(jobs: u64, workers: u64) -> Result<()> {
    ensure!(workers > 0, "at least one worker is required");
    let last_id = jobs
        .checked_add(CONTESTED_IDS)
        .filter(|id| *id < CHILD_BASE)
        .ok_or_else(|| anyhow!("{} jobs is more than the stress run supports", jobs))?;

    let registry = Arc::new(Registry::new());
    let started = Instant::now();
    info!(jobs, workers, "Starting stress run");

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { work(&registry, worker, workers, jobs) })
        })
        .collect();

    let mut inserted = 0;
    let mut links = 0;
    let mut winners = Vec::new();
    for handle in handles {
        let stats = handle.await??;
        inserted += stats.inserted;
        links += stats.links;
        winners.extend(stats.contested_wins);
    }
    winners.sort_unstable();

    let expected_winners: Vec<u64> = (jobs + 1..=last_id).collect();
    if winners != expected_winners {
        bail!("contested ids did not have exactly one winner each: {:?}", winners);
    }
    ensure!(inserted == jobs, "inserted {} of {} jobs", inserted, jobs);
    ensure!(
        registry.len() as u64 == last_id,
        "registry holds {} jobs, expected {}",
        registry.len(),
        last_id
    );
    ensure!(
        links == jobs.min(CHILD_POOL) && registry.links().len() as u64 == links,
        "{} links recorded, expected {}",
        registry.links().len(),
        jobs.min(CHILD_POOL)
    );
    registry.verify()?;

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Stress run passed");
    println!(
        "{} jobs, {} contested ids, {} links across {} workers: ok",
        registry.len(),
        CONTESTED_IDS,
        links,
        workers
    );
    Ok(())
}
