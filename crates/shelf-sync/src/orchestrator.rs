//! Runs one entity unit across every location with per-location isolation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use shelf_core::{BatchId, LocationConfig, PhaseReport, SyncResult};
use tracing::{error, info, info_span, warn, Instrument};

use crate::cache_refresh::CacheRefreshReport;
use crate::units::EntitySyncUnit;

/// Outcome of a whole batch, phase by phase in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: BatchId,
    pub locations: usize,
    pub phases: Vec<PhaseReport>,
    pub cache: Option<CacheRefreshReport>,
}

impl BatchReport {
    pub fn errored(&self) -> usize {
        self.phases.iter().map(|p| p.errored).sum()
    }
}

/// Runs `unit` for each location and reduces the results.
///
/// With `concurrency > 1` up to that many locations are in flight at once; results still
/// come back in input order.
pub async fn run_phase(
    unit: &dyn EntitySyncUnit,
    locations: &[LocationConfig],
    concurrency: usize,
) -> PhaseReport {
    let started = Instant::now();
    let entity = unit.entity();
    let pending: Vec<_> = locations
        .iter()
        .map(|location| run_isolated(unit, location))
        .collect();
    let results: Vec<SyncResult> = futures::stream::iter(pending)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let report = PhaseReport::from_results(entity, results, started.elapsed());
    info!(
        entity = %entity,
        locations = report.results.len(),
        synced = report.synced,
        skipped = report.skipped,
        errored = report.errored,
        duration_ms = report.duration_ms,
        "phase finished"
    );
    for failed in report.failed_locations() {
        warn!(
            entity = %entity,
            location_id = %failed.location_id,
            error = failed.error.as_deref().unwrap_or_default(),
            "location failed in phase"
        );
    }
    report
}

async fn run_isolated(unit: &dyn EntitySyncUnit, location: &LocationConfig) -> SyncResult {
    let started = Instant::now();
    let entity = unit.entity();
    let span = info_span!("location_sync", entity = %entity, location_id = %location.id);
    let outcome = AssertUnwindSafe(unit.sync(location))
        .catch_unwind()
        .instrument(span)
        .await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(entity = %entity, location_id = %location.id, error = %format!("{err:#}"), "unit returned an error");
            SyncResult::failed(entity, &location.id, format!("{err:#}"))
                .with_duration(started.elapsed())
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(entity = %entity, location_id = %location.id, panic = %message, "unit panicked");
            SyncResult::failed(entity, &location.id, format!("panic: {message}"))
                .with_duration(started.elapsed())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
