//! Interval and daily triggers on top of `tokio-cron-scheduler`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use shelf_core::LocationConfig;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::pipeline::SyncPipeline;

const DAILY_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Once-per-calendar-day trigger at or after a local hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyGate {
    hour: u32,
    last_run: Option<NaiveDate>,
}

impl DailyGate {
    pub fn new(hour: u32) -> Self {
        Self {
            hour: hour.min(23),
            last_run: None,
        }
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now.hour() >= self.hour && self.last_run != Some(now.date())
    }

    pub fn mark_ran(&mut self, now: NaiveDateTime) {
        self.last_run = Some(now.date());
    }

    /// A run before the daily hour does not count for the day.
    pub fn record_startup_run(&mut self, now: NaiveDateTime) {
        if now.hour() >= self.hour {
            self.mark_ran(now);
        }
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }
}

pub struct BatchScheduler {
    pipeline: Arc<SyncPipeline>,
    interval: Duration,
    gate: Arc<Mutex<DailyGate>>,
}

impl BatchScheduler {
    pub fn new(pipeline: Arc<SyncPipeline>, interval: Duration, daily_hour: u32) -> Self {
        Self {
            pipeline,
            interval,
            gate: Arc::new(Mutex::new(DailyGate::new(daily_hour))),
        }
    }

    /// Both batches once over the locations startup just resolved.
    pub async fn run_startup(&self, locations: &[LocationConfig]) {
        self.pipeline.run_interval_batch_for(locations.to_vec()).await;
        self.pipeline.run_daily_batch_for(locations.to_vec()).await;
        self.gate
            .lock()
            .await
            .record_startup_run(Local::now().naive_local());
    }

    pub async fn start(&self) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let pipeline = self.pipeline.clone();
        let interval_job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.try_run_interval_batch().await;
            })
        })
        .context("creating interval job")?;
        sched.add(interval_job).await.context("adding interval job")?;

        let pipeline = self.pipeline.clone();
        let gate = self.gate.clone();
        let daily_job = Job::new_repeated_async(DAILY_CHECK_PERIOD, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            let gate = gate.clone();
            Box::pin(async move {
                run_daily_if_due(&pipeline, &gate, Local::now().naive_local()).await;
            })
        })
        .context("creating daily check job")?;
        sched.add(daily_job).await.context("adding daily check job")?;

        sched.start().await.context("starting scheduler")?;
        info!(
            interval_secs = self.interval.as_secs(),
            daily_hour = self.gate.lock().await.hour,
            "scheduler started"
        );
        Ok(sched)
    }
}

/// Runs the daily batch when the gate is open and no other batch is in flight. The gate
/// is only marked when the batch actually ran, so a busy check retries next minute.
pub async fn run_daily_if_due(
    pipeline: &SyncPipeline,
    gate: &Mutex<DailyGate>,
    now: NaiveDateTime,
) -> bool {
    let mut gate = gate.lock().await;
    if !gate.is_due(now) {
        return false;
    }
    if pipeline.try_run_daily_batch().await.is_none() {
        return false;
    }
    gate.mark_ran(now);
    true
}
