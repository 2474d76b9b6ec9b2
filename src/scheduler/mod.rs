//! Trigger table and job runner.
//!
//! Each trigger fires a stateless job on a fixed cadence. A job runs under a
//! wall-clock budget; timeout or failure is logged and reported, and the next
//! tick simply tries again.

pub mod jobs;

pub use jobs::JobContext;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::error::{Result, TiplineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Refresh fixtures for the round being tipped.
    FixtureSync,
    /// Refresh the entire season's fixtures.
    FixtureResync,
    /// Request predictions and submit official tips.
    Tip,
    /// Backfill results and prediction correctness.
    ResultSync,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FixtureSync => "fixture_sync",
            JobKind::FixtureResync => "fixture_resync",
            JobKind::Tip => "tip",
            JobKind::ResultSync => "result_sync",
        }
    }
}

/// One row of the trigger table.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: &'static str,
    pub cadence: Duration,
    pub kind: JobKind,
    /// Model names passed to prediction-requesting jobs.
    pub ml_models: Vec<String>,
}

/// Build the trigger table from the schedule configuration.
pub fn trigger_table(schedule: &ScheduleConfig) -> Vec<Trigger> {
    let hours = |h: u64| Duration::from_secs(h * 3600);

    vec![
        Trigger {
            id: "fixture_sync",
            cadence: hours(schedule.fixture_sync_interval_hours),
            kind: JobKind::FixtureSync,
            ml_models: vec![],
        },
        Trigger {
            id: "fixture_resync",
            cadence: hours(schedule.fixture_sync_interval_hours),
            kind: JobKind::FixtureResync,
            ml_models: vec![],
        },
        Trigger {
            id: "tip",
            cadence: hours(schedule.prediction_interval_hours),
            kind: JobKind::Tip,
            ml_models: schedule.prediction_models.clone(),
        },
        Trigger {
            id: "result_sync",
            cadence: hours(schedule.result_sync_interval_hours),
            kind: JobKind::ResultSync,
            ml_models: vec![],
        },
    ]
}

pub struct Scheduler {
    context: Arc<JobContext>,
    triggers: Vec<Trigger>,
    job_budget: Duration,
}

impl Scheduler {
    pub fn new(context: Arc<JobContext>) -> Self {
        let schedule = &context.config.schedule;
        let triggers = trigger_table(schedule);
        let job_budget = Duration::from_secs(schedule.job_budget_secs);

        Self {
            context,
            triggers,
            job_budget,
        }
    }

    /// Run one trigger's job to completion under the time budget.
    pub async fn run_trigger(context: &JobContext, trigger: &Trigger, budget: Duration) -> Result<()> {
        let run_id = Uuid::new_v4();
        info!(job = trigger.id, %run_id, "job starting");

        let job = async {
            match trigger.kind {
                JobKind::FixtureSync => context.fixture_sync(false).await.map(|_| ()),
                JobKind::FixtureResync => context.fixture_sync(true).await.map(|_| ()),
                JobKind::Tip => context.tip(&trigger.ml_models).await,
                JobKind::ResultSync => context.result_sync().await.map(|_| ()),
            }
        };

        let outcome = match timeout(budget, job).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TiplineError::JobTimeout(format!(
                "{} exceeded {}s",
                trigger.id,
                budget.as_secs()
            ))),
        };

        match outcome {
            Ok(()) => {
                info!(job = trigger.id, %run_id, "job finished");
                Ok(())
            }
            Err(e) => {
                error!(job = trigger.id, %run_id, "job failed: {e}");
                if let Some(reporter) = &context.reporter {
                    reporter
                        .report_job_failure(trigger.id, &run_id.to_string(), &e.to_string())
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Run all triggers on their cadences until the process is stopped.
    ///
    /// Job failures never escape their tick.
    pub async fn run(self) {
        let mut handles = Vec::new();

        for trigger in self.triggers {
            let context = self.context.clone();
            let budget = self.job_budget;

            handles.push(tokio::spawn(async move {
                let mut ticker = interval(trigger.cadence);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick fires immediately; skip it so a restart
                // doesn't rerun every job at once.
                ticker.tick().await;

                loop {
                    ticker.tick().await;
                    let _ = Self::run_trigger(&context, &trigger, budget).await;
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
