use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::ml::Frequency;
use crate::services::forecasting::{ForecastingService, GenerationReport};

/// Finished jobs kept for status lookups before the oldest are evicted
const MAX_RETAINED_JOBS: usize = 500;
/// Jobs allowed to run at once; further submissions are rejected
const MAX_RUNNING_JOBS: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed {
        summary: String,
        report: GenerationReport,
    },
    Failed {
        error: String,
    },
}

/// A background forecast generation run
#[derive(Debug, Clone, Serialize)]
pub struct ForecastJob {
    pub job_id: Uuid,
    pub product_ids: Option<Vec<i32>>,
    pub periods: u32,
    pub frequency: Frequency,
    #[serde(flatten)]
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ForecastJob {
    pub fn is_finished(&self) -> bool {
        !matches!(self.state, JobState::Running)
    }
}

/// In-memory registry of generation jobs started over HTTP
#[derive(Debug, Default)]
pub struct ForecastJobRegistry {
    jobs: DashMap<Uuid, ForecastJob>,
    running: AtomicUsize,
}

impl ForecastJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &Uuid) -> Option<ForecastJob> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn register(
        &self,
        product_ids: Option<Vec<i32>>,
        periods: u32,
        frequency: Frequency,
    ) -> Result<Uuid, ServiceError> {
        if self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_RUNNING_JOBS).then_some(n + 1)
            })
            .is_err()
        {
            warn!(limit = MAX_RUNNING_JOBS, "Forecast job rejected, too many running");
            return Err(ServiceError::ServiceUnavailable(format!(
                "{} forecast jobs are already running, retry later",
                MAX_RUNNING_JOBS
            )));
        }
        self.evict_finished();

        let job_id = Uuid::new_v4();
        self.jobs.insert(
            job_id,
            ForecastJob {
                job_id,
                product_ids,
                periods,
                frequency,
                state: JobState::Running,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );
        Ok(job_id)
    }

    fn finish(&self, job_id: Uuid, state: JobState) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            if !job.is_finished() {
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
            job.state = state;
            job.finished_at = Some(Utc::now());
        }
    }

    fn evict_finished(&self) {
        if self.jobs.len() < MAX_RETAINED_JOBS {
            return;
        }
        let mut finished: Vec<(Uuid, DateTime<Utc>)> = self
            .jobs
            .iter()
            .filter_map(|entry| entry.finished_at.map(|at| (entry.job_id, at)))
            .collect();
        finished.sort_by_key(|(_, at)| *at);

        let excess = self.jobs.len() + 1 - MAX_RETAINED_JOBS;
        for (job_id, _) in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
        }
    }

    /// Registers a job and runs the generation on a background task.
    /// Returns the job id immediately, or `ServiceUnavailable` when the
    /// running limit is reached.
    pub fn submit(
        self: &Arc<Self>,
        service: Arc<ForecastingService>,
        product_ids: Option<Vec<i32>>,
        periods: u32,
        frequency: Frequency,
    ) -> Result<Uuid, ServiceError> {
        let job_id = self.register(product_ids.clone(), periods, frequency)?;
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            info!(%job_id, periods, %frequency, "Forecast job started");
            let state = match service
                .generate_and_persist(product_ids, periods, frequency)
                .await
            {
                Ok(report) => {
                    info!(%job_id, summary = %report.summary(), "Forecast job completed");
                    JobState::Completed {
                        summary: report.summary(),
                        report,
                    }
                }
                Err(e) => {
                    error!(%job_id, error = %e, "Forecast job failed");
                    JobState::Failed {
                        error: e.to_string(),
                    }
                }
            };
            registry.finish(job_id, state);
        });

        Ok(job_id)
    }
}
