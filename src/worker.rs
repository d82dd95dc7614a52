/*!
 * Background queue processing.
 *
 * The queue is the `intakes` table itself: due rows are claimed in a
 * transaction and run through the controller with bounded concurrency.
 */

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::app_config::WorkerConfig;
use crate::app_controller::Controller;
use crate::database::models::{format_timestamp, IntakeStatus};

/// Claims older than this are considered abandoned by a crashed worker
const STALE_CLAIM_SECS: i64 = 30 * 60;

/// What one polling round did
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub released: usize,
    pub processed: Vec<(String, IntakeStatus)>,
    pub errors: usize,
}

impl WorkerReport {
    pub fn is_idle(&self) -> bool {
        self.processed.is_empty() && self.errors == 0
    }
}

/// Queue worker over a shared controller
#[derive(Debug, Clone)]
pub struct Worker {
    controller: Arc<Controller>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(controller: Arc<Controller>) -> Self {
        let config = controller.config().worker.clone();
        Self { controller, config }
    }

    /// Claim one batch of due intakes and process it
    pub async fn run_once(&self) -> Result<WorkerReport> {
        let cutoff = format_timestamp(Utc::now() - chrono::Duration::seconds(STALE_CLAIM_SECS));
        let repo = self.controller.repository();
        let released = repo.release_stale_claims(cutoff).await?;
        if released > 0 {
            warn!("Released {} stale claim(s)", released);
        }

        let claimed = repo.claim_due_intakes(self.config.batch_size).await?;
        if claimed.is_empty() {
            debug!("No due intakes");
            return Ok(WorkerReport { released, ..WorkerReport::default() });
        }
        info!("Processing {} claimed intake(s)", claimed.len());

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let results = stream::iter(claimed)
            .map(|intake| {
                let controller = self.controller.clone();
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await?;
                    let id = intake.id.clone();
                    let result = controller.process_record(intake).await;
                    Ok::<_, anyhow::Error>((id, result))
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = WorkerReport { released, ..WorkerReport::default() };
        for result in results {
            match result {
                Ok((id, Ok(status))) => report.processed.push((id, status)),
                Ok((id, Err(e))) => {
                    error!("Intake {} failed: {:#}", id, e);
                    report.errors += 1;
                }
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Poll until ctrl-c
    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!(
            "Worker started (concurrency {}, polling every {}s)",
            self.config.concurrency, self.config.poll_interval_secs
        );

        loop {
            let report = match self.run_once().await {
                Ok(report) => report,
                Err(e) => {
                    error!("Worker round failed: {:#}", e);
                    WorkerReport::default()
                }
            };

            // A full batch means more work is probably waiting
            let wait = if report.processed.len() + report.errors >= self.config.batch_size {
                Duration::ZERO
            } else {
                interval
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested, worker stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Re-queue an intake for the next round
    pub async fn retry(&self, intake_id: &str) -> Result<IntakeStatus> {
        self.controller.retry(intake_id).await
    }
}
