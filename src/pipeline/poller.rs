//! Completion polling for submitted jobs.
//!
//! Jobs are swept at a fixed interval; each sweep queries only the jobs still
//! pending, so the pending set only ever shrinks. A sweep ends the loop once
//! it is empty. Per-job deadlines and a shutdown signal bound the wait.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::PollConfig;
use super::submitter::ClassificationJob;
use crate::metrics::MetricsCollector;
use crate::remote::{ClassificationService, JobHandle, RemoteState};
use crate::source::Tile;

/// Tracking state of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed { reason: String },
    /// Cancelled by the remote service.
    Cancelled,
    /// Still pending when its deadline passed.
    TimedOut,
    /// Polling stopped locally by shutdown or the run deadline. The remote
    /// job may still be running.
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    /// Terminal states the retry policy may resubmit. `Aborted` is not one
    /// of them: the remote job was never told to stop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed { .. } | TaskStatus::Cancelled | TaskStatus::TimedOut
        )
    }
}

impl From<RemoteState> for TaskStatus {
    fn from(state: RemoteState) -> Self {
        match state {
            RemoteState::Pending | RemoteState::Running => TaskStatus::Pending,
            RemoteState::Completed => TaskStatus::Completed,
            RemoteState::Failed(reason) => TaskStatus::Failed { reason },
            RemoteState::Cancelled => TaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { .. } => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::TimedOut => write!(f, "timed_out"),
            TaskStatus::Aborted => write!(f, "aborted"),
        }
    }
}

struct PendingJob {
    tile: Tile,
    handle: JobHandle,
    status_errors: u32,
}

pub struct TaskPoller {
    service: Arc<dyn ClassificationService>,
    config: PollConfig,
    shutdown: Option<watch::Receiver<bool>>,
    metrics: MetricsCollector,
}

impl TaskPoller {
    pub fn new(service: Arc<dyn ClassificationService>, config: PollConfig) -> Self {
        Self {
            service,
            config,
            shutdown: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Cancels polling once the channel holds `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Polls every job that has a handle until it is terminal; jobs without a
    /// handle are not part of the result. Never returns a `Pending` status.
    pub async fn poll_until_terminal(
        &self,
        jobs: &[ClassificationJob],
    ) -> BTreeMap<Tile, TaskStatus> {
        let started = Instant::now();
        let mut statuses = BTreeMap::new();
        let mut pending: Vec<PendingJob> = jobs
            .iter()
            .filter_map(|job| {
                job.handle().map(|handle| PendingJob {
                    tile: job.tile.clone(),
                    handle: handle.clone(),
                    status_errors: 0,
                })
            })
            .collect();
        let source = pending.first().map(|j| j.tile.source.to_string());
        let mut shutdown = self.shutdown.clone();
        let mut sweeps = 0u64;

        while !pending.is_empty() {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                self.cancel_all(&mut pending, &mut statuses);
                break;
            }

            sweeps += 1;
            let answers = futures::future::join_all(
                pending.iter().map(|job| self.service.status(&job.handle)),
            )
            .await;

            let mut still_pending = Vec::with_capacity(pending.len());
            for (mut job, answer) in pending.drain(..).zip(answers) {
                let next = match answer {
                    Ok(state) => {
                        job.status_errors = 0;
                        TaskStatus::from(state)
                    }
                    Err(e) => {
                        job.status_errors += 1;
                        warn!(
                            tile = %job.tile,
                            job = %job.handle,
                            errors = job.status_errors,
                            error = %e,
                            "Status query failed"
                        );
                        if job.status_errors >= self.config.max_status_errors {
                            TaskStatus::Failed {
                                reason: format!(
                                    "{} consecutive status errors, last: {}",
                                    job.status_errors, e
                                ),
                            }
                        } else {
                            TaskStatus::Pending
                        }
                    }
                };

                let next = match (next, self.config.job_timeout) {
                    (TaskStatus::Pending, Some(timeout)) if started.elapsed() >= timeout => {
                        TaskStatus::TimedOut
                    }
                    (next, _) => next,
                };

                if next.is_terminal() {
                    self.finish(job, next, &mut statuses);
                } else {
                    still_pending.push(job);
                }
            }
            pending = still_pending;

            if let Some(ref source) = source {
                self.metrics.record_sweep(source, pending.len());
            }
            debug!(sweep = sweeps, pending = pending.len(), "Poll sweep finished");
            if pending.is_empty() {
                break;
            }

            let cancelled = match shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.interval) => false,
                        _ = wait_for_shutdown(rx) => true,
                    }
                }
                None => {
                    tokio::time::sleep(self.config.interval).await;
                    false
                }
            };
            if cancelled {
                self.cancel_all(&mut pending, &mut statuses);
                break;
            }
        }

        if let Some(source) = source {
            let completed = statuses
                .values()
                .filter(|s| **s == TaskStatus::Completed)
                .count();
            info!(
                source = %source,
                jobs = statuses.len(),
                completed = completed,
                sweeps = sweeps,
                elapsed_secs = started.elapsed().as_secs(),
                "All jobs terminal"
            );
        }
        statuses
    }

    fn finish(&self, job: PendingJob, status: TaskStatus, statuses: &mut BTreeMap<Tile, TaskStatus>) {
        match status {
            TaskStatus::Completed => {
                debug!(tile = %job.tile, job = %job.handle, "Job completed")
            }
            ref other => warn!(tile = %job.tile, job = %job.handle, status = ?other, "Job did not complete"),
        }
        self.metrics
            .record_job(&job.tile.source.to_string(), &status.to_string());
        statuses.insert(job.tile, status);
    }

    fn cancel_all(&self, pending: &mut Vec<PendingJob>, statuses: &mut BTreeMap<Tile, TaskStatus>) {
        warn!(jobs = pending.len(), "Shutdown requested, abandoning pending jobs");
        for job in pending.drain(..) {
            self.finish(job, TaskStatus::Aborted, statuses);
        }
    }
}

/// Resolves once the channel holds `true`. Pends forever if the sender is
/// gone without signalling.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::submitter::{JobOutcome, JobSubmitter, SubmitParams};
    use crate::pipeline::testing::{ScriptedService, TileScript};
    use crate::source::{DateWindow, RunLabel, SourceKind, TileKey, TrainingLabels};
    use std::time::Duration;

    fn tile(path: u16) -> Tile {
        Tile::new(SourceKind::Landsat, TileKey::path_row(path, 33))
    }

    fn submitted(path: u16) -> ClassificationJob {
        ClassificationJob {
            tile: tile(path),
            outcome: JobOutcome::Submitted(JobHandle::new(format!("{}_33#{}", path, 0))),
            attempts: 1,
        }
    }

    async fn service_with(scripts: Vec<(u16, TileScript)>) -> (Arc<ScriptedService>, Vec<ClassificationJob>) {
        let mut service = ScriptedService::new();
        for (path, script) in scripts.iter().cloned() {
            service = service.with_tile(TileKey::path_row(path, 33), script);
        }
        let service = Arc::new(service);
        let submitter = JobSubmitter::new(service.clone(), 1);
        let params = SubmitParams {
            window: DateWindow::catalog_reference(2025).unwrap(),
            cloud_cover: 10.0,
            labels: TrainingLabels::new(2025, 7).unwrap(),
            label: RunLabel::new(2025, 6).unwrap(),
            export_folder: "f".to_string(),
            scale: 10,
            crs: "EPSG:5070".to_string(),
        };
        let tiles: Vec<Tile> = scripts.iter().map(|(p, _)| tile(*p)).collect();
        let (jobs, _) = submitter.submit_all(&tiles, &params).await;
        (service, jobs)
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(30),
            job_timeout: None,
            max_status_errors: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_jobs_reach_terminal_state() {
        let (service, jobs) = service_with(vec![
            (18, TileScript::completes()),
            (
                19,
                TileScript::completes().with_states(vec![
                    Ok(RemoteState::Pending),
                    Ok(RemoteState::Running),
                    Ok(RemoteState::Failed("out of memory".into())),
                ]),
            ),
            (20, TileScript::completes().with_states(vec![Ok(RemoteState::Cancelled)])),
        ])
        .await;

        let poller = TaskPoller::new(service, fast_config());
        let statuses = poller.poll_until_terminal(&jobs).await;

        assert_eq!(statuses.len(), 3);
        assert!(statuses.values().all(|s| s.is_terminal()));
        assert_eq!(statuses[&tile(18)], TaskStatus::Completed);
        assert_eq!(
            statuses[&tile(19)],
            TaskStatus::Failed {
                reason: "out of memory".into()
            }
        );
        assert_eq!(statuses[&tile(20)], TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_wait_for_interval() {
        let (service, jobs) = service_with(vec![(
            18,
            TileScript::completes().with_states(vec![
                Ok(RemoteState::Running),
                Ok(RemoteState::Running),
                Ok(RemoteState::Completed),
            ]),
        )])
        .await;

        let started = Instant::now();
        let statuses = TaskPoller::new(service, fast_config())
            .poll_until_terminal(&jobs)
            .await;
        assert_eq!(statuses[&tile(18)], TaskStatus::Completed);
        // Three sweeps, two sleeps between them.
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_jobs_are_not_polled() {
        let (service, jobs) = service_with(vec![
            (18, TileScript::single_class()),
            (19, TileScript::empty_geometry()),
        ])
        .await;
        assert!(jobs.iter().all(|j| j.handle().is_none()));

        let statuses = TaskPoller::new(service, fast_config())
            .poll_until_terminal(&jobs)
            .await;
        assert!(statuses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout() {
        let (service, jobs) = service_with(vec![(
            18,
            TileScript::completes().with_states(vec![Ok(RemoteState::Running)]),
        )])
        .await;

        let config = PollConfig {
            job_timeout: Some(Duration::from_secs(300)),
            ..fast_config()
        };
        let statuses = TaskPoller::new(service, config).poll_until_terminal(&jobs).await;
        assert_eq!(statuses[&tile(18)], TaskStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_status_errors_are_tolerated() {
        let (service, jobs) = service_with(vec![(
            18,
            TileScript::completes().with_states(vec![
                Err("503".into()),
                Err("503".into()),
                Ok(RemoteState::Completed),
            ]),
        )])
        .await;

        let statuses = TaskPoller::new(service, fast_config())
            .poll_until_terminal(&jobs)
            .await;
        assert_eq!(statuses[&tile(18)], TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_status_errors_fail_job() {
        let (service, jobs) = service_with(vec![(
            18,
            TileScript::completes().with_states(vec![Err("connection reset".into())]),
        )])
        .await;

        let statuses = TaskPoller::new(service, fast_config())
            .poll_until_terminal(&jobs)
            .await;
        assert!(
            matches!(statuses[&tile(18)], TaskStatus::Failed { ref reason } if reason.contains("3 consecutive"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_handle_fails_after_retries() {
        let service = Arc::new(ScriptedService::new());
        let statuses = TaskPoller::new(service, fast_config())
            .poll_until_terminal(&[submitted(18)])
            .await;
        assert!(matches!(statuses[&tile(18)], TaskStatus::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending_jobs() {
        let (service, jobs) = service_with(vec![(
            18,
            TileScript::completes().with_states(vec![Ok(RemoteState::Running)]),
        )])
        .await;

        let (tx, rx) = watch::channel(false);
        let poller = TaskPoller::new(service, fast_config()).with_shutdown(rx);
        let handle = tokio::spawn(async move { poller.poll_until_terminal(&jobs).await });

        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();
        let statuses = handle.await.unwrap();
        assert_eq!(statuses[&tile(18)], TaskStatus::Aborted);
    }

    #[test]
    fn test_status_retryable() {
        assert!(!TaskStatus::Completed.is_retryable());
        assert!(TaskStatus::TimedOut.is_retryable());
        assert!(TaskStatus::Cancelled.is_retryable());
        assert!(!TaskStatus::Aborted.is_retryable());
        assert!(TaskStatus::Aborted.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert_eq!(TaskStatus::TimedOut.to_string(), "timed_out");
    }
}
