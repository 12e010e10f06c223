use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{StoreError, Transition};
use crate::models::event::UploadStatusEvent;
use crate::models::job::UploadJob;
use crate::models::photo::PhotoStatus;

/// Outcome of one stalled-upload sweep.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    pub objects_deleted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalledStats {
    pub stalled_count: i64,
    pub threshold_minutes: u64,
    pub cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("A stalled-upload sweep is already running")]
    AlreadyRunning,

    #[error("Failed to query stalled uploads: {0}")]
    Store(#[from] StoreError),
}

/// Message recorded on photos failed by the sweep.
pub fn reclaim_message(threshold: Duration) -> String {
    format!(
        "Upload automatically failed after exceeding {} minute threshold",
        threshold.as_secs() / 60
    )
}

/// Oldest attempt start that is still considered live. `None` when the
/// threshold reaches past the representable time range.
fn stalled_cutoff(now: DateTime<Utc>, threshold: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|threshold| now.checked_sub_signed(threshold))
}

/// Fail every photo stuck in `UPLOADING` past the stalled threshold.
///
/// Photos are handled one at a time; an error on one is logged and counted
/// and the sweep moves on. Only one sweep runs at a time.
pub async fn sweep(state: &AppState) -> Result<SweepReport, SweepError> {
    let _guard = state
        .sweep_lock
        .try_lock()
        .map_err(|_| SweepError::AlreadyRunning)?;

    let threshold = state.settings.stalled_threshold;
    let Some(cutoff) = stalled_cutoff(Utc::now(), threshold) else {
        return Ok(SweepReport::default());
    };

    let stalled = state
        .store
        .find_by_status_and_created_before(PhotoStatus::Uploading, cutoff)
        .await?;

    let mut report = SweepReport {
        scanned: stalled.len(),
        ..SweepReport::default()
    };
    if stalled.is_empty() {
        debug!("No stalled uploads found");
        return Ok(report);
    }

    info!(count = stalled.len(), cutoff = %cutoff, "Reclaiming stalled uploads");
    let message = reclaim_message(threshold);
    // Latest snapshot of every job touched in this sweep.
    let mut jobs: HashMap<Uuid, UploadJob> = HashMap::new();

    for photo in stalled {
        let outcome = {
            let _job_guard = state.broadcaster.lock_job_of(photo.job_id).await;
            let outcome = state
                .store
                .mark_photo_failed(photo.id, &message, Utc::now())
                .await;
            if let Ok(Transition::Applied {
                photo: failed,
                job: Some(job),
            }) = &outcome
            {
                let event = UploadStatusEvent::photo_failed(job, failed, &message);
                if state.broadcaster.emit_transition(job, event) {
                    state.broadcaster.close_all_connections(job.id);
                }
            }
            outcome
        };

        match outcome {
            Ok(Transition::Applied { photo, job }) => {
                report.reclaimed += 1;
                metrics::counter!("stalled_uploads_reclaimed_total").increment(1);
                info!(
                    photo_id = %photo.id,
                    job_id = ?photo.job_id,
                    object_key = %photo.object_key,
                    "Stalled upload marked as failed"
                );

                if delete_leftover_object(state, &photo.object_key).await {
                    report.objects_deleted += 1;
                }
                if let Some(job) = job {
                    jobs.insert(job.id, job);
                }
            }
            Ok(Transition::Skipped(current)) => {
                debug!(
                    photo_id = %current.id,
                    status = %current.status,
                    "Photo settled before it could be reclaimed"
                );
            }
            Ok(Transition::NotFound) => {
                debug!(photo_id = %photo.id, "Stalled photo disappeared");
            }
            Err(e) => {
                report.errors += 1;
                error!(photo_id = %photo.id, error = %e, "Failed to reclaim stalled upload");
            }
        }
    }

    info!(
        scanned = report.scanned,
        reclaimed = report.reclaimed,
        jobs_touched = jobs.len(),
        jobs_settled = jobs.values().filter(|job| job.is_terminal()).count(),
        objects_deleted = report.objects_deleted,
        errors = report.errors,
        "Stalled upload sweep finished"
    );
    Ok(report)
}

/// Remove a partially written object. Returns whether anything was deleted.
async fn delete_leftover_object(state: &AppState, object_key: &str) -> bool {
    match state.storage.exists(object_key).await {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            debug!(object_key, error = %e, "Could not check for leftover object");
            return false;
        }
    }

    match state.storage.delete(object_key).await {
        Ok(deleted) => deleted,
        Err(e) => {
            debug!(object_key, error = %e, "Could not delete leftover object");
            false
        }
    }
}

/// Number of photos the next sweep would reclaim.
pub async fn stalled_stats(state: &AppState) -> Result<StalledStats, StoreError> {
    let threshold = state.settings.stalled_threshold;
    let cutoff = stalled_cutoff(Utc::now(), threshold);
    let stalled_count = match cutoff {
        Some(cutoff) => {
            state
                .store
                .count_by_status_and_created_before(PhotoStatus::Uploading, cutoff)
                .await?
        }
        None => 0,
    };

    Ok(StalledStats {
        stalled_count,
        threshold_minutes: threshold.as_secs() / 60,
        cutoff,
    })
}

/// Sweep on a fixed interval until cancelled.
///
/// Sweeps run inline, so a slow sweep delays the next tick instead of
/// overlapping it.
pub async fn run(state: AppState, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(state.settings.reclaim_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_secs = state.settings.reclaim_interval.as_secs(),
        threshold_secs = state.settings.stalled_threshold.as_secs(),
        "Stalled upload reclaimer started"
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Stalled upload reclaimer stopped");
                break;
            },
            _ = ticker.tick() => {
                match sweep(&state).await {
                    Ok(_) => {}
                    Err(SweepError::AlreadyRunning) => {
                        warn!("Skipping tick, a sweep is already running");
                    }
                    Err(e) => {
                        error!(error = %e, "Stalled upload sweep failed");
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclaim_message_uses_whole_minutes() {
        assert_eq!(
            reclaim_message(Duration::from_secs(600)),
            "Upload automatically failed after exceeding 10 minute threshold"
        );
        assert_eq!(
            reclaim_message(Duration::from_secs(1230)),
            "Upload automatically failed after exceeding 20 minute threshold"
        );
    }

    #[test]
    fn test_cutoff_is_threshold_before_now() {
        let now = Utc::now();
        let cutoff = stalled_cutoff(now, Duration::from_secs(600)).unwrap();
        assert_eq!(now - cutoff, chrono::Duration::minutes(10));
    }

    #[test]
    fn test_cutoff_out_of_range() {
        assert!(stalled_cutoff(Utc::now(), Duration::from_secs(u64::MAX)).is_none());
    }
}
