use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::event::UploadStatusEvent;
use crate::models::job::UploadJob;

/// Events buffered per subscriber before it is treated as too slow.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Per-job fan-out of status events to live subscribers.
///
/// Each subscriber owns a bounded channel. Emitting never waits on a
/// subscriber: a full or closed channel drops that subscriber and leaves the
/// others untouched.
#[derive(Default)]
pub struct StatusBroadcaster {
    connections: DashMap<Uuid, HashMap<String, mpsc::Sender<UploadStatusEvent>>>,
    /// Serializes transition-then-emit per job.
    job_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Exclusive right to change and announce one job's state.
///
/// Hold it from the store transition until its events are emitted, so
/// subscribers see a job's events in the order the transitions committed.
pub struct JobEmitGuard<'a> {
    broadcaster: &'a StatusBroadcaster,
    job_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for JobEmitGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the registry holds it now: nobody is waiting.
        self.broadcaster
            .job_locks
            .remove_if(&self.job_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a job's transitions and events.
    pub async fn lock_job(&self, job_id: Uuid) -> JobEmitGuard<'_> {
        let lock = self.job_locks.entry(job_id).or_default().clone();
        let guard = lock.lock_owned().await;
        JobEmitGuard {
            broadcaster: self,
            job_id,
            guard: Some(guard),
        }
    }

    /// Lock the photo's job, if it has one.
    pub async fn lock_job_of(&self, job_id: Option<Uuid>) -> Option<JobEmitGuard<'_>> {
        match job_id {
            Some(job_id) => Some(self.lock_job(job_id).await),
            None => None,
        }
    }

    /// Register a subscriber for a job and return its event stream.
    ///
    /// Re-using a `connection_id` replaces the earlier subscriber, whose
    /// stream then ends.
    pub fn create_connection(
        &self,
        job_id: Uuid,
        connection_id: &str,
    ) -> mpsc::Receiver<UploadStatusEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        // Cannot fail: the receiver is still in hand and the buffer is empty.
        let _ = tx.try_send(UploadStatusEvent::connected(job_id));

        let replaced = self
            .connections
            .entry(job_id)
            .or_default()
            .insert(connection_id.to_string(), tx)
            .is_some();

        if replaced {
            info!(job_id = %job_id, connection_id, "Replaced existing status subscriber");
        } else {
            info!(job_id = %job_id, connection_id, "Status subscriber connected");
        }
        self.record_gauge();
        rx
    }

    /// Push an event to every live subscriber of a job.
    pub fn emit_event(&self, job_id: Uuid, event: &UploadStatusEvent) {
        let emptied = match self.connections.get_mut(&job_id) {
            None => {
                debug!(job_id = %job_id, "No active subscribers for job");
                return;
            }
            Some(mut subscribers) => {
                debug!(
                    job_id = %job_id,
                    subscribers = subscribers.len(),
                    event_type = ?event.event_type,
                    "Emitting status event"
                );
                subscribers.retain(|connection_id, tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!(job_id = %job_id, connection_id = %connection_id, "Subscriber too slow, dropping");
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(job_id = %job_id, connection_id = %connection_id, "Subscriber gone, removing");
                        false
                    }
                });
                subscribers.is_empty()
            }
        };

        if emptied {
            self.connections.remove_if(&job_id, |_, subscribers| subscribers.is_empty());
        }
        self.record_gauge();
    }

    /// Emit the events that follow a photo transition: the photo event, then
    /// `job_completed` once the job has settled.
    ///
    /// Returns whether the job is now terminal.
    pub fn emit_transition(&self, job: &UploadJob, photo_event: UploadStatusEvent) -> bool {
        self.emit_event(job.id, &photo_event);
        if job.is_terminal() {
            self.emit_event(job.id, &UploadStatusEvent::job_completed(job));
            return true;
        }
        false
    }

    /// Drop every subscriber of a job; their streams end. Idempotent.
    pub fn close_all_connections(&self, job_id: Uuid) {
        if let Some((_, subscribers)) = self.connections.remove(&job_id) {
            info!(job_id = %job_id, count = subscribers.len(), "Closing status subscribers");
        }
        self.record_gauge();
    }

    /// Drop all subscribers of all jobs, e.g. on shutdown.
    pub fn close_everything(&self) {
        let total = self.total_connections();
        self.connections.clear();
        info!(count = total, "Closed all status subscribers");
        self.record_gauge();
    }

    /// Live subscribers for a job. Subscribers whose stream has been dropped
    /// are not counted.
    pub fn connection_count(&self, job_id: Uuid) -> usize {
        self.connections
            .get(&job_id)
            .map(|subscribers| subscribers.values().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn total_connections(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    fn record_gauge(&self) {
        metrics::gauge!("upload_status_subscribers").set(self.total_connections() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::StatusEventType;

    #[tokio::test]
    async fn test_subscriber_receives_connected_event_first() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        let mut rx = broadcaster.create_connection(job_id, "c1");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, StatusEventType::Connected);
        assert_eq!(first.job_id, job_id);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_prior_subscriber() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        let mut old = broadcaster.create_connection(job_id, "c1");
        let mut new = broadcaster.create_connection(job_id, "c1");

        assert_eq!(broadcaster.connection_count(job_id), 1);

        // Old stream drains its buffered connected event, then ends.
        assert!(old.recv().await.is_some());
        assert!(old.recv().await.is_none());
        assert!(new.recv().await.is_some());
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        broadcaster.emit_event(job_id, &UploadStatusEvent::connected(job_id));
        assert_eq!(broadcaster.connection_count(job_id), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_removed_on_emit() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        let rx = broadcaster.create_connection(job_id, "gone");
        let mut live = broadcaster.create_connection(job_id, "live");
        drop(rx);

        broadcaster.emit_event(job_id, &UploadStatusEvent::connected(job_id));

        assert_eq!(broadcaster.connection_count(job_id), 1);
        assert!(live.recv().await.is_some());
        assert!(live.recv().await.is_some());
    }

    #[test]
    fn test_slow_subscriber_evicted() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        let _rx = broadcaster.create_connection(job_id, "slow");

        for _ in 0..SUBSCRIBER_BUFFER {
            broadcaster.emit_event(job_id, &UploadStatusEvent::connected(job_id));
        }

        assert_eq!(broadcaster.connection_count(job_id), 0);
    }

    #[tokio::test]
    async fn test_job_lock_serializes_and_is_released() {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let job_id = Uuid::new_v4();

        let first = broadcaster.lock_job(job_id).await;
        let waiter = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                let _second = broadcaster.lock_job(job_id).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert!(broadcaster.job_locks.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let broadcaster = StatusBroadcaster::new();
        let job_id = Uuid::new_v4();
        let mut rx = broadcaster.create_connection(job_id, "c1");
        rx.recv().await.unwrap();

        broadcaster.close_all_connections(job_id);
        broadcaster.close_all_connections(job_id);

        assert!(rx.recv().await.is_none());
        assert_eq!(broadcaster.connection_count(job_id), 0);
    }
}
