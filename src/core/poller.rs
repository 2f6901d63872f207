//! Polling controller for memos that are still processing.
//!
//! A memo is fetched immediately, then every [`POLL_INTERVAL`] while its
//! status is `uploading`, `transcribing` or `extracting`. Polling ends as
//! soon as the memo reaches `pending_review` or a terminal status and does
//! not resume by itself. Dropping the [`PollHandle`] cancels the poll.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::memos::MemoService;
use crate::domain::{Memo, MemoId, MemoStatus};
use crate::error::ApiError;

/// Interval between re-fetches of a processing memo
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Delay before the next fetch, or None when polling should stop.
pub fn next_poll_delay(status: MemoStatus, interval: Duration) -> Option<Duration> {
    if status.is_processing() {
        Some(interval)
    } else {
        None
    }
}

/// Latest observation of a polled memo
#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    /// Most recently received memo state
    pub memo: Option<Memo>,

    /// Completed fetch attempts, successful or not
    pub attempts: u32,

    /// Last fetch error, cleared by the next successful fetch
    pub last_error: Option<ApiError>,

    /// Polling has stopped
    pub finished: bool,
}

impl PollSnapshot {
    pub fn status(&self) -> Option<MemoStatus> {
        self.memo.as_ref().map(|m| m.status)
    }
}

/// Drives the fetch loop for one memo
pub struct MemoPoller {
    service: MemoService,
    interval: Duration,
}

impl MemoPoller {
    pub fn new(service: MemoService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Start polling on the current tokio runtime
    pub fn spawn(self, id: MemoId) -> PollHandle {
        let (tx, rx) = watch::channel(PollSnapshot::default());
        let memo_id = id.clone();
        let task = tokio::spawn(async move { self.run(id, tx).await });

        PollHandle {
            id: memo_id,
            updates: rx,
            task,
        }
    }

    async fn run(self, id: MemoId, tx: watch::Sender<PollSnapshot>) {
        debug!(memo_id = %id, interval_ms = self.interval.as_millis() as u64, "Polling started");

        loop {
            let delay = match self.service.get(&id).await {
                Ok(memo) => {
                    let status = memo.status;
                    tx.send_modify(|snap| {
                        snap.memo = Some(memo);
                        snap.attempts += 1;
                        snap.last_error = None;
                    });

                    match next_poll_delay(status, self.interval) {
                        Some(delay) => delay,
                        None => {
                            info!(memo_id = %id, %status, "Polling stopped");
                            break;
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(memo_id = %id, error = %err, "Poll failed, keeping last state");
                    tx.send_modify(|snap| {
                        snap.attempts += 1;
                        snap.last_error = Some(err.clone());
                    });
                    self.interval
                }
                Err(err) => {
                    warn!(memo_id = %id, error = %err, "Polling aborted");
                    tx.send_modify(|snap| {
                        snap.attempts += 1;
                        snap.last_error = Some(err);
                    });
                    break;
                }
            };

            tokio::time::sleep(delay).await;
        }

        tx.send_modify(|snap| snap.finished = true);
    }
}

/// Live view of a poll. Dropping it stops polling.
pub struct PollHandle {
    id: MemoId,
    updates: watch::Receiver<PollSnapshot>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn id(&self) -> &MemoId {
        &self.id
    }

    /// Latest snapshot without waiting
    pub fn snapshot(&self) -> PollSnapshot {
        self.updates.borrow().clone()
    }

    /// Wait for the next snapshot. Returns None once polling has finished
    /// and no further updates will arrive.
    pub async fn next(&mut self) -> Option<PollSnapshot> {
        if self.updates.borrow().finished {
            return None;
        }
        match self.updates.changed().await {
            Ok(()) => Some(self.updates.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Wait until polling stops and return the memo's settled state
    pub async fn settled(mut self) -> Result<Memo, ApiError> {
        while self.next().await.is_some() {}

        let snapshot = self.snapshot();
        match (snapshot.memo, snapshot.last_error) {
            (_, Some(error)) => Err(error),
            (Some(memo), None) => Ok(memo),
            (None, None) => Err(ApiError::NotFound(format!("Memo {}", self.id))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_poll_delay() {
        assert_eq!(
            next_poll_delay(MemoStatus::Transcribing, POLL_INTERVAL),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(
            next_poll_delay(MemoStatus::Uploading, POLL_INTERVAL),
            Some(POLL_INTERVAL)
        );
        assert_eq!(next_poll_delay(MemoStatus::PendingReview, POLL_INTERVAL), None);
        assert_eq!(next_poll_delay(MemoStatus::Failed, POLL_INTERVAL), None);
        assert_eq!(next_poll_delay(MemoStatus::Approved, POLL_INTERVAL), None);
    }
}
