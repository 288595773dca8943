use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moji_store::JobStatus;
use tokio::sync::watch;

/// Per-job completion signal. A caller that wants the synchronous result
/// takes a [`CompletionTicket`] *before* the job is enqueued; the processor
/// publishes exactly once, on the terminal transition. Publishing resolves
/// and drops the map entry, so the hub never grows with finished jobs — a
/// publish with no outstanding ticket is a no-op by design, which is why
/// subscribing after enqueue would race the worker.
#[derive(Clone, Default)]
pub struct CompletionHub {
    inner: Arc<Mutex<HashMap<String, watch::Sender<Option<JobStatus>>>>>,
}

/// A live subscription to one job's terminal transition.
pub struct CompletionTicket {
    rx: watch::Receiver<Option<JobStatus>>,
}

impl CompletionTicket {
    /// Waits for the job's terminal status, bounded by `deadline`. Returns
    /// None on timeout; the job keeps running either way.
    pub async fn wait(mut self, deadline: Duration) -> Option<JobStatus> {
        let result = tokio::time::timeout(deadline, async {
            loop {
                if let Some(status) = *self.rx.borrow_and_update() {
                    return status;
                }
                if self.rx.changed().await.is_err() {
                    // publisher dropped without signalling; treat as failed
                    return JobStatus::Failed;
                }
            }
        })
        .await;
        result.ok()
    }
}

impl CompletionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, job_id: &str) -> CompletionTicket {
        let mut inner = self.inner.lock().expect("completion hub mutex poisoned");
        let rx = inner
            .entry(job_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        CompletionTicket { rx }
    }

    pub fn publish(&self, job_id: &str, status: JobStatus) {
        let sender = {
            let mut inner = self.inner.lock().expect("completion hub mutex poisoned");
            inner.remove(job_id)
        };
        if let Some(sender) = sender {
            let _ = sender.send(Some(status));
        }
    }

    /// Drops a subscription whose job never made it onto the queue, so a
    /// rejected admission does not leave an entry behind.
    pub fn forget(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("completion hub mutex poisoned");
        inner.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_wakes_waiter() {
        let hub = CompletionHub::new();
        let ticket = hub.subscribe("JOB-TEST01");
        let waiter = tokio::spawn(ticket.wait(Duration::from_secs(5)));

        tokio::task::yield_now().await;
        hub.publish("JOB-TEST01", JobStatus::Completed);

        assert_eq!(waiter.await.unwrap(), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn ticket_taken_before_publish_sees_the_signal() {
        let hub = CompletionHub::new();
        let ticket = hub.subscribe("JOB-TEST04");
        // the worker can win the race and publish before anyone awaits
        hub.publish("JOB-TEST04", JobStatus::Failed);

        assert_eq!(
            ticket.wait(Duration::from_secs(5)).await,
            Some(JobStatus::Failed)
        );
    }

    #[tokio::test]
    async fn wait_times_out_without_publication() {
        let hub = CompletionHub::new();
        let got = hub
            .subscribe("JOB-TEST02")
            .wait(Duration::from_millis(20))
            .await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn publish_before_subscribe_is_a_noop() {
        let hub = CompletionHub::new();
        hub.publish("JOB-TEST03", JobStatus::Failed);
        // a later ticket times out; the signal is not buffered
        let got = hub
            .subscribe("JOB-TEST03")
            .wait(Duration::from_millis(20))
            .await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn forget_clears_the_entry() {
        let hub = CompletionHub::new();
        let ticket = hub.subscribe("JOB-TEST05");
        hub.forget("JOB-TEST05");
        // with the entry gone the publisher side is dropped; an outstanding
        // ticket resolves conservatively instead of hanging
        assert_eq!(
            ticket.wait(Duration::from_millis(20)).await,
            Some(JobStatus::Failed)
        );
    }
}
