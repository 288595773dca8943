use moji_model::DecodeOptions;
use tokio::sync::mpsc;

/// One unit of work for the processor. Decode options ride along in memory
/// because only the compatible surface ever overrides them and they are not
/// part of the persisted row.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: String,
    pub decode: DecodeOptions,
}

impl QueuedJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            decode: DecodeOptions::japanese(),
        }
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("job queue is full")]
pub struct QueueFull;

/// Producer half of the bounded FIFO queue. Enqueue never blocks; admission
/// fails fast when the queue is saturated.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), QueueFull> {
        self.tx.try_send(job).map_err(|_| QueueFull)
    }

    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

pub struct JobReceiver {
    rx: mpsc::Receiver<QueuedJob>,
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        self.rx.recv().await
    }
}

pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobQueue { tx }, JobReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_fails_fast_at_capacity() {
        let (queue, mut rx) = job_queue(2);
        queue.enqueue(QueuedJob::new("JOB-AAAAA1")).unwrap();
        queue.enqueue(QueuedJob::new("JOB-AAAAA2")).unwrap();
        assert!(queue.enqueue(QueuedJob::new("JOB-AAAAA3")).is_err());
        assert_eq!(queue.depth(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.job_id, "JOB-AAAAA1");
        queue.enqueue(QueuedJob::new("JOB-AAAAA3")).unwrap();
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (queue, mut rx) = job_queue(8);
        for i in 0..5 {
            queue.enqueue(QueuedJob::new(format!("JOB-00000{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().job_id, format!("JOB-00000{i}"));
        }
    }
}
