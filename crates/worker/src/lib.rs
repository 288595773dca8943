mod log;
mod processor;
mod queue;
mod retention;
mod signal;
mod webhook;

pub use log::JobLog;
pub use processor::{JobProcessor, ProcessorConfig, startup_sweep};
pub use queue::{JobQueue, JobReceiver, QueueFull, QueuedJob, job_queue};
pub use retention::{SweepStats, spawn_retention_sweeper, sweep_once};
pub use signal::{CompletionHub, CompletionTicket};
pub use webhook::{WebhookNotifier, download_urls};
