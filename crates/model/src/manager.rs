use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::{DecodeOptions, ModelLoader, ModelSegment, WhisperModel};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of the process-wide model slot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SlotState {
    Unloaded,
    Loading,
    Ready,
    Busy,
    Unloading,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model_id: String,
    pub state: SlotState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<u64>,
}

struct DropGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Owns the single loaded model instance. The slot mutex is held across both
/// load and inference, which bounds in-flight inferences at one and lets
/// concurrent callers wait on the same load instead of triggering their own.
pub struct ModelManager<M: ModelLoader = WhisperModel> {
    model_id: String,
    slot: Arc<tokio::sync::Mutex<Option<Arc<M>>>>,
    state_tx: watch::Sender<SlotState>,
    last_used: Arc<Mutex<Option<Instant>>>,
    idle_timeout: Duration,
    load_timeout: Duration,
    _drop_guard: Arc<DropGuard>,
}

impl<M: ModelLoader> Clone for ModelManager<M> {
    fn clone(&self) -> Self {
        Self {
            model_id: self.model_id.clone(),
            slot: Arc::clone(&self.slot),
            state_tx: self.state_tx.clone(),
            last_used: Arc::clone(&self.last_used),
            idle_timeout: self.idle_timeout,
            load_timeout: self.load_timeout,
            _drop_guard: Arc::clone(&self._drop_guard),
        }
    }
}

impl<M: ModelLoader> ModelManager<M> {
    pub fn builder(model_id: impl Into<String>) -> ModelManagerBuilder<M> {
        ModelManagerBuilder::new(model_id)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Runs inference on the canonical audio file, loading the model first
    /// when the slot is empty.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        options: &DecodeOptions,
    ) -> Result<Vec<ModelSegment>> {
        let mut slot = self.slot.lock().await;
        let model = self.ensure_loaded(&mut slot).await?;

        self.state_tx.send_replace(SlotState::Busy);

        let audio_path = audio_path.to_path_buf();
        let options = options.clone();
        let result = tokio::task::spawn_blocking(move || model.transcribe(&audio_path, &options))
            .await
            .map_err(|_| Error::WorkerPanicked);

        self.touch();
        self.state_tx.send_replace(SlotState::Ready);

        result?
    }

    /// Explicit warm-start load; a no-op when the model is already resident.
    pub async fn load(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.ensure_loaded(&mut slot).await?;
        self.touch();
        self.state_tx.send_replace(SlotState::Ready);
        Ok(())
    }

    /// Releases the model. Fails with `Busy` while a load or an inference is
    /// in flight; unloading an empty slot is a no-op.
    pub async fn unload(&self) -> Result<()> {
        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(_) => return Err(Error::Busy),
        };

        let Some(model) = slot.take() else {
            self.state_tx.send_replace(SlotState::Unloaded);
            return Ok(());
        };

        self.state_tx.send_replace(SlotState::Unloading);
        drop(model);
        self.state_tx.send_replace(SlotState::Unloaded);
        tracing::info!("model_unloaded");
        Ok(())
    }

    pub fn status(&self) -> ModelStatus {
        let idle_seconds = self
            .last_used
            .lock()
            .expect("last_used mutex poisoned")
            .map(|t| t.elapsed().as_secs());
        ModelStatus {
            model_id: self.model_id.clone(),
            state: *self.state_tx.borrow(),
            idle_seconds,
        }
    }

    pub fn state(&self) -> SlotState {
        *self.state_tx.borrow()
    }

    async fn ensure_loaded(
        &self,
        slot: &mut tokio::sync::MutexGuard<'_, Option<Arc<M>>>,
    ) -> Result<Arc<M>> {
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        self.state_tx.send_replace(SlotState::Loading);
        tracing::info!(model_id = %self.model_id, "model_load_started");

        let model_id = self.model_id.clone();
        let loaded = tokio::time::timeout(
            self.load_timeout,
            tokio::task::spawn_blocking(move || M::load(&model_id)),
        )
        .await;

        let model = match loaded {
            Err(_) => {
                self.state_tx.send_replace(SlotState::Unloaded);
                return Err(Error::LoadTimeout);
            }
            Ok(Err(_)) => {
                self.state_tx.send_replace(SlotState::Unloaded);
                return Err(Error::WorkerPanicked);
            }
            Ok(Ok(Err(e))) => {
                self.state_tx.send_replace(SlotState::Unloaded);
                tracing::error!(model_id = %self.model_id, error = %e, "model_load_failed");
                return Err(e);
            }
            Ok(Ok(Ok(model))) => Arc::new(model),
        };

        tracing::info!(model_id = %self.model_id, "model_loaded");
        **slot = Some(Arc::clone(&model));
        Ok(model)
    }

    fn touch(&self) {
        *self.last_used.lock().expect("last_used mutex poisoned") = Some(Instant::now());
    }

    fn spawn_monitor(&self, check_interval: Duration, mut shutdown_rx: watch::Receiver<()>) {
        let slot = Arc::clone(&self.slot);
        let state_tx = self.state_tx.clone();
        let last_used = Arc::clone(&self.last_used);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        let idle = {
                            let last = last_used.lock().expect("last_used mutex poisoned");
                            last.map(|t| t.elapsed() > idle_timeout).unwrap_or(false)
                        };
                        if !idle || *state_tx.borrow() != SlotState::Ready {
                            continue;
                        }

                        // busy again by the time we get the lock? skip this
                        // tick and re-check on the next one
                        let Ok(mut slot) = slot.try_lock() else { continue };
                        if let Some(model) = slot.take() {
                            state_tx.send_replace(SlotState::Unloading);
                            drop(model);
                            state_tx.send_replace(SlotState::Unloaded);
                            tracing::info!("model_unloaded_after_idle");
                        }
                    }
                }
            }
        });
    }
}

pub struct ModelManagerBuilder<M: ModelLoader = WhisperModel> {
    model_id: String,
    idle_timeout: Option<Duration>,
    check_interval: Option<Duration>,
    load_timeout: Option<Duration>,
    _phantom: std::marker::PhantomData<M>,
}

impl<M: ModelLoader> ModelManagerBuilder<M> {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            idle_timeout: None,
            check_interval: None,
            load_timeout: None,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ModelManager<M> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (state_tx, _state_rx) = watch::channel(SlotState::Unloaded);
        let check_interval = self.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL);

        let manager = ModelManager {
            model_id: self.model_id,
            slot: Arc::new(tokio::sync::Mutex::new(None)),
            state_tx,
            last_used: Arc::new(Mutex::new(None)),
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            load_timeout: self.load_timeout.unwrap_or(DEFAULT_LOAD_TIMEOUT),
            _drop_guard: Arc::new(DropGuard { shutdown_tx }),
        };

        manager.spawn_monitor(check_interval, shutdown_rx);
        manager
    }
}
