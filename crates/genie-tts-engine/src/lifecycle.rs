//! Remote model lifecycle: load, on-demand reload, idle unload.
//!
//! All state transitions go through a single actor task. Request handlers
//! and the idle checker talk to it over a channel, so a reload racing an
//! idle unload can only ever observe a stale state, never a torn one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use genie_tts_core::config::TtsConfig;

use crate::backend::{
    LoadCharacterRequest, ReferenceAudioRequest, TtsBackend, UnloadCharacterRequest,
};

/// Static parameters of the managed model.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub character_name: String,
    pub onnx_model_dir: String,
    pub ref_audio_path: String,
    pub ref_audio_text: String,
    /// How long `ensure_loaded` waits for a reload before giving up.
    pub load_wait: Duration,
    pub auto_unload: bool,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
}

impl ModelSettings {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            character_name: config.character_name.clone(),
            onnx_model_dir: config.onnx_model_dir.clone(),
            ref_audio_path: config.ref_audio_path.clone(),
            ref_audio_text: config.ref_audio_text.clone(),
            load_wait: config.load_wait(),
            auto_unload: config.auto_unload_enabled,
            idle_timeout: config.idle_timeout(),
            idle_check_interval: config.idle_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadReason {
    NeverLoaded,
    LoadFailed,
    Idle,
    Manual,
}

/// Model state. `Loaded` always carries its last-use time, so a loaded
/// model without one cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded(UnloadReason),
    Loading,
    Loaded { last_use: Instant },
    /// An unload request is in flight. `last_use` is restored if it fails.
    Unloading { reason: UnloadReason, last_use: Instant },
}

impl ModelState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Loaded { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub state: ModelState,
    pub character_name: String,
    /// Time since last use while loaded.
    pub idle_for: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded,
    NotLoaded,
    /// A load or unload is in flight.
    Busy,
    /// The server rejected the unload; the model is still considered loaded.
    Failed,
}

enum Command {
    Initialize(oneshot::Sender<bool>),
    EnsureLoaded(oneshot::Sender<bool>),
    Touch,
    Unload {
        reason: UnloadReason,
        reply: oneshot::Sender<UnloadOutcome>,
    },
    CheckIdle(oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<ModelSnapshot>),
    LoadFinished(bool),
    UnloadFinished(bool),
}

/// Caller waiting on the in-flight unload.
enum UnloadReply {
    Manual(oneshot::Sender<UnloadOutcome>),
    Idle(oneshot::Sender<bool>),
}

impl UnloadReply {
    fn send(self, outcome: UnloadOutcome) {
        match self {
            UnloadReply::Manual(tx) => {
                let _ = tx.send(outcome);
            }
            UnloadReply::Idle(tx) => {
                let _ = tx.send(outcome == UnloadOutcome::Unloaded);
            }
        }
    }
}

/// Cloneable handle to the lifecycle actor.
#[derive(Clone)]
pub struct ModelLifecycle {
    tx: mpsc::UnboundedSender<Command>,
    settings: Arc<ModelSettings>,
}

impl ModelLifecycle {
    /// Spawn the lifecycle actor. The model starts unloaded.
    pub fn spawn(backend: Arc<dyn TtsBackend>, settings: ModelSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = Arc::new(settings);
        let actor = LifecycleActor {
            backend,
            settings: settings.clone(),
            state: ModelState::Unloaded(UnloadReason::NeverLoaded),
            waiters: Vec::new(),
            unload_reply: None,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx, settings }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).ok()?;
        rx.await.ok()
    }

    /// Load the character model and its reference audio.
    ///
    /// Failures are logged and leave the model unloaded; they never
    /// propagate.
    pub async fn initialize(&self) -> bool {
        self.request(Command::Initialize).await.unwrap_or(false)
    }

    /// Reload the model if it is unloaded, waiting at most `load_wait`.
    ///
    /// Returns whether the model is loaded. On timeout the load keeps
    /// running in the background and the caller proceeds without it.
    pub async fn ensure_loaded(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::EnsureLoaded(reply)).is_err() {
            return false;
        }
        match tokio::time::timeout(self.settings.load_wait, rx).await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    wait_secs = self.settings.load_wait.as_secs(),
                    "Model still not loaded, proceeding without it"
                );
                false
            }
        }
    }

    /// Mark the model as used now. No-op unless loaded.
    pub fn touch(&self) {
        let _ = self.tx.send(Command::Touch);
    }

    /// Manually unload the model.
    pub async fn unload(&self) -> UnloadOutcome {
        self.request(|reply| Command::Unload {
            reason: UnloadReason::Manual,
            reply,
        })
        .await
        .unwrap_or(UnloadOutcome::NotLoaded)
    }

    /// Unload the model if it has been idle for the configured timeout.
    /// Returns whether it was unloaded.
    pub async fn check_idle(&self) -> bool {
        self.request(Command::CheckIdle).await.unwrap_or(false)
    }

    pub async fn snapshot(&self) -> ModelSnapshot {
        self.request(Command::Snapshot)
            .await
            .unwrap_or_else(|| ModelSnapshot {
                state: ModelState::Unloaded(UnloadReason::NeverLoaded),
                character_name: self.settings.character_name.clone(),
                idle_for: None,
            })
    }

    pub async fn is_loaded(&self) -> bool {
        self.snapshot().await.state.is_loaded()
    }

    /// Whether requests should be routed to the model at all.
    ///
    /// True while loaded or loading, and during or after an idle unload
    /// (the next request reloads it). False before the first successful
    /// load, after a failed load, and during or after a manual unload.
    pub async fn accepts_requests(&self) -> bool {
        matches!(
            self.snapshot().await.state,
            ModelState::Loaded { .. }
                | ModelState::Loading
                | ModelState::Unloaded(UnloadReason::Idle)
                | ModelState::Unloading {
                    reason: UnloadReason::Idle,
                    ..
                }
        )
    }

    /// Start the periodic idle checker. Returns `None` when auto-unload is
    /// disabled. The loop exits when `cancel` fires.
    pub fn spawn_idle_checker(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.settings.auto_unload {
            info!("Auto-unload disabled, idle checker not started");
            return None;
        }

        let lifecycle = self.clone();
        let period = self.settings.idle_check_interval;
        info!(
            interval_secs = period.as_secs(),
            timeout_secs = self.settings.idle_timeout.as_secs(),
            "Idle checker started"
        );

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Idle checker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if lifecycle.check_idle().await {
                            info!("Model unloaded after idle timeout");
                        }
                    }
                }
            }
        }))
    }
}

struct LifecycleActor {
    backend: Arc<dyn TtsBackend>,
    settings: Arc<ModelSettings>,
    state: ModelState,
    /// Callers waiting on the in-flight load, or on the reload that
    /// follows the in-flight unload.
    waiters: Vec<oneshot::Sender<bool>>,
    unload_reply: Option<UnloadReply>,
    self_tx: mpsc::WeakUnboundedSender<Command>,
}

impl LifecycleActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Initialize(reply) => {
                    self.waiters.push(reply);
                    if !matches!(
                        self.state,
                        ModelState::Loading | ModelState::Unloading { .. }
                    ) {
                        self.start_load();
                    }
                }
                Command::EnsureLoaded(reply) => match self.state {
                    ModelState::Loaded { .. } => {
                        self.state = ModelState::Loaded {
                            last_use: Instant::now(),
                        };
                        let _ = reply.send(true);
                    }
                    ModelState::Loading => self.waiters.push(reply),
                    ModelState::Unloading { .. } => {
                        debug!("Unload in flight, reloading once it completes");
                        self.waiters.push(reply);
                    }
                    ModelState::Unloaded(reason) => {
                        info!(?reason, "Model not loaded, reloading on demand");
                        self.waiters.push(reply);
                        self.start_load();
                    }
                },
                Command::Touch => match self.state {
                    ModelState::Loaded { .. } => {
                        self.state = ModelState::Loaded {
                            last_use: Instant::now(),
                        };
                    }
                    ModelState::Unloading { reason, .. } => {
                        self.state = ModelState::Unloading {
                            reason,
                            last_use: Instant::now(),
                        };
                    }
                    _ => debug!(state = ?self.state, "Touch ignored, model not loaded"),
                },
                Command::Unload { reason, reply } => {
                    self.start_unload(reason, UnloadReply::Manual(reply));
                }
                Command::CheckIdle(reply) => {
                    if self.is_idle() {
                        let reply = UnloadReply::Idle(reply);
                        self.start_unload(UnloadReason::Idle, reply);
                    } else {
                        let _ = reply.send(false);
                    }
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::LoadFinished(loaded) => {
                    self.state = if loaded {
                        ModelState::Loaded {
                            last_use: Instant::now(),
                        }
                    } else {
                        ModelState::Unloaded(UnloadReason::LoadFailed)
                    };
                    for waiter in self.waiters.drain(..) {
                        let _ = waiter.send(loaded);
                    }
                }
                Command::UnloadFinished(unloaded) => self.finish_unload(unloaded),
            }
        }
        debug!("Model lifecycle actor stopped");
    }

    fn start_load(&mut self) {
        self.state = ModelState::Loading;
        let backend = self.backend.clone();
        let settings = self.settings.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let loaded = load_model(backend.as_ref(), &settings).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::LoadFinished(loaded));
            }
        });
    }

    /// Send the unload request from a separate task so the actor keeps
    /// answering snapshots and touches while the server responds.
    fn start_unload(&mut self, reason: UnloadReason, reply: UnloadReply) {
        let last_use = match self.state {
            ModelState::Loaded { last_use } => last_use,
            ModelState::Unloaded(_) => return reply.send(UnloadOutcome::NotLoaded),
            ModelState::Loading | ModelState::Unloading { .. } => {
                return reply.send(UnloadOutcome::Busy);
            }
        };
        self.state = ModelState::Unloading { reason, last_use };
        self.unload_reply = Some(reply);

        let backend = self.backend.clone();
        let request = UnloadCharacterRequest {
            character_name: self.settings.character_name.clone(),
        };
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let unloaded = match backend.unload_character(&request).await {
                Ok(()) => true,
                Err(e) => {
                    error!(character = %request.character_name, %e, "Model unload failed");
                    false
                }
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::UnloadFinished(unloaded));
            }
        });
    }

    fn finish_unload(&mut self, unloaded: bool) {
        let ModelState::Unloading { reason, last_use } = self.state else {
            return;
        };
        let outcome = if unloaded {
            info!(character = %self.settings.character_name, ?reason, "Model unloaded");
            self.state = ModelState::Unloaded(reason);
            UnloadOutcome::Unloaded
        } else {
            self.state = ModelState::Loaded { last_use };
            UnloadOutcome::Failed
        };
        if let Some(reply) = self.unload_reply.take() {
            reply.send(outcome);
        }

        if self.waiters.is_empty() {
            return;
        }
        if unloaded {
            info!(waiting = self.waiters.len(), "Reloading model for queued requests");
            self.start_load();
        } else {
            self.state = ModelState::Loaded {
                last_use: Instant::now(),
            };
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(true);
            }
        }
    }

    fn is_idle(&self) -> bool {
        if !self.settings.auto_unload {
            return false;
        }
        let ModelState::Loaded { last_use } = self.state else {
            return false;
        };
        let idle = last_use.elapsed();
        if idle < self.settings.idle_timeout {
            debug!(idle_secs = idle.as_secs(), "Model in use, keeping it loaded");
            return false;
        }
        info!(idle_secs = idle.as_secs(), "Model idle, unloading");
        true
    }

    fn snapshot(&self) -> ModelSnapshot {
        let idle_for = match self.state {
            ModelState::Loaded { last_use } => Some(last_use.elapsed()),
            _ => None,
        };
        ModelSnapshot {
            state: self.state,
            character_name: self.settings.character_name.clone(),
            idle_for,
        }
    }
}

async fn load_model(backend: &dyn TtsBackend, settings: &ModelSettings) -> bool {
    let load = LoadCharacterRequest {
        character_name: settings.character_name.clone(),
        onnx_model_dir: settings.onnx_model_dir.clone(),
    };
    if let Err(e) = backend.load_character(&load).await {
        error!(character = %settings.character_name, %e, "Model load failed");
        return false;
    }
    info!(character = %settings.character_name, "Model loaded");

    let reference = ReferenceAudioRequest {
        character_name: settings.character_name.clone(),
        audio_path: settings.ref_audio_path.clone(),
        audio_text: settings.ref_audio_text.clone(),
    };
    if let Err(e) = backend.set_reference_audio(&reference).await {
        error!(character = %settings.character_name, %e, "Reference audio setup failed");
        return false;
    }
    info!(character = %settings.character_name, "Reference audio set");
    true
}
