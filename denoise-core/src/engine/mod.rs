//! `SessionController`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──► Starting ──host open──► Loading ──engine ready──► Running
//!   ▲                                          │                         │
//!   │                              load failed (Error)                 stop()
//!   │                                          ▼                         ▼
//!   └─────────────────────────────────────── Idle ◄──────────────── Stopping
//! ```
//!
//! `start()` while a session is active returns `AlreadyRunning`; `stop()`
//! while idle is a no-op. `switch_variant()` is exactly one stop followed by
//! one start, with a fresh bridge.
//!
//! ## Threading
//!
//! Each session uses two threads besides the caller's. The host thread opens
//! the audio host, reports the negotiated rate back to `start()` over a
//! bounded channel, then parks until told to close, so a `!Send` stream
//! handle never leaves it. The worker thread owns the engine and
//! acknowledges a stop on a second channel; `stop()` waits for that
//! acknowledgement at most `stop_timeout` before abandoning the worker.

pub mod recorder;
pub mod worker;

mod lifecycle;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use self::lifecycle::SessionShared;
use self::worker::WorkerContext;
use crate::{
    audio::{AudioHost, CaptureCallback, GainControl},
    buffering::{AudioBridge, DiagnosticsSnapshot},
    error::{DenoiseError, Result},
    inference::{ArtifactBundle, DenoiserLoader, EngineVariant},
    ipc::events::{SessionStatus, SessionStatusEvent},
};

pub use self::worker::default_idle_sleep;

/// What the worker emits in place of a chunk the engine failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The raw chunk, unchanged.
    #[default]
    Passthrough,
    /// Zeros.
    Silence,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passthrough => "passthrough",
            Self::Silence => "silence",
        })
    }
}

impl FromStr for FailurePolicy {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" => Ok(Self::Passthrough),
            "silence" => Ok(Self::Silence),
            other => Err(DenoiseError::InvalidConfig(format!(
                "unknown failure policy '{other}' (expected passthrough or silence)"
            ))),
        }
    }
}

/// Configuration for `SessionController`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Rate requested from the audio host (Hz). Default: 48000.
    pub sample_rate: u32,
    /// Capacity of each ring in seconds of audio at `sample_rate`. Default: 2.0.
    pub ring_seconds: f32,
    /// Engine variant used by the next `start()`.
    pub variant: EngineVariant,
    /// Directory holding the variant runtime directories and the model.
    pub artifact_root: PathBuf,
    /// Bounded wait for the worker's stop acknowledgement. Default: 2 s.
    pub stop_timeout: Duration,
    /// Bounded wait for the audio host to open. Default: 5 s.
    pub open_timeout: Duration,
    /// Worker sleep when a full chunk is not available yet.
    pub idle_sleep: Duration,
    pub failure_policy: FailurePolicy,
    /// Write the engine output to this WAV file while running.
    pub record_path: Option<PathBuf>,
    /// Drop raw audio queued during the engine load instead of processing it.
    pub drop_backlog_on_ready: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            ring_seconds: 2.0,
            variant: EngineVariant::default(),
            artifact_root: PathBuf::from("artifacts"),
            stop_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(5),
            idle_sleep: default_idle_sleep(),
            failure_policy: FailurePolicy::default(),
            record_path: None,
            drop_backlog_on_ready: false,
        }
    }
}

impl SessionConfig {
    /// Samples per ring: `ceil(sample_rate × ring_seconds)`.
    pub fn ring_capacity(&self) -> usize {
        (self.sample_rate as f64 * self.ring_seconds as f64).ceil() as usize
    }

    pub fn bundle(&self) -> ArtifactBundle {
        ArtifactBundle::resolve(&self.artifact_root, self.variant)
    }

    /// # Errors
    /// `DenoiseError::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(DenoiseError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if !self.ring_seconds.is_finite() || self.ring_seconds <= 0.0 {
            return Err(DenoiseError::InvalidConfig(format!(
                "ring seconds must be positive, got {}",
                self.ring_seconds
            )));
        }
        if self.idle_sleep.is_zero() {
            return Err(DenoiseError::InvalidConfig("idle sleep must be non-zero".into()));
        }
        Ok(())
    }
}

/// Threads and flags of one live session.
struct Session {
    generation: u64,
    /// Audio callback gate.
    running: Arc<AtomicBool>,
    /// Worker stop / load cancel.
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
    host_close: Sender<()>,
    host: Option<JoinHandle<()>>,
}

/// The top-level session handle.
///
/// `SessionController` is `Send + Sync`; every control operation serialises
/// on an internal mutex, so at most one session exists at a time.
pub struct SessionController {
    config: Mutex<SessionConfig>,
    loader: Arc<dyn DenoiserLoader>,
    host: Arc<dyn AudioHost>,
    gain: GainControl,
    shared: Arc<SessionShared>,
    session: Mutex<Option<Session>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        loader: Arc<dyn DenoiserLoader>,
        host: Arc<dyn AudioHost>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            loader,
            host,
            gain: GainControl::default(),
            shared: Arc::new(SessionShared::new()),
            session: Mutex::new(None),
        }
    }

    /// Start a session: allocate both rings, open the audio host, spawn the
    /// worker (engine load begins).
    ///
    /// Returns once audio is flowing; the engine may still be loading, during
    /// which playback is silence. Use `wait_until_running` to wait for it.
    ///
    /// # Errors
    /// - `DenoiseError::AlreadyRunning` if a session is active.
    /// - `DenoiseError::InvalidConfig` for a bad `SessionConfig`.
    /// - `DenoiseError::CaptureUnavailable` if the host cannot open.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.session.lock();
        self.reap_finished(&mut slot);
        if slot.is_some() {
            return Err(DenoiseError::AlreadyRunning);
        }
        let session = self.start_session()?;
        *slot = Some(session);
        Ok(())
    }

    /// Stop the active session; no-op while idle.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.session.lock();
        self.reap_finished(&mut slot);
        if let Some(session) = slot.take() {
            self.stop_session(session);
        }
        Ok(())
    }

    /// Select the engine variant. An active session goes through exactly one
    /// `Stopping → Starting` cycle with fresh buffers; an idle controller only
    /// records the choice for the next `start()`.
    pub fn switch_variant(&self, variant: EngineVariant) -> Result<()> {
        let mut slot = self.session.lock();
        self.reap_finished(&mut slot);

        let previous = std::mem::replace(&mut self.config.lock().variant, variant);
        let Some(session) = slot.take() else {
            info!(%variant, "engine variant selected");
            return Ok(());
        };

        info!(from = %previous, to = %variant, "switching engine variant");
        self.stop_session(session);
        match self.start_session() {
            Ok(session) => {
                *slot = Some(session);
                Ok(())
            }
            Err(e) => {
                // The new variant never ran.
                self.config.lock().variant = previous;
                warn!(%variant, restored = %previous, "variant switch failed: {e}");
                Err(e)
            }
        }
    }

    /// Applied by the next audio callback; no restart.
    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn state(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Cause of the most recent fatal session error, cleared by `start()`.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    pub fn config(&self) -> SessionConfig {
        self.config.lock().clone()
    }

    pub fn variant(&self) -> EngineVariant {
        self.config.lock().variant
    }

    /// Block until the engine is loaded and processing.
    ///
    /// # Errors
    /// - `DenoiseError::EngineLoadFailed` when the load failed.
    /// - `DenoiseError::NotRunning` when no session is active.
    /// - `DenoiseError::Timeout` when `timeout` elapses first.
    pub fn wait_until_running(&self, timeout: Duration) -> Result<()> {
        self.shared.wait_until_running(timeout)
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.subscribe()
    }

    /// Snapshot of transport counters for the current (or last) session.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics().snapshot()
    }

    /// Workers that missed the stop deadline and were left to exit on their own.
    pub fn abandoned_workers(&self) -> u64 {
        self.shared.abandoned_workers()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn start_session(&self) -> Result<Session> {
        let config = self.config.lock().clone();
        config.validate()?;

        let generation = self.shared.begin();
        self.shared.diagnostics().reset();
        info!(
            generation,
            variant = %config.variant,
            sample_rate = config.sample_rate,
            ring_capacity = config.ring_capacity(),
            host = self.host.name(),
            "starting session"
        );

        match self.spawn_session(generation, &config) {
            Ok(session) => Ok(session),
            Err(e) => {
                error!("session start failed: {e}");
                self.shared.set(SessionStatus::Error, Some(e.to_string()));
                self.shared.set(SessionStatus::Idle, None);
                Err(e)
            }
        }
    }

    fn spawn_session(&self, generation: u64, config: &SessionConfig) -> Result<Session> {
        let (capture, processing) = AudioBridge::new(config.ring_capacity())?.split();
        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));

        let callback = CaptureCallback::new(
            capture,
            self.gain.clone(),
            Arc::clone(&running),
            Arc::clone(self.shared.diagnostics()),
        );
        let (host_close, host_close_rx) = unbounded::<()>();
        let (host, host_rate) = self.spawn_host(callback, config, host_close_rx)?;

        if host_rate != config.sample_rate {
            warn!(
                requested = config.sample_rate,
                actual = host_rate,
                "audio host runs at a different rate; worker will convert"
            );
        }

        self.shared.set(SessionStatus::Loading, None);

        let (done_tx, done_rx) = bounded::<()>(1);
        let ctx = WorkerContext {
            generation,
            loader: Arc::clone(&self.loader),
            bundle: config.bundle(),
            processing,
            host_rate,
            stop: Arc::clone(&stop),
            running: Arc::clone(&running),
            host_close: host_close.clone(),
            done: done_tx,
            shared: Arc::clone(&self.shared),
            failure_policy: config.failure_policy,
            idle_sleep: config.idle_sleep,
            record_path: config.record_path.clone(),
            drop_backlog_on_ready: config.drop_backlog_on_ready,
        };

        let worker = thread::Builder::new()
            .name(format!("denoise-worker-{generation}"))
            .spawn(move || worker::run(ctx));

        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                let _ = host_close.send(());
                let _ = host.join();
                return Err(DenoiseError::Other(anyhow::anyhow!(
                    "failed to spawn worker thread: {e}"
                )));
            }
        };

        Ok(Session {
            generation,
            running,
            stop,
            worker: Some(worker),
            done_rx,
            host_close,
            host: Some(host),
        })
    }

    /// Open the audio host on its own thread, which keeps the stream until a
    /// close signal arrives (or every sender is gone).
    fn spawn_host(
        &self,
        callback: CaptureCallback,
        config: &SessionConfig,
        close_rx: Receiver<()>,
    ) -> Result<(JoinHandle<()>, u32)> {
        let (open_tx, open_rx) = bounded::<Result<u32>>(1);
        let host = Arc::clone(&self.host);
        let sample_rate = config.sample_rate;

        let handle = thread::Builder::new()
            .name("denoise-audio-host".into())
            .spawn(move || {
                // Must happen on THIS thread: the stream may be !Send.
                let stream = match host.open(callback, sample_rate) {
                    Ok(stream) => {
                        let _ = open_tx.send(Ok(stream.sample_rate()));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = close_rx.recv();
                stream.close();
            })
            .map_err(|e| {
                DenoiseError::CaptureUnavailable(format!("failed to spawn audio host thread: {e}"))
            })?;

        match open_rx.recv_timeout(config.open_timeout) {
            Ok(Ok(rate)) => Ok((handle, rate)),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The host thread is left to finish opening and then sees the
                // close channel disconnected once the caller drops its sender.
                Err(DenoiseError::CaptureUnavailable(format!(
                    "audio host did not open within {:?}",
                    config.open_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(DenoiseError::CaptureUnavailable(
                    "audio host thread died while opening".into(),
                ))
            }
        }
    }

    /// Teardown order: stop the worker (bounded wait), silence the callback,
    /// close the host, drop the rings.
    fn stop_session(&self, mut session: Session) {
        let config = self.config.lock().clone();
        self.shared.set(SessionStatus::Stopping, None);
        info!(generation = session.generation, "stopping session");

        session.stop.store(true, Ordering::Release);
        match session.done_rx.recv_timeout(config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = session.worker.take() {
                    if worker.join().is_err() {
                        error!("worker thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    generation = session.generation,
                    timeout = ?config.stop_timeout,
                    "worker did not acknowledge stop; abandoning it"
                );
                self.shared.record_abandoned_worker();
                session.worker.take();
            }
        }

        self.close_host(&mut session);
        self.shared.set(SessionStatus::Idle, None);
        info!(generation = session.generation, "session stopped");
    }

    fn close_host(&self, session: &mut Session) {
        session.running.store(false, Ordering::Release);
        let _ = session.host_close.send(());
        if let Some(host) = session.host.take() {
            if host.join().is_err() {
                error!("audio host thread panicked");
            }
        }
    }

    /// Release a session whose worker already ended it (engine load failure).
    fn reap_finished(&self, slot: &mut Option<Session>) {
        let finished = match slot.as_ref() {
            Some(session) => {
                session.generation != self.shared.generation()
                    || !self.shared.status().is_active()
            }
            None => false,
        };
        if !finished {
            return;
        }
        if let Some(mut session) = slot.take() {
            info!(generation = session.generation, "releasing failed session");
            if let Some(worker) = session.worker.take() {
                let _ = worker.join();
            }
            self.close_host(&mut session);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let mut slot = self.session.get_mut().take();
        self.reap_finished(&mut slot);
        if let Some(session) = slot {
            self.stop_session(session);
        }
    }
}
