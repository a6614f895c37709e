//! Session state shared between the controller and its worker threads.
//!
//! Every session gets a new generation number. Workers only ever touch the
//! state of their own generation, so a worker abandoned after a stop timeout
//! cannot disturb the session that replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;

use crate::buffering::TransportDiagnostics;
use crate::error::{DenoiseError, Result};
use crate::ipc::events::{SessionStatus, SessionStatusEvent};

/// Broadcast channel capacity: status events buffered for slow consumers.
const STATUS_CHANNEL_CAP: usize = 256;

#[derive(Debug, Default)]
struct Lifecycle {
    status: SessionStatus,
    generation: u64,
    last_error: Option<String>,
}

pub(crate) struct SessionShared {
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<TransportDiagnostics>,
    abandoned_workers: AtomicU64,
}

impl SessionShared {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAP);
        Self {
            lifecycle: Mutex::new(Lifecycle::default()),
            changed: Condvar::new(),
            status_tx,
            diagnostics: Arc::new(TransportDiagnostics::default()),
            abandoned_workers: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lifecycle.lock().status
    }

    pub fn generation(&self) -> u64 {
        self.lifecycle.lock().generation
    }

    pub fn last_error(&self) -> Option<String> {
        self.lifecycle.lock().last_error.clone()
    }

    pub fn diagnostics(&self) -> &Arc<TransportDiagnostics> {
        &self.diagnostics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn abandoned_workers(&self) -> u64 {
        self.abandoned_workers.load(Ordering::Relaxed)
    }

    pub fn record_abandoned_worker(&self) {
        self.abandoned_workers.fetch_add(1, Ordering::Relaxed);
    }

    /// Open a new generation in `Starting` and return its number.
    pub fn begin(&self) -> u64 {
        let mut lc = self.lifecycle.lock();
        lc.generation += 1;
        lc.last_error = None;
        self.transition(&mut lc, SessionStatusEvent::new(SessionStatus::Starting));
        lc.generation
    }

    /// Controller-side transition, unconditional.
    pub fn set(&self, status: SessionStatus, detail: Option<String>) {
        let mut event = SessionStatusEvent::new(status);
        event.detail = detail;
        let mut lc = self.lifecycle.lock();
        self.transition(&mut lc, event);
    }

    /// Worker-side transition: applied only while `generation` is current and
    /// the status is one of `from`.
    pub fn set_if_current(
        &self,
        generation: u64,
        from: &[SessionStatus],
        event: SessionStatusEvent,
    ) -> bool {
        let mut lc = self.lifecycle.lock();
        if lc.generation != generation || !from.contains(&lc.status) {
            return false;
        }
        self.transition(&mut lc, event);
        true
    }

    /// Publish a load progress step without changing state.
    pub fn progress(&self, generation: u64, percent: u8, detail: &str) {
        let lc = self.lifecycle.lock();
        if lc.generation == generation && lc.status == SessionStatus::Loading {
            self.publish(
                SessionStatusEvent::new(SessionStatus::Loading)
                    .with_detail(detail)
                    .with_progress(percent),
            );
        }
    }

    /// Fatal error in the current generation: publish `Error`, fall back to `Idle`.
    pub fn fail(&self, generation: u64, cause: String) -> bool {
        let mut lc = self.lifecycle.lock();
        if lc.generation != generation || !lc.status.is_active() {
            return false;
        }
        lc.last_error = Some(cause.clone());
        self.publish(SessionStatusEvent::new(SessionStatus::Error).with_detail(cause));
        self.transition(&mut lc, SessionStatusEvent::new(SessionStatus::Idle));
        true
    }

    /// Block until the current session reaches `Running`.
    pub fn wait_until_running(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut lc = self.lifecycle.lock();
        loop {
            match lc.status {
                SessionStatus::Running => return Ok(()),
                SessionStatus::Idle | SessionStatus::Error => {
                    return Err(match lc.last_error.clone() {
                        Some(cause) => DenoiseError::EngineLoadFailed(cause),
                        None => DenoiseError::NotRunning,
                    })
                }
                SessionStatus::Starting | SessionStatus::Loading | SessionStatus::Stopping => {}
            }
            if self.changed.wait_until(&mut lc, deadline).timed_out()
                && lc.status != SessionStatus::Running
            {
                return Err(DenoiseError::Timeout(format!(
                    "session not running after {timeout:?} (status {:?})",
                    lc.status
                )));
            }
        }
    }

    fn transition(&self, lc: &mut Lifecycle, event: SessionStatusEvent) {
        lc.status = event.status;
        self.publish(event);
        self.changed.notify_all();
    }

    fn publish(&self, event: SessionStatusEvent) {
        // No subscribers is fine.
        let _ = self.status_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    fn drain(rx: &mut broadcast::Receiver<SessionStatusEvent>) -> Vec<SessionStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.status);
        }
        out
    }

    #[test]
    fn stale_generation_cannot_transition() {
        let shared = SessionShared::new();
        let first = shared.begin();
        shared.set(SessionStatus::Idle, None);
        let second = shared.begin();
        shared.set(SessionStatus::Loading, None);

        assert!(!shared.set_if_current(
            first,
            &[SessionStatus::Loading],
            SessionStatusEvent::new(SessionStatus::Running)
        ));
        assert!(!shared.fail(first, "late".into()));
        assert!(shared.set_if_current(
            second,
            &[SessionStatus::Loading],
            SessionStatusEvent::new(SessionStatus::Running)
        ));
        assert_eq!(shared.status(), SessionStatus::Running);
    }

    #[test]
    fn failure_publishes_error_then_idle() {
        let shared = SessionShared::new();
        let mut rx = shared.subscribe();
        let generation = shared.begin();
        shared.set(SessionStatus::Loading, None);
        assert!(shared.fail(generation, "missing model".into()));

        assert_eq!(
            drain(&mut rx),
            [
                SessionStatus::Starting,
                SessionStatus::Loading,
                SessionStatus::Error,
                SessionStatus::Idle
            ]
        );
        assert_eq!(shared.last_error().as_deref(), Some("missing model"));
        assert!(matches!(
            shared.wait_until_running(Duration::from_millis(10)),
            Err(DenoiseError::EngineLoadFailed(cause)) if cause == "missing model"
        ));
    }

    #[test]
    fn progress_only_while_loading() {
        let shared = SessionShared::new();
        let mut rx = shared.subscribe();
        let generation = shared.begin();
        shared.progress(generation, 25, "runtime loaded");
        shared.set(SessionStatus::Loading, None);
        shared.progress(generation, 50, "model loaded");

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let progress: Vec<_> = events.iter().filter_map(|e| e.progress).collect();
        assert_eq!(progress, [50]);
    }

    #[test]
    fn wait_until_running_wakes_on_transition() {
        let shared = Arc::new(SessionShared::new());
        let generation = shared.begin();
        shared.set(SessionStatus::Loading, None);

        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            worker.set_if_current(
                generation,
                &[SessionStatus::Loading],
                SessionStatusEvent::new(SessionStatus::Running),
            );
        });

        shared.wait_until_running(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_running_times_out() {
        let shared = SessionShared::new();
        shared.begin();
        assert!(matches!(
            shared.wait_until_running(Duration::from_millis(20)),
            Err(DenoiseError::Timeout(_))
        ));
    }

    #[test]
    fn idle_without_error_is_not_running() {
        let shared = SessionShared::new();
        assert!(matches!(
            shared.wait_until_running(Duration::from_millis(5)),
            Err(DenoiseError::NotRunning)
        ));
    }
}
