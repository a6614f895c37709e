//! Blocking processing loop.
//!
//! ## Stages
//!
//! ```text
//! 1. Load the engine (progress → status stream; stop flag cancels the load)
//! 2. Loop until the stop flag is set:
//!    a. Read one host-rate chunk from the raw ring, or sleep briefly if short
//!    b. Convert to the engine rate (passthrough when equal)
//!    c. process_chunk per hop; a failed hop is replaced per FailurePolicy
//!    d. Optionally record the hop to WAV
//!    e. Convert back to the host rate and write to the denoised ring
//! 3. Abandon any partial hop, finalize the recording, acknowledge the stop
//! ```
//!
//! The loop runs on its own OS thread, never on the audio callback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, info_span, warn};

use super::{lifecycle::SessionShared, recorder::WavRecorder, FailurePolicy};
use crate::{
    audio::resample::RateConverter,
    buffering::{ProcessingEnd, TransportDiagnostics},
    error::{DenoiseError, Result},
    inference::{ArtifactBundle, Denoiser, DenoiserLoader, LoadContext},
    ipc::events::{SessionStatus, SessionStatusEvent},
};

const DEFAULT_IDLE_SLEEP_MS: u64 = 2;

/// Idle sleep when a full chunk is not yet available.
///
/// `DENOISE_WORKER_IDLE_SLEEP_MS` overrides the default (clamped to 1–20 ms).
pub fn default_idle_sleep() -> Duration {
    static IDLE_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*IDLE_SLEEP_MS.get_or_init(|| {
        std::env::var("DENOISE_WORKER_IDLE_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_IDLE_SLEEP_MS)
    }))
}

/// Everything one worker needs, moved onto its thread.
pub(crate) struct WorkerContext {
    pub generation: u64,
    pub loader: Arc<dyn DenoiserLoader>,
    pub bundle: ArtifactBundle,
    pub processing: ProcessingEnd,
    /// Rate the audio host actually runs at.
    pub host_rate: u32,
    /// Set by the controller to stop the loop (and cancel a pending load).
    pub stop: Arc<AtomicBool>,
    /// Audio callback gate; cleared here when the load fails.
    pub running: Arc<AtomicBool>,
    pub host_close: Sender<()>,
    pub done: Sender<()>,
    pub shared: Arc<SessionShared>,
    pub failure_policy: FailurePolicy,
    pub idle_sleep: Duration,
    pub record_path: Option<PathBuf>,
    pub drop_backlog_on_ready: bool,
}

/// Run the worker until the stop flag is set or the engine fails to load.
pub(crate) fn run(mut ctx: WorkerContext) {
    let span = info_span!("worker", generation = ctx.generation);
    let _enter = span.enter();

    match load_engine(&ctx) {
        Ok(engine) => {
            if ctx.shared.set_if_current(
                ctx.generation,
                &[SessionStatus::Loading],
                SessionStatusEvent::new(SessionStatus::Running).with_progress(100),
            ) {
                info!(hop = engine.hop_size(), engine_rate = engine.sample_rate(), "session running");
            }
            if let Err(e) = process_until_stopped(&mut ctx, engine) {
                error!("processing setup failed: {e}");
                abort_session(&ctx, e);
            }
        }
        Err(DenoiseError::LoadCancelled) => {
            info!("engine load cancelled by stop");
        }
        Err(e) => {
            error!("engine load failed: {e}");
            abort_session(&ctx, e);
        }
    }

    let _ = ctx.done.send(());
    debug!("worker exited");
}

/// Fatal error: silence the callback, release the audio host, report upward.
fn abort_session(ctx: &WorkerContext, e: DenoiseError) {
    ctx.running.store(false, Ordering::Release);
    let _ = ctx.host_close.send(());
    let cause = match e {
        DenoiseError::EngineLoadFailed(cause) => cause,
        other => other.to_string(),
    };
    ctx.shared.fail(ctx.generation, cause);
}

fn load_engine(ctx: &WorkerContext) -> Result<Box<dyn Denoiser>> {
    let shared = &ctx.shared;
    let generation = ctx.generation;
    let progress = |percent: u8, detail: &str| shared.progress(generation, percent, detail);
    let cx = LoadContext::new(&ctx.stop, &progress);

    let started = Instant::now();
    info!(loader = ctx.loader.name(), variant = %ctx.bundle.variant, "loading engine");
    let engine = ctx.loader.load(&ctx.bundle, &cx)?;

    if engine.hop_size() == 0 || engine.sample_rate() == 0 {
        return Err(DenoiseError::EngineLoadFailed(format!(
            "engine reported hop {} at {} Hz",
            engine.hop_size(),
            engine.sample_rate()
        )));
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "engine loaded");
    Ok(engine)
}

/// Host-rate samples to read per iteration so that one read yields about one hop.
fn host_chunk_len(hop: usize, host_rate: u32, engine_rate: u32) -> usize {
    if host_rate == engine_rate {
        return hop;
    }
    ((hop as u64 * host_rate as u64).div_ceil(engine_rate as u64) as usize).max(1)
}

/// Still the session the controller is waiting on.
fn is_current(ctx: &WorkerContext) -> bool {
    !ctx.stop.load(Ordering::Acquire) && ctx.shared.generation() == ctx.generation
}

fn process_until_stopped(ctx: &mut WorkerContext, mut engine: Box<dyn Denoiser>) -> Result<()> {
    // A load that ignored cancellation can finish after the session ended.
    if !is_current(ctx) {
        debug!("session ended before processing began");
        return Ok(());
    }

    let hop = engine.hop_size();
    let engine_rate = engine.sample_rate();
    let read_len = host_chunk_len(hop, ctx.host_rate, engine_rate);

    let mut to_engine = RateConverter::new(ctx.host_rate, engine_rate, read_len)?;
    let mut to_host = RateConverter::new(engine_rate, ctx.host_rate, hop)?;

    let mut recorder = ctx.record_path.as_deref().and_then(|path| {
        match WavRecorder::create(path, engine_rate, ctx.generation) {
            Ok(r) => {
                info!(path = %path.display(), "recording processed audio");
                Some(r)
            }
            Err(e) => {
                warn!(path = %path.display(), "recording disabled: {e}");
                None
            }
        }
    });

    if ctx.drop_backlog_on_ready {
        let dropped = ctx.processing.discard_pending();
        debug!(dropped, "discarded raw backlog accumulated during load");
    }

    let diagnostics: &TransportDiagnostics = ctx.shared.diagnostics();
    let mut raw = vec![0f32; read_len];
    let mut engine_in: Vec<f32> = Vec::with_capacity(hop * 4);
    let mut engine_out = vec![0f32; hop];
    let mut host_out: Vec<f32> = Vec::with_capacity(read_len * 4);
    let mut failures = 0u64;

    'outer: loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        if ctx.processing.read_for_processing(&mut raw) == 0 {
            TransportDiagnostics::add(&diagnostics.idle_waits, 1);
            thread::sleep(ctx.idle_sleep);
            continue;
        }

        to_engine.process_into(&raw, &mut engine_in);

        let mut consumed = 0;
        while engine_in.len() - consumed >= hop {
            // Chunk boundary: a stop abandons whatever is left.
            if ctx.stop.load(Ordering::Acquire) {
                break 'outer;
            }

            let chunk = &engine_in[consumed..consumed + hop];
            match engine.process_chunk(chunk, &mut engine_out) {
                Ok(()) => TransportDiagnostics::add(&diagnostics.chunks_processed, 1),
                Err(e) => {
                    failures += 1;
                    TransportDiagnostics::add(&diagnostics.chunk_failures, 1);
                    if failures == 1 || failures % 100 == 0 {
                        warn!(failures, policy = ?ctx.failure_policy, "chunk failed: {e}");
                    }
                    match ctx.failure_policy {
                        FailurePolicy::Passthrough => engine_out.copy_from_slice(chunk),
                        FailurePolicy::Silence => engine_out.fill(0.0),
                    }
                }
            }

            if let Some(Err(e)) = recorder.as_mut().map(|rec| rec.write(&engine_out)) {
                warn!("recording stopped: {e}");
                if let Some(rec) = recorder.take() {
                    let _ = rec.discard();
                }
            }

            to_host.process_into(&engine_out, &mut host_out);
            consumed += hop;
        }
        engine_in.drain(..consumed);

        if !host_out.is_empty() {
            let written = ctx.processing.write_processed(&host_out);
            TransportDiagnostics::add(&diagnostics.processed_dropped, host_out.len() - written);
            host_out.clear();
        }
    }

    if !engine_in.is_empty() {
        debug!(samples = engine_in.len(), "abandoned partial chunk on stop");
    }
    engine.reset();

    if let Some(rec) = recorder {
        let path = rec.path().to_path_buf();
        if ctx.shared.generation() != ctx.generation {
            // Replaced while stalled: the newer session owns `path`.
            match rec.discard() {
                Ok(()) => debug!(path = %path.display(), "stale recording discarded"),
                Err(e) => warn!(path = %path.display(), "failed to discard stale recording: {e}"),
            }
        } else {
            match rec.finalize() {
                Ok(samples) => info!(path = %path.display(), samples, "recording finalized"),
                Err(e) => warn!(path = %path.display(), "failed to finalize recording: {e}"),
            }
        }
    }

    info!(
        chunk_failures = failures,
        resample_failures = to_engine.failures() + to_host.failures(),
        "processing stopped"
    );
    Ok(())
}
