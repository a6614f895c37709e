//! Real-time side of the transport.
//!
//! # Design constraints
//!
//! Host audio callbacks run on an OS audio thread at elevated priority. The
//! code reachable from `CaptureCallback::process` **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Log or perform I/O
//!
//! Everything here is ring-buffer cursor moves, slice copies and relaxed
//! atomics. Overflow and underrun are counted in `TransportDiagnostics`
//! instead of being logged.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. `AudioHost::open` is therefore
//! called on a dedicated host thread owned by the session, and the returned
//! `ActiveStream` is closed on that same thread.

pub mod device;
pub mod resample;
pub mod simulated;

#[cfg(feature = "audio-cpal")]
pub mod cpal_host;

#[cfg(feature = "audio-cpal")]
pub use cpal_host::CpalHost;
pub use simulated::{SignalSource, SimulatedHost};

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use crate::{
    buffering::{CaptureEnd, RingConsumer, RingProducer, TransportDiagnostics},
    error::Result,
};

/// Upper bound accepted by `GainControl::set`.
pub const MAX_GAIN: f32 = 4.0;

/// Linear output gain shared between the control plane and the callback.
///
/// Stored as `f32` bits in an `AtomicU32`, so reads on the audio thread
/// never block.
#[derive(Clone, Debug)]
pub struct GainControl(Arc<AtomicU32>);

impl GainControl {
    pub fn new(gain: f32) -> Self {
        let control = Self(Arc::new(AtomicU32::new(1.0f32.to_bits())));
        control.set(gain);
        control
    }

    /// Non-finite values are ignored; everything else is clamped to `[0, MAX_GAIN]`.
    pub fn set(&self, gain: f32) {
        if !gain.is_finite() {
            return;
        }
        self.0
            .store(gain.clamp(0.0, MAX_GAIN).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Per-block handler driven by the host audio subsystem.
///
/// Each call writes the captured block into the raw ring, fills the output
/// block from the denoised ring (zero-padding any shortfall) and applies
/// the current gain.
pub struct CaptureCallback {
    input: CaptureInput,
    output: PlaybackOutput,
}

impl CaptureCallback {
    pub fn new(
        end: CaptureEnd,
        gain: GainControl,
        running: Arc<AtomicBool>,
        diagnostics: Arc<TransportDiagnostics>,
    ) -> Self {
        let (raw, denoised) = end.into_parts();
        Self {
            input: CaptureInput {
                raw,
                running: Arc::clone(&running),
                diagnostics: Arc::clone(&diagnostics),
            },
            output: PlaybackOutput {
                denoised,
                gain,
                running,
                diagnostics,
            },
        }
    }

    /// Handle one duplex block.
    #[inline]
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.input.on_input(input);
        self.output.on_output(output);
    }

    /// Split for hosts that deliver capture and playback on separate callbacks.
    ///
    /// The raw ring keeps its single producer (the input half) and the
    /// denoised ring its single consumer (the output half).
    pub fn split(self) -> (CaptureInput, PlaybackOutput) {
        (self.input, self.output)
    }
}

/// Capture direction of a `CaptureCallback`.
pub struct CaptureInput {
    raw: RingProducer<f32>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<TransportDiagnostics>,
}

impl CaptureInput {
    /// Push a captured block; whatever does not fit is dropped.
    #[inline]
    pub fn on_input(&mut self, block: &[f32]) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let written = self.raw.push(block);
        TransportDiagnostics::add(&self.diagnostics.samples_captured, written);
        TransportDiagnostics::add(&self.diagnostics.overflow_samples, block.len() - written);
    }
}

/// Playback direction of a `CaptureCallback`.
pub struct PlaybackOutput {
    denoised: RingConsumer<f32>,
    gain: GainControl,
    running: Arc<AtomicBool>,
    diagnostics: Arc<TransportDiagnostics>,
}

impl PlaybackOutput {
    /// Fill `block` with denoised audio, silence for any shortfall, then apply gain.
    #[inline]
    pub fn on_output(&mut self, block: &mut [f32]) {
        if !self.running.load(Ordering::Relaxed) {
            block.fill(0.0);
            return;
        }

        let read = self.denoised.pop_into(block);
        block[read..].fill(0.0);

        let missing = block.len() - read;
        TransportDiagnostics::add(&self.diagnostics.samples_played, read);
        if missing > 0 {
            TransportDiagnostics::add(&self.diagnostics.underrun_samples, missing);
            TransportDiagnostics::add(&self.diagnostics.underrun_blocks, 1);
        }

        let gain = self.gain.get();
        if gain != 1.0 {
            for sample in &mut block[..read] {
                *sample *= gain;
            }
        }
    }
}

/// A running capture + playback stream. Closing it stops further callbacks.
///
/// Not required to be `Send`: it is created and closed on the session's
/// host thread.
pub trait ActiveStream {
    /// Sample rate the host actually runs at.
    fn sample_rate(&self) -> u32;

    /// Stop the stream. No callback runs after this returns.
    fn close(self: Box<Self>);
}

/// Audio subsystem that can drive a `CaptureCallback`.
pub trait AudioHost: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Open capture and playback at (or near) `sample_rate`, feeding `callback`.
    ///
    /// # Errors
    /// `DenoiseError::CaptureUnavailable` when the devices cannot be acquired.
    fn open(&self, callback: CaptureCallback, sample_rate: u32) -> Result<Box<dyn ActiveStream>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::buffering::{AudioBridge, DiagnosticsSnapshot, ProcessingEnd};

    fn callback(
        capacity: usize,
        gain: f32,
    ) -> (CaptureCallback, ProcessingEnd, Arc<TransportDiagnostics>) {
        let (capture, processing) = AudioBridge::new(capacity).unwrap().split();
        let diagnostics = Arc::new(TransportDiagnostics::default());
        let cb = CaptureCallback::new(
            capture,
            GainControl::new(gain),
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&diagnostics),
        );
        (cb, processing, diagnostics)
    }

    #[test]
    fn underrun_pads_output_with_silence() {
        let (mut cb, mut processing, diagnostics) = callback(64, 1.0);
        processing.write_processed(&[0.5, 0.5, 0.5]);

        let mut out = [7.0f32; 8];
        cb.process(&[0.0; 8], &mut out);

        assert_eq!(&out[..3], &[0.5, 0.5, 0.5]);
        assert!(out[3..].iter().all(|s| *s == 0.0));
        let snap = diagnostics.snapshot();
        assert_eq!(snap.samples_played, 3);
        assert_eq!(snap.underrun_samples, 5);
        assert_eq!(snap.underrun_blocks, 1);
    }

    #[test]
    fn overflow_drops_excess_input_and_counts_it() {
        let (mut cb, mut processing, diagnostics) = callback(10, 1.0);
        let mut out = [0.0f32; 6];
        cb.process(&[0.1; 6], &mut out);
        cb.process(&[0.2; 6], &mut out);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.samples_captured, 10);
        assert_eq!(snap.overflow_samples, 2);

        let mut chunk = [0.0f32; 10];
        assert_eq!(processing.read_for_processing(&mut chunk), 10);
        assert_relative_eq!(chunk[5], 0.1);
        assert_relative_eq!(chunk[6], 0.2);
    }

    #[test]
    fn gain_scales_only_delivered_samples() {
        let (mut cb, mut processing, _) = callback(32, 0.5);
        processing.write_processed(&[0.8, -0.4]);

        let mut out = [0.0f32; 4];
        cb.process(&[], &mut out);
        assert_relative_eq!(out[0], 0.4);
        assert_relative_eq!(out[1], -0.2);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn stopped_callback_emits_silence_and_leaves_rings_alone() {
        let (capture, mut processing) = AudioBridge::new(16).unwrap().split();
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(TransportDiagnostics::default());
        let mut cb = CaptureCallback::new(
            capture,
            GainControl::default(),
            Arc::clone(&running),
            Arc::clone(&diagnostics),
        );
        processing.write_processed(&[0.3; 4]);
        running.store(false, Ordering::SeqCst);

        let mut out = [1.0f32; 4];
        cb.process(&[0.9; 4], &mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(processing.available_for_processing(), 0);
        assert_eq!(diagnostics.snapshot(), DiagnosticsSnapshot::default());
    }

    #[test]
    fn split_halves_behave_like_the_whole() {
        let (cb, mut processing, _) = callback(16, 2.0);
        let (mut input, mut output) = cb.split();

        input.on_input(&[0.25; 4]);
        let mut chunk = [0.0f32; 4];
        assert_eq!(processing.read_for_processing(&mut chunk), 4);
        processing.write_processed(&chunk);

        let mut out = [0.0f32; 4];
        output.on_output(&mut out);
        for s in out {
            assert_relative_eq!(s, 0.5);
        }
    }

    #[test]
    fn gain_control_clamps_and_ignores_nan() {
        let gain = GainControl::new(2.5);
        assert_relative_eq!(gain.get(), 2.5);
        gain.set(f32::NAN);
        assert_relative_eq!(gain.get(), 2.5);
        gain.set(-1.0);
        assert_eq!(gain.get(), 0.0);
        gain.set(100.0);
        assert_relative_eq!(gain.get(), MAX_GAIN);
    }
}
