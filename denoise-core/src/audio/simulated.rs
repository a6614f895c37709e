//! Timer-driven stand-in for a sound card.
//!
//! `SimulatedHost` calls `CaptureCallback::process` from its own thread with
//! fixed-size blocks at a fixed period, feeding a generated signal and
//! optionally forwarding every output block to a channel. Used by the tests
//! and by the demo's `--simulate` mode on machines without audio devices.

use std::f64::consts::TAU;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use super::{ActiveStream, AudioHost, CaptureCallback};
use crate::error::{DenoiseError, Result};

/// Signal fed into the capture side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalSource {
    Silence,
    Constant(f32),
    Sine { frequency: f32, amplitude: f32 },
    /// Sine plus uniform white noise of the given peak level.
    NoisySine {
        frequency: f32,
        amplitude: f32,
        noise: f32,
    },
}

impl Default for SignalSource {
    fn default() -> Self {
        Self::NoisySine {
            frequency: 220.0,
            amplitude: 0.3,
            noise: 0.05,
        }
    }
}

struct SignalGenerator {
    source: SignalSource,
    sample_rate: f64,
    phase: f64,
    rng: StdRng,
}

impl SignalGenerator {
    fn new(source: SignalSource, sample_rate: u32) -> Self {
        Self {
            source,
            sample_rate: sample_rate as f64,
            phase: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    fn fill(&mut self, block: &mut [f32]) {
        match self.source {
            SignalSource::Silence => block.fill(0.0),
            SignalSource::Constant(value) => block.fill(value),
            SignalSource::Sine {
                frequency,
                amplitude,
            } => {
                for sample in block.iter_mut() {
                    *sample = amplitude * self.next_phase(frequency).sin() as f32;
                }
            }
            SignalSource::NoisySine {
                frequency,
                amplitude,
                noise,
            } => {
                for sample in block.iter_mut() {
                    let tone = amplitude * self.next_phase(frequency).sin() as f32;
                    *sample = tone + self.rng.gen_range(-1.0f32..=1.0) * noise;
                }
            }
        }
    }

    fn next_phase(&mut self, frequency: f32) -> f64 {
        let current = self.phase;
        self.phase = (self.phase + TAU * frequency as f64 / self.sample_rate) % TAU;
        current
    }
}

/// Audio host that drives the callback from a timer thread.
#[derive(Clone)]
pub struct SimulatedHost {
    block_size: usize,
    period: Duration,
    source: SignalSource,
    sample_rate: Option<u32>,
    output_tx: Option<Sender<Vec<f32>>>,
}

impl SimulatedHost {
    /// Deliver `block_size`-sample blocks every `period`.
    pub fn new(block_size: usize, period: Duration) -> Self {
        Self {
            block_size,
            period,
            source: SignalSource::default(),
            sample_rate: None,
            output_tx: None,
        }
    }

    /// 480-sample blocks every 10 ms (48 kHz real time).
    pub fn realtime_48k() -> Self {
        Self::new(480, Duration::from_millis(10))
    }

    pub fn with_source(mut self, source: SignalSource) -> Self {
        self.source = source;
        self
    }

    /// Forward a copy of every output block to `tx`.
    pub fn with_output(mut self, tx: Sender<Vec<f32>>) -> Self {
        self.output_tx = Some(tx);
        self
    }

    /// Report this rate instead of the requested one, as a device with a
    /// fixed native rate would.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }
}

impl AudioHost for SimulatedHost {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self, mut callback: CaptureCallback, sample_rate: u32) -> Result<Box<dyn ActiveStream>> {
        if self.block_size == 0 {
            return Err(DenoiseError::CaptureUnavailable(
                "simulated host block size is zero".into(),
            ));
        }

        let rate = self.sample_rate.unwrap_or(sample_rate);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let mut generator = SignalGenerator::new(self.source, rate);
        let block_size = self.block_size;
        let period = self.period;
        let output_tx = self.output_tx.clone();

        let handle = thread::Builder::new()
            .name("denoise-sim-host".into())
            .spawn(move || {
                let mut input = vec![0f32; block_size];
                let mut output = vec![0f32; block_size];
                let mut next_tick = Instant::now();
                let mut blocks = 0u64;

                while !thread_stop.load(Ordering::Acquire) {
                    generator.fill(&mut input);
                    callback.process(&input, &mut output);
                    if let Some(tx) = output_tx.as_ref() {
                        let _ = tx.send(output.clone());
                    }
                    blocks += 1;

                    next_tick += period;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    }
                }
                debug!(blocks, "simulated host stopped");
            })
            .map_err(|e| DenoiseError::CaptureUnavailable(format!("simulated host thread: {e}")))?;

        info!(sample_rate = rate, block_size, ?period, "simulated host opened");

        Ok(Box::new(SimulatedStream {
            stop,
            handle: Some(handle),
            sample_rate: rate,
        }))
    }
}

struct SimulatedStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl ActiveStream for SimulatedStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::GainControl;
    use crate::buffering::{AudioBridge, TransportDiagnostics};

    #[test]
    fn drives_callback_and_forwards_output_blocks() {
        let (capture, mut processing) = AudioBridge::new(4_800).unwrap().split();
        let diagnostics = Arc::new(TransportDiagnostics::default());
        let callback = CaptureCallback::new(
            capture,
            GainControl::default(),
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&diagnostics),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let host = SimulatedHost::new(48, Duration::from_millis(1))
            .with_source(SignalSource::Constant(0.25))
            .with_output(tx);

        let stream = host.open(callback, 48_000).unwrap();
        assert_eq!(stream.sample_rate(), 48_000);
        thread::sleep(Duration::from_millis(50));
        stream.close();

        let blocks: Vec<Vec<f32>> = rx.try_iter().collect();
        assert!(!blocks.is_empty());
        assert!(blocks.iter().all(|b| b.len() == 48));
        assert!(blocks.iter().flatten().all(|s| *s == 0.0), "nothing processed yet");

        let mut chunk = [0.0f32; 48];
        assert_eq!(processing.read_for_processing(&mut chunk), 48);
        assert!(chunk.iter().all(|s| *s == 0.25));
        assert!(diagnostics.snapshot().underrun_blocks > 0);
    }

    #[test]
    fn sine_stays_within_amplitude() {
        let mut generator = SignalGenerator::new(
            SignalSource::Sine {
                frequency: 1_000.0,
                amplitude: 0.5,
            },
            48_000,
        );
        let mut block = [0f32; 480];
        generator.fill(&mut block);
        assert!(block.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(block.iter().any(|s| s.abs() > 0.4));
    }

    #[test]
    fn reported_rate_can_be_pinned() {
        let (capture, _processing) = AudioBridge::new(64).unwrap().split();
        let callback = CaptureCallback::new(
            capture,
            GainControl::default(),
            Arc::new(AtomicBool::new(true)),
            Arc::new(TransportDiagnostics::default()),
        );
        let host = SimulatedHost::new(16, Duration::from_millis(5)).with_sample_rate(44_100);
        let stream = host.open(callback, 48_000).unwrap();
        assert_eq!(stream.sample_rate(), 44_100);
        stream.close();
    }
}
