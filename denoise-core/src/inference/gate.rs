//! Built-in engine: RMS noise gate with hangover.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming chunk.
//! 2. If RMS ≥ `threshold` → gate open, reset hangover counter.
//! 3. If RMS < `threshold` and hangover counter > 0 → keep the gate open,
//!    decrement counter (keeps syllable tails).
//! 4. Otherwise → gate closed: attenuate to `floor`.
//!
//! The applied gain moves linearly from the previous chunk's gain to the new
//! target across the chunk, so opening and closing never clicks.

use tracing::debug;

use super::{ArtifactBundle, Denoiser, DenoiserLoader, EngineVariant, LoadContext};
use crate::error::{DenoiseError, Result};

pub const GATE_HOP_SIZE: usize = 480;
pub const GATE_SAMPLE_RATE: u32 = 48_000;

/// Tuning for one gate variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    /// RMS level above which a chunk passes unattenuated.
    pub threshold: f32,
    /// Chunks the gate stays open after the level drops below `threshold`.
    pub hangover_chunks: u32,
    /// Linear gain applied while the gate is closed.
    pub floor: f32,
}

impl GateParams {
    pub fn for_variant(variant: EngineVariant) -> Self {
        match variant {
            EngineVariant::Original => Self {
                threshold: 0.01,
                hangover_chunks: 8,
                floor: 0.1,
            },
            EngineVariant::Optimized => Self {
                threshold: 0.015,
                hangover_chunks: 5,
                floor: 0.05,
            },
            EngineVariant::Fast => Self {
                threshold: 0.02,
                hangover_chunks: 2,
                floor: 0.0,
            },
        }
    }
}

impl Default for GateParams {
    fn default() -> Self {
        Self::for_variant(EngineVariant::Original)
    }
}

/// A simple energy-gated denoiser.
#[derive(Debug, Clone)]
pub struct GateDenoiser {
    params: GateParams,
    hop_size: usize,
    hangover_counter: u32,
    /// Gain applied at the end of the previous chunk.
    gain: f32,
}

impl GateDenoiser {
    pub fn new(params: GateParams) -> Self {
        Self {
            params,
            hop_size: GATE_HOP_SIZE,
            hangover_counter: 0,
            gain: params.floor,
        }
    }

    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    pub fn params(&self) -> GateParams {
        self.params
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    fn is_open(&mut self, rms: f32) -> bool {
        if rms >= self.params.threshold {
            self.hangover_counter = self.params.hangover_chunks;
            true
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            true
        } else {
            false
        }
    }
}

impl Denoiser for GateDenoiser {
    fn hop_size(&self) -> usize {
        self.hop_size
    }

    fn sample_rate(&self) -> u32 {
        GATE_SAMPLE_RATE
    }

    fn process_chunk(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            return Err(DenoiseError::EngineProcessFailed(format!(
                "gate chunk length mismatch: input {} output {}",
                input.len(),
                output.len()
            )));
        }

        let rms = Self::rms(input);
        if !rms.is_finite() {
            return Err(DenoiseError::EngineProcessFailed(
                "non-finite samples in chunk".into(),
            ));
        }

        let target = if self.is_open(rms) { 1.0 } else { self.params.floor };
        let start = self.gain;
        let step = (target - start) / input.len().max(1) as f32;
        for (i, (out, sample)) in output.iter_mut().zip(input).enumerate() {
            *out = sample * (start + step * (i + 1) as f32);
        }
        self.gain = target;
        Ok(())
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
        self.gain = self.params.floor;
    }
}

/// Builds a `GateDenoiser` tuned for the bundle's variant without touching disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl DenoiserLoader for BuiltinLoader {
    fn name(&self) -> &str {
        "builtin-gate"
    }

    fn load(&self, bundle: &ArtifactBundle, cx: &LoadContext<'_>) -> Result<Box<dyn Denoiser>> {
        cx.check_cancelled()?;
        let params = GateParams::for_variant(bundle.variant);
        debug!(variant = %bundle.variant, ?params, "gate engine ready");
        Ok(Box::new(GateDenoiser::new(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use std::path::Path;

    fn gate(threshold: f32, hangover: u32, floor: f32) -> GateDenoiser {
        GateDenoiser::new(GateParams {
            threshold,
            hangover_chunks: hangover,
            floor,
        })
        .with_hop_size(4)
    }

    fn run(gate: &mut GateDenoiser, input: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        gate.process_chunk(&input, &mut out).unwrap();
        out
    }

    #[test]
    fn silence_stays_at_floor() {
        let mut g = gate(0.02, 0, 0.0);
        assert_eq!(run(&mut g, [0.001; 4]), [0.0; 4]);
    }

    #[test]
    fn loud_chunk_ramps_up_then_passes() {
        let mut g = gate(0.02, 0, 0.0);
        let first = run(&mut g, [0.5; 4]);
        assert_relative_eq!(first[0], 0.125);
        assert_relative_eq!(first[3], 0.5);
        assert_eq!(run(&mut g, [0.5; 4]), [0.5; 4]);
    }

    #[test]
    fn hangover_keeps_gate_open() {
        let mut g = gate(0.02, 2, 0.0);
        run(&mut g, [0.5; 4]);
        assert_eq!(run(&mut g, [0.01; 4]), [0.01; 4]);
        assert_eq!(run(&mut g, [0.01; 4]), [0.01; 4]);
        let closing = run(&mut g, [0.01; 4]);
        assert_relative_eq!(closing[3], 0.0);
    }

    #[test]
    fn reset_closes_gate() {
        let mut g = gate(0.02, 5, 0.0);
        run(&mut g, [0.5; 4]);
        g.reset();
        let out = run(&mut g, [0.01; 4]);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn non_finite_input_is_a_chunk_failure() {
        let mut g = gate(0.02, 0, 0.0);
        let mut out = [0.0f32; 4];
        assert!(matches!(
            g.process_chunk(&[f32::NAN, 0.0, 0.0, 0.0], &mut out),
            Err(DenoiseError::EngineProcessFailed(_))
        ));
    }

    #[test]
    fn loader_picks_variant_tuning() {
        let bundle = ArtifactBundle::resolve(Path::new("a"), EngineVariant::Fast);
        let engine = BuiltinLoader.load(&bundle, &LoadContext::detached()).unwrap();
        assert_eq!(engine.hop_size(), GATE_HOP_SIZE);
        assert_eq!(
            GateParams::for_variant(EngineVariant::Fast).floor,
            0.0
        );
    }
}
