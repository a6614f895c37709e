//! RNNoise engine via the pure-Rust `nnnoiseless` crate.
//!
//! RNNoise works on 480-sample frames at 48 kHz with samples in the i16
//! range, so each chunk is scaled up by 32768 on the way in and back down on
//! the way out.

use nnnoiseless::DenoiseState;
use tracing::debug;

use super::{ArtifactBundle, Denoiser, DenoiserLoader, LoadContext};
use crate::error::{DenoiseError, Result};

const I16_SCALE: f32 = 32768.0;
/// 480 samples, 10 ms at 48 kHz.
const FRAME_SIZE: usize = DenoiseState::<'static>::FRAME_SIZE;

pub struct RnnoiseDenoiser {
    state: Box<DenoiseState<'static>>,
    scaled_in: Vec<f32>,
    scaled_out: Vec<f32>,
    /// Voice probability of the last frame.
    last_vad: f32,
}

impl RnnoiseDenoiser {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            scaled_in: vec![0.0; FRAME_SIZE],
            scaled_out: vec![0.0; FRAME_SIZE],
            last_vad: 0.0,
        }
    }

    pub fn last_voice_probability(&self) -> f32 {
        self.last_vad
    }
}

impl Default for RnnoiseDenoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Denoiser for RnnoiseDenoiser {
    fn hop_size(&self) -> usize {
        FRAME_SIZE
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn process_chunk(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let frame = FRAME_SIZE;
        if input.len() != frame || output.len() != frame {
            return Err(DenoiseError::EngineProcessFailed(format!(
                "rnnoise expects {frame}-sample frames, got {} in / {} out",
                input.len(),
                output.len()
            )));
        }

        for (dst, src) in self.scaled_in.iter_mut().zip(input) {
            *dst = src * I16_SCALE;
        }
        self.last_vad = self
            .state
            .process_frame(&mut self.scaled_out, &self.scaled_in);
        for (dst, src) in output.iter_mut().zip(&self.scaled_out) {
            *dst = src / I16_SCALE;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = DenoiseState::new();
        self.last_vad = 0.0;
    }
}

/// Builds an `RnnoiseDenoiser`; the model is compiled into the crate, so every
/// variant gets the same engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RnnoiseLoader;

impl DenoiserLoader for RnnoiseLoader {
    fn name(&self) -> &str {
        "rnnoise"
    }

    fn load(&self, bundle: &ArtifactBundle, cx: &LoadContext<'_>) -> Result<Box<dyn Denoiser>> {
        cx.check_cancelled()?;
        debug!(variant = %bundle.variant, "rnnoise engine ready");
        Ok(Box::new(RnnoiseDenoiser::new()))
    }
}
