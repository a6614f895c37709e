//! Sample-rate conversion between the host rate and the engine rate.
//!
//! Runs on the processing worker only, where allocation is allowed. When the
//! two rates match the converter is a plain copy and no rubato session is
//! created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{DenoiseError, Result};

/// Converts mono f32 audio from one fixed rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input carried over between calls until a full rubato block exists.
    pending: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`, reused on every call.
    scratch: Vec<Vec<f32>>,
    failures: u64,
}

impl RateConverter {
    /// `chunk_size` is the number of input frames rubato consumes per pass.
    ///
    /// # Errors
    /// `DenoiseError::InvalidConfig` if a rate is zero or rubato rejects the ratio.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(DenoiseError::InvalidConfig(format!(
                "rate converter needs non-zero rates and chunk size (from={from_rate} to={to_rate} chunk={chunk_size})"
            )));
        }

        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                scratch: Vec::new(),
                failures: 0,
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| DenoiseError::InvalidConfig(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(from_rate, to_rate, chunk_size, "rate conversion enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            scratch,
            failures: 0,
        })
    }

    /// Append the converted form of `samples` to `out`.
    ///
    /// Input that does not fill a whole rubato block is kept for the next call,
    /// so `out` may receive nothing.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return;
        };

        self.pending.extend_from_slice(samples);

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_size {
            let block = &self.pending[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => {
                    // The block is dropped; log the first failure and every 100th.
                    self.failures += 1;
                    if self.failures == 1 || self.failures % 100 == 0 {
                        error!(failures = self.failures, "resampler process error: {e}");
                    }
                }
            }
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Blocks rubato rejected so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_copy_input() {
        let mut rc = RateConverter::new(48_000, 48_000, 480).unwrap();
        assert!(rc.is_passthrough());

        let samples: Vec<f32> = (0..300).map(|i| i as f32 * 0.002).collect();
        let mut out = Vec::new();
        rc.process_into(&samples, &mut out);
        assert_eq!(out, samples);
    }

    #[test]
    fn upsampling_44k1_to_48k_produces_proportional_output() {
        let mut rc = RateConverter::new(44_100, 48_000, 441).unwrap();
        assert!(!rc.is_passthrough());

        let mut out = Vec::new();
        for _ in 0..10 {
            rc.process_into(&[0.0f32; 441], &mut out);
        }
        let expected = 4_800isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 48,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn short_input_is_held_until_a_block_is_complete() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        let mut out = Vec::new();

        rc.process_into(&[0.0f32; 300], &mut out);
        assert!(out.is_empty());

        rc.process_into(&[0.0f32; 300], &mut out);
        assert!(!out.is_empty(), "second call completes a block");
    }

    #[test]
    fn failed_blocks_are_counted_and_skipped() {
        let mut rc = RateConverter::new(48_000, 44_100, 480).unwrap();
        // Too small for any output block.
        rc.scratch[0].truncate(1);

        let mut out = Vec::new();
        for _ in 0..250 {
            rc.process_into(&[0.1f32; 480], &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(rc.failures(), 250);
        assert!(rc.pending.is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 48_000, 480),
            Err(DenoiseError::InvalidConfig(_))
        ));
    }
}
