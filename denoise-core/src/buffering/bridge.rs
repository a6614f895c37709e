//! The two rings of a session, split into one view per execution context.
//!
//! ```text
//!              raw ring                          denoised ring
//! CaptureEnd ──write_captured──► ProcessingEnd ──write_processed──► CaptureEnd
//!            ◄─read_for_playback─────────────────────────────────────┘
//! ```
//!
//! The capture end can only write raw and read denoised; the processing end
//! can only read raw and write denoised. Neither view can reach the other
//! side's cursors.

use super::{RingBuffer, RingConsumer, RingProducer};
use crate::error::Result;

/// Both rings of one session, before they are handed to their owners.
pub struct AudioBridge {
    raw: RingBuffer<f32>,
    denoised: RingBuffer<f32>,
}

impl AudioBridge {
    /// Allocate both rings with `capacity` samples each.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            raw: RingBuffer::new(capacity)?,
            denoised: RingBuffer::new(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn split(self) -> (CaptureEnd, ProcessingEnd) {
        let (raw_tx, raw_rx) = self.raw.split();
        let (denoised_tx, denoised_rx) = self.denoised.split();
        (
            CaptureEnd {
                raw: raw_tx,
                denoised: denoised_rx,
            },
            ProcessingEnd {
                raw: raw_rx,
                denoised: denoised_tx,
            },
        )
    }
}

/// Real-time view: write captured audio, read denoised audio.
pub struct CaptureEnd {
    raw: RingProducer<f32>,
    denoised: RingConsumer<f32>,
}

impl CaptureEnd {
    /// Returns how many samples were accepted; the rest are dropped by the caller.
    #[inline]
    pub fn write_captured(&mut self, samples: &[f32]) -> usize {
        self.raw.push(samples)
    }

    /// Fills the front of `out` with denoised samples and returns the count.
    #[inline]
    pub fn read_for_playback(&mut self, out: &mut [f32]) -> usize {
        self.denoised.pop_into(out)
    }

    pub fn available_for_playback(&self) -> usize {
        self.denoised.available_to_read()
    }

    /// Separate the two directions for hosts that run capture and playback
    /// on different callbacks.
    pub fn into_parts(self) -> (RingProducer<f32>, RingConsumer<f32>) {
        (self.raw, self.denoised)
    }
}

/// Worker view: read raw audio, write denoised audio.
pub struct ProcessingEnd {
    raw: RingConsumer<f32>,
    denoised: RingProducer<f32>,
}

impl ProcessingEnd {
    /// Read exactly `out.len()` samples, or nothing when fewer are available.
    ///
    /// Engines consume fixed-size chunks, so a partial read would only have
    /// to be stashed somewhere else.
    pub fn read_for_processing(&mut self, out: &mut [f32]) -> usize {
        if self.raw.available_to_read() < out.len() {
            return 0;
        }
        self.raw.pop_into(out)
    }

    pub fn write_processed(&mut self, samples: &[f32]) -> usize {
        self.denoised.push(samples)
    }

    pub fn available_for_processing(&self) -> usize {
        self.raw.available_to_read()
    }

    /// Drop whatever raw audio is still queued.
    pub fn discard_pending(&mut self) -> usize {
        self.raw.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_flow_capture_to_worker_to_playback() {
        let (mut capture, mut processing) = AudioBridge::new(16).unwrap().split();

        assert_eq!(capture.write_captured(&[0.1, 0.2, 0.3, 0.4]), 4);

        let mut chunk = [0.0f32; 4];
        assert_eq!(processing.read_for_processing(&mut chunk), 4);
        assert_eq!(chunk, [0.1, 0.2, 0.3, 0.4]);

        let doubled: Vec<f32> = chunk.iter().map(|s| s * 2.0).collect();
        assert_eq!(processing.write_processed(&doubled), 4);

        let mut out = [0.0f32; 6];
        assert_eq!(capture.read_for_playback(&mut out), 4);
        assert_eq!(&out[..4], &[0.2, 0.4, 0.6, 0.8]);
    }

    #[test]
    fn processing_reads_whole_chunks_only() {
        let (mut capture, mut processing) = AudioBridge::new(32).unwrap().split();
        capture.write_captured(&[1.0; 5]);

        let mut chunk = [0.0f32; 8];
        assert_eq!(processing.read_for_processing(&mut chunk), 0);
        assert_eq!(processing.available_for_processing(), 5);

        capture.write_captured(&[1.0; 3]);
        assert_eq!(processing.read_for_processing(&mut chunk), 8);
        assert_eq!(processing.available_for_processing(), 0);
    }

    #[test]
    fn full_raw_ring_drops_the_newest_samples() {
        let (mut capture, mut processing) = AudioBridge::new(4).unwrap().split();
        assert_eq!(capture.write_captured(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(capture.write_captured(&[4.0, 5.0, 6.0]), 1);

        let mut chunk = [0.0f32; 4];
        processing.read_for_processing(&mut chunk);
        assert_eq!(chunk, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn discard_pending_empties_raw_ring() {
        let (mut capture, mut processing) = AudioBridge::new(8).unwrap().split();
        capture.write_captured(&[0.5; 6]);
        assert_eq!(processing.discard_pending(), 6);
        assert_eq!(processing.available_for_processing(), 0);
    }
}
