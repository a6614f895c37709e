//! Transport counters shared by the audio callback and the processing worker.
//!
//! Every field is a relaxed atomic so the real-time side can count overflow
//! and underrun without locks or logging.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Default)]
pub struct TransportDiagnostics {
    /// Captured samples accepted into the raw ring.
    pub samples_captured: AtomicU64,
    /// Captured samples dropped because the raw ring was full.
    pub overflow_samples: AtomicU64,
    /// Denoised samples delivered to the output block.
    pub samples_played: AtomicU64,
    /// Output samples padded with silence because the denoised ring ran dry.
    pub underrun_samples: AtomicU64,
    /// Output blocks that needed any silence padding.
    pub underrun_blocks: AtomicU64,
    /// Engine chunks processed successfully.
    pub chunks_processed: AtomicU64,
    /// Engine chunks that failed and were substituted.
    pub chunk_failures: AtomicU64,
    /// Processed samples dropped because the denoised ring was full.
    pub processed_dropped: AtomicU64,
    /// Worker iterations that found less than a full chunk and slept.
    pub idle_waits: AtomicU64,
}

impl TransportDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            overflow_samples: self.overflow_samples.load(Ordering::Relaxed),
            samples_played: self.samples_played.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            underrun_blocks: self.underrun_blocks.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            processed_dropped: self.processed_dropped.load(Ordering::Relaxed),
            idle_waits: self.idle_waits.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, value: usize) {
        if value > 0 {
            counter.fetch_add(value as u64, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicU64; 9] {
        [
            &self.samples_captured,
            &self.overflow_samples,
            &self.samples_played,
            &self.underrun_samples,
            &self.underrun_blocks,
            &self.chunks_processed,
            &self.chunk_failures,
            &self.processed_dropped,
            &self.idle_waits,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_captured: u64,
    pub overflow_samples: u64,
    pub samples_played: u64,
    pub underrun_samples: u64,
    pub underrun_blocks: u64,
    pub chunks_processed: u64,
    pub chunk_failures: u64,
    pub processed_dropped: u64,
    pub idle_waits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let diag = TransportDiagnostics::default();
        for counter in diag.counters() {
            TransportDiagnostics::add(counter, 3);
        }
        assert_eq!(diag.snapshot().overflow_samples, 3);
        assert_eq!(diag.snapshot().idle_waits, 3);

        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }

    #[test]
    fn snapshot_serializes_with_camel_case_fields() {
        let diag = TransportDiagnostics::default();
        TransportDiagnostics::add(&diag.underrun_samples, 480);
        let json = serde_json::to_value(diag.snapshot()).expect("serialize snapshot");
        assert_eq!(json["underrunSamples"], 480);
        assert_eq!(json["chunksProcessed"], 0);
    }
}
