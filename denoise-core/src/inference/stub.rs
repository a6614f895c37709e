//! `PassthroughDenoiser`: placeholder engine that copies input to output.
//!
//! Paired with `StubLoader`, which can simulate a slow artifact load and
//! inject load or chunk failures, so the whole transport can be exercised
//! end-to-end without real artifacts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{ArtifactBundle, Denoiser, DenoiserLoader, LoadContext};
use crate::error::{DenoiseError, Result};

/// 10 ms at 48 kHz.
pub const STUB_HOP_SIZE: usize = 480;
pub const STUB_SAMPLE_RATE: u32 = 48_000;

/// Granularity at which a delayed load checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// Copies each chunk unchanged, optionally failing every `fail_every`-th call.
pub struct PassthroughDenoiser {
    hop_size: usize,
    sample_rate: u32,
    fail_every: Option<usize>,
    calls: usize,
}

impl PassthroughDenoiser {
    pub fn new() -> Self {
        Self {
            hop_size: STUB_HOP_SIZE,
            sample_rate: STUB_SAMPLE_RATE,
            fail_every: None,
            calls: 0,
        }
    }

    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Fail every `n`-th chunk (1-based). `0` disables failures.
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }
}

impl Default for PassthroughDenoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Denoiser for PassthroughDenoiser {
    fn hop_size(&self) -> usize {
        self.hop_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process_chunk(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.calls += 1;
        if let Some(n) = self.fail_every {
            if self.calls % n == 0 {
                return Err(DenoiseError::EngineProcessFailed(format!(
                    "injected failure on chunk {}",
                    self.calls
                )));
            }
        }
        output.copy_from_slice(input);
        Ok(())
    }

    fn reset(&mut self) {
        debug!("PassthroughDenoiser::reset");
        self.calls = 0;
    }
}

/// Loader for `PassthroughDenoiser` that ignores the bundle's files.
#[derive(Debug, Clone, Default)]
pub struct StubLoader {
    delay: Duration,
    fail_load: bool,
    fail_every: usize,
    hop_size: Option<usize>,
    sample_rate: Option<u32>,
    loads: Arc<AtomicUsize>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before the engine is ready, as a real artifact fetch would.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every load fails with `EngineLoadFailed`.
    pub fn failing(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Loaded engines fail every `n`-th chunk.
    pub fn with_chunk_failures(mut self, n: usize) -> Self {
        self.fail_every = n;
        self
    }

    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = Some(hop_size);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Number of completed loads, shared by all clones.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DenoiserLoader for StubLoader {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&self, bundle: &ArtifactBundle, cx: &LoadContext<'_>) -> Result<Box<dyn Denoiser>> {
        let deadline = Instant::now() + self.delay;
        loop {
            cx.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }

        if self.fail_load {
            return Err(DenoiseError::EngineLoadFailed(format!(
                "stub loader configured to fail ({} variant)",
                bundle.variant
            )));
        }

        let mut engine = PassthroughDenoiser::new().fail_every(self.fail_every);
        if let Some(hop) = self.hop_size {
            engine = engine.with_hop_size(hop);
        }
        if let Some(rate) = self.sample_rate {
            engine = engine.with_sample_rate(rate);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        debug!(variant = %bundle.variant, "stub engine ready");
        Ok(Box::new(engine))
    }
}
