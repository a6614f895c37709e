//! Denoising engine abstraction.
//!
//! The `Denoiser` trait decouples the processing worker from any specific
//! backend (passthrough stub, noise gate, RNNoise, ...). Engines are built by a
//! `DenoiserLoader` from an `ArtifactBundle` on the worker thread, so loading
//! may block on I/O for as long as it needs.
//!
//! `&mut self` on `process_chunk` expresses that engines are stateful: the
//! worker owns its engine exclusively and no locking is involved.

pub mod artifacts;
pub mod gate;
pub mod stub;

#[cfg(feature = "rnnoise")]
pub mod rnnoise;

pub use artifacts::ArtifactLoader;
pub use gate::{BuiltinLoader, GateDenoiser, GateParams};
pub use stub::{PassthroughDenoiser, StubLoader};

#[cfg(feature = "rnnoise")]
pub use rnnoise::{RnnoiseDenoiser, RnnoiseLoader};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DenoiseError, Result};

/// Runtime artifact file name inside every variant directory.
pub const RUNTIME_ARTIFACT: &str = "df_bg.wasm";
/// Model artifact shared by all variants, directly under the artifact root.
pub const MODEL_ARTIFACT: &str = "DeepFilterNet3_onnx.tar.gz";

/// Contract for denoising backends.
pub trait Denoiser: Send + 'static {
    /// Samples consumed and produced per `process_chunk` call.
    fn hop_size(&self) -> usize;

    /// Rate the engine expects its input at.
    fn sample_rate(&self) -> u32;

    /// Denoise exactly `hop_size()` samples from `input` into `output`.
    ///
    /// # Errors
    /// `DenoiseError::EngineProcessFailed` for a chunk the engine could not
    /// handle. The caller substitutes the chunk and keeps going.
    fn process_chunk(&mut self, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Drop any state carried between chunks.
    fn reset(&mut self);
}

/// Builds a `Denoiser` for a given artifact bundle.
pub trait DenoiserLoader: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Load and initialise an engine. Runs on the worker thread.
    ///
    /// Long-running loaders should poll `cx.is_cancelled()` and return
    /// `DenoiseError::LoadCancelled` so a stop during loading finishes quickly.
    ///
    /// # Errors
    /// `DenoiseError::EngineLoadFailed` or `DenoiseError::ArtifactNotFound`.
    fn load(&self, bundle: &ArtifactBundle, cx: &LoadContext<'_>) -> Result<Box<dyn Denoiser>>;
}

static NEVER_CANCELLED: AtomicBool = AtomicBool::new(false);
static IGNORE_PROGRESS: fn(u8, &str) = |_, _| {};

/// What a loader can see of the session while it loads.
pub struct LoadContext<'a> {
    cancel: &'a AtomicBool,
    progress: &'a dyn Fn(u8, &str),
}

impl<'a> LoadContext<'a> {
    pub fn new(cancel: &'a AtomicBool, progress: &'a dyn Fn(u8, &str)) -> Self {
        Self { cancel, progress }
    }

    /// A context that is never cancelled and discards progress.
    pub fn detached() -> LoadContext<'static> {
        LoadContext {
            cancel: &NEVER_CANCELLED,
            progress: &IGNORE_PROGRESS,
        }
    }

    /// True once the session asked the worker to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// `Err(LoadCancelled)` when cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DenoiseError::LoadCancelled)
        } else {
            Ok(())
        }
    }

    /// Report load progress in percent (0–100).
    pub fn report_progress(&self, percent: u8, detail: &str) {
        (self.progress)(percent.min(100), detail);
    }
}

/// Named performance/quality trade-off, each backed by its own runtime artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVariant {
    #[default]
    Original,
    Optimized,
    Fast,
}

impl EngineVariant {
    pub const ALL: [EngineVariant; 3] = [Self::Original, Self::Optimized, Self::Fast];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Optimized => "optimized",
            Self::Fast => "fast",
        }
    }

    /// Directory under the artifact root holding this variant's runtime.
    pub fn runtime_dir(self) -> &'static str {
        match self {
            Self::Original => "pkg",
            Self::Optimized => "pkg_optimized",
            Self::Fast => "pkg_fast",
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineVariant {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == lowered)
            .ok_or_else(|| {
                DenoiseError::InvalidConfig(format!(
                    "unknown engine variant '{s}' (expected original, optimized or fast)"
                ))
            })
    }
}

/// On-disk artifacts for one engine variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBundle {
    pub variant: EngineVariant,
    pub runtime: PathBuf,
    pub model: PathBuf,
}

impl ArtifactBundle {
    /// `<root>/<runtime_dir>/df_bg.wasm` plus `<root>/DeepFilterNet3_onnx.tar.gz`.
    pub fn resolve(root: &Path, variant: EngineVariant) -> Self {
        Self {
            variant,
            runtime: root.join(variant.runtime_dir()).join(RUNTIME_ARTIFACT),
            model: root.join(MODEL_ARTIFACT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn variants_parse_case_insensitively() {
        assert_eq!("Fast".parse::<EngineVariant>().unwrap(), EngineVariant::Fast);
        assert_eq!(
            " OPTIMIZED ".parse::<EngineVariant>().unwrap(),
            EngineVariant::Optimized
        );
        assert!(matches!(
            "turbo".parse::<EngineVariant>(),
            Err(DenoiseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn variants_serialize_lowercase() {
        let json = serde_json::to_string(&EngineVariant::Optimized).unwrap();
        assert_eq!(json, "\"optimized\"");
        let back: EngineVariant = serde_json::from_str("\"fast\"").unwrap();
        assert_eq!(back, EngineVariant::Fast);
    }

    #[test]
    fn bundle_paths_follow_variant_layout() {
        let bundle = ArtifactBundle::resolve(Path::new("/srv/artifacts"), EngineVariant::Fast);
        assert_eq!(bundle.runtime, Path::new("/srv/artifacts/pkg_fast/df_bg.wasm"));
        assert_eq!(
            bundle.model,
            Path::new("/srv/artifacts/DeepFilterNet3_onnx.tar.gz")
        );
    }

    #[test]
    fn load_context_reports_and_cancels() {
        let cancel = AtomicBool::new(false);
        let seen = Mutex::new(Vec::new());
        let record = |pct: u8, detail: &str| seen.lock().push((pct, detail.to_string()));
        let cx = LoadContext::new(&cancel, &record);

        cx.report_progress(150, "done");
        assert!(cx.check_cancelled().is_ok());
        cancel.store(true, Ordering::Release);
        assert!(matches!(cx.check_cancelled(), Err(DenoiseError::LoadCancelled)));
        assert_eq!(seen.lock().as_slice(), &[(100, "done".to_string())]);
    }

    #[test]
    fn detached_context_is_never_cancelled() {
        let cx = LoadContext::detached();
        cx.report_progress(50, "ignored");
        assert!(!cx.is_cancelled());
    }
}
