//! Artifact-backed loading: read a variant's runtime and model files from
//! disk, then hand over to the engine factory.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::{ArtifactBundle, Denoiser, DenoiserLoader, LoadContext};
use crate::error::{DenoiseError, Result};

/// Wraps another loader and makes the variant's artifact files mandatory.
///
/// Progress is reported at 25 (runtime read), 50 (model read),
/// 75 (engine initialising) and 100 (ready).
#[derive(Debug, Clone)]
pub struct ArtifactLoader<L> {
    inner: L,
}

impl<L: DenoiserLoader> ArtifactLoader<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

/// Read a whole artifact; missing files and empty files are both fatal.
fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DenoiseError::ArtifactNotFound {
            path: path.to_path_buf(),
        },
        _ => DenoiseError::EngineLoadFailed(format!("read {}: {e}", path.display())),
    })?;
    if bytes.is_empty() {
        return Err(DenoiseError::EngineLoadFailed(format!(
            "artifact is empty: {}",
            path.display()
        )));
    }
    Ok(bytes)
}

impl<L: DenoiserLoader> DenoiserLoader for ArtifactLoader<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load(&self, bundle: &ArtifactBundle, cx: &LoadContext<'_>) -> Result<Box<dyn Denoiser>> {
        cx.check_cancelled()?;
        let runtime = read_artifact(&bundle.runtime)?;
        debug!(path = %bundle.runtime.display(), bytes = runtime.len(), "runtime artifact read");
        cx.report_progress(25, "runtime loaded");

        cx.check_cancelled()?;
        let model = read_artifact(&bundle.model)?;
        debug!(path = %bundle.model.display(), bytes = model.len(), "model artifact read");
        cx.report_progress(50, "model loaded");

        cx.check_cancelled()?;
        cx.report_progress(75, "initializing engine");
        let engine = self.inner.load(bundle, cx)?;

        info!(
            variant = %bundle.variant,
            engine = self.inner.name(),
            hop = engine.hop_size(),
            runtime_bytes = runtime.len(),
            model_bytes = model.len(),
            "engine loaded from artifacts"
        );
        cx.report_progress(100, "ready");
        Ok(engine)
    }
}
