use std::path::PathBuf;
use std::sync::Arc;

use denoise_core::{
    ArtifactLoader, AudioHost, BuiltinLoader, DenoiserLoader, SessionController, SimulatedHost,
    StubLoader,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::settings::{save_settings, AppSettings, ENGINE_RNNOISE, ENGINE_STUB};

/// State shared by the command loop and the status forwarder.
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub settings: Mutex<AppSettings>,
    pub settings_path: PathBuf,
    pub simulate: bool,
}

impl AppState {
    pub fn new(settings: AppSettings, settings_path: PathBuf, simulate: bool) -> anyhow::Result<Self> {
        let loader = build_loader(&settings)?;
        let host = build_host(&settings, simulate);
        let controller = SessionController::new(settings.session_config(), loader, host);
        controller.set_gain(settings.gain);
        Ok(Self {
            controller: Arc::new(controller),
            settings: Mutex::new(settings),
            settings_path,
            simulate,
        })
    }

    /// Apply `edit` to the settings and write them back to disk.
    pub fn update_settings(&self, edit: impl FnOnce(&mut AppSettings)) {
        let snapshot = {
            let mut settings = self.settings.lock();
            edit(&mut settings);
            settings.normalize();
            settings.clone()
        };
        if let Err(e) = save_settings(&self.settings_path, &snapshot) {
            warn!(path = ?self.settings_path, "failed to save settings: {e}");
        }
    }
}

pub fn build_loader(settings: &AppSettings) -> anyhow::Result<Arc<dyn DenoiserLoader>> {
    let loader: Arc<dyn DenoiserLoader> = match (settings.engine.as_str(), settings.require_artifacts) {
        (ENGINE_STUB, false) => Arc::new(StubLoader::new()),
        (ENGINE_STUB, true) => Arc::new(ArtifactLoader::new(StubLoader::new())),
        (ENGINE_RNNOISE, require_artifacts) => rnnoise_loader(require_artifacts)?,
        (_, false) => Arc::new(BuiltinLoader),
        (_, true) => Arc::new(ArtifactLoader::new(BuiltinLoader)),
    };
    info!(
        loader = loader.name(),
        artifacts = settings.require_artifacts,
        "denoiser loader selected"
    );
    Ok(loader)
}

#[cfg(feature = "rnnoise")]
fn rnnoise_loader(require_artifacts: bool) -> anyhow::Result<Arc<dyn DenoiserLoader>> {
    use denoise_core::RnnoiseLoader;
    Ok(if require_artifacts {
        Arc::new(ArtifactLoader::new(RnnoiseLoader))
    } else {
        Arc::new(RnnoiseLoader)
    })
}

#[cfg(not(feature = "rnnoise"))]
fn rnnoise_loader(_require_artifacts: bool) -> anyhow::Result<Arc<dyn DenoiserLoader>> {
    anyhow::bail!("engine `rnnoise` needs the `rnnoise` feature");
}

pub fn build_host(settings: &AppSettings, simulate: bool) -> Arc<dyn AudioHost> {
    if simulate {
        info!("using simulated audio host");
        return Arc::new(SimulatedHost::realtime_48k().with_sample_rate(settings.sample_rate));
    }
    let mut host = denoise_core::CpalHost::new();
    if let Some(name) = settings.input_device.as_deref() {
        host = host.with_input_device(name);
    }
    if let Some(name) = settings.output_device.as_deref() {
        host = host.with_output_device(name);
    }
    Arc::new(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_follows_engine_setting() {
        let gate = build_loader(&AppSettings::default()).unwrap();
        assert_eq!(gate.name(), "builtin-gate");

        let stub = build_loader(&AppSettings {
            engine: ENGINE_STUB.into(),
            ..AppSettings::default()
        })
        .unwrap();
        assert_eq!(stub.name(), StubLoader::new().name());
    }

    #[cfg(not(feature = "rnnoise"))]
    #[test]
    fn rnnoise_without_feature_is_rejected() {
        let settings = AppSettings {
            engine: ENGINE_RNNOISE.into(),
            ..AppSettings::default()
        };
        assert!(build_loader(&settings).is_err());
    }

    #[test]
    fn update_settings_persists_normalized_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let state = AppState::new(AppSettings::default(), path.clone(), true).unwrap();

        state.update_settings(|s| s.gain = 40.0);

        assert_eq!(state.settings.lock().gain, crate::settings::MAX_GAIN);
        assert_eq!(crate::settings::load_settings(&path).gain, crate::settings::MAX_GAIN);
    }
}
