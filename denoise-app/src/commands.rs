//! Interactive command handlers.
//!
//! One line of input maps to one `Command`; `execute` runs it against the
//! shared `AppState` and returns the text to print.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use denoise_core::audio::device::{list_input_devices, list_output_devices, DeviceInfo};
use denoise_core::EngineVariant;
use serde::Serialize;
use tracing::info;

use crate::settings::normalize_gain;
use crate::state::AppState;

/// How long `start` waits for the engine before handing the prompt back.
const START_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Gain(f32),
    Variant(EngineVariant),
    Status,
    Devices,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = words.next();
        if words.next().is_some() {
            return Err(anyhow!("too many arguments for `{verb}`"));
        }
        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("start", None) => Self::Start,
            ("stop", None) => Self::Stop,
            ("gain", Some(value)) => {
                let gain: f32 = value
                    .parse()
                    .with_context(|| format!("invalid gain `{value}`"))?;
                Self::Gain(gain)
            }
            ("variant", Some(name)) => Self::Variant(name.parse()?),
            ("status", None) => Self::Status,
            ("devices", None) => Self::Devices,
            ("help" | "?", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            ("gain" | "variant", None) => return Err(anyhow!("`{verb}` needs a value")),
            (other, _) => return Err(anyhow!("unknown command `{other}` (try `help`)")),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue(String),
    Quit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    status: denoise_core::SessionStatus,
    variant: EngineVariant,
    gain: f32,
    simulated: bool,
    last_error: Option<String>,
    abandoned_workers: u64,
    diagnostics: denoise_core::DiagnosticsSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceReport {
    inputs: Vec<DeviceInfo>,
    outputs: Vec<DeviceInfo>,
}

pub fn execute(state: &AppState, command: Command) -> anyhow::Result<Outcome> {
    let controller = &state.controller;
    let message = match command {
        Command::Start => {
            controller.start()?;
            controller.wait_until_running(START_WAIT)?;
            format!("running ({})", controller.variant())
        }
        Command::Stop => {
            controller.stop()?;
            let diag = controller.diagnostics();
            info!(
                chunks_processed = diag.chunks_processed,
                chunk_failures = diag.chunk_failures,
                overflow_samples = diag.overflow_samples,
                underrun_samples = diag.underrun_samples,
                "transport diagnostics on stop"
            );
            "stopped".to_string()
        }
        Command::Gain(requested) => {
            let gain = normalize_gain(requested);
            controller.set_gain(gain);
            state.update_settings(|s| s.gain = gain);
            format!("gain {gain:.2}")
        }
        Command::Variant(variant) => {
            controller.switch_variant(variant)?;
            state.update_settings(|s| s.variant = variant);
            format!("variant {variant}")
        }
        Command::Status => {
            let report = StatusReport {
                status: controller.state(),
                variant: controller.variant(),
                gain: controller.gain(),
                simulated: state.simulate,
                last_error: controller.last_error(),
                abandoned_workers: controller.abandoned_workers(),
                diagnostics: controller.diagnostics(),
            };
            serde_json::to_string_pretty(&report)?
        }
        Command::Devices => serde_json::to_string_pretty(&DeviceReport {
            inputs: list_input_devices(),
            outputs: list_output_devices(),
        })?,
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Outcome::Quit),
    };
    Ok(Outcome::Continue(message))
}

pub const HELP: &str = "\
commands:
  start             open audio and load the engine
  stop              stop the session
  gain <x>          output gain, 0.0 to 4.0
  variant <name>    original | optimized | fast
  status            session state and transport counters
  devices           list audio devices
  quit              stop and exit";

#[cfg(test)]
mod tests {
    use super::*;

    use crate::settings::{load_settings, AppSettings, ENGINE_STUB};
    use denoise_core::SessionStatus;

    fn state(dir: &tempfile::TempDir) -> AppState {
        let settings = AppSettings {
            engine: ENGINE_STUB.into(),
            ..AppSettings::default()
        };
        AppState::new(settings, dir.path().join("settings.json"), true).unwrap()
    }

    fn message(outcome: Outcome) -> String {
        match outcome {
            Outcome::Continue(text) => text,
            Outcome::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!("  STOP ".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!("gain 0.5".parse::<Command>().unwrap(), Command::Gain(0.5));
        assert_eq!(
            "variant Fast".parse::<Command>().unwrap(),
            Command::Variant(EngineVariant::Fast)
        );
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<Command>().is_err());
        assert!("gain".parse::<Command>().is_err());
        assert!("gain loud".parse::<Command>().is_err());
        assert!("variant turbo".parse::<Command>().is_err());
        assert!("start now".parse::<Command>().is_err());
        assert!("rewind".parse::<Command>().is_err());
    }

    #[test]
    fn gain_is_clamped_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let text = message(execute(&state, Command::Gain(7.0)).unwrap());
        assert_eq!(text, "gain 4.00");
        assert_eq!(state.controller.gain(), 4.0);
        assert_eq!(load_settings(&state.settings_path).gain, 4.0);
    }

    #[test]
    fn start_status_stop() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let text = message(execute(&state, Command::Start).unwrap());
        assert!(text.starts_with("running"));
        assert!(execute(&state, Command::Start).is_err());

        let status = message(execute(&state, Command::Status).unwrap());
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["simulated"], true);
        assert!(json["diagnostics"].is_object());

        message(execute(&state, Command::Stop).unwrap());
        assert_eq!(state.controller.state(), SessionStatus::Idle);
    }

    #[test]
    fn variant_switch_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        execute(&state, Command::Variant(EngineVariant::Optimized)).unwrap();
        assert_eq!(state.controller.variant(), EngineVariant::Optimized);
        assert_eq!(
            load_settings(&state.settings_path).variant,
            EngineVariant::Optimized
        );
    }

    #[test]
    fn quit_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        assert_eq!(execute(&state, Command::Quit).unwrap(), Outcome::Quit);
    }
}
