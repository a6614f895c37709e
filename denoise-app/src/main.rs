//! denoise-demo: live microphone → denoiser → speakers.
//!
//! ```text
//! denoise-demo [--simulate] [--settings <path>]
//! ```
//!
//! `--simulate` replaces the sound card with a generated noisy sine so the
//! transport can be exercised headless.

mod commands;
mod settings;
mod state;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use commands::{execute, Command, Outcome, HELP};
use settings::{default_settings_path, load_settings, save_settings};
use state::AppState;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

struct Args {
    simulate: bool,
    settings_path: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        simulate: false,
        settings_path: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--simulate" => args.simulate = true,
            "--settings" => {
                let path = iter.next().context("--settings needs a path")?;
                args.settings_path = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument `{other}`\n\nusage: denoise-demo [--simulate] [--settings <path>]"),
        }
    }
    Ok(args)
}

/// Log every status change until the controller goes away.
async fn forward_status(state: Arc<AppState>) {
    let mut rx = state.controller.subscribe_status();
    loop {
        match rx.recv().await {
            Ok(event) => match (event.progress, event.detail.as_deref()) {
                (Some(pct), detail) => info!(status = ?event.status, progress = pct, detail, "session"),
                (None, Some(detail)) => info!(status = ?event.status, detail, "session"),
                (None, None) => info!(status = ?event.status, "session"),
            },
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "status stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn command_loop(state: &AppState) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("{HELP}");
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            debug!("stdin closed");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let outcome = line
            .parse::<Command>()
            .and_then(|command| execute(state, command));
        match outcome {
            Ok(Outcome::Continue(text)) => println!("{text}"),
            Ok(Outcome::Quit) => return Ok(()),
            Err(e) => println!("error: {e:#}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("denoise=info")),
        )
        .init();

    let args = parse_args()?;
    let settings_path = args.settings_path.unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        engine = %settings.engine,
        variant = %settings.variant,
        gain = settings.gain,
        simulate = args.simulate,
        "denoise-demo starting"
    );
    if !settings_path.exists() {
        if let Err(e) = save_settings(&settings_path, &settings) {
            warn!("failed to write default settings: {e}");
        }
    }

    let state = Arc::new(AppState::new(settings, settings_path, args.simulate)?);
    let forwarder = tokio::spawn(forward_status(Arc::clone(&state)));

    let repl_state = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || command_loop(&repl_state))
        .await
        .context("command loop panicked")?;

    if state.controller.state().is_active() {
        if let Err(e) = state.controller.stop() {
            warn!("stop on exit failed: {e}");
        }
    }
    forwarder.abort();
    info!("denoise-demo exiting");
    result
}
