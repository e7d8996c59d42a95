mod classify;
mod cli;
mod config;
mod dedup;
mod entry;
mod error;
mod observe;
mod pipeline;
mod source;
mod state;
mod storage;
mod watch;

use std::process::ExitCode;

use anyhow::Result;
use cli::Args;
use state::State;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use watch::Watcher;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("ADVISORY_INGEST_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    set_up_logging();

    let state = match start().await {
        Ok(state) => state,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let exit_code = match state.cfg.interval {
        Some(interval) => watch(&state, interval.into()).await,

        // A failed run has already been reported with its cause.
        None => match state.pipeline.run().await {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        },
    };

    state.storage.close().await;

    exit_code
}

async fn start() -> Result<State> {
    let mut args = Args::parse();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain([
            "./advisory-ingest.toml".into(),
            "/etc/advisory-ingest.toml".into(),
        ])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(args);

    State::new(config).await
}

async fn watch(state: &State, interval: std::time::Duration) -> ExitCode {
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("could not listen for Ctrl-C: {e}");
            }

            cancel.cancel();
        }
    });

    let watcher = Watcher::new(
        state.pipeline.clone(),
        interval,
        state.cfg.max_initial_sleep.into(),
    );

    match watcher.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,

        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
