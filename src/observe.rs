use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::RunError;
use crate::pipeline::{Outcome, RunReport, Stage};

/// Receives the stage boundaries of a pipeline run.
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn stage_finished(&self, stage: Stage, elapsed: Duration);

    fn run_finished(&self, report: &RunReport);

    fn run_aborted(&self, error: &RunError);
}

/// Reports stages as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn stage_started(&self, stage: Stage) {
        debug!(%stage, "Stage started");
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration) {
        debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "Stage finished");
    }

    fn run_finished(&self, report: &RunReport) {
        let timings = report
            .timings
            .iter()
            .map(|timing| format!("{}={}ms", timing.stage, timing.elapsed.as_millis()))
            .collect::<Vec<_>>()
            .join(" ");

        let message = match report.outcome {
            Outcome::Persisted(count) => format!("Stored {count} new entries"),
            Outcome::NoNewEntries => "No new rows".to_owned(),
            Outcome::DryRun(count) => {
                format!("Dry run: {count} new entries would have been stored")
            }
        };

        info!(
            fetched = report.fetched,
            removed = report.removed(),
            already_seen = report.already_seen,
            repeated = report.repeated,
            noise = report.noise,
            persisted = report.persisted(),
            %timings,
            "{message}",
        );
    }

    fn run_aborted(&self, error: &RunError) {
        error!(stage = %error.stage(), "Run aborted: {}", error_chain(error));
    }
}

/// Formats an error with its causes, the way `{:#}` does for `anyhow::Error`.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut result = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        result.push_str(": ");
        result.push_str(&cause.to_string());
        source = cause.source();
    }

    result
}
