use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::time::error::Elapsed;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::classify::classify;
use crate::dedup::{deduplicate, Deduplicated, NoiseFilter, RecentKeySet};
use crate::entry::EntryRecord;
use crate::error::RunError;
use crate::observe::StageObserver;
use crate::source::FeedSource;
use crate::storage::EntryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetching,
    Filtering,
    Classifying,
    Deciding,
    Persisting,
    Done,
    Aborted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Classifying => "classifying",
            Self::Deciding => "deciding",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Persisted(usize),
    NoNewEntries,
    DryRun(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub already_seen: usize,
    pub repeated: usize,
    pub noise: usize,
    pub outcome: Outcome,
    pub timings: Vec<StageTiming>,
}

impl RunReport {
    pub fn removed(&self) -> usize {
        self.already_seen + self.repeated + self.noise
    }

    pub fn persisted(&self) -> usize {
        match self.outcome {
            Outcome::Persisted(count) => count,
            Outcome::NoNewEntries | Outcome::DryRun(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub feed_id: i32,
    pub lookback: usize,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub dry_run: bool,
}

struct StageClock<'a> {
    observer: &'a dyn StageObserver,
    timings: Vec<StageTiming>,
}

impl<'a> StageClock<'a> {
    fn new(observer: &'a dyn StageObserver) -> Self {
        Self {
            observer,
            timings: Vec::with_capacity(5),
        }
    }

    async fn measure<F, R>(&mut self, stage: Stage, fut: F) -> R
    where
        F: std::future::Future<Output = R>,
    {
        self.observer.stage_started(stage);
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();
        self.observer.stage_finished(stage, elapsed);
        self.timings.push(StageTiming { stage, elapsed });

        result
    }
}

fn within<T>(result: Result<Result<T>, Elapsed>, limit: Duration) -> Result<T> {
    result.unwrap_or_else(|_| Err(anyhow!("timed out after {}ms", limit.as_millis())))
}

/// Runs fetch, dedup, classification and persisting for one feed.
pub struct Pipeline {
    source: Arc<dyn FeedSource>,
    store: Arc<dyn EntryStore>,
    noise: NoiseFilter,
    settings: Settings,
    observer: Arc<dyn StageObserver>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FeedSource>,
        store: Arc<dyn EntryStore>,
        noise: NoiseFilter,
        settings: Settings,
        observer: Arc<dyn StageObserver>,
    ) -> Self {
        Self {
            source,
            store,
            noise,
            settings,
            observer,
        }
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let span = info_span!("run", feed_id = self.settings.feed_id);
        let start = Instant::now();
        let result = self.run_stages().instrument(span.clone()).await;

        let _enter = span.enter();
        let stage = match &result {
            Ok(report) => {
                self.observer.run_finished(report);
                Stage::Done
            }

            Err(e) => {
                self.observer.run_aborted(e);
                Stage::Aborted
            }
        };
        debug!(%stage, elapsed_ms = start.elapsed().as_millis() as u64, "Run ended");

        result
    }

    async fn run_stages(&self) -> Result<RunReport, RunError> {
        let mut clock = StageClock::new(&*self.observer);
        let settings = &self.settings;

        let (fetched, recent) = clock
            .measure(Stage::Fetching, async {
                tokio::join!(
                    timeout(settings.fetch_timeout, self.source.fetch()),
                    timeout(
                        settings.store_timeout,
                        self.store.recent_guids(settings.lookback),
                    ),
                )
            })
            .await;
        let fetched = within(fetched, settings.fetch_timeout);
        let recent = within(recent, settings.store_timeout);

        let (entries, recent) = match (fetched, recent) {
            (Ok(entries), Ok(recent)) => (entries, RecentKeySet::new(recent)),

            (Err(e), recent) => {
                if let Err(read_error) = recent {
                    warn!("Reading recent entries failed as well: {read_error:#}");
                }

                return Err(RunError::Fetch(e));
            }

            (Ok(_), Err(e)) => return Err(RunError::StoreRead(e)),
        };
        let fetched = entries.len();
        info!(fetched, recent = recent.len(), "Fetched the feed");

        if recent.is_empty() {
            debug!("Nothing is stored yet; every fetched entry is new");
        }

        let Deduplicated {
            fresh,
            already_seen,
            repeated,
            noise,
        } = clock
            .measure(Stage::Filtering, async {
                deduplicate(entries, &recent, &self.noise)
            })
            .await;

        let records = clock
            .measure(Stage::Classifying, async {
                fresh
                    .into_iter()
                    .map(|entry| {
                        let tags = classify(&entry.content);

                        EntryRecord::new(entry, settings.feed_id, tags)
                    })
                    .collect::<Vec<_>>()
            })
            .await;

        let mut report = RunReport {
            fetched,
            already_seen,
            repeated,
            noise,
            outcome: Outcome::NoNewEntries,
            timings: vec![],
        };

        let write_needed = clock
            .measure(Stage::Deciding, async {
                !records.is_empty() && !settings.dry_run
            })
            .await;

        if !write_needed {
            if settings.dry_run && !records.is_empty() {
                for record in &records {
                    info!(
                        guid = %record.entry.guid,
                        title = %record.entry.title,
                        priority = %record.priority(),
                        lines = ?record.tags.line_codes(),
                        "Would store an entry",
                    );
                }

                report.outcome = Outcome::DryRun(records.len());
            }

            report.timings = clock.timings;

            return Ok(report);
        }

        let persisted = clock
            .measure(Stage::Persisting, persist(&*self.store, &records, settings.store_timeout))
            .await?;
        report.outcome = Outcome::Persisted(persisted);
        report.timings = clock.timings;

        Ok(report)
    }
}

/// Writes a non-empty batch in a single all-or-nothing operation.
///
/// `limit` covers the commit too. A write that times out may therefore still have been
/// committed; its guids are then recent on the next run and nothing is written twice.
pub async fn persist(
    store: &dyn EntryStore,
    records: &[EntryRecord],
    limit: Duration,
) -> Result<usize, RunError> {
    if records.is_empty() {
        return Err(RunError::StoreWrite(anyhow!("refusing to write an empty batch")));
    }

    let written = match timeout(limit, store.insert_entries(records)).await {
        Ok(written) => written.map_err(RunError::StoreWrite)?,

        Err(_) => {
            return Err(RunError::StoreWrite(anyhow!(
                "timed out after {}ms; the batch may have been committed anyway",
                limit.as_millis()
            )));
        }
    };

    if written != records.len() as u64 {
        return Err(RunError::StoreWrite(anyhow!(
            "the store reported {written} rows written for a batch of {}",
            records.len()
        )));
    }

    Ok(records.len())
}
