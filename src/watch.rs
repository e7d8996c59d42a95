use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::{thread_rng, Rng};
use tokio::select;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::pipeline::Pipeline;

/// Runs the pipeline on a fixed interval. Runs never overlap: the next one is scheduled only
/// after the previous one has ended.
pub struct Watcher {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    max_initial_sleep: Duration,
}

impl Watcher {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, max_initial_sleep: Duration) -> Self {
        Self {
            pipeline,
            interval,
            max_initial_sleep,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        async move {
            let initial_sleep = if self.max_initial_sleep.is_zero() {
                Duration::ZERO
            } else {
                thread_rng().gen_range(Duration::ZERO..self.max_initial_sleep)
            };

            debug!("Scheduling the first run in {}s", initial_sleep.as_secs());
            let mut next_run = pin!(time::sleep(initial_sleep));
            let mut runs = 0usize;
            let mut failures = 0usize;
            let mut persisted = 0usize;

            loop {
                select! {
                    _ = cancel.cancelled() => {
                        debug!("Received a cancellation signal; exiting");
                        break;
                    }

                    _ = &mut next_run => {}
                }

                runs += 1;

                // Failures are reported by the pipeline; the next run starts over.
                match self.pipeline.run().await {
                    Ok(report) => persisted += report.persisted(),
                    Err(_) => failures += 1,
                }

                debug!("Scheduling the next run in {}s", self.interval.as_secs());
                next_run.as_mut().reset(Instant::now() + self.interval);
            }

            info!(runs, failures, persisted, "Stopped watching the feed");

            Ok(())
        }
        .instrument(info_span!("watcher"))
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::dedup::NoiseFilter;
    use crate::entry::{EntryRecord, RawEntry};
    use crate::observe::TracingObserver;
    use crate::pipeline::Settings;
    use crate::source::FeedSource;
    use crate::storage::EntryStore;

    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for SlowSource {
        async fn fetch(&self) -> Result<Vec<RawEntry>> {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            time::sleep(Duration::from_millis(15)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.fetches.fetch_add(1, Ordering::SeqCst);

            Err(anyhow!("feed unavailable"))
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl EntryStore for EmptyStore {
        async fn recent_guids(&self, _limit: usize) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn insert_entries(&self, records: &[EntryRecord]) -> Result<u64> {
            Ok(records.len() as u64)
        }
    }

    fn pipeline(source: Arc<SlowSource>) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            source,
            Arc::new(EmptyStore),
            NoiseFilter::default(),
            Settings {
                feed_id: 1,
                lookback: 10,
                fetch_timeout: Duration::from_secs(1),
                store_timeout: Duration::from_secs(1),
                dry_run: false,
            },
            Arc::new(TracingObserver),
        ))
    }

    #[tokio::test]
    async fn keeps_running_after_failures_without_overlap() {
        let source = Arc::new(SlowSource::default());
        let watcher = Watcher::new(pipeline(source.clone()), Duration::from_millis(1), Duration::ZERO);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watcher.run(cancel.clone()));

        while source.fetches.load(Ordering::SeqCst) < 3 {
            time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let source = Arc::new(SlowSource::default());
        let watcher = Watcher::new(pipeline(source.clone()), Duration::from_secs(60), Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        watcher.run(cancel).await.unwrap();

        assert!(source.fetches.load(Ordering::SeqCst) <= 1);
    }
}
