use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::dedup::NoiseFilter;
use crate::observe::TracingObserver;
use crate::pipeline::{Pipeline, Settings};
use crate::source::HttpFeedSource;
use crate::storage::Storage;

#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;

        let noise = NoiseFilter::new(&cfg.noise_patterns)?;
        let source = Arc::new(HttpFeedSource::new(
            cfg.feed_url()?,
            cfg.fetch_timeout.into(),
        )?);
        let storage = Arc::new(Storage::new(&cfg.database, cfg.store_timeout.into()).await?);

        let pipeline = Arc::new(Pipeline::new(
            source,
            storage.clone(),
            noise,
            Self::settings(&cfg),
            Arc::new(TracingObserver),
        ));
        let cfg = Arc::new(cfg);

        Ok(State {
            storage,
            cfg,
            pipeline,
        })
    }

    fn settings(cfg: &Config) -> Settings {
        Settings {
            feed_id: cfg.feed_id,
            lookback: cfg.lookback,
            fetch_timeout: cfg.fetch_timeout.into(),
            store_timeout: cfg.store_timeout.into(),
            dry_run: cfg.dry_run,
        }
    }
}
