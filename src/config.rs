mod types;

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

pub use self::types::*;

const DEFAULT_FEED_URL: &str = "https://www.njtransit.com/rss/RailAdvisories_feed.xml";

const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    r"new (rail )?timetables?",
    r"timetables? (are|is) now available",
    r"\btitle vi\b",
    r"public hearings?",
    r"notice of proposed",
];

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Config {
    pub feed_url: String,
    pub feed_id: i32,
    pub lookback: usize,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub interval: Option<Duration>,
    pub max_initial_sleep: Duration,
    pub noise_patterns: Vec<String>,
    pub database: DatabaseConfig,

    #[serde(skip)]
    pub dry_run: bool,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.feed_url, args.feed_url);
        set_if_some(&mut self.feed_id, args.feed_id);
        set_if_some(&mut self.lookback, args.lookback);
        set_if_some(&mut self.interval, args.interval.map(Some));
        self.dry_run |= args.dry_run;
        set_if_some(&mut self.database.host, args.db_host.map(Some));
        set_if_some(&mut self.database.port, args.db_port.map(Some));
        set_if_some(&mut self.database.user, args.db_user.map(Some));
        set_if_some(&mut self.database.password, args.db_password.map(Some));
        set_if_some(&mut self.database.name, args.db_name.map(Some));
    }

    pub fn feed_url(&self) -> Result<Url> {
        Url::parse(&self.feed_url).with_context(|| anyhow!("invalid feed URL `{}`", self.feed_url))
    }

    pub fn validate(&self) -> Result<()> {
        self.feed_url()?;

        if self.lookback == 0 {
            bail!("`lookback` must be at least 1");
        }

        if self.fetch_timeout.is_zero() || self.store_timeout.is_zero() {
            bail!("timeouts must be positive");
        }

        if self.interval.is_some_and(|interval| interval.is_zero()) {
            bail!("`interval` must be positive");
        }

        if self.database.max_connections == 0 {
            bail!("`database.max-connections` must be at least 1");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed_url: DEFAULT_FEED_URL.into(),
            feed_id: 1,
            lookback: 100,
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
            interval: None,
            max_initial_sleep: Duration::from_secs(0),
            noise_patterns: DEFAULT_NOISE_PATTERNS.iter().map(|&p| p.into()).collect(),
            database: Default::default(),
            dry_run: false,
        }
    }
}

/// Connection parameters. Unset values fall back to the `PG*` environment variables.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            name: None,
            max_connections: 2,
        }
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
