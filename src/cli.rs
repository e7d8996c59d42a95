use clap::ValueHint;

use std::path::PathBuf;

use crate::config::Duration;

#[derive(clap::Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, advisory-ingest looks for a file named `advisory-ingest.toml` in the following
    /// directories (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        env = "ADVISORY_INGEST_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// URL of the RSS feed to ingest.
    #[arg(long, env = "ADVISORY_INGEST_FEED_URL", value_hint(ValueHint::Url))]
    pub feed_url: Option<String>,

    /// Identifier stored with every entry of the feed.
    #[arg(long, env = "ADVISORY_INGEST_FEED_ID")]
    pub feed_id: Option<i32>,

    /// Number of recently stored entries to check new ones against.
    #[arg(long, env = "ADVISORY_INGEST_LOOKBACK")]
    pub lookback: Option<usize>,

    /// Keep running, ingesting the feed every INTERVAL (e.g. `15m`).
    #[arg(long, env = "ADVISORY_INGEST_INTERVAL")]
    pub interval: Option<Duration>,

    /// Fetch and classify entries without storing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Database host.
    #[arg(long, env = "PGHOST")]
    pub db_host: Option<String>,

    /// Database port.
    #[arg(long, env = "PGPORT")]
    pub db_port: Option<u16>,

    /// Database user.
    #[arg(long, env = "PGUSER")]
    pub db_user: Option<String>,

    /// Database password.
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database name.
    #[arg(long, env = "PGDATABASE")]
    pub db_name: Option<String>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
