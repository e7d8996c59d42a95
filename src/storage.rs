use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::entry::EntryRecord;

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;
const COLUMN_COUNT: usize = 11;

/// Durable storage of feed entries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Guids of the `limit` most recently published entries, newest first.
    async fn recent_guids(&self, limit: usize) -> Result<Vec<String>>;

    /// Stores all of `records` or none of them. Returns the number of rows written.
    async fn insert_entries(&self, records: &[EntryRecord]) -> Result<u64>;
}

pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(cfg: &DatabaseConfig, acquire_timeout: Duration) -> Result<Self> {
        // Starts from the PG* environment variables.
        let mut options = PgConnectOptions::new();

        if let Some(host) = &cfg.host {
            options = options.host(host);
        }

        if let Some(port) = cfg.port {
            options = options.port(port);
        }

        if let Some(user) = &cfg.user {
            options = options.username(user);
        }

        if let Some(password) = &cfg.password {
            options = options.password(password);
        }

        if let Some(name) = &cfg.name {
            options = options.database(name);
        }

        let host = options.get_host().to_owned();
        let database = options.get_database().unwrap_or_default().to_owned();

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .with_context(|| anyhow!("could not connect to the database `{database}` at `{host}`"))?;
        info!("Using the database `{database}` at `{host}`");
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EntryStore for Storage {
    async fn recent_guids(&self, limit: usize) -> Result<Vec<String>> {
        let mut tx = self.begin().await?;
        let guids = tx.get_recent_guids(limit).await?;
        tx.commit().await?;

        Ok(guids)
    }

    async fn insert_entries(&self, records: &[EntryRecord]) -> Result<u64> {
        let mut tx = self.begin().await?;
        let written = tx.store_entries(records).await?;

        // Dropping the transaction without committing rolls it back.
        if written != records.len() as u64 {
            return Err(anyhow!(
                "{written} rows were inserted for a batch of {}",
                records.len()
            ));
        }

        tx.commit().await?;

        Ok(written)
    }
}

pub struct Tx(Transaction<'static, Postgres>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_recent_guids(&mut self, limit: usize) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT guid
            FROM feed_details
            ORDER BY pub_date DESC
            LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve recent guids")
    }

    #[instrument(level = "TRACE", skip(self, records), fields(entry_count = records.len()))]
    pub async fn store_entries(&mut self, records: &[EntryRecord]) -> Result<u64> {
        let mut written = 0;

        for chunk in records.chunks(MAX_BIND_PARAMS / COLUMN_COUNT) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT
                INTO feed_details (
                  title,
                  description,
                  link,
                  pub_date,
                  guid,
                  feed_id,
                  cancel_flag,
                  delay_flag,
                  change_flag,
                  priority,
                  lines
                ) ",
            );

            query.push_values(chunk, |mut row, record| {
                debug!(guid = %record.entry.guid, title = %record.entry.title, "Storing entry");

                row.push_bind(record.entry.title.clone())
                    .push_bind(record.entry.content.clone())
                    .push_bind(record.entry.link.clone())
                    .push_bind(record.entry.pub_date)
                    .push_bind(record.entry.guid.clone())
                    .push_bind(record.feed_id)
                    .push_bind(record.tags.cancel)
                    .push_bind(record.tags.delay)
                    .push_bind(record.tags.change)
                    .push_bind(record.priority().as_str())
                    .push_bind(record.tags.line_codes());
            });

            written += query
                .build()
                .execute(self.0.as_mut())
                .await
                .context("could not insert entries")?
                .rows_affected();
        }

        Ok(written)
    }
}
