//! Errors that abort a pipeline run.

use thiserror::Error;

use crate::pipeline::Stage;

/// A failure that ends a run without writing anything.
#[derive(Error, Debug)]
pub enum RunError {
    /// The feed could not be fetched or parsed.
    #[error("could not fetch the feed")]
    Fetch(#[source] anyhow::Error),

    /// The recently stored guids could not be read.
    #[error("could not read recently stored entries")]
    StoreRead(#[source] anyhow::Error),

    /// The batch could not be written; none of it was stored.
    #[error("could not store new entries")]
    StoreWrite(#[source] anyhow::Error),
}

impl RunError {
    /// The stage the run was in when it failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) | Self::StoreRead(_) => Stage::Fetching,
            Self::StoreWrite(_) => Stage::Persisting,
        }
    }
}
