use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use regex_lite::{Regex, RegexBuilder};
use tracing::debug;

use crate::entry::RawEntry;

/// Guids of the most recently published stored entries, newest first.
#[derive(Debug, Clone, Default)]
pub struct RecentKeySet {
    guids: Vec<String>,
    lookup: HashSet<String>,
}

impl RecentKeySet {
    pub fn new(guids: Vec<String>) -> Self {
        let lookup = guids.iter().cloned().collect();

        Self { guids, lookup }
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.lookup.contains(guid)
    }

    pub fn len(&self) -> usize {
        self.guids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }
}

/// Content patterns of entries that are never worth storing.
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    patterns: Vec<Regex>,
}

impl NoiseFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();

                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| anyhow!("could not compile the noise pattern `{pattern}`"))
            })
            .collect::<Result<_>>()?;

        Ok(Self { patterns })
    }

    pub fn is_noise(&self, entry: &RawEntry) -> bool {
        self.patterns
            .iter()
            .any(|regex| regex.is_match(&entry.title) || regex.is_match(&entry.content))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicated {
    /// Surviving entries in feed order.
    pub fresh: Vec<RawEntry>,
    pub already_seen: usize,
    pub repeated: usize,
    pub noise: usize,
}

/// Keeps the entries that are neither stored already nor noise.
///
/// Only the first occurrence of a guid repeated within `entries` is kept.
pub fn deduplicate(
    entries: Vec<RawEntry>,
    recent: &RecentKeySet,
    noise: &NoiseFilter,
) -> Deduplicated {
    let mut result = Deduplicated::default();
    let mut batch_guids = HashSet::with_capacity(entries.len());

    for entry in entries {
        if recent.contains(&entry.guid) {
            debug!(guid = %entry.guid, "Skipping an already stored entry");
            result.already_seen += 1;
        } else if !batch_guids.insert(entry.guid.clone()) {
            debug!(guid = %entry.guid, "Skipping a repeated entry");
            result.repeated += 1;
        } else if noise.is_noise(&entry) {
            debug!(guid = %entry.guid, title = %entry.title, "Skipping a noise entry");
            result.noise += 1;
        } else {
            result.fresh.push(entry);
        }
    }

    result
}
