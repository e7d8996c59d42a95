use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// A duration written either as seconds or as `1d 2h 3m 4s` (every part optional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("`{0}` is not a duration (expected e.g. `90`, `15m` or `1h 30m`)")]
    Malformed(String),

    #[error("duration `{0}` is too large")]
    TooLarge(String),
}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static REGEXP: OnceLock<Regex> = OnceLock::new();

        let s = s.trim();

        if let Ok(seconds) = s.parse::<u64>() {
            return Ok(Self::from_secs(seconds));
        }

        let regexp = REGEXP.get_or_init(|| {
            RegexBuilder::new(
                r"
                ^
                (?:(?<days>    \d+)d)? \s*
                (?:(?<hours>   \d+)h)? \s*
                (?:(?<minutes> \d+)m)? \s*
                (?:(?<seconds> \d+)s)?
                $",
            )
            .ignore_whitespace(true)
            .build()
            .unwrap()
        });
        let captures = regexp
            .captures(s)
            .ok_or_else(|| ParseDurationError::Malformed(s.into()))?;

        let mut parts = [0u64; 4];
        let mut found = false;

        for (part, name) in parts.iter_mut().zip(["days", "hours", "minutes", "seconds"]) {
            if let Some(m) = captures.name(name) {
                *part = m
                    .as_str()
                    .parse()
                    .map_err(|_| ParseDurationError::TooLarge(s.into()))?;
                found = true;
            }
        }

        if !found {
            return Err(ParseDurationError::Malformed(s.into()));
        }

        let [days, hours, minutes, seconds] = parts;

        days.checked_mul(24)
            .and_then(|h| h.checked_add(hours))
            .and_then(|h| h.checked_mul(60))
            .and_then(|m| m.checked_add(minutes))
            .and_then(|m| m.checked_mul(60))
            .and_then(|s| s.checked_add(seconds))
            .map(Duration::from_secs)
            .ok_or_else(|| ParseDurationError::TooLarge(s.into()))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}
