use std::collections::BTreeSet;
use std::fmt::{self, Display};

use time::OffsetDateTime;

/// A feed entry as produced by the feed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    pub content: String,
    pub link: String,
    pub pub_date: OffsetDateTime,
    pub guid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    Low,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::High => "High",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A rail line. Variants are declared in the order lines are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineCode {
    Acrl,
    Mobo,
    Mbpj,
    MorrisEssex,
    Nec,
    Njcl,
    Pvl,
    Rvl,
}

impl LineCode {
    pub const ALL: [LineCode; 8] = [
        Self::Acrl,
        Self::Mobo,
        Self::Mbpj,
        Self::MorrisEssex,
        Self::Nec,
        Self::Njcl,
        Self::Pvl,
        Self::Rvl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acrl => "ACRL",
            Self::Mobo => "MOBO",
            Self::Mbpj => "MBPJ",
            Self::MorrisEssex => "M&E",
            Self::Nec => "NEC",
            Self::Njcl => "NJCL",
            Self::Pvl => "PVL",
            Self::Rvl => "RVL",
        }
    }

    /// Full names the line is mentioned by in advisories, besides its code.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Acrl => &["Atlantic City Rail Line", "Atlantic City Line"],
            Self::Mobo => &["Montclair-Boonton Line", "Montclair Boonton Line"],
            Self::Mbpj => &[
                "Main/Bergen/Port Jervis Line",
                "Main/Bergen County Line",
                "Main Line",
                "Bergen County Line",
                "Port Jervis Line",
            ],
            Self::MorrisEssex => &[
                "Morris and Essex Line",
                "Morris & Essex Line",
                "Gladstone Branch",
            ],
            Self::Nec => &["Northeast Corridor"],
            Self::Njcl => &["North Jersey Coast Line"],
            Self::Pvl => &["Pascack Valley Line"],
            Self::Rvl => &["Raritan Valley Line"],
        }
    }
}

impl Display for LineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Tags derived from the text of an entry.
///
/// The priority is not stored: it is `High` exactly when one of the flags is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub cancel: bool,
    pub delay: bool,
    pub change: bool,
    pub lines: BTreeSet<LineCode>,
}

impl Tags {
    pub fn priority(&self) -> Priority {
        if self.cancel || self.delay || self.change {
            Priority::High
        } else {
            Priority::Low
        }
    }

    pub fn line_codes(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.as_str().to_owned()).collect()
    }
}

/// An entry ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub entry: RawEntry,
    pub feed_id: i32,
    pub tags: Tags,
}

impl EntryRecord {
    pub fn new(entry: RawEntry, feed_id: i32, tags: Tags) -> Self {
        Self {
            entry,
            feed_id,
            tags,
        }
    }

    pub fn priority(&self) -> Priority {
        self.tags.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_follows_flags() {
        let mut tags = Tags::default();
        assert_eq!(tags.priority(), Priority::Low);

        tags.change = true;
        assert_eq!(tags.priority(), Priority::High);
    }

    #[test]
    fn line_codes_follow_declaration_order() {
        let tags = Tags {
            lines: [LineCode::Rvl, LineCode::Acrl, LineCode::MorrisEssex]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        assert_eq!(tags.line_codes(), ["ACRL", "M&E", "RVL"]);
    }
}
