use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::{escape, Regex, RegexBuilder};

use crate::entry::{LineCode, Tags};

const CANCEL_KEYWORDS: &[&str] = &["cancel"];
const DELAY_KEYWORDS: &[&str] = &["delay"];
const CHANGE_KEYWORDS: &[&str] = &["change", "replace"];

/// Whole word only: "latest" and "related" are not delays.
fn late_matcher() -> &'static Regex {
    static LATE: OnceLock<Regex> = OnceLock::new();

    LATE.get_or_init(|| Regex::new(r"\blate\b").unwrap())
}

fn line_matchers() -> &'static [(LineCode, Regex)] {
    static MATCHERS: OnceLock<Vec<(LineCode, Regex)>> = OnceLock::new();

    MATCHERS.get_or_init(|| {
        LineCode::ALL
            .into_iter()
            .map(|line| {
                let alternatives = std::iter::once(line.as_str())
                    .chain(line.aliases().iter().copied())
                    .map(escape)
                    .collect::<Vec<_>>()
                    .join("|");
                let regex = RegexBuilder::new(&format!(r"\b(?:{alternatives})\b"))
                    .case_insensitive(true)
                    .build()
                    .unwrap();

                (line, regex)
            })
            .collect()
    })
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}

/// Derives tags from the text of an entry.
///
/// Keywords are matched as case-insensitive substrings, except "late", which must be a whole word.
/// Lines are matched by code or full name on word boundaries.
pub fn classify(content: &str) -> Tags {
    let normalized = content.to_lowercase();

    let lines = line_matchers()
        .iter()
        .filter(|(_, regex)| regex.is_match(content))
        .map(|(line, _)| *line)
        .collect::<BTreeSet<_>>();

    Tags {
        cancel: contains_any(&normalized, CANCEL_KEYWORDS),
        delay: contains_any(&normalized, DELAY_KEYWORDS) || late_matcher().is_match(&normalized),
        change: contains_any(&normalized, CHANGE_KEYWORDS),
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Priority;

    #[test]
    fn tags_a_cancellation_caused_by_delays() {
        let tags = classify("Train #3857 canceled due to NEC delays");

        assert!(tags.cancel);
        assert!(tags.delay);
        assert!(!tags.change);
        assert_eq!(tags.priority(), Priority::High);
        assert_eq!(tags.lines.into_iter().collect::<Vec<_>>(), [LineCode::Nec]);
    }

    #[test]
    fn checks_both_change_keywords() {
        assert!(classify("Track change at Newark Penn").change);
        assert!(classify("Buses will REPLACE trains this weekend").change);
        assert!(!classify("Service operating normally").change);
    }

    #[test]
    fn delay_keywords_are_independent() {
        assert!(classify("Train 6612 is running 10 minutes late").delay);
        assert!(classify("Residual delays of up to 15 minutes").delay);
        assert!(classify("Train 6612 is LATE.").delay);
    }

    #[test]
    fn late_only_matches_as_a_word() {
        let tags = classify("For the latest service information, visit njtransit.com");

        assert!(!tags.delay);
        assert_eq!(tags.priority(), Priority::Low);
        assert!(!classify("Related: platform renovation template").delay);
    }

    #[test]
    fn no_flags_means_low_priority() {
        let tags = classify("Elevator at Secaucus is back in service");

        assert_eq!(tags, Tags::default());
        assert_eq!(tags.priority(), Priority::Low);
    }

    #[test]
    fn detects_full_line_names() {
        let tags = classify("Northeast Corridor and Raritan Valley Line trains are on schedule");

        assert_eq!(
            tags.lines.into_iter().collect::<Vec<_>>(),
            [LineCode::Nec, LineCode::Rvl],
        );
    }

    #[test]
    fn aliases_of_the_same_line_collapse() {
        let tags = classify("NEC: Northeast Corridor trains are subject to delays");

        assert_eq!(tags.line_codes(), ["NEC"]);
    }

    #[test]
    fn lines_follow_table_order() {
        let tags = classify("PVL, M&E and ACRL customers: please check the app");

        assert_eq!(tags.line_codes(), ["ACRL", "M&E", "PVL"]);
    }

    #[test]
    fn codes_do_not_match_inside_words() {
        let tags = classify("Connecting service is necessary for nearby mobo users");

        assert!(tags.lines.contains(&LineCode::Mobo));
        assert!(!tags.lines.contains(&LineCode::Nec));
    }

    #[test]
    fn unknown_line_yields_no_lines() {
        assert!(classify("Light rail service suspended").lines.is_empty());
        assert!(classify("").lines.is_empty());
    }

    #[test]
    fn is_deterministic() {
        let content = "Gladstone Branch train 412 replaced by bus, expect delays";

        assert_eq!(classify(content), classify(content));
    }
}
