//! Small formatting rules shared by the page handlers.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

pub const OVERVIEW_WORDS: usize = 50;
pub const BIO_WORDS: usize = 50;
pub const CAROUSEL_TITLE_CHARS: usize = 13;
pub const TV_OVERVIEW_CHARS: usize = 500;
const PAGE_WINDOW: u32 = 5;

/// A 0-10 vote average as a whole percentage.
pub fn score_percent(vote_average: f64) -> u32 {
    (vote_average * 10.0).round().clamp(0.0, 100.0) as u32
}

/// First `limit` words followed by `...`, or the text unchanged when it is
/// short enough.
pub fn truncate_words(text: &str, limit: usize) -> String {
    if !exceeds_words(text, limit) {
        return text.to_string();
    }
    let head: Vec<&str> = text.split_whitespace().take(limit).collect();
    format!("{}...", head.join(" "))
}

pub fn exceeds_words(text: &str, limit: usize) -> bool {
    text.split_whitespace().count() > limit
}

/// Cuts on character boundaries, never inside a code point.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(u32),
    Gap,
}

impl Serialize for PageLink {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageLink::Page(n) => serializer.serialize_u32(*n),
            PageLink::Gap => serializer.serialize_str("..."),
        }
    }
}

/// Page links around `current`: a window of five, plus the first and last
/// page with gaps where pages are skipped.
pub fn page_numbers(current: u32, total: u32) -> Vec<PageLink> {
    if total == 0 {
        return Vec::new();
    }
    let current = current.clamp(1, total);
    let mut start = current.saturating_sub(PAGE_WINDOW / 2).max(1);
    let end = (start + PAGE_WINDOW - 1).min(total);
    if end - start + 1 < PAGE_WINDOW {
        start = (end + 1).saturating_sub(PAGE_WINDOW).max(1);
    }

    let mut links = Vec::new();
    if start > 1 {
        links.push(PageLink::Page(1));
        if start > 2 {
            links.push(PageLink::Gap);
        }
    }
    links.extend((start..=end).map(PageLink::Page));
    if end < total {
        if end < total - 1 {
            links.push(PageLink::Gap);
        }
        links.push(PageLink::Page(total));
    }
    links
}

/// `"March 4, 1970 (55 years)"`, or `N/A` without a birthday.
///
/// The age is counted up to `until`: today for the living, the day of death
/// otherwise.
pub fn format_birthday(birthday: Option<NaiveDate>, until: NaiveDate) -> String {
    let Some(birthday) = birthday else {
        return "N/A".to_string();
    };
    let age = until.years_since(birthday).unwrap_or(0);
    format!("{} ({} years)", birthday.format("%B %-d, %Y"), age)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn score_is_rounded_percent() {
        assert_eq!(score_percent(7.25), 73);
        assert_eq!(score_percent(0.0), 0);
        assert_eq!(score_percent(10.0), 100);
    }

    #[test]
    fn word_truncation() {
        let long = (1..=60).map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        let cut = truncate_words(&long, OVERVIEW_WORDS);
        assert!(cut.ends_with("50..."));
        assert_eq!(cut.split_whitespace().count(), 50);
        assert!(exceeds_words(&long, OVERVIEW_WORDS));

        assert_eq!(truncate_words("short bio", BIO_WORDS), "short bio");
    }

    #[test]
    fn char_truncation_respects_code_points() {
        assert_eq!(
            truncate_chars("The Lord of the Rings", CAROUSEL_TITLE_CHARS),
            "The Lord of t..."
        );
        assert_eq!(truncate_chars("Amélie", CAROUSEL_TITLE_CHARS), "Amélie");
        assert_eq!(truncate_chars("ÉÉÉÉ", 2), "ÉÉ...");
    }

    #[test]
    fn page_window_in_the_middle() {
        use PageLink::{Gap, Page};
        assert_eq!(
            page_numbers(10, 500),
            vec![Page(1), Gap, Page(8), Page(9), Page(10), Page(11), Page(12), Gap, Page(500)]
        );
    }

    #[test]
    fn page_window_at_the_edges() {
        use PageLink::{Gap, Page};
        assert_eq!(
            page_numbers(1, 500),
            vec![Page(1), Page(2), Page(3), Page(4), Page(5), Gap, Page(500)]
        );
        assert_eq!(
            page_numbers(500, 500),
            vec![Page(1), Gap, Page(496), Page(497), Page(498), Page(499), Page(500)]
        );
        assert_eq!(page_numbers(2, 3), vec![Page(1), Page(2), Page(3)]);
        assert_eq!(
            page_numbers(3, 6),
            vec![Page(1), Page(2), Page(3), Page(4), Page(5), Page(6)]
        );
        assert!(page_numbers(1, 0).is_empty());
    }

    #[test]
    fn page_links_serialize_as_numbers_and_gaps() {
        let json = serde_json::to_value(page_numbers(1, 7)).unwrap();
        assert_eq!(json, serde_json::json!([1, 2, 3, 4, 5, "...", 7]));
    }

    #[test]
    fn birthday_with_age() {
        assert_eq!(
            format_birthday(Some(date(1970, 3, 4)), date(2025, 6, 1)),
            "March 4, 1970 (55 years)"
        );
        assert_eq!(
            format_birthday(Some(date(1970, 3, 4)), date(2025, 3, 3)),
            "March 4, 1970 (54 years)"
        );
        assert_eq!(format_birthday(None, date(2025, 1, 1)), "N/A");
    }
}
