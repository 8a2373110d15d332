use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::models::{MovieSummary, SearchResult, TvSummary};

pub const MOVIES_PER_PAGE: usize = 15;
pub const SHOWS_PER_PAGE: usize = 20;

pub const MOVIE_GENRES: &[(&str, u32)] = &[
    ("Action", 28),
    ("Adventure", 12),
    ("Animation", 16),
    ("Comedy", 35),
    ("Crime", 80),
    ("Documentary", 99),
    ("Drama", 18),
    ("Family", 10751),
    ("Fantasy", 14),
    ("History", 36),
    ("Horror", 27),
    ("Music", 10402),
    ("Mystery", 9648),
    ("Romance", 10749),
    ("Science Fiction", 878),
    ("TV Movie", 10770),
    ("Thriller", 53),
    ("War", 10752),
    ("Western", 37),
];

pub const TV_GENRES: &[(&str, u32)] = &[
    ("Action & Adventure", 10759),
    ("Animation", 16),
    ("Comedy", 35),
    ("Crime", 80),
    ("Documentary", 99),
    ("Drama", 18),
    ("Family", 10751),
    ("Kids", 10762),
    ("Mystery", 9648),
    ("News", 10763),
    ("Reality", 10764),
    ("Sci-Fi & Fantasy", 10765),
    ("Soap", 10766),
    ("Talk", 10767),
    ("War & Politics", 10768),
    ("Western", 37),
];

pub fn genre_id(table: &[(&str, u32)], name: &str) -> Option<u32> {
    let name = name.trim();
    table
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// Parses a comma separated genre selection. Tokens are numeric ids or names
/// from `table`.
pub fn parse_genres(table: &[(&str, u32)], input: &str) -> Result<Vec<u32>> {
    parse_genres_in(&[table], input)
}

/// Like [`parse_genres`], but a name may come from any of `tables`; the first
/// table that knows it decides the id.
pub fn parse_genres_in(tables: &[&[(&str, u32)]], input: &str) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let id = match token.parse::<u32>() {
            Ok(id) => id,
            Err(_) => tables
                .iter()
                .find_map(|table| genre_id(table, token))
                .ok_or_else(|| anyhow!("Unknown genre '{}'", token))?,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Tv,
    Person,
}

impl MediaKind {
    /// `all` (or empty) means no restriction.
    pub fn parse_filter(input: &str) -> Result<Option<Self>> {
        match input.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(None),
            "movie" => Ok(Some(MediaKind::Movie)),
            "tv" => Ok(Some(MediaKind::Tv)),
            "person" => Ok(Some(MediaKind::Person)),
            other => bail!("Unknown media type '{}'", other),
        }
    }
}

/// What the filter and sort need to know about a list entry.
pub trait Browsable {
    fn popularity(&self) -> f64;
    /// Average rating on the 0-10 scale, when the entry has one.
    fn score(&self) -> Option<f64>;
    fn date(&self) -> Option<NaiveDate>;
    fn genre_ids(&self) -> &[u32];
    fn kind(&self) -> MediaKind;
}

impl Browsable for MovieSummary {
    fn popularity(&self) -> f64 {
        self.popularity
    }

    fn score(&self) -> Option<f64> {
        Some(self.vote_average)
    }

    fn date(&self) -> Option<NaiveDate> {
        self.release_date
    }

    fn genre_ids(&self) -> &[u32] {
        &self.genre_ids
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Movie
    }
}

impl Browsable for TvSummary {
    fn popularity(&self) -> f64 {
        self.popularity
    }

    fn score(&self) -> Option<f64> {
        Some(self.vote_average)
    }

    fn date(&self) -> Option<NaiveDate> {
        self.first_air_date
    }

    fn genre_ids(&self) -> &[u32] {
        &self.genre_ids
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Tv
    }
}

impl Browsable for SearchResult {
    fn popularity(&self) -> f64 {
        match self {
            SearchResult::Movie(m) => m.popularity,
            SearchResult::Tv(t) => t.popularity,
            SearchResult::Person(p) => p.popularity,
        }
    }

    fn score(&self) -> Option<f64> {
        match self {
            SearchResult::Movie(m) => m.score(),
            SearchResult::Tv(t) => t.score(),
            SearchResult::Person(_) => None,
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        match self {
            SearchResult::Movie(m) => m.release_date,
            SearchResult::Tv(t) => t.first_air_date,
            SearchResult::Person(_) => None,
        }
    }

    fn genre_ids(&self) -> &[u32] {
        match self {
            SearchResult::Movie(m) => &m.genre_ids,
            SearchResult::Tv(t) => &t.genre_ids,
            SearchResult::Person(_) => &[],
        }
    }

    fn kind(&self) -> MediaKind {
        match self {
            SearchResult::Movie(_) => MediaKind::Movie,
            SearchResult::Tv(_) => MediaKind::Tv,
            SearchResult::Person(_) => MediaKind::Person,
        }
    }
}

/// Active predicates are ANDed. The default filter lets everything through.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Entry must carry at least one of these; empty means no restriction.
    pub genres: Vec<u32>,
    pub min_score: f64,
    pub released_from: Option<NaiveDate>,
    pub released_to: Option<NaiveDate>,
    pub kind: Option<MediaKind>,
}

impl Filter {
    pub fn matches<T: Browsable>(&self, item: &T) -> bool {
        if let Some(kind) = self.kind {
            if item.kind() != kind {
                return false;
            }
        }
        if !self.genres.is_empty() && !item.genre_ids().iter().any(|g| self.genres.contains(g)) {
            return false;
        }
        if self.min_score > 0.0 && !item.score().is_some_and(|s| s >= self.min_score) {
            return false;
        }
        if self.released_from.is_some() || self.released_to.is_some() {
            let Some(date) = item.date() else {
                return false;
            };
            if self.released_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.released_to.is_some_and(|to| date > to) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Popularity,
    Rating,
    ReleaseDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Sort {
    /// `sort_by` value for `discover/movie`.
    pub fn upstream_key(&self) -> String {
        let key = match self.key {
            SortKey::Popularity => "popularity",
            SortKey::Rating => "vote_average",
            SortKey::ReleaseDate => "primary_release_date",
        };
        let order = match self.order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        format!("{key}.{order}")
    }

    fn compare<T: Browsable>(&self, a: &T, b: &T) -> Ordering {
        let ord = match self.key {
            SortKey::Popularity => a.popularity().total_cmp(&b.popularity()),
            SortKey::Rating => a
                .score()
                .unwrap_or(0.0)
                .total_cmp(&b.score().unwrap_or(0.0)),
            // None < Some, so undated entries count as the earliest.
            SortKey::ReleaseDate => a.date().cmp(&b.date()),
        };
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

impl FromStr for Sort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let (key, order) = raw
            .rsplit_once('.')
            .ok_or_else(|| anyhow!("Invalid sort '{}', expected <key>.<asc|desc>", raw))?;
        let key = match key {
            "popularity" => SortKey::Popularity,
            "vote_average" | "rating" => SortKey::Rating,
            "release_date" | "primary_release_date" | "first_air_date" => SortKey::ReleaseDate,
            other => bail!("Unknown sort key '{}'", other),
        };
        let order = match order {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            other => bail!("Unknown sort order '{}'", other),
        };
        Ok(Sort { key, order })
    }
}

/// Filters, then sorts when `sort` is given. The sort is stable.
pub fn apply<T: Browsable + Clone>(items: &[T], filter: &Filter, sort: Option<Sort>) -> Vec<T> {
    let mut out: Vec<T> = items.iter().filter(|i| filter.matches(*i)).cloned().collect();
    if let Some(sort) = sort {
        out.sort_by(|a, b| sort.compare(a, b));
    }
    out
}

/// The "load more" window: the first `display_page * per_page` entries.
pub fn visible<T>(items: &[T], display_page: u32, per_page: usize) -> &[T] {
    let end = (display_page.max(1) as usize)
        .saturating_mul(per_page)
        .min(items.len());
    &items[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: u64, vote_average: f64, genre_ids: &[u32]) -> MovieSummary {
        MovieSummary {
            id,
            title: format!("Movie {id}"),
            original_title: None,
            overview: String::new(),
            poster_path: None,
            backdrop_path: None,
            release_date: None,
            vote_average,
            vote_count: 10,
            popularity: id as f64,
            genre_ids: genre_ids.to_vec(),
            original_language: None,
            adult: false,
        }
    }

    fn dated(id: u64, date: Option<(i32, u32, u32)>) -> MovieSummary {
        let mut m = movie(id, 5.0, &[]);
        m.release_date = date.and_then(|(y, mo, d)| NaiveDate::from_ymd_opt(y, mo, d));
        m
    }

    fn ids(items: &[MovieSummary]) -> Vec<u64> {
        items.iter().map(|m| m.id).collect()
    }

    #[test]
    fn genre_filter_and_rating_sort_on_a_pair() {
        let items = vec![movie(1, 7.2, &[28]), movie(2, 8.5, &[18])];

        let action = Filter {
            genres: vec![28],
            ..Filter::default()
        };
        assert_eq!(ids(&apply(&items, &action, None)), vec![1]);

        let by_rating = "vote_average.desc".parse::<Sort>().unwrap();
        assert_eq!(
            ids(&apply(&items, &Filter::default(), Some(by_rating))),
            vec![2, 1]
        );
    }

    #[test]
    fn filtered_set_honors_every_predicate() {
        let mut items = Vec::new();
        for id in 0..40u64 {
            let mut m = movie(id, (id % 11) as f64, &[[28, 18, 35][id as usize % 3]]);
            m.release_date = NaiveDate::from_ymd_opt(2000 + (id % 25) as i32, 6, 1);
            if id % 7 == 0 {
                m.release_date = None;
            }
            items.push(m);
        }
        let filter = Filter {
            genres: vec![28, 35],
            min_score: 4.0,
            released_from: NaiveDate::from_ymd_opt(2005, 1, 1),
            released_to: NaiveDate::from_ymd_opt(2020, 12, 31),
            kind: None,
        };

        let out = apply(&items, &filter, None);
        assert!(!out.is_empty());
        for m in &out {
            assert!(items.contains(m));
            assert!(m.genre_ids.iter().any(|g| filter.genres.contains(g)));
            assert!(m.vote_average >= 4.0);
            let date = m.release_date.unwrap();
            assert!(date >= filter.released_from.unwrap());
            assert!(date <= filter.released_to.unwrap());
        }
        let expected = items.iter().filter(|m| filter.matches(*m)).count();
        assert_eq!(out.len(), expected);
    }

    #[test]
    fn sorts_are_monotonic() {
        let items: Vec<MovieSummary> = (0..12u64)
            .map(|id| {
                let mut m = movie(id, ((id * 7) % 10) as f64, &[]);
                m.popularity = ((id * 13) % 17) as f64;
                m
            })
            .collect();

        let desc = apply(&items, &Filter::default(), Some("vote_average.desc".parse().unwrap()));
        assert!(desc.windows(2).all(|w| w[0].vote_average >= w[1].vote_average));

        let asc = apply(&items, &Filter::default(), Some("popularity.asc".parse().unwrap()));
        assert!(asc.windows(2).all(|w| w[0].popularity <= w[1].popularity));
    }

    #[test]
    fn ties_keep_prior_order() {
        let items = vec![movie(3, 6.0, &[]), movie(1, 6.0, &[]), movie(2, 6.0, &[])];
        let out = apply(&items, &Filter::default(), Some("vote_average.desc".parse().unwrap()));
        assert_eq!(ids(&out), vec![3, 1, 2]);
    }

    #[test]
    fn undated_entries_sort_first_ascending() {
        let items = vec![
            dated(1, Some((2021, 3, 1))),
            dated(2, None),
            dated(3, Some((1999, 1, 1))),
        ];
        let asc = apply(&items, &Filter::default(), Some("release_date.asc".parse().unwrap()));
        assert_eq!(ids(&asc), vec![2, 3, 1]);
        let desc = apply(&items, &Filter::default(), Some("first_air_date.desc".parse().unwrap()));
        assert_eq!(ids(&desc), vec![1, 3, 2]);
    }

    #[test]
    fn date_bounds_are_inclusive_and_exclude_undated() {
        let items = vec![
            dated(1, Some((2020, 1, 1))),
            dated(2, Some((2024, 12, 31))),
            dated(3, Some((2025, 1, 1))),
            dated(4, None),
        ];
        let filter = Filter {
            released_from: NaiveDate::from_ymd_opt(2020, 1, 1),
            released_to: NaiveDate::from_ymd_opt(2024, 12, 31),
            ..Filter::default()
        };
        assert_eq!(ids(&apply(&items, &filter, None)), vec![1, 2]);
        assert_eq!(apply(&items, &Filter::default(), None).len(), 4);
    }

    #[test]
    fn search_results_filter_by_kind_and_score() {
        let person: SearchResult = serde_json::from_value(serde_json::json!({
            "media_type": "person", "id": 9, "name": "Someone", "popularity": 3.0
        }))
        .unwrap();
        let items = vec![SearchResult::Movie(movie(1, 8.0, &[18])), person];

        let people = Filter {
            kind: Some(MediaKind::Person),
            ..Filter::default()
        };
        assert_eq!(apply(&items, &people, None).len(), 1);

        let rated = Filter {
            min_score: 5.0,
            ..Filter::default()
        };
        let out = apply(&items, &rated, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), 1);
    }

    #[test]
    fn parses_sort_vocabulary() {
        let sort: Sort = "primary_release_date.asc".parse().unwrap();
        assert_eq!(sort.key, SortKey::ReleaseDate);
        assert_eq!(sort.order, SortOrder::Asc);
        assert_eq!(sort.upstream_key(), "primary_release_date.asc");
        assert_eq!(Sort::default().upstream_key(), "popularity.desc");
        assert!("title.desc".parse::<Sort>().is_err());
        assert!("popularity".parse::<Sort>().is_err());
        assert!("popularity.up".parse::<Sort>().is_err());
    }

    #[test]
    fn genre_lookup_accepts_names_and_ids() {
        assert_eq!(genre_id(MOVIE_GENRES, "science fiction"), Some(878));
        assert_eq!(genre_id(TV_GENRES, "Sci-Fi & Fantasy"), Some(10765));
        assert_eq!(genre_id(TV_GENRES, "Horror"), None);
        assert_eq!(
            parse_genres(MOVIE_GENRES, "Action, 18,action").unwrap(),
            vec![28, 18]
        );
        assert!(parse_genres(MOVIE_GENRES, "Cooking").is_err());
        assert!(parse_genres(MOVIE_GENRES, "").unwrap().is_empty());
    }

    #[test]
    fn genre_names_from_either_table() {
        let both = [MOVIE_GENRES, TV_GENRES];
        assert_eq!(
            parse_genres_in(&both, "Kids, Sci-Fi & Fantasy, Horror").unwrap(),
            vec![10762, 10765, 27]
        );
        assert_eq!(parse_genres_in(&both, "Drama").unwrap(), vec![18]);
        assert!(parse_genres(MOVIE_GENRES, "Kids").is_err());
    }

    #[test]
    fn visible_window_grows_per_page() {
        let items: Vec<u32> = (0..40).collect();
        assert_eq!(visible(&items, 1, MOVIES_PER_PAGE).len(), 15);
        assert_eq!(visible(&items, 2, MOVIES_PER_PAGE).len(), 30);
        assert_eq!(visible(&items, 3, MOVIES_PER_PAGE).len(), 40);
        assert_eq!(visible(&items, 0, SHOWS_PER_PAGE).len(), 20);
    }
}
