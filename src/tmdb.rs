use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::catalog::Sort;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::{
    AggregateCredits, EpisodeDetail, MovieCredit, MovieDetail, MovieSummary, Paged,
    PersonDetail, PersonMovieCredits, PersonSummary, SearchResult, SeasonDetail, TvDetail,
    TvSummary,
};

const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    W200,
    W500,
    Original,
}

impl ImageSize {
    fn as_str(self) -> &'static str {
        match self {
            ImageSize::W200 => "w200",
            ImageSize::W500 => "w500",
            ImageSize::Original => "original",
        }
    }
}

/// Absolute URL of an image on the static asset host.
pub fn image_url(size: ImageSize, path: &str) -> String {
    format!("{IMAGE_BASE}/{}{path}", size.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    #[default]
    Day,
    Week,
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "day" => Some(TimeWindow::Day),
            "week" => Some(TimeWindow::Week),
            _ => None,
        }
    }
}

/// Fixed movie lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieList {
    Upcoming,
    NowPlaying,
    TopRated,
    Popular,
}

impl MovieList {
    fn path(self) -> &'static str {
        match self {
            MovieList::Upcoming => "movie/upcoming",
            MovieList::NowPlaying => "movie/now_playing",
            MovieList::TopRated => "movie/top_rated",
            MovieList::Popular => "movie/popular",
        }
    }
}

/// Fixed TV lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvList {
    AiringToday,
    OnTheAir,
    Popular,
    TopRated,
}

impl TvList {
    fn path(self) -> &'static str {
        match self {
            TvList::AiringToday => "tv/airing_today",
            TvList::OnTheAir => "tv/on_the_air",
            TvList::Popular => "tv/popular",
            TvList::TopRated => "tv/top_rated",
        }
    }
}

/// Upstream-side filters of `discover/movie`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscoverQuery {
    pub language: Option<String>,
    pub sort: Sort,
    pub min_score: f64,
    pub released_from: Option<NaiveDate>,
    pub released_to: Option<NaiveDate>,
    pub genres: Vec<u32>,
    pub include_adult: bool,
    pub include_video: bool,
}

impl DiscoverQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("include_adult", self.include_adult.to_string()),
            ("include_video", self.include_video.to_string()),
            ("sort_by", self.sort.upstream_key()),
            ("vote_average.gte", self.min_score.to_string()),
        ];
        if let Some(language) = &self.language {
            query.push(("language", language.clone()));
        }
        if let Some(from) = self.released_from {
            query.push(("primary_release_date.gte", from.to_string()));
        }
        if let Some(to) = self.released_to {
            query.push(("primary_release_date.lte", to.to_string()));
        }
        if !self.genres.is_empty() {
            query.push(("with_genres", join_ids(&self.genres)));
        }
        query
    }

    /// Identity of the base query, page excluded.
    pub fn key(&self) -> String {
        self.query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn trending_movies(&self, window: TimeWindow) -> Result<Vec<MovieSummary>, FetchError>;
    async fn movie_list(&self, list: MovieList, page: u32)
        -> Result<Paged<MovieSummary>, FetchError>;
    async fn discover_movies(
        &self,
        query: &DiscoverQuery,
        page: u32,
    ) -> Result<Paged<MovieSummary>, FetchError>;
    async fn movie_detail(&self, id: u64) -> Result<MovieDetail, FetchError>;
    async fn similar_movies(&self, id: u64) -> Result<Vec<MovieSummary>, FetchError>;
    async fn tv_list(&self, list: TvList, page: u32) -> Result<Paged<TvSummary>, FetchError>;
    async fn tv_detail(&self, id: u64) -> Result<TvDetail, FetchError>;
    async fn similar_tv(&self, id: u64) -> Result<Vec<TvSummary>, FetchError>;
    async fn tv_credits(&self, id: u64) -> Result<AggregateCredits, FetchError>;
    async fn tv_season(&self, id: u64, season: u32) -> Result<SeasonDetail, FetchError>;
    async fn tv_episode(
        &self,
        id: u64,
        season: u32,
        episode: u32,
    ) -> Result<EpisodeDetail, FetchError>;
    async fn popular_people(&self, page: u32) -> Result<Paged<PersonSummary>, FetchError>;
    async fn person_detail(&self, id: u64) -> Result<PersonDetail, FetchError>;
    async fn person_movie_credits(&self, id: u64) -> Result<Vec<MovieCredit>, FetchError>;
    async fn search_multi(
        &self,
        query: &str,
        page: u32,
    ) -> Result<Paged<SearchResult>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: Url,
    api_token: String,
    language: String,
}

impl TmdbClient {
    pub fn new(config: &Config) -> Result<Self> {
        let user_agent = format!("cinescope/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.http_timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
            language: config.language.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut params: Vec<(&str, String)> = query.to_vec();
        if !params.iter().any(|(k, _)| *k == "language") {
            params.push(("language", self.language.clone()));
        }

        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&params)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                path: path.to_string(),
                source,
            })?;
        let status = res.status();
        debug!(path = %path, status = status.as_u16(), "TMDB response");

        let text = res.text().await.map_err(|source| FetchError::Transport {
            path: path.to_string(),
            source,
        })?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            let message = serde_json::from_str::<TmdbErrorResponse>(&text)
                .map(|e| e.status_message)
                .unwrap_or(text);
            return Err(FetchError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&text).map_err(|source| FetchError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TmdbErrorResponse {
    status_message: String,
}

fn page_param(page: u32) -> (&'static str, String) {
    ("page", page.max(1).to_string())
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn trending_movies(&self, window: TimeWindow) -> Result<Vec<MovieSummary>, FetchError> {
        let path = format!("trending/movie/{}", window.as_str());
        let data: Paged<MovieSummary> = self.get_json(&path, &[]).await?;
        Ok(data.results)
    }

    async fn movie_list(
        &self,
        list: MovieList,
        page: u32,
    ) -> Result<Paged<MovieSummary>, FetchError> {
        self.get_json(list.path(), &[page_param(page)]).await
    }

    async fn discover_movies(
        &self,
        query: &DiscoverQuery,
        page: u32,
    ) -> Result<Paged<MovieSummary>, FetchError> {
        let mut params = query.query_pairs();
        params.push(page_param(page));
        self.get_json("discover/movie", &params).await
    }

    async fn movie_detail(&self, id: u64) -> Result<MovieDetail, FetchError> {
        self.get_json(&format!("movie/{id}"), &[]).await
    }

    async fn similar_movies(&self, id: u64) -> Result<Vec<MovieSummary>, FetchError> {
        let data: Paged<MovieSummary> = self
            .get_json(&format!("movie/{id}/similar"), &[page_param(1)])
            .await?;
        Ok(data.results)
    }

    async fn tv_list(&self, list: TvList, page: u32) -> Result<Paged<TvSummary>, FetchError> {
        self.get_json(list.path(), &[page_param(page)]).await
    }

    async fn tv_detail(&self, id: u64) -> Result<TvDetail, FetchError> {
        self.get_json(&format!("tv/{id}"), &[]).await
    }

    async fn similar_tv(&self, id: u64) -> Result<Vec<TvSummary>, FetchError> {
        let data: Paged<TvSummary> = self
            .get_json(&format!("tv/{id}/similar"), &[page_param(1)])
            .await?;
        Ok(data.results)
    }

    async fn tv_credits(&self, id: u64) -> Result<AggregateCredits, FetchError> {
        self.get_json(&format!("tv/{id}/aggregate_credits"), &[])
            .await
    }

    async fn tv_season(&self, id: u64, season: u32) -> Result<SeasonDetail, FetchError> {
        self.get_json(&format!("tv/{id}/season/{season}"), &[]).await
    }

    async fn tv_episode(
        &self,
        id: u64,
        season: u32,
        episode: u32,
    ) -> Result<EpisodeDetail, FetchError> {
        self.get_json(&format!("tv/{id}/season/{season}/episode/{episode}"), &[])
            .await
    }

    async fn popular_people(&self, page: u32) -> Result<Paged<PersonSummary>, FetchError> {
        self.get_json("person/popular", &[page_param(page)]).await
    }

    async fn person_detail(&self, id: u64) -> Result<PersonDetail, FetchError> {
        self.get_json(&format!("person/{id}"), &[]).await
    }

    async fn person_movie_credits(&self, id: u64) -> Result<Vec<MovieCredit>, FetchError> {
        let data: PersonMovieCredits = self
            .get_json(&format!("person/{id}/movie_credits"), &[])
            .await?;
        Ok(data.cast)
    }

    async fn search_multi(
        &self,
        query: &str,
        page: u32,
    ) -> Result<Paged<SearchResult>, FetchError> {
        let params = [
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
            page_param(page),
        ];
        self.get_json("search/multi", &params).await
    }
}

pub fn parse_tmdb_id(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok();
    }
    None
}

/// Season and episode numbers; season 0 holds the specials.
pub fn parse_season_number(input: &str) -> Option<u32> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("Season ").unwrap_or(trimmed).trim();
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.parse().ok();
    }
    None
}
