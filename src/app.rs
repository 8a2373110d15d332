use crate::catalog::{
    self, Filter, MediaKind, Sort, MOVIES_PER_PAGE, MOVIE_GENRES, SHOWS_PER_PAGE, TV_GENRES,
};
use crate::config::Config;
use crate::error::{FetchError, PageError};
use crate::models::{MovieCredit, MovieSummary, Paged, SearchResult, TvSummary};
use crate::poller::Poller;
use crate::store::{dispatch, dispatch_page, Listing, Phase, RequestState, Slot, Store};
use crate::tmdb::{
    image_url, parse_season_number, parse_tmdb_id, DiscoverQuery, ImageSize, MovieList,
    TimeWindow, TmdbApi, TmdbClient, TvList,
};
use crate::view;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const HOME_CAROUSEL_CARDS: usize = 4;
const SIMILAR_SHOWS: usize = 10;
// The upstream refuses pages past 500.
const MAX_PAGE: u32 = 500;
const UPSTREAM_PAGE_SIZE: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn TmdbApi>,
    pub store: Arc<Store>,
    pub language: String,
}

impl AppState {
    pub fn new(tmdb: Arc<dyn TmdbApi>, language: impl Into<String>) -> Self {
        Self {
            tmdb,
            store: Arc::new(Store::new()),
            language: language.into(),
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(&config)?);
    info!("Using TMDB at {} ({})", config.base_url, config.language);
    let state = AppState::new(tmdb, config.language.clone());

    let pollers = start_pollers(&state, config.poll_interval);
    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for poller in &pollers {
        poller.cancel();
    }
    info!("Stopped {} pollers", pollers.len());
    Ok(())
}

/// Keeps the now-playing and top-rated carousels fresh for as long as the
/// returned pollers live.
pub fn start_pollers(state: &AppState, period: Duration) -> Vec<Poller> {
    let now_playing = {
        let state = state.clone();
        Poller::spawn("now_playing", period, move || {
            let state = state.clone();
            async move {
                let fetch = results(state.tmdb.movie_list(MovieList::NowPlaying, 1));
                let _ = dispatch(&state.store.now_playing, fetch).await;
            }
        })
    };
    let top_rated = {
        let state = state.clone();
        Poller::spawn("top_rated", period, move || {
            let state = state.clone();
            async move {
                let fetch = results(state.tmdb.movie_list(MovieList::TopRated, 1));
                let _ = dispatch(&state.store.top_rated_movies, fetch).await;
            }
        })
    };
    vec![now_playing, top_rated]
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(home))
        .route("/trending", get(trending))
        .route("/movies", get(discover_movies))
        .route("/movies/top-rated", get(top_rated_movies))
        .route("/movie/:id", get(movie_page))
        .route("/tv/on-the-air", get(tv_on_the_air))
        .route("/tv/top-rated", get(tv_top_rated))
        .route("/tv/:id", get(tv_page))
        .route("/tv/:id/seasons", get(tv_seasons))
        .route("/tv/:id/season/:season", get(season_page))
        .route("/tv/:id/season/:season/episode/:episode", get(episode_page))
        .route("/person", get(people_page))
        .route("/personalDetails/:id", get(person_page))
        .route("/search", get(search_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn results<T, F>(fetch: F) -> Result<Vec<T>, FetchError>
where
    F: Future<Output = Result<Paged<T>, FetchError>>,
{
    fetch.await.map(|paged| paged.results)
}

/// Query string shared by the list pages; each page reads what it needs.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub genres: Option<String>,
    pub min_score: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub sort: Option<String>,
    pub language: Option<String>,
    pub page: Option<String>,
    pub window: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PageParams {
    fn page(&self) -> Result<u32, PageError> {
        let Some(raw) = present(&self.page) else {
            return Ok(1);
        };
        match raw.parse::<u32>() {
            Ok(page) if (1..=MAX_PAGE).contains(&page) => Ok(page),
            _ => Err(PageError::BadRequest(format!(
                "page must be between 1 and {}, got '{}'",
                MAX_PAGE, raw
            ))),
        }
    }

    fn min_score(&self) -> Result<f64, PageError> {
        let Some(raw) = present(&self.min_score) else {
            return Ok(0.0);
        };
        match raw.parse::<f64>() {
            Ok(score) if (0.0..=10.0).contains(&score) => Ok(score),
            _ => Err(PageError::BadRequest(format!(
                "min_score must be between 0 and 10, got '{}'",
                raw
            ))),
        }
    }

    fn date(raw: &Option<String>, name: &str) -> Result<Option<NaiveDate>, PageError> {
        present(raw)
            .map(|value| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                    PageError::BadRequest(format!("{} must be YYYY-MM-DD, got '{}'", name, value))
                })
            })
            .transpose()
    }

    fn sort(&self) -> Result<Option<Sort>, PageError> {
        present(&self.sort)
            .map(|raw| raw.parse::<Sort>().map_err(|e| PageError::BadRequest(e.to_string())))
            .transpose()
    }

    fn filter(&self, genre_tables: &[&[(&str, u32)]]) -> Result<Filter, PageError> {
        let genres = match present(&self.genres) {
            Some(raw) => catalog::parse_genres_in(genre_tables, raw)
                .map_err(|e| PageError::BadRequest(e.to_string()))?,
            None => Vec::new(),
        };
        let kind = match present(&self.kind) {
            Some(raw) => {
                MediaKind::parse_filter(raw).map_err(|e| PageError::BadRequest(e.to_string()))?
            }
            None => None,
        };
        let released_from = Self::date(&self.from, "from")?;
        let released_to = Self::date(&self.to, "to")?;
        if let (Some(from), Some(to)) = (released_from, released_to) {
            if from > to {
                return Err(PageError::BadRequest(format!(
                    "from ({}) is after to ({})",
                    from, to
                )));
            }
        }
        Ok(Filter {
            genres,
            min_score: self.min_score()?,
            released_from,
            released_to,
            kind,
        })
    }

    /// Link to the next "load more" step, keeping every other parameter.
    fn next_href(&self, path: &str, page: u32) -> String {
        let carried = [
            ("q", &self.q),
            ("type", &self.kind),
            ("genres", &self.genres),
            ("min_score", &self.min_score),
            ("from", &self.from),
            ("to", &self.to),
            ("sort", &self.sort),
            ("language", &self.language),
        ];
        let mut parts: Vec<String> = carried
            .iter()
            .filter_map(|(key, value)| {
                present(value).map(|v| format!("{}={}", key, urlencoding::encode(v)))
            })
            .collect();
        parts.push(format!("page={}", page));
        format!("{}?{}", path, parts.join("&"))
    }
}

fn parse_id(raw: &str) -> Result<u64, PageError> {
    parse_tmdb_id(raw).ok_or_else(|| PageError::BadRequest(format!("Invalid id '{}'", raw)))
}

fn parse_number(raw: &str, what: &str) -> Result<u32, PageError> {
    parse_season_number(raw)
        .ok_or_else(|| PageError::BadRequest(format!("Invalid {} number '{}'", what, raw)))
}

/// One poster tile of a list or carousel.
#[derive(Debug, Serialize)]
struct Card {
    id: u64,
    media_type: &'static str,
    title: String,
    href: String,
    image: Option<String>,
    score: Option<u32>,
    date: Option<NaiveDate>,
}

fn poster(path: &Option<String>) -> Option<String> {
    path.as_deref().map(|p| image_url(ImageSize::W500, p))
}

fn profile(path: &Option<String>) -> Option<String> {
    path.as_deref().map(|p| image_url(ImageSize::W200, p))
}

fn movie_card(movie: &MovieSummary) -> Card {
    Card {
        id: movie.id,
        media_type: "movie",
        title: movie.title.clone(),
        href: format!("/movie/{}", movie.id),
        image: poster(&movie.poster_path),
        score: Some(view::score_percent(movie.vote_average)),
        date: movie.release_date,
    }
}

fn tv_card(show: &TvSummary) -> Card {
    Card {
        id: show.id,
        media_type: "tv",
        title: show.name.clone(),
        href: format!("/tv/{}", show.id),
        image: poster(&show.poster_path),
        score: Some(view::score_percent(show.vote_average)),
        date: show.first_air_date,
    }
}

fn search_card(hit: &SearchResult) -> Card {
    match hit {
        SearchResult::Movie(movie) => movie_card(movie),
        SearchResult::Tv(show) => tv_card(show),
        SearchResult::Person(person) => Card {
            id: person.id,
            media_type: "person",
            title: person.name.clone(),
            href: hit.href(),
            image: profile(&person.profile_path),
            score: None,
            date: None,
        },
    }
}

fn credit_card(credit: &MovieCredit) -> Card {
    Card {
        id: credit.id,
        media_type: "movie",
        title: credit.title.clone(),
        href: format!("/movie/{}", credit.id),
        image: poster(&credit.poster_path),
        score: Some(view::score_percent(credit.vote_average)),
        date: credit.release_date,
    }
}

/// A secondary block of a page: its own phase, so a failing side fetch does
/// not take the whole page down.
#[derive(Debug, Serialize)]
struct Section {
    phase: Phase,
    error: Option<String>,
    items: Vec<Card>,
}

fn section<T>(state: RequestState<Vec<T>>, card: fn(&T) -> Card, limit: usize) -> Section {
    Section {
        phase: state.phase,
        error: state.error,
        items: state
            .data
            .unwrap_or_default()
            .iter()
            .take(limit)
            .map(card)
            .collect(),
    }
}

/// A random pick of the list, titles cut short to fit the slide.
fn carousel<R: Rng + ?Sized>(mut state: RequestState<Vec<MovieSummary>>, rng: &mut R) -> Section {
    if let Some(movies) = state.data.as_mut() {
        movies.shuffle(rng);
    }
    let mut cards = section(state, movie_card, HOME_CAROUSEL_CARDS);
    for card in &mut cards.items {
        card.title = view::truncate_chars(&card.title, view::CAROUSEL_TITLE_CHARS);
    }
    cards
}

/// Dispatches only when the slot has never been fetched; pollers keep it
/// fresh after that.
async fn ensure_loaded<F>(slot: &Slot<Vec<MovieSummary>>, fetch: F)
where
    F: Future<Output = Result<Vec<MovieSummary>, FetchError>>,
{
    if slot.snapshot().phase == Phase::Idle {
        let _ = dispatch(slot, fetch).await;
    }
}

/// Loads pages of `key` into `slot` until page `upto` is present or the
/// upstream has nothing more.
async fn load_pages<T, F, Fut>(
    slot: &Slot<Listing<T>>,
    key: &str,
    upto: u32,
    fetch: F,
) -> Result<Listing<T>, PageError>
where
    T: Clone,
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Paged<T>, FetchError>>,
{
    // Pages are accumulated locally; a concurrent query for another key may
    // take over the slot without emptying this response.
    let mut listing = slot
        .snapshot()
        .data
        .filter(|l| l.key() == key)
        .unwrap_or_else(|| Listing::new(key));
    while listing.last_page() < upto && (listing.last_page() == 0 || listing.has_more()) {
        let next = listing.last_page() + 1;
        let fetched = dispatch_page(slot, key.to_string(), next, fetch(next)).await?;
        listing.merge(fetched);
    }
    Ok(listing)
}

async fn home(State(state): State<AppState>) -> Result<Json<Value>, PageError> {
    let store = &state.store;
    let tmdb = &state.tmdb;

    let (trending, upcoming, popular, _, _) = tokio::join!(
        dispatch(&store.trending, tmdb.trending_movies(TimeWindow::Day)),
        dispatch(&store.upcoming, results(tmdb.movie_list(MovieList::Upcoming, 1))),
        dispatch(&store.popular_movies, results(tmdb.movie_list(MovieList::Popular, 1))),
        ensure_loaded(&store.now_playing, results(tmdb.movie_list(MovieList::NowPlaying, 1))),
        ensure_loaded(&store.top_rated_movies, results(tmdb.movie_list(MovieList::TopRated, 1))),
    );
    let trending = RequestState::settled(Ok(trending?));

    let mut rng = rand::thread_rng();
    Ok(Json(json!({
        "trending": section(trending, movie_card, usize::MAX),
        "upcoming": section(RequestState::settled(upcoming), movie_card, usize::MAX),
        "popular": section(RequestState::settled(popular), movie_card, usize::MAX),
        "now_playing": carousel(store.now_playing.snapshot(), &mut rng),
        "top_rated": carousel(store.top_rated_movies.snapshot(), &mut rng),
    })))
}

async fn trending(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let window = match present(&params.window) {
        Some(raw) => TimeWindow::parse(raw)
            .ok_or_else(|| PageError::BadRequest(format!("window must be day or week, got '{}'", raw)))?,
        None => TimeWindow::Day,
    };
    let movies = dispatch(&state.store.trending, state.tmdb.trending_movies(window)).await?;
    Ok(Json(json!({
        "window": window.as_str(),
        "trending": section(RequestState::settled(Ok(movies)), movie_card, usize::MAX),
    })))
}

async fn discover_movies(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let page = params.page()?;
    let filter = params.filter(&[MOVIE_GENRES])?;
    let query = DiscoverQuery {
        language: present(&params.language).map(str::to_string),
        sort: params.sort()?.unwrap_or_default(),
        min_score: filter.min_score,
        released_from: filter.released_from,
        released_to: filter.released_to,
        genres: filter.genres,
        include_adult: false,
        include_video: false,
    };
    let key = query.key();
    let wanted = page * MOVIES_PER_PAGE as u32;
    let upto = wanted.div_ceil(UPSTREAM_PAGE_SIZE).min(MAX_PAGE);
    debug!("Discover {} up to upstream page {}", key, upto);

    let listing = load_pages(&state.store.discover, &key, upto, |n| {
        state.tmdb.discover_movies(&query, n)
    })
    .await?;
    let items = listing.items();
    let shown = catalog::visible(&items, page, MOVIES_PER_PAGE);
    let has_more = items.len() > shown.len() || listing.has_more();

    Ok(Json(json!({
        "language": query.language.as_deref().unwrap_or(&state.language),
        "sort": query.sort.upstream_key(),
        "page": page,
        "items": shown.iter().map(movie_card).collect::<Vec<_>>(),
        "total_results": listing.total_results(),
        "has_more": has_more,
        "next": has_more.then(|| params.next_href("/movies", page + 1)),
    })))
}

async fn top_rated_movies(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let page = params.page()?;
    let filter = params.filter(&[MOVIE_GENRES])?;
    let movies = dispatch(
        &state.store.top_rated_movies,
        results(state.tmdb.movie_list(MovieList::TopRated, 1)),
    )
    .await?;

    let filtered = catalog::apply(&movies, &filter, None);
    Ok(Json(filtered_page("/movies/top-rated", &params, page, &filtered, MOVIES_PER_PAGE, movie_card)))
}

async fn tv_on_the_air(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let page = params.page()?;
    let filter = params.filter(&[TV_GENRES])?;
    let sort = params.sort()?.unwrap_or_default();
    let shows = dispatch(
        &state.store.tv_on_the_air,
        results(state.tmdb.tv_list(TvList::OnTheAir, 1)),
    )
    .await?;

    let filtered = catalog::apply(&shows, &filter, Some(sort));
    Ok(Json(filtered_page("/tv/on-the-air", &params, page, &filtered, SHOWS_PER_PAGE, tv_card)))
}

async fn tv_top_rated(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let page = params.page()?;
    let filter = params.filter(&[TV_GENRES])?;
    let shows = dispatch(
        &state.store.tv_top_rated,
        results(state.tmdb.tv_list(TvList::TopRated, 1)),
    )
    .await?;

    let filtered = catalog::apply(&shows, &filter, None);
    Ok(Json(filtered_page("/tv/top-rated", &params, page, &filtered, MOVIES_PER_PAGE, tv_card)))
}

fn filtered_page<T>(
    path: &str,
    params: &PageParams,
    page: u32,
    filtered: &[T],
    per_page: usize,
    card: fn(&T) -> Card,
) -> Value {
    let shown = catalog::visible(filtered, page, per_page);
    let has_more = filtered.len() > shown.len();
    json!({
        "page": page,
        "items": shown.iter().map(card).collect::<Vec<_>>(),
        "matching": filtered.len(),
        "has_more": has_more,
        "next": has_more.then(|| params.next_href(path, page + 1)),
    })
}

async fn movie_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let store = &state.store;
    let (movie, similar) = tokio::join!(
        dispatch(&store.movie_detail, state.tmdb.movie_detail(id)),
        dispatch(&store.similar_movies, state.tmdb.similar_movies(id)),
    );
    let movie = movie?;

    Ok(Json(json!({
        "score_percent": view::score_percent(movie.vote_average),
        "poster": poster(&movie.poster_path),
        "backdrop": movie.backdrop_path.as_deref().map(|p| image_url(ImageSize::Original, p)),
        "movie": movie,
        "similar": section(RequestState::settled(similar), movie_card, usize::MAX),
    })))
}

async fn tv_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let store = &state.store;
    let (show, similar, credits) = tokio::join!(
        dispatch(&store.tv_detail, state.tmdb.tv_detail(id)),
        dispatch(&store.similar_tv, state.tmdb.similar_tv(id)),
        dispatch(&store.tv_credits, state.tmdb.tv_credits(id)),
    );
    let mut show = show?;
    let overview_truncated = show.overview.chars().count() > view::TV_OVERVIEW_CHARS;
    show.overview = view::truncate_chars(&show.overview, view::TV_OVERVIEW_CHARS);
    let credits = RequestState::settled(credits);

    Ok(Json(json!({
        "score_percent": view::score_percent(show.vote_average),
        "poster": poster(&show.poster_path),
        "backdrop": show.backdrop_path.as_deref().map(|p| image_url(ImageSize::Original, p)),
        "overview_truncated": overview_truncated,
        "show": show,
        "similar": section(RequestState::settled(similar), tv_card, SIMILAR_SHOWS),
        "credits": credits,
    })))
}

async fn tv_seasons(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let show = dispatch(&state.store.tv_detail, state.tmdb.tv_detail(id)).await?;
    let seasons: Vec<Value> = show
        .seasons
        .iter()
        .map(|season| {
            json!({
                "season_number": season.season_number,
                "name": season.name,
                "episode_count": season.episode_count,
                "air_date": season.air_date,
                "poster": poster(&season.poster_path),
                "href": format!("/tv/{}/season/{}", show.id, season.season_number),
            })
        })
        .collect();
    Ok(Json(json!({
        "id": show.id,
        "name": show.name,
        "seasons": seasons,
    })))
}

async fn season_page(
    State(state): State<AppState>,
    Path((id, season)): Path<(String, String)>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let season = parse_number(&season, "season")?;
    let detail = dispatch(&state.store.season, state.tmdb.tv_season(id, season)).await?;
    let episodes: Vec<Value> = detail
        .episodes
        .iter()
        .map(|episode| {
            json!({
                "episode_number": episode.episode_number,
                "name": episode.name,
                "air_date": episode.air_date,
                "overview": view::truncate_words(&episode.overview, view::OVERVIEW_WORDS),
                "still": poster(&episode.still_path),
                "score_percent": view::score_percent(episode.vote_average),
                "href": format!("/tv/{}/season/{}/episode/{}", id, season, episode.episode_number),
            })
        })
        .collect();
    Ok(Json(json!({
        "show_id": id,
        "season_number": detail.season_number,
        "name": detail.name,
        "overview": detail.overview,
        "poster": poster(&detail.poster_path),
        "episodes": episodes,
    })))
}

async fn episode_page(
    State(state): State<AppState>,
    Path((id, season, episode)): Path<(String, String, String)>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let season = parse_number(&season, "season")?;
    let episode = parse_number(&episode, "episode")?;
    let mut detail =
        dispatch(&state.store.episode, state.tmdb.tv_episode(id, season, episode)).await?;
    let overview_truncated = view::exceeds_words(&detail.overview, view::OVERVIEW_WORDS);
    detail.overview = view::truncate_words(&detail.overview, view::OVERVIEW_WORDS);

    Ok(Json(json!({
        "show_id": id,
        "still": detail.still_path.as_deref().map(|p| image_url(ImageSize::Original, p)),
        "score_percent": view::score_percent(detail.vote_average),
        "overview_truncated": overview_truncated,
        "episode": detail,
    })))
}

async fn people_page(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let page = params.page()?;
    let listing = dispatch_page(
        &state.store.people,
        "person/popular".to_string(),
        page,
        state.tmdb.popular_people(page),
    )
    .await?;
    let people: Vec<Value> = listing
        .page(page)
        .unwrap_or_default()
        .iter()
        .map(|person| {
            json!({
                "id": person.id,
                "name": person.name,
                "department": person.known_for_department,
                "image": profile(&person.profile_path),
                "href": format!("/personalDetails/{}", person.id),
            })
        })
        .collect();
    let total_pages = listing.total_pages().min(MAX_PAGE);

    Ok(Json(json!({
        "page": page,
        "total_pages": total_pages,
        "people": people,
        "pages": view::page_numbers(page, total_pages),
        "previous": (page > 1).then(|| page - 1),
        "next": (page < total_pages).then(|| page + 1),
    })))
}

async fn person_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PageError> {
    let id = parse_id(&id)?;
    let store = &state.store;
    let (person, credits) = tokio::join!(
        dispatch(&store.person_detail, state.tmdb.person_detail(id)),
        dispatch(&store.person_credits, state.tmdb.person_movie_credits(id)),
    );
    let person = person?;
    let until = person.deathday.unwrap_or_else(|| Utc::now().date_naive());

    Ok(Json(json!({
        "birthday": view::format_birthday(person.birthday, until),
        "biography": view::truncate_words(&person.biography, view::BIO_WORDS),
        "biography_truncated": view::exceeds_words(&person.biography, view::BIO_WORDS),
        "image": profile(&person.profile_path),
        "person": person,
        "movies": section(RequestState::settled(credits), credit_card, usize::MAX),
    })))
}

async fn search_page(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, PageError> {
    let Some(query) = present(&params.q).map(str::to_string) else {
        state.store.clear_search();
        return Ok(Json(json!({
            "query": null,
            "search": state.store.search.snapshot(),
        })));
    };
    let page = params.page()?;
    let filter = params.filter(&[MOVIE_GENRES, TV_GENRES])?;
    let sort = params.sort()?.unwrap_or_default();

    let listing = load_pages(&state.store.search, &query, page, |n| {
        state.tmdb.search_multi(&query, n)
    })
    .await?;
    let hits = listing.items();
    let filtered = catalog::apply(&hits, &filter, Some(sort));
    let shown = catalog::visible(&filtered, page, MOVIES_PER_PAGE);
    let has_more = filtered.len() > shown.len() || listing.has_more();

    Ok(Json(json!({
        "query": query,
        "page": page,
        "items": shown.iter().map(search_card).collect::<Vec<_>>(),
        "matching": filtered.len(),
        "total_results": listing.total_results(),
        "sort": sort.upstream_key(),
        "has_more": has_more,
        "next": has_more.then(|| params.next_href("/search", page + 1)),
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(pairs: &[(&str, &str)]) -> PageParams {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let uri: axum::http::Uri = format!("/x?{}", query).parse().unwrap();
        Query::<PageParams>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn page_defaults_to_one_and_rejects_zero() {
        assert_eq!(params(&[]).page().unwrap(), 1);
        assert_eq!(params(&[("page", "3")]).page().unwrap(), 3);
        assert!(params(&[("page", "0")]).page().is_err());
        assert!(params(&[("page", "501")]).page().is_err());
        assert!(params(&[("page", "two")]).page().is_err());
    }

    #[test]
    fn filter_reads_every_predicate() {
        let filter = params(&[
            ("genres", "Drama,35"),
            ("min_score", "6.5"),
            ("from", "2020-01-01"),
            ("to", "2024-12-31"),
            ("type", "movie"),
        ])
        .filter(&[MOVIE_GENRES])
        .unwrap();
        assert_eq!(filter.genres, vec![18, 35]);
        assert_eq!(filter.min_score, 6.5);
        assert_eq!(filter.released_from, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(filter.kind, Some(MediaKind::Movie));
    }

    #[test]
    fn filter_rejects_bad_input() {
        assert!(params(&[("min_score", "11")]).filter(&[MOVIE_GENRES]).is_err());
        assert!(params(&[("from", "2020/01/01")]).filter(&[MOVIE_GENRES]).is_err());
        assert!(params(&[("from", "2024-01-01"), ("to", "2020-01-01")])
            .filter(&[MOVIE_GENRES])
            .is_err());
        assert!(params(&[("genres", "Kids")]).filter(&[MOVIE_GENRES]).is_err());
        assert!(params(&[("genres", "Kids")]).filter(&[TV_GENRES]).is_ok());
        assert!(params(&[("genres", "Kids,Action")])
            .filter(&[MOVIE_GENRES, TV_GENRES])
            .is_ok());
        assert!(params(&[("type", "book")]).filter(&[MOVIE_GENRES]).is_err());
    }

    #[test]
    fn next_href_keeps_other_params() {
        let p = params(&[("q", "star wars"), ("sort", "vote_average.desc"), ("page", "1")]);
        assert_eq!(
            p.next_href("/search", 2),
            "/search?q=star%20wars&sort=vote_average.desc&page=2"
        );
    }

    #[test]
    fn carousel_truncates_titles_and_keeps_four() {
        let movies: Vec<MovieSummary> = (1..=6u64)
            .map(|id| {
                serde_json::from_value(json!({
                    "id": id,
                    "title": "A Very Long Movie Title Indeed",
                }))
                .unwrap()
            })
            .collect();
        let state = RequestState {
            phase: Phase::Fulfilled,
            data: Some(movies),
            error: None,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let section = carousel(state, &mut rng);
        assert_eq!(section.items.len(), 4);
        assert_eq!(section.items[0].title, "A Very Long M...");
    }

    #[test]
    fn carousel_picks_differ_between_shuffles() {
        let movies: Vec<MovieSummary> = (1..=20u64)
            .map(|id| serde_json::from_value(json!({ "id": id, "title": "T" })).unwrap())
            .collect();
        let state = || RequestState {
            phase: Phase::Fulfilled,
            data: Some(movies.clone()),
            error: None,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let picks: Vec<Vec<u64>> = (0..5)
            .map(|_| carousel(state(), &mut rng).items.iter().map(|c| c.id).collect())
            .collect();
        assert!(picks
            .iter()
            .all(|ids| ids.len() == 4 && ids.iter().all(|id| (1..=20).contains(id))));
        assert!(picks.iter().any(|ids| ids != &picks[0]));
    }
}
