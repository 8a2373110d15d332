//! Query TMDB through the cinescope client and print what a page would see.
//! Usage:
//!   cargo run --bin tmdb_probe -- trending [day|week]
//!   cargo run --bin tmdb_probe -- on-the-air [sort] [min_score]
//!   cargo run --bin tmdb_probe -- discover <genres> [sort]
//!   cargo run --bin tmdb_probe -- search <query> [movie|tv|person|all]
//!   cargo run --bin tmdb_probe -- movie <tmdb_id>
//!   cargo run --bin tmdb_probe -- tv <tmdb_id> [season_number]
//!   cargo run --bin tmdb_probe -- person <tmdb_id>
//! Requires TMDB_API_TOKEN in the environment (.env supported).

use anyhow::{anyhow, Context, Result};
use cinescope::catalog::{self, Filter, MediaKind, Sort, MOVIE_GENRES};
use cinescope::config::Config;
use cinescope::tmdb::{
    parse_season_number, parse_tmdb_id, DiscoverQuery, TimeWindow, TmdbApi, TmdbClient, TvList,
};
use cinescope::view;
use dotenvy::dotenv;
use serde_json::{json, Value};
use std::env;

fn usage() -> ! {
    eprintln!("Usage: cargo run --bin tmdb_probe -- trending [day|week]");
    eprintln!("       cargo run --bin tmdb_probe -- on-the-air [sort] [min_score]");
    eprintln!("       cargo run --bin tmdb_probe -- discover <genres> [sort]");
    eprintln!("       cargo run --bin tmdb_probe -- search <query> [movie|tv|person|all]");
    eprintln!("       cargo run --bin tmdb_probe -- movie|person <tmdb_id>");
    eprintln!("       cargo run --bin tmdb_probe -- tv <tmdb_id> [season_number]");
    std::process::exit(1);
}

fn id_arg(args: &[String], idx: usize) -> Result<u64> {
    let raw = args.get(idx).ok_or_else(|| anyhow!("missing tmdb_id"))?;
    parse_tmdb_id(raw).ok_or_else(|| anyhow!("tmdb_id must be an integer, got '{}'", raw))
}

fn sort_arg(args: &[String], idx: usize) -> Result<Sort> {
    match args.get(idx) {
        Some(raw) => raw.parse(),
        None => Ok(Sort::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let config = Config::from_env()?;
    let client = TmdbClient::new(&config)?;

    let output = match args[1].as_str() {
        "trending" => {
            let window = match args.get(2) {
                Some(raw) => TimeWindow::parse(raw).ok_or_else(|| anyhow!("window must be day or week"))?,
                None => TimeWindow::Day,
            };
            let movies = client.trending_movies(window).await?;
            json!({
                "window": window.as_str(),
                "titles": movies.iter().map(|m| m.title.as_str()).collect::<Vec<_>>(),
            })
        }
        "on-the-air" => {
            let sort = sort_arg(&args, 2)?;
            let min_score: f64 = match args.get(3) {
                Some(raw) => raw.parse().context("min_score must be a number")?,
                None => 0.0,
            };
            let shows = client.tv_list(TvList::OnTheAir, 1).await?.results;
            let filter = Filter {
                min_score,
                ..Filter::default()
            };
            let kept = catalog::apply(&shows, &filter, Some(sort));
            json!({
                "fetched": shows.len(),
                "kept": kept
                    .iter()
                    .map(|s| json!({ "name": s.name, "score": view::score_percent(s.vote_average) }))
                    .collect::<Vec<_>>(),
            })
        }
        "discover" => {
            let genres = catalog::parse_genres(MOVIE_GENRES, args.get(2).map(String::as_str).unwrap_or(""))?;
            let query = DiscoverQuery {
                sort: sort_arg(&args, 3)?,
                genres,
                ..DiscoverQuery::default()
            };
            let page = client.discover_movies(&query, 1).await?;
            json!({
                "query": query.key(),
                "total_results": page.total_results,
                "titles": page.results.iter().map(|m| m.title.as_str()).collect::<Vec<_>>(),
            })
        }
        "search" => {
            let query = args.get(2).ok_or_else(|| anyhow!("missing query"))?;
            let kind = MediaKind::parse_filter(args.get(3).map(String::as_str).unwrap_or("all"))?;
            let page = client.search_multi(query, 1).await?;
            let filter = Filter {
                kind,
                ..Filter::default()
            };
            let hits = catalog::apply(&page.results, &filter, None);
            json!({
                "total_results": page.total_results,
                "hits": hits
                    .iter()
                    .map(|h| json!({ "name": h.display_name(), "href": h.href() }))
                    .collect::<Vec<_>>(),
            })
        }
        "movie" => {
            let id = id_arg(&args, 2)?;
            let movie = client.movie_detail(id).await?;
            let similar = client.similar_movies(id).await?;
            json!({
                "movie": movie,
                "similar": similar.iter().map(|m| m.title.as_str()).collect::<Vec<_>>(),
            })
        }
        "tv" => {
            let id = id_arg(&args, 2)?;
            match args.get(3) {
                Some(raw) => {
                    let season = parse_season_number(raw)
                        .ok_or_else(|| anyhow!("season number must be an integer"))?;
                    serde_json::to_value(client.tv_season(id, season).await?)?
                }
                None => {
                    let show = client.tv_detail(id).await?;
                    let credits = client.tv_credits(id).await?;
                    json!({
                        "show": show,
                        "cast": credits.cast.iter().take(10).map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    })
                }
            }
        }
        "person" => {
            let id = id_arg(&args, 2)?;
            let person = client.person_detail(id).await?;
            let credits = client.person_movie_credits(id).await?;
            let today = chrono::Utc::now().date_naive();
            json!({
                "name": person.name,
                "birthday": view::format_birthday(person.birthday, person.deathday.unwrap_or(today)),
                "biography": view::truncate_words(&person.biography, view::BIO_WORDS),
                "movies": credits.len(),
            })
        }
        _ => usage(),
    };

    print_json(&output)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
