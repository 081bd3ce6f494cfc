use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use fcrank::api::RankingApi;
use fcrank::clock::{Clock, SystemClock};
use fcrank::config::{SearchStrategy, Settings};
use fcrank::logging;
use fcrank::ranking_cache::RankingCache;
use fcrank::replay_cache::ReplayCache;
use fcrank::search::{HitSource, PlayerSearch, SearchHit, SearchOptions};
use fcrank::transport::HttpTransport;

const USAGE: &str = "usage: fcrank <username> [--parallel|--sequential|--strategy=<name>] [--replays] [--cache-stats] [--clear-cache]";

#[derive(Debug)]
struct Args {
    username: Option<String>,
    strategy: Option<SearchStrategy>,
    replays: bool,
    cache_stats: bool,
    clear_cache: bool,
}

fn main() -> Result<()> {
    let settings = Settings::from_env();
    logging::init(&settings);

    let args = parse_args(std::env::args().skip(1)).context(USAGE)?;
    if args.username.is_none() && !args.cache_stats && !args.clear_cache {
        return Err(anyhow!(USAGE));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rankings = Arc::new(RankingCache::from_settings(&settings, clock.clone()));
    let replays = Arc::new(ReplayCache::from_settings(&settings, clock.clone()));

    if args.clear_cache {
        rankings.clear();
        replays.clear();
        println!("Caches cleared");
    }

    if let Some(username) = args.username.as_deref() {
        let transport = HttpTransport::connect(&settings, clock.clone())
            .context("failed to initialize session")?;
        let api = Arc::new(RankingApi::new(
            Arc::new(transport),
            clock.clone(),
            settings.clone(),
        ));
        let search = PlayerSearch::new(api, rankings.clone(), replays.clone(), clock);

        let mut options = SearchOptions::from_settings(&settings);
        if let Some(strategy) = args.strategy {
            options.strategy = strategy;
        }
        options.include_replay_stats = args.replays;

        let progress = |message: &str| println!("... {message}");
        match search.search(username, &options, &progress)? {
            Some(hit) => print_hit(&hit, &settings),
            None => println!("{username}: not ranked"),
        }
    }

    if args.cache_stats {
        let r = rankings.stats();
        println!(
            "Ranking cache: {} players, {:.1}KB, {}, age {:.0}s, last offset {}",
            r.total_players,
            r.size_bytes as f64 / 1024.0,
            if r.is_valid { "valid" } else { "expired" },
            r.age_secs,
            r.last_offset
        );
        let p = replays.stats();
        println!(
            "Replay cache: {} players, {:.1}KB",
            p.total_players,
            p.size_bytes as f64 / 1024.0
        );
        for name in p.player_names.iter().take(10) {
            println!("  - {name}");
        }
    }

    Ok(())
}

fn print_hit(hit: &SearchHit, settings: &Settings) {
    let player = &hit.player;
    let source = match hit.source {
        HitSource::Cache => "cache",
        HitSource::Ladder => "ladder",
    };
    println!("{} is rank #{} ({source})", player.name, hit.rank());

    if let Some(country) = player
        .country
        .as_ref()
        .and_then(|c| c.full_name.as_deref().or(c.iso_code.as_deref()))
    {
        println!("Country: {country}");
    }
    if let Some(stats) = player.stats_for(&settings.game_id) {
        println!(
            "Tier {} | matches {} | W {} / L {} | played {:.1}h",
            stats.tier().label(),
            stats.num_matches,
            stats.wins,
            stats.losses,
            stats.time_played as f64 / 3600.0
        );
    }
    if let Some(stats) = player.replay_stats.as_ref() {
        println!(
            "Replays: {} ranked matches | W {} / L {} | win rate {:.2}%",
            stats.total_matches, stats.wins, stats.losses, stats.win_rate
        );
        if let Some(last) = stats.last_played.as_deref() {
            println!("Last played: {last}");
        }
        for opponent in stats.opponents.iter().take(5) {
            println!("  vs {} x{}", opponent.name, opponent.count);
        }
        for character in stats.characters.iter().take(3) {
            println!("  as {} x{}", character.name, character.count);
        }
    }
}

fn parse_args(raw: impl Iterator<Item = String>) -> Result<Args> {
    let mut args = Args {
        username: None,
        strategy: None,
        replays: false,
        cache_stats: false,
        clear_cache: false,
    };
    for arg in raw {
        match arg.as_str() {
            "--parallel" => args.strategy = Some(SearchStrategy::Parallel),
            "--sequential" => args.strategy = Some(SearchStrategy::Sequential),
            "--replays" => args.replays = true,
            "--cache-stats" => args.cache_stats = true,
            "--clear-cache" => args.clear_cache = true,
            other if other.starts_with("--") => match other.strip_prefix("--strategy=") {
                Some(raw) => args.strategy = Some(raw.parse()?),
                None => return Err(anyhow!("unknown flag: {other}")),
            },
            other => {
                if args.username.is_none() && !other.trim().is_empty() {
                    args.username = Some(other.trim().to_string());
                }
            }
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &[&str]) -> Result<Args> {
        parse_args(line.iter().map(|s| s.to_string()))
    }

    #[test]
    fn strategy_flag_overrides_configuration() {
        let args = parse(&["zeku", "--strategy=parallel", "--replays"]).unwrap();
        assert_eq!(args.username.as_deref(), Some("zeku"));
        assert_eq!(args.strategy, Some(SearchStrategy::Parallel));
        assert!(args.replays);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = parse(&["zeku", "--strategy=sideways"]).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(parse(&["zeku", "--fast"]).is_err());
    }
}
