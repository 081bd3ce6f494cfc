use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use thiserror::Error;

use crate::api::{ApiError, RankingApi};
use crate::clock::Clock;
use crate::config::{SearchStrategy, Settings};
use crate::models::PlayerRecord;
use crate::pool::with_fetch_pool;
use crate::ranking_cache::{CacheLookup, RankingCache};
use crate::replay_cache::ReplayCache;
use crate::replay_stats::calculate_stats;

pub use crate::api::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub strategy: SearchStrategy,
    pub include_replay_stats: bool,
}

impl SearchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            strategy: settings.search_strategy,
            include_replay_stats: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Cache,
    Ladder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub player: PlayerRecord,
    /// Zero-based ladder position.
    pub position: usize,
    pub source: HitSource,
}

impl SearchHit {
    pub fn rank(&self) -> usize {
        self.position + 1
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("player name cannot be empty")]
    EmptyUsername,
    #[error("user lookup failed: {0}")]
    UserLookup(#[source] ApiError),
    #[error("ranking search failed at offset {offset}: {source}")]
    Ranking {
        offset: usize,
        #[source]
        source: ApiError,
    },
}

enum SearchState {
    CheckExistence,
    CacheLookup,
    ColdSearch { offset: usize },
    Found(SearchHit),
    NotFound,
}

/// Resolves a username to a ladder position using the ranking cache first
/// and the paginated ranking API second.
pub struct PlayerSearch {
    api: Arc<RankingApi>,
    rankings: Arc<RankingCache>,
    replays: Arc<ReplayCache>,
    clock: Arc<dyn Clock>,
}

impl PlayerSearch {
    pub fn new(
        api: Arc<RankingApi>,
        rankings: Arc<RankingCache>,
        replays: Arc<ReplayCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            rankings,
            replays,
            clock,
        }
    }

    pub fn rankings(&self) -> &RankingCache {
        &self.rankings
    }

    pub fn replays(&self) -> &ReplayCache {
        &self.replays
    }

    /// `Ok(None)` means the user does not exist or is not on the ladder within
    /// `MAX_SEARCH_OFFSET`. Gateway failures are returned as errors.
    pub fn search(
        &self,
        username: &str,
        options: &SearchOptions,
        progress: Progress<'_>,
    ) -> Result<Option<SearchHit>, SearchError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SearchError::EmptyUsername);
        }

        let report = |message: &str| {
            tracing::info!("search progress: {message}");
            progress(message);
        };

        self.run(username, options, &report).inspect_err(|err| {
            tracing::error!(player = username, error = %err, "search failed");
        })
    }

    fn run(
        &self,
        username: &str,
        options: &SearchOptions,
        progress: Progress<'_>,
    ) -> Result<Option<SearchHit>, SearchError> {
        let mut state = SearchState::CheckExistence;
        loop {
            state = match state {
                SearchState::CheckExistence => {
                    progress("Checking if player exists...");
                    let user = self
                        .api
                        .get_user(username)
                        .map_err(SearchError::UserLookup)?;
                    if user.is_ok() {
                        progress("Player found, searching for ranking...");
                        SearchState::CacheLookup
                    } else {
                        progress("Player not found");
                        SearchState::NotFound
                    }
                }
                SearchState::CacheLookup => match self.rankings.search_player(username) {
                    CacheLookup::Hit { player, position } => {
                        progress(&format!("Found player in cache at rank {}", position + 1));
                        SearchState::Found(SearchHit {
                            player,
                            position,
                            source: HitSource::Cache,
                        })
                    }
                    CacheLookup::Miss { resume_offset } => SearchState::ColdSearch {
                        offset: resume_offset,
                    },
                },
                SearchState::ColdSearch { offset } => {
                    let hit = match options.strategy {
                        SearchStrategy::Sequential => {
                            self.sequential_search(username, offset, progress)?
                        }
                        SearchStrategy::Parallel => self.parallel_search(username, progress)?,
                    };
                    match hit {
                        Some(hit) => SearchState::Found(hit),
                        None => {
                            progress("Player not found in rankings");
                            SearchState::NotFound
                        }
                    }
                }
                SearchState::Found(mut hit) => {
                    if options.include_replay_stats {
                        self.attach_replay_stats(&mut hit.player, progress);
                    }
                    progress(&format!("Found player at rank {}", hit.rank()));
                    return Ok(Some(hit));
                }
                SearchState::NotFound => return Ok(None),
            };
        }
    }

    fn sequential_search(
        &self,
        username: &str,
        start: usize,
        progress: Progress<'_>,
    ) -> Result<Option<SearchHit>, SearchError> {
        let settings = self.api.settings();
        let batch = settings.batch_size.max(1);
        let mut offset = start;
        let mut restarted = false;

        while offset < settings.max_search_offset {
            progress(&format!("Searching ranks {}-{}...", offset + 1, offset + batch));
            let players = self
                .api
                .fetch_ranking_page(offset, progress)
                .map_err(|source| SearchError::Ranking { offset, source })?;
            if players.is_empty() {
                break;
            }

            let write = self.rankings.add_players(&players, offset);
            if let Some(idx) = position_in(&players, username) {
                return Ok(Some(SearchHit {
                    player: players[idx].clone(),
                    position: offset + idx,
                    source: HitSource::Ladder,
                }));
            }
            if players.len() < batch {
                break;
            }

            if write.reset && offset > 0 && !restarted {
                // Pages above this one went with the expired snapshot. One
                // restart per walk, so a tiny CACHE_DURATION cannot loop forever.
                progress("Ranking cache expired, restarting from the top...");
                restarted = true;
                offset = 0;
            } else {
                offset += batch;
            }
            if offset < settings.max_search_offset {
                self.clock.sleep(settings.request_delay);
            }
        }

        Ok(None)
    }

    /// Fetches every batch in `[0, MAX_SEARCH_OFFSET)` on the worker pool.
    /// Each fetched batch lands in the ranking cache; the first batch holding
    /// the player claims the result and stops batches that have not started.
    fn parallel_search(
        &self,
        username: &str,
        progress: Progress<'_>,
    ) -> Result<Option<SearchHit>, SearchError> {
        let settings = self.api.settings();
        let batch = settings.batch_size.max(1);
        let offsets: Vec<usize> = (0..settings.max_search_offset).step_by(batch).collect();
        let workers = settings.search_workers;

        let found = AtomicBool::new(false);
        let stop = AtomicBool::new(false);
        let hit: Mutex<Option<SearchHit>> = Mutex::new(None);
        let failure: Mutex<Option<SearchError>> = Mutex::new(None);

        progress(&format!(
            "Searching {} batches with {} workers...",
            offsets.len(),
            workers
        ));

        with_fetch_pool(workers, || {
            offsets.par_iter().for_each(|&offset| {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                progress(&format!("Searching ranks {}-{}...", offset + 1, offset + batch));
                let players = match self.api.fetch_ranking_page(offset, progress) {
                    Ok(players) => players,
                    Err(source) => {
                        let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
                        if slot.is_none() {
                            *slot = Some(SearchError::Ranking { offset, source });
                        }
                        stop.store(true, Ordering::Release);
                        return;
                    }
                };
                if players.is_empty() {
                    return;
                }

                self.rankings.add_players(&players, offset);
                if found.load(Ordering::Acquire) {
                    return;
                }
                let Some(idx) = position_in(&players, username) else {
                    return;
                };
                if found
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    stop.store(true, Ordering::Release);
                    *hit.lock().unwrap_or_else(PoisonError::into_inner) = Some(SearchHit {
                        player: players[idx].clone(),
                        position: offset + idx,
                        source: HitSource::Ladder,
                    });
                }
            });
        });

        if let Some(hit) = hit.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Ok(Some(hit));
        }
        match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Best effort: a replay fetch failure leaves the player without stats.
    fn attach_replay_stats(&self, player: &mut PlayerRecord, progress: Progress<'_>) {
        let settings = self.api.settings();
        let username = player.name.clone();

        let replays = match self.replays.get_fresh(&username) {
            Some(entry) => {
                progress(&format!("Using {} cached replays...", entry.replays.len()));
                entry.replays
            }
            None => {
                progress("Fetching replays...");
                match self
                    .api
                    .fetch_all_replays(&username, settings.search_workers, progress)
                {
                    Ok((replays, total)) => {
                        self.replays.put(&username, replays.clone(), total);
                        replays
                    }
                    Err(err) => {
                        tracing::warn!(player = %username, error = %err, "replay fetch failed");
                        progress(&format!("Replay stats unavailable: {err}"));
                        return;
                    }
                }
            }
        };

        progress("Calculating stats...");
        player.replay_stats = Some(calculate_stats(&replays, &username, settings.replay_shape));
        progress("Stats calculation complete!");
    }
}

fn position_in(players: &[PlayerRecord], username: &str) -> Option<usize> {
    players.iter().position(|p| p.matches_name(username))
}
