use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, age_secs, unix_secs};
use crate::config::Settings;
use crate::models::{PlayerRecord, normalize_name};
use crate::persist;

/// Time-boxed snapshot of the ladder, keyed by lower-cased player name.
///
/// The whole snapshot shares one `timestamp`: once it is older than the
/// configured duration every lookup misses, and the next write starts a fresh
/// snapshot instead of merging into the stale one.
///
/// Stored pages are tracked as `[start, end)` ranges. A miss resumes at the end
/// of the run that is contiguous from offset 0, so pages fetched out of order
/// never hide the gaps between them.
pub struct RankingCache {
    path: PathBuf,
    duration: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<RankingSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit { player: PlayerRecord, position: usize },
    /// `resume_offset` is where a ladder walk should pick up: the first offset
    /// not covered from the top of the ladder, 0 when the snapshot is not valid.
    Miss { resume_offset: usize },
}

/// What one [`RankingCache::add_players`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheWrite {
    pub added: usize,
    /// An expired snapshot was dropped before this page went in.
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingCacheStats {
    pub total_players: usize,
    pub size_bytes: u64,
    pub is_valid: bool,
    pub age_secs: f64,
    pub last_offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPlayer {
    position: usize,
    player: PlayerRecord,
}

#[derive(Debug, Clone, Default, Serialize)]
struct RankingSnapshot {
    timestamp: Option<f64>,
    /// End of the page run contiguous from offset 0.
    last_offset: usize,
    /// start -> end of every stored page.
    pages: BTreeMap<usize, usize>,
    data: IndexMap<String, CachedPlayer>,
}

impl RankingSnapshot {
    fn record_page(&mut self, start: usize, end: usize) -> bool {
        if end <= start {
            return false;
        }
        let stored = self.pages.entry(start).or_insert(start);
        if *stored >= end {
            return false;
        }
        *stored = end;
        self.last_offset = contiguous_end(&self.pages);
        true
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    timestamp: Option<f64>,
    #[serde(default)]
    pages: Option<BTreeMap<usize, usize>>,
    #[serde(default)]
    data: Option<SnapshotData>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotData {
    Positioned(IndexMap<String, CachedPlayer>),
    Keyed(IndexMap<String, PlayerRecord>),
    List(Vec<PlayerRecord>),
}

impl SnapshotFile {
    fn into_snapshot(self) -> RankingSnapshot {
        let data: IndexMap<String, CachedPlayer> = match self.data {
            None => IndexMap::new(),
            Some(SnapshotData::Positioned(map)) => map,
            Some(SnapshotData::Keyed(map)) => map
                .into_values()
                .enumerate()
                .map(|(position, player)| (player.key(), CachedPlayer { position, player }))
                .collect(),
            Some(SnapshotData::List(list)) => list
                .into_iter()
                .enumerate()
                .map(|(position, player)| (player.key(), CachedPlayer { position, player }))
                .collect(),
        };
        // Older files only carry a high-water mark, which may span gaps; trust
        // just the positions actually stored.
        let pages = self.pages.unwrap_or_else(|| {
            let positions: BTreeSet<usize> = data.values().map(|entry| entry.position).collect();
            let run = (0..).take_while(|pos| positions.contains(pos)).count();
            BTreeMap::from_iter((run > 0).then_some((0, run)))
        });
        RankingSnapshot {
            timestamp: self.timestamp,
            last_offset: contiguous_end(&pages),
            pages,
            data,
        }
    }
}

impl RankingCache {
    pub fn new(path: impl Into<PathBuf>, duration: Duration, clock: Arc<dyn Clock>) -> Self {
        let path = path.into();
        let state = load_snapshot(&path, duration, clock.as_ref());
        Self {
            path,
            duration,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn from_settings(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self::new(settings.ranking_cache_path(), settings.cache_duration, clock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        let state = self.snapshot();
        self.is_fresh(state.timestamp)
    }

    /// Stores one ladder page fetched at `offset`. Names already present keep
    /// their first record and position.
    ///
    /// When the snapshot had expired it is replaced first and the result says
    /// so; a caller walking the ladder has to go back to offset 0 to rebuild
    /// the pages above `offset`.
    pub fn add_players(&self, players: &[PlayerRecord], offset: usize) -> CacheWrite {
        let mut state = self.snapshot();
        let mut changed = false;
        let mut reset = false;

        if !self.is_fresh(state.timestamp) {
            if state.timestamp.is_some() {
                tracing::info!(
                    dropped = state.data.len(),
                    offset,
                    "ranking cache expired, starting a new snapshot"
                );
                reset = true;
            }
            *state = RankingSnapshot {
                timestamp: Some(unix_secs(self.clock.now())),
                ..RankingSnapshot::default()
            };
            changed = true;
        }

        let mut added = 0usize;
        for (idx, player) in players.iter().enumerate() {
            let key = player.key();
            if key.is_empty() || state.data.contains_key(&key) {
                continue;
            }
            state.data.insert(
                key,
                CachedPlayer {
                    position: offset + idx,
                    player: player.clone(),
                },
            );
            added += 1;
        }

        if state.record_page(offset, offset + players.len()) {
            changed = true;
        }

        if added > 0 {
            tracing::info!(
                offset,
                new_count = added,
                total_count = state.data.len(),
                "players added to ranking cache"
            );
        } else {
            tracing::debug!(offset, "no new players to cache");
        }

        if changed || added > 0 {
            self.save(&state);
        }
        CacheWrite { added, reset }
    }

    pub fn search_player(&self, name: &str) -> CacheLookup {
        let state = self.snapshot();
        if !self.is_fresh(state.timestamp) {
            tracing::debug!("ranking cache invalid, skipping lookup");
            return CacheLookup::Miss { resume_offset: 0 };
        }

        let target = normalize_name(name);
        match state.data.get(&target) {
            Some(entry) => {
                tracing::info!(position = entry.position, "player found in ranking cache");
                CacheLookup::Hit {
                    player: entry.player.clone(),
                    position: entry.position,
                }
            }
            None => {
                tracing::info!(
                    cache_size = state.data.len(),
                    last_offset = state.last_offset,
                    "player not in ranking cache"
                );
                CacheLookup::Miss {
                    resume_offset: state.last_offset,
                }
            }
        }
    }

    pub fn stats(&self) -> RankingCacheStats {
        let state = self.snapshot();
        let now = self.clock.now();
        RankingCacheStats {
            total_players: state.data.len(),
            size_bytes: persist::file_size(&self.path),
            is_valid: self.is_fresh(state.timestamp),
            age_secs: state.timestamp.map(|ts| age_secs(now, ts)).unwrap_or(0.0),
            last_offset: state.last_offset,
        }
    }

    /// Drops the snapshot and its file.
    pub fn clear(&self) {
        let mut state = self.snapshot();
        *state = RankingSnapshot::default();
        if let Err(err) = persist::remove_file(&self.path) {
            tracing::warn!(error = %err, "failed to remove ranking cache file");
        }
    }

    fn is_fresh(&self, timestamp: Option<f64>) -> bool {
        is_fresh_at(timestamp, self.duration, self.clock.as_ref())
    }

    fn snapshot(&self) -> MutexGuard<'_, RankingSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &RankingSnapshot) {
        match persist::save_json(&self.path, state) {
            Ok(()) => tracing::debug!(
                players_count = state.data.len(),
                last_offset = state.last_offset,
                "ranking cache saved"
            ),
            Err(err) => tracing::warn!(error = %err, "ranking cache save failed"),
        }
    }
}

fn contiguous_end(pages: &BTreeMap<usize, usize>) -> usize {
    let mut end = 0;
    for (&start, &stop) in pages {
        if start > end {
            break;
        }
        end = end.max(stop);
    }
    end
}

fn is_fresh_at(timestamp: Option<f64>, duration: Duration, clock: &dyn Clock) -> bool {
    match timestamp {
        Some(ts) => age_secs(clock.now(), ts) < duration.as_secs_f64(),
        None => false,
    }
}

fn load_snapshot(path: &Path, duration: Duration, clock: &dyn Clock) -> RankingSnapshot {
    let file = match persist::load_json::<SnapshotFile>(path) {
        Ok(Some(file)) => file,
        Ok(None) => return RankingSnapshot::default(),
        Err(err) => {
            tracing::warn!(error = %err, "ranking cache unreadable, starting empty");
            return RankingSnapshot::default();
        }
    };

    if !is_fresh_at(file.timestamp, duration, clock) {
        tracing::info!(
            cache_age = file.timestamp.map(|ts| age_secs(clock.now(), ts)),
            "ranking cache on disk expired"
        );
        return RankingSnapshot::default();
    }

    let snapshot = file.into_snapshot();
    tracing::info!(
        players_count = snapshot.data.len(),
        last_offset = snapshot.last_offset,
        "ranking cache loaded"
    );
    snapshot
}
