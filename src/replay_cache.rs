use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, age_secs, unix_secs};
use crate::config::Settings;
use crate::models::{RawReplay, normalize_name};
use crate::persist;

/// Raw replays cached for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCacheEntry {
    pub replays: Vec<RawReplay>,
    pub total_matches: u64,
    pub cached_at: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayCacheStats {
    pub total_players: usize,
    pub size_bytes: u64,
    pub player_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReplayCacheFile {
    #[serde(default)]
    data: IndexMap<String, ReplayCacheEntry>,
}

/// Bounded FIFO store of per-player replays.
///
/// Map order is (re)insertion order. When the cap is exceeded the front entry
/// goes, whatever its `cached_at` says; reads never reorder anything.
pub struct ReplayCache {
    path: PathBuf,
    max_players: usize,
    freshness: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<IndexMap<String, ReplayCacheEntry>>,
}

impl ReplayCache {
    pub fn new(
        path: impl Into<PathBuf>,
        max_players: usize,
        freshness: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let path = path.into();
        let max_players = max_players.max(1);
        let mut entries = load_entries(&path);
        while entries.len() > max_players {
            entries.shift_remove_index(0);
        }
        Self {
            path,
            max_players,
            freshness,
            clock,
            entries: Mutex::new(entries),
        }
    }

    pub fn from_settings(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            settings.replay_cache_path(),
            settings.max_cached_players,
            settings.replay_cache_duration,
            clock,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, username: &str) -> Option<ReplayCacheEntry> {
        self.lock().get(&normalize_name(username)).cloned()
    }

    /// Like [`ReplayCache::get`] but ignores entries older than the freshness window.
    pub fn get_fresh(&self, username: &str) -> Option<ReplayCacheEntry> {
        let entry = self.get(username)?;
        let age = age_secs(self.clock.now(), entry.cached_at);
        if age < self.freshness.as_secs_f64() {
            Some(entry)
        } else {
            tracing::debug!(username, age, "cached replays are stale");
            None
        }
    }

    pub fn put(&self, username: &str, replays: Vec<RawReplay>, total_matches: u64) {
        let key = normalize_name(username);
        let mut entries = self.lock();

        entries.shift_remove(&key);
        while entries.len() >= self.max_players {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                tracing::info!(player = %evicted, "evicted oldest replay cache entry");
            }
        }

        let count = replays.len();
        entries.insert(
            key,
            ReplayCacheEntry {
                replays,
                total_matches,
                cached_at: unix_secs(self.clock.now()),
            },
        );
        tracing::info!(username, replays = count, total_matches, "replays cached");
        self.save(&entries);
    }

    pub fn clear(&self) {
        self.lock().clear();
        match persist::remove_file(&self.path) {
            Ok(()) => tracing::info!("replay cache cleared"),
            Err(err) => tracing::warn!(error = %err, "failed to remove replay cache file"),
        }
    }

    pub fn stats(&self) -> ReplayCacheStats {
        let entries = self.lock();
        ReplayCacheStats {
            total_players: entries.len(),
            size_bytes: persist::file_size(&self.path),
            player_names: entries.keys().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, ReplayCacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, entries: &IndexMap<String, ReplayCacheEntry>) {
        #[derive(Serialize)]
        struct FileRef<'a> {
            data: &'a IndexMap<String, ReplayCacheEntry>,
        }

        if let Err(err) = persist::save_json(&self.path, &FileRef { data: entries }) {
            tracing::warn!(error = %err, "replay cache save failed");
        }
    }
}

fn load_entries(path: &Path) -> IndexMap<String, ReplayCacheEntry> {
    match persist::load_json::<ReplayCacheFile>(path) {
        Ok(Some(file)) => {
            tracing::info!(players = file.data.len(), "replay cache loaded");
            file.data
        }
        Ok(None) => IndexMap::new(),
        Err(err) => {
            tracing::warn!(error = %err, "replay cache unreadable, starting empty");
            IndexMap::new()
        }
    }
}
