#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Method;
use serde_json::{Value, json};

use fcrank::api::RankingApi;
use fcrank::clock::Clock;
use fcrank::config::Settings;
use fcrank::models::PlayerRecord;
use fcrank::ranking_cache::RankingCache;
use fcrank::replay_cache::ReplayCache;
use fcrank::search::PlayerSearch;
use fcrank::transport::{Transport, TransportError};

pub fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

pub fn fixture_json(name: &str) -> Value {
    serde_json::from_str(&read_fixture(name)).expect("fixture should be valid json")
}

/// Clock whose `sleep` advances time instantly and remembers every pause.
pub struct ManualClock {
    now: Mutex<SystemTime>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(secs: u64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(UNIX_EPOCH + Duration::from_secs(secs)),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, secs: u64) {
        *self.now.lock().unwrap() = UNIX_EPOCH + Duration::from_secs(secs);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

type Handler = Box<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

/// Transport answering from a closure and recording every request body.
pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<Value>>,
    resets: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, req: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|body| body["req"] == req)
            .collect()
    }

    pub fn ranking_offsets(&self) -> Vec<u64> {
        self.calls_for("searchrankings")
            .iter()
            .filter_map(|body| body["offset"].as_u64())
            .collect()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        _method: Method,
        _url: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let body = body.cloned().unwrap_or(Value::Null);
        self.calls.lock().unwrap().push(body.clone());
        (self.handler)(&body)
    }

    fn reset_session(&self) -> Result<(), TransportError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn ladder_player(position: usize) -> PlayerRecord {
    PlayerRecord::new(format!("player{position:05}"))
}

/// Ladder of `size` players where `target` (if any) sits at `target_position`.
pub fn ladder(size: usize, target: Option<(&str, usize)>) -> Vec<PlayerRecord> {
    (0..size)
        .map(|pos| match target {
            Some((name, at)) if at == pos => PlayerRecord::new(name),
            _ => ladder_player(pos),
        })
        .collect()
}

/// Serves `getuser` for `known_users` and `searchrankings` pages out of `players`.
pub fn ladder_handler(
    players: Vec<PlayerRecord>,
    known_users: &[&str],
) -> impl Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static {
    let known: Vec<String> = known_users.iter().map(|u| u.to_lowercase()).collect();
    move |body: &Value| match body["req"].as_str() {
        Some("getuser") => {
            let name = body["username"].as_str().unwrap_or_default().to_lowercase();
            if known.contains(&name) {
                Ok(json!({"res": "OK", "user": {"name": name}}))
            } else {
                Ok(json!({"res": "ERR", "error": "user not found"}))
            }
        }
        Some("searchrankings") => Ok(ranking_page(&players, body)),
        _ => Ok(json!({"res": "ERR", "error": "unexpected request"})),
    }
}

pub fn ranking_page(players: &[PlayerRecord], body: &Value) -> Value {
    let offset = body["offset"].as_u64().unwrap_or(0) as usize;
    let limit = body["limit"].as_u64().unwrap_or(100) as usize;
    let page: Vec<&PlayerRecord> = players.iter().skip(offset).take(limit).collect();
    json!({"res": "OK", "results": {"results": page, "count": players.len()}})
}

pub fn test_settings(cache_dir: &Path) -> Settings {
    Settings {
        cache_dir: cache_dir.to_path_buf(),
        log_dir: cache_dir.join("logs"),
        ..Settings::default()
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub transport: Arc<ScriptedTransport>,
    pub search: PlayerSearch,
    pub rankings: Arc<RankingCache>,
    pub replays: Arc<ReplayCache>,
}

pub fn harness(settings: Settings, transport: Arc<ScriptedTransport>) -> Harness {
    let clock = ManualClock::at(1_700_000_000);
    let rankings = Arc::new(RankingCache::from_settings(&settings, clock.clone()));
    let replays = Arc::new(ReplayCache::from_settings(&settings, clock.clone()));
    let api = Arc::new(RankingApi::new(transport.clone(), clock.clone(), settings));
    let search = PlayerSearch::new(api, rankings.clone(), replays.clone(), clock.clone());
    Harness {
        clock,
        transport,
        search,
        rankings,
        replays,
    }
}

pub fn collect_progress() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Sync) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    (messages, move |message: &str| {
        sink.lock().unwrap().push(message.to_string())
    })
}
