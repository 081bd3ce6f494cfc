use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::Settings;
use crate::models::{PlayerRecord, RawReplay};
use crate::pool::with_fetch_pool;
use crate::transport::{Transport, TransportError};

/// Progress sink shared with worker threads.
pub type Progress<'a> = &'a (dyn Fn(&str) + Sync);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("unexpected {req} response: {source}")]
    Decode {
        req: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("still rate limited at offset {offset} after {waits} waits")]
    RateLimited { offset: usize, waits: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    pub res: String,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UserResponse {
    pub fn is_ok(&self) -> bool {
        self.res == "OK"
    }
}

/// Envelope of the paginated endpoints: `{res, error?, results?: {results, count}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct PageResponse<T> {
    pub res: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Option<Page<T>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default)]
    pub results: Vec<T>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl<T> PageResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.res == "OK"
    }

    /// Rate limiting is only ever signalled in the error text; `res` codes are
    /// not inspected.
    pub fn is_rate_limited(&self) -> bool {
        !self.is_ok()
            && self
                .error
                .as_deref()
                .is_some_and(|text| text.to_lowercase().contains("rate"))
    }

    pub fn into_items(self) -> Vec<T> {
        self.results.map(|page| page.results).unwrap_or_default()
    }

    pub fn count(&self) -> Option<u64> {
        self.results.as_ref().and_then(|page| page.count)
    }
}

/// Gateway over the ranking service's single POST endpoint.
pub struct RankingApi {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl RankingApi {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        Self {
            transport,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Posts `body` with bounded retries. Every retry waits `ERROR_DELAY`
    /// times the number of failed attempts and rebuilds the transport session
    /// first.
    pub fn request(&self, body: &Value) -> Result<Value, ApiError> {
        let attempts = self.settings.max_retries.max(1);
        let mut last_err: Option<TransportError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.clock
                    .sleep(self.settings.error_delay.saturating_mul(attempt - 1));
                if let Err(err) = self.transport.reset_session() {
                    tracing::warn!(attempt, error = %err, "session reset failed");
                    last_err = Some(err);
                    continue;
                }
            }

            match self
                .transport
                .request(Method::POST, &self.settings.base_url, Some(body))
            {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "request attempt failed");
                    last_err = Some(err);
                }
            }
        }

        let source = last_err
            .unwrap_or_else(|| TransportError::Session("no request attempted".to_string()));
        tracing::error!(max_retries = attempts, final_error = %source, "request failed after maximum retries");
        Err(ApiError::RetriesExhausted { attempts, source })
    }

    pub fn get_user(&self, username: &str) -> Result<UserResponse, ApiError> {
        tracing::info!(username, "fetching user information");
        let body = json!({ "req": "getuser", "username": username });
        self.call("getuser", &body)
    }

    pub fn search_rankings(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<PageResponse<PlayerRecord>, ApiError> {
        let limit = clamp_limit(limit, self.settings.batch_size);
        tracing::info!(offset, limit, "searching rankings");
        let body = json!({
            "req": "searchrankings",
            "offset": offset,
            "limit": limit,
            "gameid": self.settings.game_id,
            "byElo": true,
            "recent": true,
        });
        self.call("searchrankings", &body)
    }

    pub fn get_player_replays(
        &self,
        username: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<PageResponse<RawReplay>, ApiError> {
        let limit = clamp_limit(limit, self.settings.replay_batch_size);
        tracing::info!(username, offset, limit, "fetching replays");
        let body = json!({
            "req": "searchquarks",
            "username": username,
            "gameid": self.settings.game_id,
            "offset": offset,
            "limit": limit,
        });
        self.call("searchquarks", &body)
    }

    /// One ladder page at `offset`, waiting out rate limits on the same offset.
    /// A refused (non-OK, not rate limited) page comes back empty, which the
    /// search treats as the end of the ladder.
    pub fn fetch_ranking_page(
        &self,
        offset: usize,
        progress: Progress<'_>,
    ) -> Result<Vec<PlayerRecord>, ApiError> {
        let resp = self.until_not_rate_limited(offset, progress, || {
            self.search_rankings(offset, None)
        })?;
        if !resp.is_ok() {
            tracing::warn!(offset, res = %resp.res, error = ?resp.error, "ranking page refused");
            return Ok(Vec::new());
        }
        Ok(resp.into_items())
    }

    pub fn fetch_replay_page(
        &self,
        username: &str,
        offset: usize,
        progress: Progress<'_>,
    ) -> Result<PageResponse<RawReplay>, ApiError> {
        self.until_not_rate_limited(offset, progress, || {
            self.get_player_replays(username, offset, None)
        })
    }

    /// Every replay up to `MAX_REPLAY_OFFSET`, fetched `workers` pages at a time
    /// and returned in page order, together with the total match count the API
    /// reports (or the number fetched when it reports none).
    pub fn fetch_all_replays(
        &self,
        username: &str,
        workers: usize,
        progress: Progress<'_>,
    ) -> Result<(Vec<RawReplay>, u64), ApiError> {
        let page_size = self.settings.replay_batch_size.max(1);
        let offsets: Vec<usize> = (0..self.settings.max_replay_offset)
            .step_by(page_size)
            .collect();
        let end = AtomicUsize::new(usize::MAX);

        let pages: Vec<(usize, Option<Result<PageResponse<RawReplay>, ApiError>>)> =
            with_fetch_pool(workers, || {
                offsets
                    .par_iter()
                    .map(|&offset| {
                        if offset > end.load(Ordering::Acquire) {
                            return (offset, None);
                        }
                        let page = self.fetch_replay_page(username, offset, progress);
                        let short = match &page {
                            Ok(resp) => {
                                !resp.is_ok()
                                    || resp.results.as_ref().map_or(0, |p| p.results.len())
                                        < page_size
                            }
                            Err(_) => true,
                        };
                        if short {
                            end.fetch_min(offset, Ordering::AcqRel);
                        }
                        (offset, Some(page))
                    })
                    .collect()
            });

        let mut replays = Vec::new();
        let mut reported_total = None;
        for (offset, page) in pages {
            let Some(page) = page else {
                break;
            };
            let resp = page?;
            if !resp.is_ok() {
                tracing::warn!(offset, res = %resp.res, "replay page refused");
                break;
            }
            if reported_total.is_none() {
                reported_total = resp.count();
            }
            let items = resp.into_items();
            let fetched = items.len();
            replays.extend(items);
            progress(&format!("Fetched {} replays...", replays.len()));
            if fetched < page_size {
                break;
            }
        }

        let total = reported_total.unwrap_or(replays.len() as u64);
        Ok((replays, total))
    }

    fn until_not_rate_limited<T>(
        &self,
        offset: usize,
        progress: Progress<'_>,
        fetch: impl Fn() -> Result<PageResponse<T>, ApiError>,
    ) -> Result<PageResponse<T>, ApiError> {
        let mut waits = 0u32;
        loop {
            let resp = fetch()?;
            if !resp.is_rate_limited() {
                return Ok(resp);
            }
            if waits >= self.settings.max_rate_limit_waits {
                return Err(ApiError::RateLimited { offset, waits });
            }
            waits += 1;
            tracing::warn!(offset, waits, "rate limited");
            progress("Rate limited, waiting...");
            self.clock.sleep(self.settings.rate_limit_delay);
        }
    }

    fn call<T: DeserializeOwned>(&self, req: &'static str, body: &Value) -> Result<T, ApiError> {
        let value = self.request(body)?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode { req, source })
    }
}

fn clamp_limit(requested: Option<usize>, cap: usize) -> usize {
    requested.unwrap_or(cap).min(cap).max(1)
}
