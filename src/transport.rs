use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, ORIGIN, REFERER};
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid json body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("session bootstrap failed: {0}")]
    Session(String),
}

/// Blocking request function the gateway sits on. Implementations own whatever
/// session state the remote end needs; `reset_session` throws it away and
/// builds a new one.
pub trait Transport: Send + Sync {
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError>;

    fn reset_session(&self) -> Result<(), TransportError>;
}

pub struct HttpTransport {
    client: RwLock<Client>,
    home_url: String,
    user_agent: String,
    timeout: Duration,
    warmup: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpTransport {
    /// Builds a client and visits the home page once so the first API call
    /// already carries session cookies.
    pub fn connect(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, TransportError> {
        let client = build_client(&settings.user_agent, settings.request_timeout)?;
        let transport = Self {
            client: RwLock::new(client),
            home_url: settings.home_url.clone(),
            user_agent: settings.user_agent.clone(),
            timeout: settings.request_timeout,
            warmup: settings.session_warmup,
            clock,
        };
        transport.bootstrap()?;
        Ok(transport)
    }

    fn current(&self) -> Client {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn bootstrap(&self) -> Result<(), TransportError> {
        let resp = self
            .current()
            .get(&self.home_url)
            .send()
            .map_err(|err| TransportError::Session(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Session(format!("home page returned {status}")));
        }
        tracing::info!(status = status.as_u16(), "session initialized");
        self.clock.sleep(self.warmup);
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let mut req = self.current().request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send()?;
        let status = resp.status();
        let text = resp.text()?;

        if !status.is_success() {
            // Error payloads in the API's own envelope still go back to the
            // gateway, which knows how to read `res` / `error`.
            if let Ok(value) = serde_json::from_str::<Value>(&text)
                && value.get("res").is_some()
            {
                return Ok(value);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn reset_session(&self) -> Result<(), TransportError> {
        let fresh = build_client(&self.user_agent, self.timeout)?;
        match self.client.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        self.bootstrap()
    }
}

fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );
    headers.insert(ORIGIN, HeaderValue::from_static("https://www.fightcade.com"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.fightcade.com/"));

    Ok(Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .timeout(timeout)
        .build()?)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
