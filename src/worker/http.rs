//! reqwest-backed fetcher

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::Fetcher;
use crate::config::WorkerConfig;
use crate::engine::Dispatch;
use crate::errors::{AppError, AppResult};
use crate::models::{HttpMethod, Outcome, Proxy, ResponseRecord, Session};

/// How a received status code feeds the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Permanent,
}

/// 2xx/3xx succeed; timeouts, early data, rate limiting and server errors
/// are worth retrying; every other client error is final.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=399 => StatusClass::Success,
        408 | 425 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

/// Headers a session contributes to a fetch: the string values of the
/// `headers` object in its state, when there is one
fn session_headers(session: &Session) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(Value::Object(entries)) = session.state.get("headers") else {
        return headers;
    };
    for (name, value) in entries {
        let Some(value) = value.as_str() else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!("Skipping invalid session header '{}'", name),
        }
    }
    headers
}

pub struct HttpFetcher {
    direct: Client,
    /// One client per proxy URI; reqwest binds proxies at build time
    proxied: RwLock<HashMap<String, Client>>,
    timeout: Duration,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(config: &WorkerConfig) -> AppResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let direct = Client::builder()
            .timeout(timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| AppError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            direct,
            proxied: RwLock::new(HashMap::new()),
            timeout,
            user_agent: config.user_agent.clone(),
        })
    }

    async fn client_for(&self, proxy: Option<&Proxy>) -> Result<Client, String> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.proxied.read().await.get(&proxy.uri) {
            return Ok(client.clone());
        }

        let route = reqwest::Proxy::all(proxy.uri.as_str())
            .map_err(|e| format!("invalid proxy {}: {e}", proxy.masked_uri()))?;
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .proxy(route)
            .build()
            .map_err(|e| format!("failed to build client for proxy {}: {e}", proxy.masked_uri()))?;

        self.proxied
            .write()
            .await
            .insert(proxy.uri.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, dispatch: &Dispatch) -> Outcome {
        let client = match self.client_for(dispatch.proxy.as_ref()).await {
            Ok(client) => client,
            Err(reason) => return Outcome::failure(reason, true, None),
        };

        let method = match dispatch.request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = client.request(method, &dispatch.request.url);
        if let Some(session) = &dispatch.session {
            builder = builder.headers(session_headers(session));
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Request {} failed: {}", dispatch.request.id, e);
                return Outcome::failure(e.to_string(), true, None);
            }
        };

        let status = response.status().as_u16();
        let body_size = match response.bytes().await {
            Ok(body) => body.len() as u64,
            Err(e) => {
                warn!(
                    "Request {} got {} but the body could not be read: {}",
                    dispatch.request.id, status, e
                );
                return Outcome::failure(format!("body read failed: {e}"), true, None);
            }
        };

        let record = ResponseRecord {
            status_code: status,
            latency_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
            body_size,
        };

        match classify_status(status) {
            StatusClass::Success => Outcome::success(record),
            StatusClass::Transient => Outcome::failure(format!("HTTP {status}"), true, Some(record)),
            StatusClass::Permanent => {
                Outcome::failure(format!("HTTP {status}"), false, Some(record))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(304), StatusClass::Success);
        assert_eq!(classify_status(408), StatusClass::Transient);
        assert_eq!(classify_status(425), StatusClass::Transient);
        assert_eq!(classify_status(429), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(404), StatusClass::Permanent);
        assert_eq!(classify_status(403), StatusClass::Permanent);
    }

    #[test]
    fn test_session_headers_only_take_strings() {
        let now = Utc::now();
        let session = Session {
            id: 1,
            spider_id: 1,
            label: "default".to_string(),
            state: json!({
                "headers": {"Cookie": "sid=abc", "X-Count": 3, "bad header": "x"},
                "other": true
            }),
            valid_until: now,
            is_expired: false,
            created_at: now,
            updated_at: now,
        };

        let headers = session_headers(&session);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("cookie").unwrap(), "sid=abc");
    }
}
