pub mod accounting;
pub mod shapes;
pub mod website;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use oauth2::basic::BasicClient;
use oauth2::http::{HeaderName, HeaderValue};
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::errors::{truncate_error, SyncError, SyncResult};
use crate::types::{now_ts, RequestLogEntry};

const REQUEST_LOG_CAP: usize = 100;
/// Tokens are treated as expired this long before their stated expiry.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

/// How a RemoteClient authenticates outbound requests.
pub enum AuthStrategy {
    /// Webhook peers: inbound-only, no outbound auth.
    None,
    /// Fixed token in `Authorization: Bearer`.
    Bearer { token: String },
    /// OAuth 2.0 client credentials against a distinct auth endpoint.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        /// Extra header the auth host requires (subscription key).
        extra_header: Option<(String, String)>,
    },
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// One HTTP client per remote account: auth, error mapping, bounded request
/// log. Retry policy lives in the pipelines; the only retry here is the
/// single post-401 attempt after dropping a cached OAuth token.
pub struct RemoteClient {
    account_id: String,
    base_url: String,
    http: reqwest::Client,
    auth: AuthStrategy,
    /// Headers added to every API request (subscription key). Never logged.
    extra_headers: Vec<(String, String)>,
    token_cache: tokio::sync::Mutex<Option<CachedToken>>,
    log: Mutex<VecDeque<RequestLogEntry>>,
}

impl RemoteClient {
    pub fn new(
        account_id: &str,
        base_url: &str,
        auth: AuthStrategy,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::transient)?;
        Ok(RemoteClient {
            account_id: account_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth,
            extra_headers: Vec::new(),
            token_cache: tokio::sync::Mutex::new(None),
            log: Mutex::new(VecDeque::with_capacity(REQUEST_LOG_CAP)),
        })
    }

    pub fn with_extra_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Snapshot of the bounded request log, newest last.
    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, entry: RequestLogEntry) {
        if let Ok(mut log) = self.log.lock() {
            if log.len() >= REQUEST_LOG_CAP {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> SyncResult<serde_json::Value> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> SyncResult<serde_json::Value> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> SyncResult<serde_json::Value> {
        self.request(Method::PATCH, path, &[], Some(body)).await
    }

    /// Single request against the remote. One retry after a 401 when a
    /// cached OAuth token may have gone stale; every attempt lands in the
    /// request log.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> SyncResult<serde_json::Value> {
        let first = self.attempt(method.clone(), path, query, body).await;
        match first {
            Err(SyncError::AuthFailed(_))
                if matches!(self.auth, AuthStrategy::ClientCredentials { .. }) =>
            {
                debug!(account = %self.account_id, path, "401 with cached token; refreshing once");
                self.invalidate_token().await;
                self.attempt(method, path, query, body).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> SyncResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let result = self.send(method.clone(), &url, query, body).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error) = match &result {
            Ok((status, _)) => (Some(status.as_u16()), None),
            Err(err) => (None, Some(truncate_error(&err.to_string()))),
        };
        self.record(RequestLogEntry {
            method: method.to_string(),
            endpoint: path.to_string(),
            status,
            duration_ms,
            error,
            timestamp: now_ts(),
        });

        let (status, response) = result?;
        self.map_response(path, status, response).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> SyncResult<(StatusCode, reqwest::Response)> {
        let mut req = self.http.request(method, url);
        if !query.is_empty() {
            req = req.query(query);
        }
        for (name, value) in &self.extra_headers {
            req = req.header(name, value);
        }
        if let Some(token) = self.bearer_token().await? {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await?;
        Ok((response.status(), response))
    }

    async fn map_response(
        &self,
        path: &str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> SyncResult<serde_json::Value> {
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(serde_json::Value::Null);
            }
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| SyncError::Malformed(format!("{path}: {e}")));
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::AuthFailed(
                format!("{} rejected by {}", status, self.account_id),
            )),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(path.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(SyncError::RateLimited { retry_after })
            }
            s if s.is_server_error() => {
                Err(SyncError::Transient(format!("{path}: server returned {s}")))
            }
            s => {
                let message = response.text().await.unwrap_or_default();
                Err(SyncError::Application {
                    code: s.as_u16(),
                    message: truncate_error(&message),
                })
            }
        }
    }

    async fn bearer_token(&self) -> SyncResult<Option<String>> {
        match &self.auth {
            AuthStrategy::None => Ok(None),
            AuthStrategy::Bearer { token } => {
                if token.is_empty() {
                    return Err(SyncError::NotConfigured);
                }
                Ok(Some(token.clone()))
            }
            AuthStrategy::ClientCredentials { .. } => {
                // The cache lock is held across the refresh, so concurrent
                // callers wait for one token fetch instead of stampeding.
                let mut cache = self.token_cache.lock().await;
                if let Some(cached) = cache.as_ref() {
                    if now_ts() + TOKEN_EXPIRY_SLACK_SECS < cached.expires_at {
                        return Ok(Some(cached.access_token.clone()));
                    }
                }
                let fresh = self.fetch_client_credentials_token().await?;
                let token = fresh.access_token.clone();
                *cache = Some(fresh);
                Ok(Some(token))
            }
        }
    }

    pub async fn invalidate_token(&self) {
        let mut cache = self.token_cache.lock().await;
        *cache = None;
    }

    async fn fetch_client_credentials_token(&self) -> SyncResult<CachedToken> {
        let AuthStrategy::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            extra_header,
        } = &self.auth
        else {
            return Err(SyncError::NotConfigured);
        };
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(SyncError::NotConfigured);
        }

        let client = BasicClient::new(
            ClientId::new(client_id.clone()),
            Some(ClientSecret::new(client_secret.clone())),
            AuthUrl::new(token_url.clone())
                .map_err(|e| SyncError::Fatal(format!("invalid auth url: {e}")))?,
            Some(
                TokenUrl::new(token_url.clone())
                    .map_err(|e| SyncError::Fatal(format!("invalid token url: {e}")))?,
            ),
        )
        .set_auth_type(AuthType::RequestBody);

        let header = match extra_header {
            Some((name, value)) => Some((
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| SyncError::Fatal(format!("invalid header name: {e}")))?,
                HeaderValue::from_str(value)
                    .map_err(|e| SyncError::Fatal(format!("invalid header value: {e}")))?,
            )),
            None => None,
        };

        let started = Instant::now();
        let result = client
            .exchange_client_credentials()
            .request_async(move |mut req: oauth2::HttpRequest| {
                if let Some((name, value)) = header {
                    req.headers.insert(name, value);
                }
                async_http_client(req)
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(token) => {
                self.record(RequestLogEntry {
                    method: "POST".to_string(),
                    endpoint: "<token>".to_string(),
                    status: Some(200),
                    duration_ms,
                    error: None,
                    timestamp: now_ts(),
                });
                let expires_in = token
                    .expires_in()
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(3600);
                Ok(CachedToken {
                    access_token: token.access_token().secret().to_string(),
                    expires_at: now_ts() + expires_in,
                })
            }
            Err(err) => {
                warn!(account = %self.account_id, error = %err, "Token request failed");
                self.record(RequestLogEntry {
                    method: "POST".to_string(),
                    endpoint: "<token>".to_string(),
                    status: None,
                    duration_ms,
                    error: Some(truncate_error(&err.to_string())),
                    timestamp: now_ts(),
                });
                match err {
                    oauth2::RequestTokenError::ServerResponse(_) => {
                        Err(SyncError::AuthFailed("token endpoint rejected credentials".into()))
                    }
                    other => Err(SyncError::Transient(other.to_string())),
                }
            }
        }
    }
}
