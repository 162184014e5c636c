use crate::companion::discovery::CompanionDiscovery;
use crate::companion::retry::with_retries;
use crate::config::{normalize_url, ClientConfig, DEFAULT_COMPANION_TIMEOUT};
use crate::errors::AutomationError;
use reqwest::blocking::{Client, Response};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_RETRIES: u32 = 2;
pub const RETRY_PAUSE: Duration = Duration::from_millis(500);

const NOT_FOUND_HINT: &str = "Make sure the minime app is running on your iPhone and both devices \
                              are on the same network, or set --companion-url / COMPANION_URL.";

/// An HTTP error answered by the companion, passed back as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub error: String,
    pub status_code: u16,
}

impl From<RequestFailure> for AutomationError {
    fn from(failure: RequestFailure) -> Self {
        AutomationError::RemoteRequestFailed {
            status: failure.status_code,
            message: failure.error,
        }
    }
}

/// A companion answer: the payload, or the error the app reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    Failed(RequestFailure),
}

impl<T> Reply<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(value) => Some(value),
            Reply::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RequestFailure> {
        match self {
            Reply::Ok(_) => None,
            Reply::Failed(failure) => Some(failure),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Ok(value) => Reply::Ok(f(value)),
            Reply::Failed(failure) => Reply::Failed(failure),
        }
    }

    /// Turns a reported failure into [`AutomationError::RemoteRequestFailed`].
    pub fn into_result(self) -> Result<T, AutomationError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Failed(failure) => Err(failure.into()),
        }
    }
}

impl<T: Serialize> Reply<T> {
    /// The payload, or `{"error": ..., "status_code": ...}`.
    pub fn into_json(self) -> Value {
        match self {
            Reply::Ok(value) => serde_json::to_value(value).unwrap_or(Value::Null),
            Reply::Failed(failure) => json!(failure),
        }
    }
}

impl Reply<Value> {
    /// Reads the payload as one of the typed records in [`crate::companion::types`].
    pub fn decode<T: DeserializeOwned>(self) -> Result<Reply<T>, AutomationError> {
        match self {
            Reply::Ok(value) => serde_json::from_value(value)
                .map(Reply::Ok)
                .map_err(|e| AutomationError::InvalidResponse(format!("unexpected companion payload: {e}"))),
            Reply::Failed(failure) => Ok(Reply::Failed(failure)),
        }
    }
}

/// Client for the companion app's HTTP API on the phone.
///
/// Connection failures and timeouts are retried twice with a short pause
/// before surfacing as [`AutomationError::CompanionNotAvailable`]. HTTP
/// errors are never retried and come back as [`Reply::Failed`].
pub struct CompanionClient {
    base_url: String,
    http: Client,
    retries: u32,
    retry_pause: Duration,
}

impl CompanionClient {
    /// Uses the configured address, or discovers the app on the local network.
    #[instrument(skip(config))]
    pub fn connect(config: &ClientConfig) -> Result<Self, AutomationError> {
        if let Some(url) = &config.companion_url {
            return Self::with_url(url, config.companion_timeout);
        }
        let service = CompanionDiscovery::new()
            .timeout(config.discovery_timeout)
            .find()?
            .ok_or_else(|| {
                AutomationError::CompanionNotAvailable(format!(
                    "Companion app not found. {NOT_FOUND_HINT}"
                ))
            })?;
        info!(host = %service.host, port = service.port, "using discovered companion");
        Self::with_url(&service.base_url(), config.companion_timeout)
    }

    pub fn new(url: &str) -> Result<Self, AutomationError> {
        Self::with_url(url, DEFAULT_COMPANION_TIMEOUT)
    }

    pub fn with_url(url: &str, timeout: Duration) -> Result<Self, AutomationError> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            AutomationError::CompanionNotAvailable(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            base_url: normalize_url(url),
            http,
            retries: DEFAULT_RETRIES,
            retry_pause: RETRY_PAUSE,
        })
    }

    /// Overrides the retry policy. Mostly useful to keep tests fast.
    pub fn with_retry_policy(mut self, retries: u32, pause: Duration) -> Self {
        self.retries = retries;
        self.retry_pause = pause;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // Health

    pub fn health_steps(&self, days: u32) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/health/steps", &[("days", days.to_string())])
    }

    pub fn health_heartrate(&self, limit: u32) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/health/heartrate", &[("limit", limit.to_string())])
    }

    pub fn health_sleep(&self, days: u32) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/health/sleep", &[("days", days.to_string())])
    }

    pub fn health_workouts(&self, days: u32) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/health/workouts", &[("days", days.to_string())])
    }

    pub fn health_summary(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/health/summary", &[])
    }

    // Personal data

    pub fn location(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/location", &[])
    }

    pub fn contacts_list(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/contacts", &[])
    }

    pub fn contacts_search(&self, query: &str) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/contacts", &[("q", query.to_string())])
    }

    pub fn calendar_events(&self, days: u32) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/calendar/events", &[("days", days.to_string())])
    }

    pub fn calendar_reminders(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/calendar/reminders", &[])
    }

    pub fn notifications_list(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/notifications", &[])
    }

    // Shortcuts

    pub fn shortcuts_list(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/shortcuts", &[])
    }

    #[instrument(skip(self))]
    pub fn shortcut_run(&self, name: &str) -> Result<Reply<Value>, AutomationError> {
        self.request(Method::POST, "/api/shortcuts/run", &[], Some(&json!({ "name": name })))
    }

    // Status

    pub fn status(&self) -> Result<Reply<Value>, AutomationError> {
        self.get("/api/status", &[])
    }

    /// Pings the app and adds the round trip as `latency_ms`, to 0.1 ms.
    pub fn ping(&self) -> Result<Reply<Value>, AutomationError> {
        let start = Instant::now();
        let reply = self.get("/api/ping", &[])?;
        let latency_ms = (start.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;
        Ok(reply.map(|mut body| {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("latency_ms".into(), json!(latency_ms));
            }
            body
        }))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Reply<Value>, AutomationError> {
        self.request(Method::GET, path, query, None)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Reply<Value>, AutomationError> {
        let url = format!("{}{}", self.base_url, path);
        let response = with_retries(
            self.retries,
            self.retry_pause,
            is_transient,
            |attempt| {
                debug!(%method, %url, attempt, "companion request");
                let mut request = self.http.request(method.clone(), &url).query(query);
                if let Some(body) = body {
                    request = request.json(body);
                }
                request.send()
            },
        )
        .map_err(|e| {
            warn!(%url, error = %e, "companion unreachable");
            AutomationError::CompanionNotAvailable(format!(
                "Cannot connect to companion app at {}. Make sure the minime app is running on your iPhone. ({e})",
                self.base_url
            ))
        })?;
        read_reply(response, &url)
    }
}

/// Transport failures with no HTTP answer: refused, dropped or timed out.
fn is_transient(e: &reqwest::Error) -> bool {
    e.status().is_none() && !e.is_builder() && !e.is_decode()
}

fn read_reply(response: Response, url: &str) -> Result<Reply<Value>, AutomationError> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|e| AutomationError::InvalidResponse(format!("{url}: {e}")))?;

    if status.is_client_error() || status.is_server_error() {
        let code = status.as_u16();
        let error = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(body)) => match body.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(body).to_string(),
            },
            _ => format!(
                "Companion app error: {} {}",
                code,
                status.canonical_reason().unwrap_or_default()
            ),
        };
        debug!(url, code, %error, "companion reported an error");
        return Ok(Reply::Failed(RequestFailure {
            error,
            status_code: code,
        }));
    }

    if text.trim().is_empty() {
        return Ok(Reply::Ok(Value::Null));
    }
    serde_json::from_str(&text)
        .map(Reply::Ok)
        .map_err(|e| AutomationError::InvalidResponse(format!("{url}: {e}")))
}
