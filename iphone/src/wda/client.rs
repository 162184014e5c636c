use crate::config::{normalize_url, ClientConfig, DEFAULT_WDA_TIMEOUT};
use crate::driver::{AutomationDriver, TextMatch};
use crate::errors::AutomationError;
use crate::tree::{self, RectSource, UiNode};
use crate::wda::actions;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// W3C element reference key; older servers use `ELEMENT`.
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: i64,
    pub height: i64,
    /// The server reports logical points, so this is always 1.0.
    pub scale: f64,
}

/// Best-effort details for one element; each field is looked up separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<tree::Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<(i64, i64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Client for the WebDriverAgent REST API running on the device.
///
/// Owns one automation session. The session is created on first use,
/// verified before every operation that needs it, and silently recreated
/// when verification fails. Every operation resolves the session at most
/// once, so a gesture costs one liveness probe plus its own request(s).
pub struct WdaClient {
    base_url: String,
    http: Client,
    session_id: Option<String>,
}

impl WdaClient {
    pub fn new(url: &str) -> Result<Self, AutomationError> {
        Self::with_timeout(url, DEFAULT_WDA_TIMEOUT)
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self, AutomationError> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            AutomationError::RemoteUnavailable(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            base_url: normalize_url(url),
            http,
            session_id: None,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, AutomationError> {
        Self::with_timeout(&config.wda_url, config.wda_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The cached session handle, if one has been created.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Drops the cached session; the next operation creates a fresh one.
    pub fn invalidate_session(&mut self) {
        if let Some(id) = self.session_id.take() {
            debug!(session_id = %id, "invalidated automation session");
        }
    }

    // ------------------------------------------------------------------
    // Session management
    // ------------------------------------------------------------------

    /// Returns a live session id, reusing the cached one when the server still knows it.
    #[instrument(level = "debug", skip(self))]
    pub fn ensure_session(&mut self) -> Result<String, AutomationError> {
        if let Some(id) = self.session_id.clone() {
            match self.get(&format!("/session/{id}")) {
                Ok(body) if session_id_of(&body).is_some() => return Ok(id),
                Ok(_) => warn!(session_id = %id, "session no longer reported, recreating"),
                Err(e) => warn!(session_id = %id, error = %e, "session check failed, recreating"),
            }
            self.session_id = None;
        }

        let body = self
            .post("/session", &json!({ "capabilities": {} }))
            .map_err(|e| {
                AutomationError::RemoteUnavailable(format!("could not create a session: {e}"))
            })?;
        let id = session_id_of(&body).ok_or_else(|| {
            AutomationError::RemoteUnavailable("session response carried no sessionId".to_string())
        })?;
        debug!(session_id = %id, "created automation session");
        self.session_id = Some(id.clone());
        Ok(id)
    }

    fn session_path(&mut self) -> Result<String, AutomationError> {
        Ok(format!("/session/{}", self.ensure_session()?))
    }

    // ------------------------------------------------------------------
    // Touch
    // ------------------------------------------------------------------

    /// Taps with a W3C pointer sequence, falling back to the legacy tap endpoint.
    #[instrument(skip(self))]
    pub fn tap(&mut self, x: i64, y: i64) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.tap_in(&session, x, y)
    }

    fn tap_in(&self, session: &str, x: i64, y: i64) -> Result<Value, AutomationError> {
        match self.post(&format!("{session}/actions"), &actions::tap(x, y).into_body()) {
            Ok(body) => Ok(body),
            Err(err) => {
                let rejected = AutomationError::GestureRejected(err.to_string());
                warn!(%rejected, "falling back to legacy tap");
                self.post(&format!("{session}/wda/tap"), &json!({ "x": x, "y": y }))
            }
        }
    }

    #[instrument(skip(self))]
    pub fn double_tap(&mut self, x: i64, y: i64) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(
            &format!("{session}/wda/doubleTap"),
            &json!({ "x": x, "y": y }),
        )
    }

    #[instrument(skip(self))]
    pub fn long_press(&mut self, x: i64, y: i64, duration_secs: f64) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(
            &format!("{session}/wda/touchAndHold"),
            &json!({ "x": x, "y": y, "duration": duration_secs }),
        )
    }

    /// Swipes with real momentum; the legacy drag fallback receives the unclamped duration.
    #[instrument(skip(self))]
    pub fn swipe(
        &mut self,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration_secs: f64,
    ) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.swipe_in(&session, x1, y1, x2, y2, duration_secs)
    }

    fn swipe_in(
        &self,
        session: &str,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration_secs: f64,
    ) -> Result<Value, AutomationError> {
        let body = actions::swipe(x1, y1, x2, y2, duration_secs).into_body();
        match self.post(&format!("{session}/actions"), &body) {
            Ok(body) => Ok(body),
            Err(err) => {
                let rejected = AutomationError::GestureRejected(err.to_string());
                warn!(%rejected, "falling back to legacy drag");
                self.post(
                    &format!("{session}/wda/dragfromtoforduration"),
                    &json!({
                        "fromX": x1,
                        "fromY": y1,
                        "toX": x2,
                        "toY": y2,
                        "duration": duration_secs,
                    }),
                )
            }
        }
    }

    /// Scrolls content down by `amount` points through the screen center.
    pub fn scroll_down(&mut self, amount: i64) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        let size = self.screen_size_in(&session)?;
        let (cx, cy) = (size.width.div_euclid(2), size.height.div_euclid(2));
        let half = amount.div_euclid(2);
        self.swipe_in(&session, cx, cy + half, cx, cy - half, 0.5)
    }

    pub fn scroll_up(&mut self, amount: i64) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        let size = self.screen_size_in(&session)?;
        let (cx, cy) = (size.width.div_euclid(2), size.height.div_euclid(2));
        let half = amount.div_euclid(2);
        self.swipe_in(&session, cx, cy - half, cx, cy + half, 0.5)
    }

    // ------------------------------------------------------------------
    // Text input
    // ------------------------------------------------------------------

    /// Types into the focused element, one key per character.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub fn type_text(&mut self, text: &str) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        let keys: Vec<String> = text.chars().map(String::from).collect();
        self.post(&format!("{session}/wda/keys"), &json!({ "value": keys }))
    }

    /// Clears the focused element, or reports `no_focused_element` when nothing has focus.
    #[instrument(skip(self))]
    pub fn clear_text(&mut self) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        match self.focused_element_in(&session) {
            Some(id) => self.post(&format!("{session}/element/{id}/clear"), &json!({})),
            None => Ok(json!({ "status": "no_focused_element" })),
        }
    }

    fn focused_element_in(&self, session: &str) -> Option<String> {
        match self.find_elements_in(session, "predicate string", "hasFocus == true") {
            Ok(ids) => ids.into_iter().next(),
            Err(e) => {
                debug!(error = %e, "focused element lookup failed");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Hardware buttons
    // ------------------------------------------------------------------

    pub fn press_home(&self) -> Result<Value, AutomationError> {
        self.post("/wda/homescreen", &json!({}))
    }

    pub fn press_lock(&self) -> Result<Value, AutomationError> {
        self.post("/wda/lock", &json!({}))
    }

    pub fn press_unlock(&self) -> Result<Value, AutomationError> {
        self.post("/wda/unlock", &json!({}))
    }

    pub fn volume_up(&self) -> Result<Value, AutomationError> {
        self.post("/wda/pressButton", &json!({ "name": "volumeUp" }))
    }

    pub fn volume_down(&self) -> Result<Value, AutomationError> {
        self.post("/wda/pressButton", &json!({ "name": "volumeDown" }))
    }

    // ------------------------------------------------------------------
    // UI elements
    // ------------------------------------------------------------------

    /// The accessibility tree of the foreground app.
    #[instrument(skip(self))]
    pub fn source(&self, accessible_only: bool) -> Result<UiNode, AutomationError> {
        let body = self.get_with_query("/source", &[("format", "json")])?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        let tree: UiNode = if value.is_null() {
            UiNode::default()
        } else {
            serde_json::from_value(value).map_err(|e| {
                AutomationError::InvalidResponse(format!("unexpected source tree: {e}"))
            })?
        };
        Ok(if accessible_only {
            tree::filter_accessible(&tree)
        } else {
            tree
        })
    }

    /// Element ids matching a locator strategy (`name`, `class name`, `xpath`, `predicate string`).
    pub fn find_elements(&mut self, using: &str, value: &str) -> Result<Vec<String>, AutomationError> {
        let session = self.session_path()?;
        self.find_elements_in(&session, using, value)
    }

    fn find_elements_in(
        &self,
        session: &str,
        using: &str,
        value: &str,
    ) -> Result<Vec<String>, AutomationError> {
        let body = self.post(
            &format!("{session}/elements"),
            &json!({ "using": using, "value": value }),
        )?;
        let ids = body
            .get("value")
            .and_then(Value::as_array)
            .map(|refs| refs.iter().filter_map(element_id_of).collect())
            .unwrap_or_default();
        Ok(ids)
    }

    pub fn element_info(&mut self, element_id: &str) -> Result<ElementInfo, AutomationError> {
        let session = self.session_path()?;
        Ok(self.element_info_in(&session, element_id))
    }

    fn element_info_in(&self, session: &str, element_id: &str) -> ElementInfo {
        let mut info = ElementInfo::default();
        let element = format!("{session}/element/{element_id}");

        match self.get(&format!("{element}/rect")) {
            Ok(body) => {
                info.rect = body
                    .get("value")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<RectSource>(v).ok())
                    .and_then(|r| r.parse());
                info.center = info.rect.map(|r| r.center());
            }
            Err(e) => debug!(element_id, error = %e, "rect lookup failed"),
        }
        match self.get(&format!("{element}/attribute/label")) {
            Ok(body) => info.label = body.get("value").and_then(Value::as_str).map(str::to_string),
            Err(e) => debug!(element_id, error = %e, "label lookup failed"),
        }
        match self.get(&format!("{element}/name")) {
            Ok(body) => {
                info.kind = body
                    .get("value")
                    .and_then(Value::as_str)
                    .map(|t| tree::short_type(t).to_string())
            }
            Err(e) => debug!(element_id, error = %e, "type lookup failed"),
        }
        info
    }

    /// Elements whose label, name or value contains `text`, with their positions.
    #[instrument(skip(self))]
    pub fn find_by_text(&mut self, text: &str) -> Result<Vec<TextMatch>, AutomationError> {
        let session = self.session_path()?;
        let predicate = text_predicate(text);
        let ids = self.find_elements_in(&session, "predicate string", &predicate)?;

        let matches: Vec<TextMatch> = ids
            .iter()
            .filter_map(|id| {
                let info = self.element_info_in(&session, id);
                let rect = info.rect?;
                Some(TextMatch {
                    element_id: Some(id.clone()),
                    kind: info.kind,
                    label: info.label,
                    rect,
                    center: rect.center(),
                })
            })
            .collect();
        debug!(count = matches.len(), "text search finished");
        Ok(matches)
    }

    // ------------------------------------------------------------------
    // Screen, apps and device state
    // ------------------------------------------------------------------

    /// Screenshot as base64-encoded PNG.
    pub fn screenshot_base64(&self) -> Result<String, AutomationError> {
        let body = self.get("/screenshot")?;
        Ok(body
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub fn screenshot_bytes(&self) -> Result<Vec<u8>, AutomationError> {
        let encoded = self.screenshot_base64()?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| AutomationError::InvalidResponse(format!("screenshot is not base64: {e}")))
    }

    pub fn screen_size(&mut self) -> Result<ScreenSize, AutomationError> {
        let session = self.session_path()?;
        self.screen_size_in(&session)
    }

    fn screen_size_in(&self, session: &str) -> Result<ScreenSize, AutomationError> {
        let body = self.get(&format!("{session}/window/size"))?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        let dim = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0) as i64;
        Ok(ScreenSize {
            width: dim("width"),
            height: dim("height"),
            scale: 1.0,
        })
    }

    /// Opens any URL scheme at the device level, whatever app is in front.
    #[instrument(skip(self))]
    pub fn open_url(&mut self, url: &str) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(&format!("{session}/url"), &json!({ "url": url }))
    }

    #[instrument(skip(self))]
    pub fn launch_app(&mut self, bundle_id: &str) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(
            &format!("{session}/wda/apps/launch"),
            &json!({ "bundleId": bundle_id }),
        )
    }

    #[instrument(skip(self))]
    pub fn kill_app(&mut self, bundle_id: &str) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(
            &format!("{session}/wda/apps/terminate"),
            &json!({ "bundleId": bundle_id }),
        )
    }

    pub fn active_app(&mut self) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.get(&format!("{session}/wda/activeAppInfo"))
    }

    pub fn is_locked(&self) -> Result<bool, AutomationError> {
        let body = self.get("/wda/locked")?;
        Ok(body.get("value").and_then(Value::as_bool).unwrap_or(false))
    }

    pub fn status(&self) -> Result<Value, AutomationError> {
        self.get("/status")
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Text of the visible alert, or `None` when the server reports there is none.
    pub fn alert_text(&mut self) -> Result<Option<String>, AutomationError> {
        let session = self.session_path()?;
        match self.get(&format!("{session}/alert/text")) {
            Ok(body) => Ok(body.get("value").and_then(Value::as_str).map(str::to_string)),
            Err(AutomationError::HttpStatus { status, .. }) => {
                debug!(status, "no alert present");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn alert_accept(&mut self) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(&format!("{session}/alert/accept"), &json!({}))
    }

    pub fn alert_dismiss(&mut self) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(&format!("{session}/alert/dismiss"), &json!({}))
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    pub fn get_clipboard(&mut self) -> Result<String, AutomationError> {
        let session = self.session_path()?;
        let body = self.post(&format!("{session}/wda/getPasteboard"), &json!({}))?;
        let encoded = body.get("value").and_then(Value::as_str).unwrap_or_default();
        let raw = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            AutomationError::InvalidResponse(format!("pasteboard is not base64: {e}"))
        })?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub fn set_clipboard(&mut self, text: &str) -> Result<Value, AutomationError> {
        let session = self.session_path()?;
        self.post(
            &format!("{session}/wda/setPasteboard"),
            &json!({ "content": STANDARD.encode(text.as_bytes()), "contentType": "plaintext" }),
        )
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn get(&self, path: &str) -> Result<Value, AutomationError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.http.get(&url), &url)
    }

    fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, AutomationError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.http.get(&url).query(query), &url)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, AutomationError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.http.post(&url).json(body), &url)
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Value, AutomationError> {
        let response = request
            .send()
            .map_err(|e| AutomationError::from_transport(url, e))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| AutomationError::from_transport(url, e))?;
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "automation server rejected request");
            return Err(AutomationError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| AutomationError::InvalidResponse(format!("{url}: {e}")))
    }
}

impl AutomationDriver for WdaClient {
    fn find_by_text(&mut self, text: &str) -> Result<Vec<TextMatch>, AutomationError> {
        WdaClient::find_by_text(self, text)
    }

    fn tap(&mut self, x: i64, y: i64) -> Result<(), AutomationError> {
        WdaClient::tap(self, x, y).map(|_| ())
    }

    fn swipe(
        &mut self,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration_secs: f64,
    ) -> Result<(), AutomationError> {
        WdaClient::swipe(self, x1, y1, x2, y2, duration_secs).map(|_| ())
    }
}

/// Case-sensitive substring match over label, name and value, passed through verbatim.
pub fn text_predicate(text: &str) -> String {
    format!(r#"label CONTAINS "{text}" OR name CONTAINS "{text}" OR value CONTAINS "{text}""#)
}

fn session_id_of(body: &Value) -> Option<String> {
    body.get("sessionId")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/value/sessionId").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn element_id_of(reference: &Value) -> Option<String> {
    reference
        .get("ELEMENT")
        .or_else(|| reference.get(W3C_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}
