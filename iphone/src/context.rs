//! Screen snapshot for agents: screenshot, structure and app state in one payload.

use crate::errors::AutomationError;
use crate::tree::{self, InteractiveElement};
use crate::wda::WdaClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

/// Elements included in [`ScreenContext::for_llm`].
pub const LLM_ELEMENT_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenContext {
    /// Empty when the screenshot was not requested.
    pub screenshot_base64: String,
    pub screen_width: i64,
    pub screen_height: i64,
    pub active_app: Value,
    pub elements: Vec<InteractiveElement>,
    pub alert: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl ScreenContext {
    /// Reads the current screen. App info, the element tree and the alert are best effort.
    #[instrument(skip(wda))]
    pub fn capture(wda: &mut WdaClient, include_screenshot: bool) -> Result<Self, AutomationError> {
        let screenshot_base64 = if include_screenshot {
            wda.screenshot_base64()?
        } else {
            String::new()
        };
        let size = wda.screen_size()?;

        let active_app = wda.active_app().unwrap_or_else(|e| {
            warn!(error = %e, "active app lookup failed");
            json!({ "value": { "bundleId": "unknown" } })
        });

        let elements = match wda.source(true) {
            Ok(source) => tree::flatten(&source),
            Err(e) => {
                warn!(error = %e, "element tree unavailable");
                Vec::new()
            }
        };
        let alert = wda.alert_text().unwrap_or_else(|e| {
            warn!(error = %e, "alert lookup failed");
            None
        });
        debug!(elements = elements.len(), alert = alert.is_some(), "captured screen context");

        Ok(Self {
            screenshot_base64,
            screen_width: size.width,
            screen_height: size.height,
            active_app,
            elements,
            alert,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
        })
    }

    pub fn bundle_id(&self) -> &str {
        self.active_app
            .pointer("/value/bundleId")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// Compact view: screen size, app, first elements, alert and optional screenshot.
    pub fn for_llm(&self, include_screenshot: bool) -> Value {
        let mut ctx = Map::new();
        ctx.insert(
            "screen_size".into(),
            json!(format!("{}x{}", self.screen_width, self.screen_height)),
        );
        ctx.insert("app".into(), json!(self.bundle_id()));
        let shown = &self.elements[..self.elements.len().min(LLM_ELEMENT_CAP)];
        ctx.insert("interactive_elements".into(), json!(shown));
        if let Some(alert) = self.alert.as_deref().filter(|a| !a.is_empty()) {
            ctx.insert("alert".into(), json!(alert));
        }
        if include_screenshot {
            ctx.insert("screenshot".into(), json!(self.screenshot_base64));
        }
        Value::Object(ctx)
    }
}
