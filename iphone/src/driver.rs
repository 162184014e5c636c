use crate::errors::AutomationError;
use crate::tree::Rect;
use serde::{Deserialize, Serialize};

/// An element that matched a text search, with the position needed to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub rect: Rect,
    pub center: (i64, i64),
}

impl TextMatch {
    pub fn new(rect: Rect) -> Self {
        Self {
            element_id: None,
            kind: None,
            label: None,
            rect,
            center: rect.center(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What the text locator needs from a device: search by text, tap, swipe.
///
/// [`crate::WdaClient`] is the production implementation. Calls are
/// sequential, so methods take `&mut self` and may refresh session state.
pub trait AutomationDriver {
    /// Elements whose label, name or value contains `text` (case-sensitive).
    fn find_by_text(&mut self, text: &str) -> Result<Vec<TextMatch>, AutomationError>;

    fn tap(&mut self, x: i64, y: i64) -> Result<(), AutomationError>;

    fn swipe(
        &mut self,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration_secs: f64,
    ) -> Result<(), AutomationError>;
}
