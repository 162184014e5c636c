//! W3C pointer action payloads for the `/session/{id}/actions` endpoint.

use serde::Serialize;
use serde_json::{json, Value};

/// Hold time between press and release for a tap, in milliseconds.
pub const TAP_HOLD_MS: u64 = 30;
/// Swipe movement is clamped to this range so iOS still sees a flick.
pub const MIN_SWIPE_MS: u64 = 80;
pub const MAX_SWIPE_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PointerStep {
    PointerMove { duration: u64, x: i64, y: i64 },
    PointerDown { button: u8 },
    Pause { duration: u64 },
    PointerUp { button: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointerSequence {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    parameters: Value,
    actions: Vec<PointerStep>,
}

impl PointerSequence {
    /// A touch pointer named `id`.
    pub fn touch(id: impl Into<String>, actions: Vec<PointerStep>) -> Self {
        Self {
            kind: "pointer",
            id: id.into(),
            parameters: json!({ "pointerType": "touch" }),
            actions,
        }
    }

    pub fn steps(&self) -> &[PointerStep] {
        &self.actions
    }

    /// Request body: `{"actions": [sequence]}`.
    pub fn into_body(self) -> Value {
        json!({ "actions": [self] })
    }
}

/// Move, press, short hold, release.
pub fn tap(x: i64, y: i64) -> PointerSequence {
    PointerSequence::touch(
        "finger1",
        vec![
            PointerStep::PointerMove { duration: 0, x, y },
            PointerStep::PointerDown { button: 0 },
            PointerStep::Pause {
                duration: TAP_HOLD_MS,
            },
            PointerStep::PointerUp { button: 0 },
        ],
    )
}

/// Press at the start, move to the end over the clamped duration, release.
pub fn swipe(x1: i64, y1: i64, x2: i64, y2: i64, duration_secs: f64) -> PointerSequence {
    PointerSequence::touch(
        "swipe1",
        vec![
            PointerStep::PointerMove {
                duration: 0,
                x: x1,
                y: y1,
            },
            PointerStep::PointerDown { button: 0 },
            PointerStep::PointerMove {
                duration: swipe_move_ms(duration_secs),
                x: x2,
                y: y2,
            },
            PointerStep::PointerUp { button: 0 },
        ],
    )
}

/// Seconds to whole milliseconds, clamped to `[MIN_SWIPE_MS, MAX_SWIPE_MS]`.
pub fn swipe_move_ms(duration_secs: f64) -> u64 {
    let ms = (duration_secs * 1000.0) as i64;
    ms.clamp(MIN_SWIPE_MS as i64, MAX_SWIPE_MS as i64) as u64
}
