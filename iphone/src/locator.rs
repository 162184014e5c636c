//! Find an element by its text, scrolling it into the visible band first.

use crate::driver::{AutomationDriver, TextMatch};
use crate::errors::AutomationError;
use crate::tree::{truncate_chars, MAX_VALUE_CHARS};
use serde::Serialize;
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const DEFAULT_MAX_SCROLLS: u32 = 15;
/// Vertical band, in logical points, where an element counts as on screen.
pub const BAND_TOP: i64 = 150;
pub const BAND_BOTTOM: i64 = 750;
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(300);
pub const SCROLL_SWIPE_SECS: f64 = 0.3;

const SCROLL_X: i64 = 200;
const SCROLL_LOW_Y: i64 = 600;
const SCROLL_HIGH_Y: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollState {
    Searching,
    FoundVisible,
    FoundOffscreen,
    NotFound,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollDirection {
    /// Finger moves up, content moves up, reveals what is below.
    Down,
    Up,
}

/// Result of a locate run. Exhaustion is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrollOutcome {
    Found {
        label: String,
        center: (i64, i64),
        #[serde(skip)]
        element: TextMatch,
    },
    FoundAndTapped {
        label: String,
        center: (i64, i64),
        #[serde(skip)]
        element: TextMatch,
    },
    NotFound {
        text: String,
        attempts: u32,
        reason: String,
    },
}

impl ScrollOutcome {
    pub fn is_found(&self) -> bool {
        !matches!(self, ScrollOutcome::NotFound { .. })
    }

    /// The element to remember as the only "last result", if one was found.
    pub fn last_result(&self) -> Option<&TextMatch> {
        match self {
            ScrollOutcome::Found { element, .. } | ScrollOutcome::FoundAndTapped { element, .. } => {
                Some(element)
            }
            ScrollOutcome::NotFound { .. } => None,
        }
    }

    /// `{status, label, center}` on success, `{error}` otherwise.
    pub fn to_json(&self) -> Value {
        match self {
            ScrollOutcome::NotFound { reason, .. } => json!({ "error": reason }),
            found => serde_json::to_value(found).unwrap_or(Value::Null),
        }
    }

    /// Converts exhaustion into [`AutomationError::NotFound`] for callers that want `?`.
    pub fn into_result(self) -> Result<Self, AutomationError> {
        match self {
            ScrollOutcome::NotFound { reason, .. } => Err(AutomationError::NotFound(reason)),
            found => Ok(found),
        }
    }
}

/// Searches for `text` and scrolls until it sits inside the visible band.
///
/// Runs at most `max_scrolls + 1` search passes. Each pass asks the driver
/// for matches, picks the candidate closest to the band and either stops
/// (inside the band), scrolls toward it, or scrolls down when nothing
/// matched yet.
///
/// ```no_run
/// use iphone::{TextLocator, WdaClient};
///
/// let mut wda = WdaClient::new("http://localhost:8100")?;
/// let outcome = TextLocator::new(&mut wda, "Post your reply").tap(true).run()?;
/// println!("{}", outcome.to_json());
/// # Ok::<(), iphone::AutomationError>(())
/// ```
pub struct TextLocator<'a, D: AutomationDriver + ?Sized> {
    driver: &'a mut D,
    text: String,
    max_scrolls: u32,
    tap: bool,
    top: i64,
    bottom: i64,
    pause: Duration,
}

impl<'a, D: AutomationDriver + ?Sized> TextLocator<'a, D> {
    pub fn new(driver: &'a mut D, text: impl Into<String>) -> Self {
        Self {
            driver,
            text: text.into(),
            max_scrolls: DEFAULT_MAX_SCROLLS,
            tap: false,
            top: BAND_TOP,
            bottom: BAND_BOTTOM,
            pause: DEFAULT_PAUSE,
        }
    }

    pub fn max_scrolls(mut self, max_scrolls: u32) -> Self {
        self.max_scrolls = max_scrolls;
        self
    }

    /// Tap the element's center once it is visible.
    pub fn tap(mut self, tap: bool) -> Self {
        self.tap = tap;
        self
    }

    pub fn band(mut self, top: i64, bottom: i64) -> Self {
        self.top = top;
        self.bottom = bottom;
        self
    }

    /// Settle time after each scroll.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    #[instrument(skip(self), fields(text = %self.text, max_scrolls = self.max_scrolls))]
    pub fn run(self) -> Result<ScrollOutcome, AutomationError> {
        let Self {
            driver,
            text,
            max_scrolls,
            tap,
            top,
            bottom,
            pause,
        } = self;

        let mut state = ScrollState::Searching;
        let mut scrolls = 0u32;

        loop {
            debug!(?state, pass = scrolls + 1, "searching");
            let matches = driver.find_by_text(&text)?;

            let Some(best) = select_best(&matches, top, bottom) else {
                if scrolls >= max_scrolls {
                    state = ScrollState::Exhausted;
                    info!(?state, "text never appeared");
                    return Ok(ScrollOutcome::NotFound {
                        reason: format!("'{text}' not found after {max_scrolls} scrolls"),
                        text,
                        attempts: scrolls,
                    });
                }
                state = ScrollState::NotFound;
                scroll(driver, ScrollDirection::Down, pause)?;
                scrolls += 1;
                continue;
            };

            let (cx, cy) = best.center;
            if (top..=bottom).contains(&cy) {
                state = ScrollState::FoundVisible;
                let label = truncate_chars(best.label.as_deref().unwrap_or(&text), MAX_VALUE_CHARS);
                let element = best.clone();
                info!(?state, cx, cy, scrolls, "text is visible");
                if tap {
                    driver.tap(cx, cy)?;
                    return Ok(ScrollOutcome::FoundAndTapped {
                        label,
                        center: (cx, cy),
                        element,
                    });
                }
                return Ok(ScrollOutcome::Found {
                    label,
                    center: (cx, cy),
                    element,
                });
            }

            state = ScrollState::FoundOffscreen;
            debug!(?state, cy, "scrolling toward match");
            let direction = if cy < top {
                ScrollDirection::Up
            } else {
                ScrollDirection::Down
            };
            // The last pass still nudges toward the match before giving up.
            scroll(driver, direction, pause)?;
            if scrolls >= max_scrolls {
                state = ScrollState::Exhausted;
                info!(?state, cy, "text stayed outside the visible band");
                return Ok(ScrollOutcome::NotFound {
                    reason: format!("Could not bring '{text}' into view after {max_scrolls} scrolls"),
                    text,
                    attempts: scrolls,
                });
            }
            scrolls += 1;
        }
    }
}

/// Picks the first match inside `[top, bottom]`, else the one nearest a band edge.
///
/// Ties keep the earlier match. Returns `None` only for an empty slice.
pub fn select_best(matches: &[TextMatch], top: i64, bottom: i64) -> Option<&TextMatch> {
    let mut best: Option<(&TextMatch, i64)> = None;
    for candidate in matches {
        let cy = candidate.center.1;
        if (top..=bottom).contains(&cy) {
            return Some(candidate);
        }
        let distance = (cy - top).abs().min((cy - bottom).abs());
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((candidate, distance));
        }
    }
    best.map(|(candidate, _)| candidate).or_else(|| matches.first())
}

fn scroll<D: AutomationDriver + ?Sized>(
    driver: &mut D,
    direction: ScrollDirection,
    pause: Duration,
) -> Result<(), AutomationError> {
    let (from_y, to_y) = match direction {
        ScrollDirection::Down => (SCROLL_LOW_Y, SCROLL_HIGH_Y),
        ScrollDirection::Up => (SCROLL_HIGH_Y, SCROLL_LOW_Y),
    };
    driver.swipe(SCROLL_X, from_y, SCROLL_X, to_y, SCROLL_SWIPE_SECS)?;
    if !pause.is_zero() {
        thread::sleep(pause);
    }
    Ok(())
}
