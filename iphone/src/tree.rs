//! Accessibility tree normalization.
//!
//! WebDriverAgent returns the whole accessibility hierarchy of the foreground
//! app, most of which is layout containers with nothing to read or press.
//! This module turns that tree into something an agent can work with:
//!
//! - [`filter_accessible`] prunes subtrees that carry no text and no
//!   interactive control, keeping the hierarchy shape.
//! - [`flatten`] walks the tree in pre-order and emits one
//!   [`InteractiveElement`] per labelled, positioned control.
//!
//! The order of [`flatten`]'s output is the pre-order of the input tree.
//! Callers address results by 1-based ordinal (see [`ElementList`]), so the
//! order must stay stable.

use crate::errors::AutomationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix the automation server puts on fully-qualified element types.
pub const TYPE_PREFIX: &str = "XCUIElementType";

/// Element types that are worth keeping even without any text.
pub const ACCESSIBLE_TYPES: [&str; 10] = [
    "Button",
    "TextField",
    "TextView",
    "Switch",
    "Slider",
    "Link",
    "Image",
    "StaticText",
    "SearchField",
    "SecureTextField",
];

/// Element types reported by [`flatten`]. Table and collection cells are
/// tappable rows, so they are reported on top of [`ACCESSIBLE_TYPES`].
pub const INTERACTIVE_TYPES: [&str; 11] = [
    "Button",
    "TextField",
    "TextView",
    "Switch",
    "Slider",
    "Link",
    "Image",
    "StaticText",
    "SearchField",
    "SecureTextField",
    "Cell",
];

/// Longest value carried on an [`InteractiveElement`], in characters.
pub const MAX_VALUE_CHARS: usize = 100;

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\{\{\s*(-?\d+(?:\.\d+)?),\s*(-?\d+(?:\.\d+)?)\s*\},\s*\{\s*(-?\d+(?:\.\d+)?),\s*(-?\d+(?:\.\d+)?)\s*\}\}",
    )
    .expect("frame pattern is valid")
});

/// Integer screen rectangle in device-viewport logical points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Midpoint using floor division, so odd sizes round toward the origin.
    pub fn center(&self) -> (i64, i64) {
        (
            self.x + self.width.div_euclid(2),
            self.y + self.height.div_euclid(2),
        )
    }

    /// Parses the stringified `{{x, y}, {w, h}}` form. Numbers may carry a
    /// fractional part, which is truncated.
    pub fn parse_frame(frame: &str) -> Option<Self> {
        let caps = FRAME_RE.captures(frame.trim_start())?;
        let num = |i: usize| -> Option<i64> { caps.get(i)?.as_str().parse::<f64>().ok().map(|v| v as i64) };
        Some(Self::new(num(1)?, num(2)?, num(3)?, num(4)?))
    }

    fn from_floats(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x as i64, y as i64, width as i64, height as i64)
    }
}

/// A bounding rectangle as the automation server sends it: either four
/// numeric fields or the two-point frame string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RectSource {
    Fields {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Frame(String),
}

impl RectSource {
    pub fn parse(&self) -> Option<Rect> {
        match self {
            RectSource::Fields {
                x,
                y,
                width,
                height,
            } => Some(Rect::from_floats(*x, *y, *width, *height)),
            RectSource::Frame(frame) => Rect::parse_frame(frame),
        }
    }
}

/// One node of the raw accessibility tree.
///
/// Attributes this crate does not interpret (`isEnabled`, `rawIdentifier`,
/// ...) are kept in `attributes` and serialized back unchanged.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<RectSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

impl fmt::Debug for UiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("UiNode");
        debug_struct.field("type", &self.kind);
        if let Some(label) = &self.label {
            debug_struct.field("label", label);
        }
        if let Some(name) = &self.name {
            debug_struct.field("name", name);
        }
        if !self.children.is_empty() {
            debug_struct.field("children", &self.children);
        }
        debug_struct.finish()
    }
}

impl UiNode {
    /// Element type with the `XCUIElementType` prefix removed.
    pub fn short_type(&self) -> Option<&str> {
        self.kind.as_deref().map(short_type)
    }

    /// The node's label, falling back to its name. Blank strings count as absent.
    pub fn label_text(&self) -> Option<&str> {
        non_blank(self.label.as_deref()).or_else(|| non_blank(self.name.as_deref()))
    }

    /// The value as display text. Null, `false`, zero and empty values count as absent.
    pub fn value_text(&self) -> Option<String> {
        let value = self.value.as_ref().filter(|v| is_truthy(v))?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Parsed bounding rectangle, preferring `rect` over `frame`.
    pub fn bounds(&self) -> Option<Rect> {
        self.rect
            .as_ref()
            .and_then(RectSource::parse)
            .or_else(|| self.frame.as_deref().and_then(Rect::parse_frame))
    }

    fn has_accessible_info(&self) -> bool {
        non_blank(self.label.as_deref()).is_some()
            || non_blank(self.name.as_deref()).is_some()
            || self.value_text().is_some()
            || self
                .short_type()
                .is_some_and(|t| type_in(t, &ACCESSIBLE_TYPES))
    }

    /// Copy of this node's own attributes with empty ones dropped, carrying `children`.
    fn pruned_with(&self, children: Vec<UiNode>) -> UiNode {
        UiNode {
            kind: self.kind.clone().filter(|k| !k.is_empty()),
            name: self.name.clone().filter(|n| !n.is_empty()),
            label: self.label.clone().filter(|l| !l.is_empty()),
            value: self.value.clone().filter(is_truthy),
            rect: self.rect.clone(),
            frame: self.frame.clone().filter(|f| !f.is_empty()),
            attributes: self
                .attributes
                .iter()
                .filter(|(_, v)| is_truthy(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            children,
        }
    }
}

/// A labelled, positioned control, flattened out of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub rect: Rect,
    pub center: (i64, i64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl InteractiveElement {
    fn from_node(node: &UiNode) -> Option<Self> {
        let kind = node.short_type()?;
        if !type_in(kind, &INTERACTIVE_TYPES) {
            return None;
        }
        let rect = node.bounds()?;
        let label = node.label_text()?;
        Some(Self {
            kind: kind.to_string(),
            label: label.to_string(),
            rect,
            center: rect.center(),
            value: node
                .value_text()
                .map(|v| truncate_chars(&v, MAX_VALUE_CHARS)),
        })
    }
}

/// Ordered elements addressed by 1-based ordinal, as agents refer to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementList(Vec<InteractiveElement>);

impl ElementList {
    pub fn new(elements: Vec<InteractiveElement>) -> Self {
        Self(elements)
    }

    /// Element at `ordinal` (1 = first).
    pub fn get(&self, ordinal: usize) -> Result<&InteractiveElement, AutomationError> {
        if self.0.is_empty() {
            return Err(AutomationError::NotFound(
                "no elements to pick from".to_string(),
            ));
        }
        ordinal
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .ok_or_else(|| {
                AutomationError::NotFound(format!(
                    "only {} result(s) found, pick 1-{}",
                    self.0.len(),
                    self.0.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractiveElement> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<InteractiveElement> {
        self.0
    }
}

impl From<Vec<InteractiveElement>> for ElementList {
    fn from(elements: Vec<InteractiveElement>) -> Self {
        Self(elements)
    }
}

/// Keeps only subtrees with text, an interactive type, or a kept descendant.
///
/// Never returns an empty result: if nothing at all survives, the original
/// tree is returned unfiltered.
pub fn filter_accessible(tree: &UiNode) -> UiNode {
    retain_accessible(tree).unwrap_or_else(|| tree.clone())
}

fn retain_accessible(node: &UiNode) -> Option<UiNode> {
    let children: Vec<UiNode> = node.children.iter().filter_map(retain_accessible).collect();
    if node.has_accessible_info() || !children.is_empty() {
        Some(node.pruned_with(children))
    } else {
        None
    }
}

/// Pre-order list of every interactive node that has both a rectangle and a label.
pub fn flatten(tree: &UiNode) -> Vec<InteractiveElement> {
    let mut out = Vec::new();
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        if let Some(element) = InteractiveElement::from_node(node) {
            out.push(element);
        }
        stack.extend(node.children.iter().rev());
    }
    out
}

/// Strips the `XCUIElementType` prefix, ignoring ASCII case.
pub fn short_type(kind: &str) -> &str {
    match kind.get(..TYPE_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(TYPE_PREFIX) => &kind[TYPE_PREFIX.len()..],
        _ => kind,
    }
}

fn type_in(kind: &str, allowed: &[&str]) -> bool {
    let kind = short_type(kind);
    allowed.iter().any(|t| t.eq_ignore_ascii_case(kind))
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
