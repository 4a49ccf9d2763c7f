use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an element is looked up in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorKind {
    Css(String),
    XPath(String),
    /// Exact (trimmed) text content of any element.
    Text(String),
    /// CSS base narrowed to elements whose text contains the given string,
    /// e.g. `button.btn-number:has-text('7')`.
    CssWithText { css: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    kind: SelectorKind,
}

/// Strips one pair of matching quotes and undoes `\'` / `\"` escapes of that
/// quote inside them.
fn unquote(s: &str) -> String {
    let s = s.trim();
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            let inner = &s[1..s.len() - 1];
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\\' && matches!(chars.peek(), Some(&n) if n == q || n == '\\') {
                    if let Some(n) = chars.next() {
                        out.push(n);
                    }
                } else {
                    out.push(c);
                }
            }
            return out;
        }
    }
    s.to_string()
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("is empty".into());
        }

        let kind = if let Some(xpath) = trimmed.strip_prefix("xpath=") {
            SelectorKind::XPath(xpath.trim().to_string())
        } else if trimmed.starts_with("//") || trimmed.starts_with("(//") {
            SelectorKind::XPath(trimmed.to_string())
        } else if let Some(text) = trimmed.strip_prefix("text=") {
            SelectorKind::Text(unquote(text))
        } else if let Some(start) = trimmed.find(":has-text(") {
            let inner_start = start + ":has-text(".len();
            let inner_end = trimmed
                .rfind(')')
                .filter(|end| *end >= inner_start)
                .ok_or_else(|| format!("unterminated :has-text in `{trimmed}`"))?;
            let css = trimmed[..start].trim();
            SelectorKind::CssWithText {
                css: if css.is_empty() { "*".into() } else { css.into() },
                text: unquote(&trimmed[inner_start..inner_end]),
            }
        } else {
            SelectorKind::Css(trimmed.to_string())
        };

        let empty = match &kind {
            SelectorKind::Css(s) | SelectorKind::XPath(s) | SelectorKind::Text(s) => s.is_empty(),
            SelectorKind::CssWithText { text, .. } => text.is_empty(),
        };
        if empty {
            return Err(format!("`{trimmed}` has an empty query"));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
        })
    }

    pub fn kind(&self) -> &SelectorKind {
        &self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Element box in page-viewport CSS pixels (`getBoundingClientRect`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A selector together with the box it resolved to at lookup time. Never
/// reused across steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementLocation {
    pub selector: Selector,
    pub bounds: BoundingBox,
}

/// Browser window's outer top-left corner on screen (`window.screenX/Y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowOrigin {
    pub x: i32,
    pub y: i32,
}

/// Outer frame vs. content viewport heights, used for chrome calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub outer_height: i64,
    pub inner_height: i64,
}

/// Read-only view of the live page. Every call hits the page again.
#[async_trait]
pub trait PageQuery: Send + Sync {
    /// `Ok(None)` when nothing matches or the match has no layout box.
    async fn find_element(&self, selector: &Selector) -> anyhow::Result<Option<BoundingBox>>;

    async fn window_origin(&self) -> anyhow::Result<WindowOrigin>;

    async fn window_metrics(&self) -> anyhow::Result<WindowMetrics>;
}
