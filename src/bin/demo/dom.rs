use anyhow::{Context, Result};
use headless_chrome::Tab;
use serde::Deserialize;
use std::sync::Arc;

use calc_demo::{BoundingBox, Selector, SelectorKind, WindowMetrics, WindowOrigin};

/// Script that resolves one selector to the viewport rect of its first
/// visible match, serialized as JSON, or `null`. `__KIND__`, `__QUERY__` and
/// `__TEXT__` are replaced with JSON string literals.
const ELEMENT_BOX_JS: &str = r#"
(() => {
  const kind = __KIND__;
  const query = __QUERY__;
  const text = __TEXT__;
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden';
  };
  const label = (el) => (el.innerText || el.textContent || '').trim();
  let found = [];
  if (kind === 'xpath') {
    const snap = document.evaluate(query, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < snap.snapshotLength; i++) found.push(snap.snapshotItem(i));
  } else if (kind === 'text') {
    // Deepest element whose own text is an exact match.
    found = [...document.querySelectorAll('body *')].filter(el => label(el) === text).reverse();
  } else if (kind === 'css_text') {
    found = [...document.querySelectorAll(query)].filter(el => label(el).includes(text));
  } else {
    found = [...document.querySelectorAll(query)];
  }
  const el = found.find(visible);
  if (!el) return null;
  const r = el.getBoundingClientRect();
  return JSON.stringify({ x: r.x, y: r.y, width: r.width, height: r.height });
})()
"#;

const WINDOW_JS: &str = r#"JSON.stringify({
  screenX: window.screenX,
  screenY: window.screenY,
  outerHeight: window.outerHeight,
  innerHeight: window.innerHeight
})"#;

/// Lists the visible buttons of the calculator so the planner can pick
/// selectors that actually exist on the page.
const CALCULATOR_KEYS_JS: &str = r#"
(() => {
  const keys = [];
  const seen = new Set();
  for (const el of document.querySelectorAll('button, [role=button], input[type=button]')) {
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) continue;
    const label = (el.innerText || el.value || '').trim().replace(/\s+/g, ' ');
    if (!label || label.length > 12 || seen.has(label)) continue;
    seen.add(label);
    const tag = el.tagName.toLowerCase();
    const cls = [...el.classList].slice(0, 2).map(c => '.' + CSS.escape(c)).join('');
    keys.push({ label, selector: tag + cls + ":has-text('" + label.replace(/'/g, "\\'") + "')" });
  }
  return JSON.stringify(keys);
})()
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct CalculatorKey {
    pub label: String,
    pub selector: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowReading {
    screen_x: f64,
    screen_y: f64,
    outer_height: f64,
    inner_height: f64,
}

fn js_string(raw: &str) -> String {
    serde_json::Value::from(raw).to_string()
}

pub fn element_box_js(selector: &Selector) -> String {
    let (kind, query, text) = match selector.kind() {
        SelectorKind::Css(css) => ("css", css.as_str(), ""),
        SelectorKind::XPath(path) => ("xpath", path.as_str(), ""),
        SelectorKind::Text(text) => ("text", "", text.as_str()),
        SelectorKind::CssWithText { css, text } => ("css_text", css.as_str(), text.as_str()),
    };
    ELEMENT_BOX_JS
        .replace("__KIND__", &js_string(kind))
        .replace("__QUERY__", &js_string(query))
        .replace("__TEXT__", &js_string(text))
}

/// Evaluate `js` and return its string result, if it produced one.
fn evaluate_string(tab: &Arc<Tab>, js: &str) -> Result<Option<String>> {
    let result = tab.evaluate(js, false)?;
    Ok(result.value.and_then(|v| v.as_str().map(String::from)))
}

pub fn element_box(tab: &Arc<Tab>, selector: &Selector) -> Result<Option<BoundingBox>> {
    match evaluate_string(tab, &element_box_js(selector))? {
        None => Ok(None),
        Some(raw) => {
            let bounds = serde_json::from_str(&raw)
                .with_context(|| format!("unexpected element box {raw}"))?;
            Ok(Some(bounds))
        }
    }
}

fn read_window(tab: &Arc<Tab>) -> Result<WindowReading> {
    let raw = evaluate_string(tab, WINDOW_JS)?.context("window query returned nothing")?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn window_origin(tab: &Arc<Tab>) -> Result<WindowOrigin> {
    let reading = read_window(tab)?;
    Ok(WindowOrigin {
        x: reading.screen_x.round() as i32,
        y: reading.screen_y.round() as i32,
    })
}

pub fn window_metrics(tab: &Arc<Tab>) -> Result<WindowMetrics> {
    let reading = read_window(tab)?;
    Ok(WindowMetrics {
        outer_height: reading.outer_height.round() as i64,
        inner_height: reading.inner_height.round() as i64,
    })
}

pub fn calculator_keys(tab: &Arc<Tab>) -> Result<Vec<CalculatorKey>> {
    match evaluate_string(tab, CALCULATOR_KEYS_JS)? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}

/// Get the current page title.
pub fn page_title(tab: &Arc<Tab>) -> Result<String> {
    Ok(evaluate_string(tab, "document.title")?.unwrap_or_else(|| "untitled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parts_are_json_literals() {
        let selector = Selector::parse("button:has-text('7')").unwrap();
        let js = element_box_js(&selector);
        assert!(js.contains(r#"const kind = "css_text";"#));
        assert!(js.contains(r#"const query = "button";"#));
        assert!(js.contains(r#"const text = "7";"#));
        assert!(!js.contains("__"));
    }

    #[test]
    fn quotes_cannot_break_out_of_the_script() {
        let selector = Selector::parse(r#"text=it's "quoted""#).unwrap();
        let js = element_box_js(&selector);
        assert!(js.contains(r#"const text = "it's \"quoted\"";"#));
    }

    #[test]
    fn xpath_queries_keep_their_path() {
        let selector = Selector::parse("//button[@id='enter']").unwrap();
        let js = element_box_js(&selector);
        assert!(js.contains(r#"const kind = "xpath";"#));
        assert!(js.contains(r#"const query = "//button[@id='enter']";"#));
    }
}
