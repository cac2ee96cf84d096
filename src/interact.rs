//! Synthetic interaction: simulated pointer/keyboard/input sequences that
//! make a target element behave as if a real user acted on it.
//!
//! Scripts address elements through the `window.__facteur_nodes` array parked
//! by the snapshot capture, so a node id is only meaningful against the
//! latest snapshot. Both `click` and `set_value` are best-effort and do not
//! themselves fail on an unresponsive page: callers detect failure by
//! re-reading observable state (a next-step element becoming visible, the
//! field's reflected value), not by trusting a return code.

use serde::Deserialize;

use crate::dom::{DomSnapshot, NodeId};
use crate::error::FlowResult;
use crate::page::PageDriver;

/// Full user-like activation: scroll into view, pointer/mouse sequence at the
/// element's visual center, then native `.click()` reinforcement. For
/// file-picker inputs the native call is withheld — browsers require a
/// direct user gesture to open a file chooser, and a scripted activation
/// would silently fail or surface a permission error.
const CLICK_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { clicked: false };
  el.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
  try { if (el.focus) el.focus({ preventScroll: true }); } catch (_e) {}
  const rect = el.getBoundingClientRect();
  const x = rect.left + Math.max(2, Math.min(rect.width - 2, rect.width / 2));
  const y = rect.top + Math.max(2, Math.min(rect.height - 2, rect.height / 2));
  const base = { bubbles: true, cancelable: true, composed: true, clientX: x, clientY: y, button: 0 };
  el.dispatchEvent(new PointerEvent('pointerdown', Object.assign({}, base, { pointerType: 'mouse', isPrimary: true, buttons: 1 })));
  el.dispatchEvent(new MouseEvent('mousedown', Object.assign({}, base, { buttons: 1 })));
  el.dispatchEvent(new PointerEvent('pointerup', Object.assign({}, base, { pointerType: 'mouse', isPrimary: true, buttons: 0 })));
  el.dispatchEvent(new MouseEvent('mouseup', Object.assign({}, base, { buttons: 0 })));
  el.dispatchEvent(new MouseEvent('click', Object.assign({}, base, { buttons: 0 })));
  __NATIVE__
  return { clicked: true };
})()"#;

/// Framework-managed inputs ignore plain property assignment. The write goes
/// through a paste-like insertion first (some login forms only accept
/// paste-sourced input); when the reflected value does not match, it falls
/// back to the inherited prototype setter, bypassing per-instance shadowing.
/// Every write ends with a synthetic `change` so blur/change validation
/// fires.
const SET_VALUE_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { ok: false, value: null };
  const text = '__TEXT__';
  const rect = el.getBoundingClientRect();
  const x = rect.left + Math.max(2, Math.min(rect.width - 2, rect.width / 2));
  const y = rect.top + Math.max(2, Math.min(rect.height - 2, rect.height / 2));
  const base = { bubbles: true, cancelable: true, composed: true, clientX: x, clientY: y, button: 0 };
  el.dispatchEvent(new PointerEvent('pointerdown', Object.assign({}, base, { pointerType: 'mouse', isPrimary: true, buttons: 1 })));
  el.dispatchEvent(new MouseEvent('mousedown', Object.assign({}, base, { buttons: 1 })));
  el.dispatchEvent(new PointerEvent('pointerup', Object.assign({}, base, { pointerType: 'mouse', isPrimary: true, buttons: 0 })));
  el.dispatchEvent(new MouseEvent('mouseup', Object.assign({}, base, { buttons: 0 })));
  el.dispatchEvent(new MouseEvent('click', Object.assign({}, base, { buttons: 0 })));
  try { el.focus({ preventScroll: true }); } catch (_e) {}
  try { if (el.select) el.select(); } catch (_e) {}
  const setNative = (value) => {
    const proto = Object.getPrototypeOf(el);
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) { desc.set.call(el, value); } else { el.value = value; }
  };
  let pasted = false;
  try {
    if (el.setRangeText) el.setRangeText('', 0, (el.value || '').length, 'end');
    el.dispatchEvent(new ClipboardEvent('paste', { bubbles: true, cancelable: true, clipboardData: new DataTransfer() }));
    if (el.setRangeText) el.setRangeText(text, 0, (el.value || '').length, 'end');
    el.dispatchEvent(new InputEvent('input', { bubbles: true, inputType: 'insertFromPaste', data: text }));
    if (el.value !== text) {
      setNative(text);
      el.dispatchEvent(new Event('input', { bubbles: true }));
    }
    pasted = true;
  } catch (_e) {
    pasted = false;
  }
  if (!pasted) {
    setNative(text);
    el.dispatchEvent(new Event('input', { bubbles: true }));
  }
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { ok: true, value: typeof el.value === 'string' ? el.value : null };
})()"#;

const READ_STATE_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { connected: false, value: null, disabled: false, checked: false, visible: false };
  const rect = el.getBoundingClientRect();
  return {
    connected: true,
    value: typeof el.value === 'string' ? el.value : null,
    disabled: el.disabled === true,
    checked: el.checked === true,
    visible: rect.width > 0 && rect.height > 0
  };
})()"#;

/// Select a radio/checkbox and fire the events framework listeners bind to.
const CHECK_INPUT_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { ok: false };
  try { el.checked = true; } catch (_e) {}
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { ok: true, checked: el.checked === true };
})()"#;

const SELECT_OPTION_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { ok: false };
  el.value = '__TEXT__';
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { ok: true, value: el.value };
})()"#;

/// Type a search query into a combobox input: clear, notify, set, notify,
/// then Enter.
const TYPE_QUERY_TEMPLATE: &str = r#"(() => {
  const el = (window.__facteur_nodes || [])[__ID__];
  if (!el || !el.isConnected) return { ok: false };
  try { el.focus({ preventScroll: true }); } catch (_e) {}
  el.value = '';
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.value = '__TEXT__';
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new KeyboardEvent('keydown', { key: 'Enter', code: 'Enter', bubbles: true }));
  return { ok: true, value: el.value };
})()"#;

/// Scroll the first scrollable overlay container to its end so lazily paged
/// option lists materialize. Overflow style is only knowable in-page, so the
/// container discovery stays on the JS side.
const SCROLL_OVERLAY_TEMPLATE: &str = r#"(() => {
  const overlayRoot = document.querySelector('.cdk-overlay-container') || document.body;
  if (!overlayRoot) return { scrolled: false };
  const candidates = Array.from(overlayRoot.querySelectorAll('*'));
  const scroller = candidates.find((node) => {
    if (!(node instanceof HTMLElement)) return false;
    const rect = node.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) return false;
    const style = window.getComputedStyle(node);
    if (!style) return false;
    const overflowY = style.overflowY;
    return (overflowY === 'auto' || overflowY === 'scroll') && node.scrollHeight > node.clientHeight;
  });
  if (!scroller) return { scrolled: false };
  scroller.scrollTop = scroller.scrollHeight;
  return { scrolled: true };
})()"#;

/// Same-context refetch of a resolved URL plus a synthetic anchor save, used
/// where the site's native anchor behavior opens the document in a new
/// browsing context instead of downloading it.
const FETCH_AND_SAVE_TEMPLATE: &str = r#"(async () => {
  try {
    const response = await fetch('__URL__', { credentials: 'include', cache: 'no-store' });
    if (!response.ok) return { ok: false, status: response.status };
    const blob = await response.blob();
    const objectUrl = URL.createObjectURL(blob);
    try {
      const a = document.createElement('a');
      a.href = objectUrl;
      a.download = '__NAME__' || 'invoice.pdf';
      a.style.display = 'none';
      document.body.appendChild(a);
      a.click();
      a.remove();
    } finally {
      setTimeout(() => URL.revokeObjectURL(objectUrl), 30000);
    }
    return { ok: true, status: response.status };
  } catch (_e) {
    return { ok: false, status: 0 };
  }
})()"#;

const RESOURCES_SCRIPT: &str =
    "performance.getEntriesByType('resource').map((entry) => entry.name)";

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes all characters that could break out of a JS string context:
/// backslashes, quotes, backticks, newlines, `</script>` sequences, null
/// bytes.
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}

fn with_id(template: &str, id: NodeId) -> String {
    template.replace("__ID__", &id.to_string())
}

pub fn click_script(id: NodeId, allow_native: bool) -> String {
    let native = if allow_native {
        "try { if (el.click) el.click(); } catch (_e) {}"
    } else {
        ""
    };
    with_id(CLICK_TEMPLATE, id).replace("__NATIVE__", native)
}

pub fn set_value_script(id: NodeId, text: &str) -> String {
    with_id(SET_VALUE_TEMPLATE, id).replace("__TEXT__", &sanitize_js_string(text))
}

pub fn read_state_script(id: NodeId) -> String {
    with_id(READ_STATE_TEMPLATE, id)
}

pub fn check_input_script(id: NodeId) -> String {
    with_id(CHECK_INPUT_TEMPLATE, id)
}

pub fn select_option_script(id: NodeId, value: &str) -> String {
    with_id(SELECT_OPTION_TEMPLATE, id).replace("__TEXT__", &sanitize_js_string(value))
}

pub fn type_query_script(id: NodeId, text: &str) -> String {
    with_id(TYPE_QUERY_TEMPLATE, id).replace("__TEXT__", &sanitize_js_string(text))
}

pub fn fetch_and_save_script(url: &str, file_name: &str) -> String {
    FETCH_AND_SAVE_TEMPLATE
        .replace("__URL__", &sanitize_js_string(url))
        .replace("__NAME__", &sanitize_js_string(file_name))
}

/// Observable element state, read live rather than from a stale snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementState {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub visible: bool,
}

/// Outcome of a same-context refetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOutcome {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub status: u16,
}

fn file_input(snap: &DomSnapshot, id: NodeId) -> bool {
    snap.node(id).tag == "input" && snap.attr(id, "type") == Some("file")
}

/// Click `id` with the full synthetic sequence. Best-effort: an unresponsive
/// target is not an error here.
pub async fn click(page: &dyn PageDriver, snap: &DomSnapshot, id: NodeId) -> FlowResult<()> {
    let script = click_script(id, !file_input(snap, id));
    page.execute_js(&script).await?;
    Ok(())
}

/// Write `text` into the control at `id`.
pub async fn set_value(
    page: &dyn PageDriver,
    _snap: &DomSnapshot,
    id: NodeId,
    text: &str,
) -> FlowResult<()> {
    page.execute_js(&set_value_script(id, text)).await?;
    Ok(())
}

pub async fn read_state(page: &dyn PageDriver, id: NodeId) -> FlowResult<ElementState> {
    let value = page.execute_js(&read_state_script(id)).await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

pub async fn check_input(page: &dyn PageDriver, id: NodeId) -> FlowResult<()> {
    page.execute_js(&check_input_script(id)).await?;
    Ok(())
}

pub async fn select_option(page: &dyn PageDriver, id: NodeId, value: &str) -> FlowResult<()> {
    page.execute_js(&select_option_script(id, value)).await?;
    Ok(())
}

pub async fn type_query(page: &dyn PageDriver, id: NodeId, text: &str) -> FlowResult<()> {
    page.execute_js(&type_query_script(id, text)).await?;
    Ok(())
}

/// Scroll the overlay option list to its end. Returns whether a scrollable
/// container was found.
pub async fn scroll_overlay_to_end(page: &dyn PageDriver) -> FlowResult<bool> {
    let value = page.execute_js(SCROLL_OVERLAY_TEMPLATE).await?;
    Ok(value
        .get("scrolled")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false))
}

pub async fn fetch_and_save(
    page: &dyn PageDriver,
    url: &str,
    file_name: &str,
) -> FlowResult<FetchOutcome> {
    let value = page
        .execute_js(&fetch_and_save_script(url, file_name))
        .await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Names of every resource the page has loaded so far, for pre/post-click
/// diffing.
pub async fn list_resources(page: &dyn PageDriver) -> FlowResult<Vec<String>> {
    let value = page.execute_js(RESOURCES_SCRIPT).await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_js_string("hello"), "hello");
        assert_eq!(sanitize_js_string("it's"), "it\\'s");
        assert_eq!(sanitize_js_string("a\"b"), "a\\\"b");
    }

    #[test]
    fn test_sanitize_script_breakout() {
        let malicious = r#"</script><script>alert(1)</script>"#;
        let sanitized = sanitize_js_string(malicious);
        assert!(!sanitized.contains("</script>"));
        assert!(sanitized.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn test_sanitize_null_bytes() {
        assert_eq!(sanitize_js_string("abc\0def"), "abcdef");
    }

    #[test]
    fn test_click_script_dispatches_full_sequence() {
        let script = click_script(7, true);
        assert!(script.contains("[7]"));
        for event in ["pointerdown", "mousedown", "pointerup", "mouseup", "'click'"] {
            assert!(script.contains(event), "missing {event}");
        }
        assert!(script.contains("el.click()"));
    }

    #[test]
    fn test_file_inputs_never_get_native_activation() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let picker = b.el("input", None, &[("type", "file")]);
        let text = b.el("input", None, &[("type", "text")]);
        let snap = b.build();

        assert!(file_input(&snap, picker));
        assert!(!file_input(&snap, text));
        assert!(!click_script(picker, !file_input(&snap, picker)).contains("el.click()"));
        assert!(click_script(text, !file_input(&snap, text)).contains("el.click()"));
    }

    #[test]
    fn test_set_value_script_prefers_paste_then_setter() {
        let script = set_value_script(3, "user@example.com");
        let paste = script.find("insertFromPaste").expect("paste path missing");
        let setter = script
            .find("getOwnPropertyDescriptor")
            .expect("setter path missing");
        assert!(setter < paste, "setter helper is declared before use");
        assert!(script.contains("new Event('change'"));
        assert!(script.contains("user@example.com"));
    }

    #[test]
    fn test_value_injection_is_escaped() {
        let script = set_value_script(1, "p'ss\\word");
        assert!(script.contains("p\\'ss\\\\word"));
    }

    #[test]
    fn test_fetch_and_save_escapes_url() {
        let script = fetch_and_save_script("https://x.fr/a.pdf?b='c'", "facture_free.pdf");
        assert!(script.contains("b=\\'c\\'"));
        assert!(script.contains("facture_free.pdf"));
        assert!(script.contains("credentials: 'include'"));
    }
}
