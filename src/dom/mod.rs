//! DOM snapshot model and capture.
//!
//! All element resolution and page diagnostics run as pure functions over a
//! [`DomSnapshot`] — an immutable serialization of the reachable node set
//! (document plus every attached shadow root) taken in one injected-script
//! round trip. The capture script also parks the live element array on
//! `window.__facteur_nodes`, so interaction scripts can address an element by
//! its snapshot index. Node ids are only valid against the latest capture;
//! callers recapture on every polling tick instead of trusting a stale
//! reference to remain attached.

pub mod resolve;
pub mod selector;
pub mod text;

use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::page::PageDriver;

/// Index of a node within the snapshot it was captured in.
pub type NodeId = usize;

/// One element of the captured node set, in document (DFS) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    /// Lowercased tag name.
    pub tag: String,
    /// Snapshot index of the parent element, `None` for the root.
    #[serde(default)]
    pub parent: Option<usize>,
    /// All attributes present on the element.
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    /// Own `textContent`, truncated at capture time.
    #[serde(default)]
    pub text: String,
    /// Non-zero rendered bounding box at capture time.
    #[serde(default)]
    pub visible: bool,
    /// Current value for form controls.
    #[serde(default)]
    pub value: Option<String>,
    /// Checked state for checkables.
    #[serde(default)]
    pub checked: Option<bool>,
    /// Disabled state for form controls.
    #[serde(default)]
    pub disabled: bool,
    /// Whether the element lives inside a shadow root.
    #[serde(default, rename = "inShadow")]
    pub in_shadow: bool,
}

/// An immutable snapshot of one document generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomSnapshot {
    /// `location.href` at capture time.
    pub url: String,
    pub title: String,
    /// Full body text (truncated at a large cap), used for marker detection.
    pub body_text: String,
    pub nodes: Vec<NodeData>,
}

impl DomSnapshot {
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id]
    }

    pub fn ids(&self) -> std::ops::Range<usize> {
        0..self.nodes.len()
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id].attrs.get(name).map(String::as_str)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Walk from the parent of `id` up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            snap: self,
            current: self.parent(id),
        }
    }

    pub fn is_descendant_of(&self, id: NodeId, root: NodeId) -> bool {
        self.ancestors(id).any(|a| a == root)
    }

    /// Siblings of `id` that precede it in document order.
    pub fn preceding_siblings(&self, id: NodeId) -> Vec<NodeId> {
        let parent = self.parent(id);
        (0..id)
            .filter(|&other| self.parent(other) == parent && parent.is_some())
            .collect()
    }

    pub fn text(&self, id: NodeId) -> &str {
        &self.nodes[id].text
    }

    pub fn visible(&self, id: NodeId) -> bool {
        self.nodes[id].visible
    }

    /// Current value of a form control: live value first, `value` attribute
    /// as fallback.
    pub fn value_of(&self, id: NodeId) -> Option<&str> {
        self.nodes[id]
            .value
            .as_deref()
            .or_else(|| self.attr(id, "value"))
    }

    pub fn has_input_value(&self, id: NodeId) -> bool {
        self.value_of(id)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    /// Hostname of the captured document URL, empty when unparseable.
    pub fn host(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Path of the captured document URL, empty when unparseable.
    pub fn path(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .map(|u| u.path().to_string())
            .unwrap_or_default()
    }
}

pub struct Ancestors<'a> {
    snap: &'a DomSnapshot,
    current: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.current?;
        self.current = self.snap.parent(id);
        Some(id)
    }
}

/// Injected walker. Serializes the reachable node set and parks the matching
/// live element array on `window.__facteur_nodes` for later interaction.
pub const SNAPSHOT_SCRIPT: &str = r#"(() => {
  const live = [];
  const out = [];
  const walk = (el, parent, inShadow) => {
    const idx = out.length;
    live.push(el);
    const rect = el.getBoundingClientRect();
    const attrs = {};
    for (const a of el.attributes) attrs[a.name] = a.value;
    out.push({
      tag: el.tagName.toLowerCase(),
      parent,
      attrs,
      text: (el.textContent || '').slice(0, 400),
      visible: rect.width > 0 && rect.height > 0,
      value: typeof el.value === 'string' ? el.value.slice(0, 400) : null,
      checked: typeof el.checked === 'boolean' ? el.checked : null,
      disabled: el.disabled === true,
      inShadow
    });
    if (el.shadowRoot) {
      for (const child of el.shadowRoot.children) walk(child, idx, true);
    }
    for (const child of el.children) walk(child, idx, inShadow);
  };
  if (document.documentElement) walk(document.documentElement, null, false);
  window.__facteur_nodes = live;
  return {
    url: String(location.href || ''),
    title: String(document.title || ''),
    bodyText: document.body ? (document.body.textContent || '').slice(0, 262144) : '',
    nodes: out
  };
})()"#;

/// Capture a fresh snapshot of the current document.
pub async fn capture(page: &dyn PageDriver) -> anyhow::Result<DomSnapshot> {
    let value = page.execute_js(SNAPSHOT_SCRIPT).await?;
    let snapshot: DomSnapshot =
        serde_json::from_value(value).context("malformed DOM snapshot")?;
    Ok(snapshot)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Builds fake snapshots for resolution and workflow tests.
    pub(crate) struct SnapshotBuilder {
        snap: DomSnapshot,
    }

    impl SnapshotBuilder {
        pub fn new(url: &str) -> Self {
            let mut snap = DomSnapshot {
                url: url.to_string(),
                ..Default::default()
            };
            snap.nodes.push(NodeData {
                tag: "html".into(),
                parent: None,
                attrs: HashMap::new(),
                text: String::new(),
                visible: true,
                value: None,
                checked: None,
                disabled: false,
                in_shadow: false,
            });
            Self { snap }
        }

        pub fn body_text(mut self, text: &str) -> Self {
            self.snap.body_text = text.to_string();
            self
        }

        /// Push a visible element with empty text under `parent` (root when
        /// `None`). Returns its id.
        pub fn el(&mut self, tag: &str, parent: Option<NodeId>, attrs: &[(&str, &str)]) -> NodeId {
            self.push(tag, parent, attrs, "", true)
        }

        pub fn push(
            &mut self,
            tag: &str,
            parent: Option<NodeId>,
            attrs: &[(&str, &str)],
            text: &str,
            visible: bool,
        ) -> NodeId {
            let id = self.snap.nodes.len();
            self.snap.nodes.push(NodeData {
                tag: tag.to_string(),
                parent: Some(parent.unwrap_or(0)),
                attrs: attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                text: text.to_string(),
                visible,
                value: None,
                checked: None,
                disabled: false,
                in_shadow: false,
            });
            id
        }

        pub fn set_value(&mut self, id: NodeId, value: &str) {
            self.snap.nodes[id].value = Some(value.to_string());
        }

        pub fn set_disabled(&mut self, id: NodeId, disabled: bool) {
            self.snap.nodes[id].disabled = disabled;
        }

        pub fn set_checked(&mut self, id: NodeId, checked: bool) {
            self.snap.nodes[id].checked = Some(checked);
        }

        pub fn build(self) -> DomSnapshot {
            self.snap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::SnapshotBuilder;

    #[test]
    fn test_ancestor_walk_and_descendant_check() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let outer = b.el("div", None, &[("id", "outer")]);
        let inner = b.el("ul", Some(outer), &[]);
        let leaf = b.el("a", Some(inner), &[("href", "/x")]);
        let snap = b.build();

        let chain: Vec<_> = snap.ancestors(leaf).collect();
        assert_eq!(chain, vec![inner, outer, 0]);
        assert!(snap.is_descendant_of(leaf, outer));
        assert!(!snap.is_descendant_of(outer, leaf));
    }

    #[test]
    fn test_preceding_siblings_are_in_document_order() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let parent = b.el("ul", None, &[]);
        let first = b.el("li", Some(parent), &[]);
        let second = b.el("li", Some(parent), &[]);
        let third = b.el("li", Some(parent), &[]);
        let snap = b.build();

        assert_eq!(snap.preceding_siblings(third), vec![first, second]);
        assert!(snap.preceding_siblings(first).is_empty());
    }

    #[test]
    fn test_value_falls_back_to_attribute() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let input = b.el("input", None, &[("value", "prefilled")]);
        let snap = b.build();
        assert_eq!(snap.value_of(input), Some("prefilled"));
        assert!(snap.has_input_value(input));
    }

    #[test]
    fn test_host_and_path() {
        let snap = SnapshotBuilder::new("https://espace-client.orange.fr/facture-paiement/123").build();
        assert_eq!(snap.host(), "espace-client.orange.fr");
        assert_eq!(snap.path(), "/facture-paiement/123");
    }
}
