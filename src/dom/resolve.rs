//! Element resolution: selector candidates, visibility filtering, free-text
//! fallback, clickable-target promotion.
//!
//! Selector-based matching is fast and precise while a site's markup holds
//! still; free-text matching is the defense against churn in class names and
//! attributes, which in practice changes more often than visible label text.
//! Candidates are tried in declared order and the first **visible** match
//! wins; a candidate that fails to parse is skipped, not fatal.

use super::selector::SelectorList;
use super::text::{fold, fold_contains};
use super::{DomSnapshot, NodeId};

/// Tags scanned by the loose text search (labels, headings, copy).
const TEXT_BEARING_TAGS: [&str; 9] = [
    "button", "a", "div", "span", "label", "h1", "h2", "h3", "p",
];

/// Tags scanned when the caller needs something to click.
const CLICKABLE_SCAN_TAGS: [&str; 6] = ["button", "a", "option", "li", "span", "div"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Accept hidden matches. Used once, to read a value out of a
    /// temporarily invisible field.
    pub allow_hidden: bool,
}

/// First node matched by the first candidate that yields a visible hit.
pub fn first_match<S: AsRef<str>>(snap: &DomSnapshot, candidates: &[S]) -> Option<NodeId> {
    first_match_with(snap, candidates, ResolveOptions::default())
}

pub fn first_match_with<S: AsRef<str>>(
    snap: &DomSnapshot,
    candidates: &[S],
    options: ResolveOptions,
) -> Option<NodeId> {
    for candidate in candidates {
        let Ok(list) = SelectorList::parse(candidate.as_ref()) else {
            continue;
        };
        let hit = snap
            .ids()
            .find(|&id| (options.allow_hidden || snap.visible(id)) && list.matches(snap, id));
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// All visible nodes from the first candidate with a non-empty visible set.
pub fn all_matches<S: AsRef<str>>(snap: &DomSnapshot, candidates: &[S]) -> Vec<NodeId> {
    for candidate in candidates {
        let Ok(list) = SelectorList::parse(candidate.as_ref()) else {
            continue;
        };
        let hits: Vec<NodeId> = list
            .query_all(snap)
            .into_iter()
            .filter(|&id| snap.visible(id))
            .collect();
        if !hits.is_empty() {
            return hits;
        }
    }
    Vec::new()
}

/// Scoped variant of [`all_matches`]: results restricted to descendants of
/// `root`.
pub fn all_matches_within<S: AsRef<str>>(
    snap: &DomSnapshot,
    root: NodeId,
    candidates: &[S],
) -> Vec<NodeId> {
    for candidate in candidates {
        let Ok(list) = SelectorList::parse(candidate.as_ref()) else {
            continue;
        };
        let hits: Vec<NodeId> = list
            .query_all_within(snap, root)
            .into_iter()
            .filter(|&id| snap.visible(id))
            .collect();
        if !hits.is_empty() {
            return hits;
        }
    }
    Vec::new()
}

/// Loose text lookup over label-bearing tags, visibility not required.
/// Comparison is fold-based (case, diacritics, whitespace insensitive).
pub fn find_by_text(snap: &DomSnapshot, phrase: &str) -> Option<NodeId> {
    let needle = fold(phrase);
    snap.ids().find(|&id| {
        TEXT_BEARING_TAGS.contains(&snap.node(id).tag.as_str())
            && fold(snap.text(id)).contains(&needle)
    })
}

/// Loose text lookup over clickable-ish tags, visible matches only.
pub fn find_clickable_by_text(snap: &DomSnapshot, phrase: &str) -> Option<NodeId> {
    let needle = fold(phrase);
    snap.ids().find(|&id| {
        let node = snap.node(id);
        let scannable = CLICKABLE_SCAN_TAGS.contains(&node.tag.as_str())
            || matches!(snap.attr(id, "role"), Some("button" | "tab"));
        scannable && snap.visible(id) && fold(&node.text).contains(&needle)
    })
}

/// Visible anchors (`a[href]`) whose folded text contains `phrase`.
pub fn find_anchor_by_text(snap: &DomSnapshot, phrase: &str) -> Option<NodeId> {
    let needle = fold(phrase);
    snap.ids().find(|&id| {
        snap.node(id).tag == "a"
            && snap.attr(id, "href").is_some()
            && fold(snap.text(id)).contains(&needle)
    })
}

/// Whether the node is a natively interactive target.
pub fn is_clickable(snap: &DomSnapshot, id: NodeId) -> bool {
    let node = snap.node(id);
    node.tag == "button" || node.tag == "a" || snap.attr(id, "role") == Some("button")
}

/// Promote a matched node to its nearest interactive ancestor; when none
/// exists, the node itself is the target.
pub fn clickable_target(snap: &DomSnapshot, id: NodeId) -> NodeId {
    if is_clickable(snap, id) {
        return id;
    }
    snap.ancestors(id)
        .find(|&a| is_clickable(snap, a))
        .unwrap_or(id)
}

/// Whether the target phrase appears anywhere in the captured body text.
pub fn body_text_contains(snap: &DomSnapshot, phrase: &str) -> bool {
    fold_contains(&snap.body_text, phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    #[test]
    fn test_candidate_priority_order() {
        // The element is matched by the third candidate and by nothing
        // earlier: resolution must return it (priority-order property).
        let mut b = SnapshotBuilder::new("https://example.com/");
        let target = b.el("input", None, &[("name", "login")]);
        let snap = b.build();

        let candidates = ["#login", "input[type='email']", "input[name='login']"];
        assert_eq!(first_match(&snap, &candidates), Some(target));
    }

    #[test]
    fn test_earlier_candidate_wins_over_later() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let by_id = b.el("input", None, &[("id", "login")]);
        let by_name = b.el("input", None, &[("name", "login")]);
        let snap = b.build();

        let candidates = ["#login", "input[name='login']"];
        assert_eq!(first_match(&snap, &candidates), Some(by_id));
        assert_ne!(first_match(&snap, &candidates), Some(by_name));
    }

    #[test]
    fn test_hidden_elements_are_skipped_unless_opted_in() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let hidden = b.push("input", None, &[("id", "login")], "", false);
        let snap = b.build();

        assert_eq!(first_match(&snap, &["#login"]), None);
        assert_eq!(
            first_match_with(&snap, &["#login"], ResolveOptions { allow_hidden: true }),
            Some(hidden)
        );
    }

    #[test]
    fn test_invalid_candidate_is_skipped_not_fatal() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let target = b.el("button", None, &[("id", "ok")]);
        let snap = b.build();

        let candidates = ["button:has(span)", "#ok"];
        assert_eq!(first_match(&snap, &candidates), Some(target));
    }

    #[test]
    fn test_all_matches_returns_first_non_empty_candidate_set() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let one = b.el("a", None, &[("href", "/facture_pdf.pl?mois=202401")]);
        let two = b.el("a", None, &[("href", "/facture_pdf.pl?mois=202402")]);
        let _other = b.el("a", None, &[("href", "/autre.pdf")]);
        let snap = b.build();

        let candidates = ["a[href*='facture_pdf.pl']", "a[href*='.pdf']"];
        assert_eq!(all_matches(&snap, &candidates), vec![one, two]);
    }

    #[test]
    fn test_free_text_fallback_is_accent_insensitive() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let label = b.push(
            "span",
            None,
            &[],
            "Télécharger  mes attestations de prélèvements",
            true,
        );
        let snap = b.build();

        assert_eq!(
            find_by_text(&snap, "telecharger mes attestations de prelevements"),
            Some(label)
        );
    }

    #[test]
    fn test_clickable_by_text_requires_visibility() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let _hidden = b.push("button", None, &[], "Mes factures", false);
        let shown = b.push("button", None, &[], "Mes factures", true);
        let snap = b.build();

        assert_eq!(find_clickable_by_text(&snap, "mes factures"), Some(shown));
    }

    #[test]
    fn test_clickable_target_walks_to_interactive_ancestor() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let anchor = b.el("a", None, &[("href", "/billing")]);
        let wrapper = b.el("div", Some(anchor), &[]);
        let text = b.push("span", Some(wrapper), &[], "Mon Navigo", true);
        let plain = b.push("span", None, &[], "orphan", true);
        let snap = b.build();

        assert_eq!(clickable_target(&snap, text), anchor);
        assert_eq!(clickable_target(&snap, plain), plain);
    }

    #[test]
    fn test_role_button_counts_as_clickable() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let role = b.el("div", None, &[("role", "button")]);
        let inner = b.push("span", Some(role), &[], "Valider", true);
        let snap = b.build();
        assert_eq!(clickable_target(&snap, inner), role);
    }
}
