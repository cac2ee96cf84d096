//! Selector-subset parser and matcher over DOM snapshots.
//!
//! Selector profiles only ever use a small CSS subset: tag / `*` / `#id` /
//! `.class` / attribute tests (`[a]`, `[a=v]`, `[a*=v]`, `[a^=v]`, `[a$=v]`),
//! compound simple selectors, descendant / `>` / `~` combinators, and comma
//! lists. Anything outside the subset (`:has`, pseudo-classes, `+`) is a
//! parse error, and callers skip that candidate — the same recovery the
//! browser-side `try { querySelector } catch` gave the original selectors.

use thiserror::Error;

use super::{DomSnapshot, NodeId};

#[derive(Debug, Error)]
#[error("unsupported selector `{selector}`: {reason}")]
pub struct SelectorError {
    selector: String,
    reason: String,
}

impl SelectorError {
    fn new(selector: &str, reason: impl Into<String>) -> Self {
        Self {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
struct AttrTest {
    name: String,
    op: AttrOp,
    value: String,
}

/// One compound simple selector, e.g. `button.black[type='button']`.
#[derive(Debug, Clone, Default)]
struct Compound {
    universal: bool,
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    Sibling,
}

/// A combinator chain, e.g. `ul.dropdown-menu > li a[href]`.
#[derive(Debug, Clone)]
struct Complex {
    first: Compound,
    rest: Vec<(Combinator, Compound)>,
}

/// A parsed comma list of complex selectors.
#[derive(Debug, Clone)]
pub struct SelectorList {
    complexes: Vec<Complex>,
}

impl SelectorList {
    /// Parse a selector string. Errors on anything outside the subset.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut complexes = Vec::new();
        for part in split_top_level_commas(input) {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                return Err(SelectorError::new(input, "empty selector in list"));
            }
            complexes.push(parse_complex(input, trimmed)?);
        }
        if complexes.is_empty() {
            return Err(SelectorError::new(input, "empty selector"));
        }
        Ok(Self { complexes })
    }

    /// Whether `id` matches any complex in the list.
    pub fn matches(&self, snap: &DomSnapshot, id: NodeId) -> bool {
        self.complexes
            .iter()
            .any(|complex| complex_matches(snap, complex, id))
    }

    /// All matching nodes in document order.
    pub fn query_all(&self, snap: &DomSnapshot) -> Vec<NodeId> {
        snap.ids().filter(|&id| self.matches(snap, id)).collect()
    }

    pub fn query_first(&self, snap: &DomSnapshot) -> Option<NodeId> {
        snap.ids().find(|&id| self.matches(snap, id))
    }

    /// Matching nodes restricted to descendants of `root`. Mirrors
    /// `element.querySelectorAll`: the selector is matched against the whole
    /// tree, only the result set is scoped.
    pub fn query_all_within(&self, snap: &DomSnapshot, root: NodeId) -> Vec<NodeId> {
        snap.ids()
            .filter(|&id| snap.is_descendant_of(id, root) && self.matches(snap, id))
            .collect()
    }
}

// ─── Matching ────────────────────────────────────────────────────────────────

fn complex_matches(snap: &DomSnapshot, complex: &Complex, id: NodeId) -> bool {
    chain_matches(snap, &complex.first, &complex.rest, id)
}

/// Right-to-left match with backtracking over ancestors/siblings.
fn chain_matches(
    snap: &DomSnapshot,
    first: &Compound,
    rest: &[(Combinator, Compound)],
    id: NodeId,
) -> bool {
    let Some(((combinator, last), head)) = rest.split_last().map(|(l, h)| (l, h)) else {
        return compound_matches(snap, id, first);
    };
    if !compound_matches(snap, id, last) {
        return false;
    }
    match combinator {
        Combinator::Child => snap
            .parent(id)
            .is_some_and(|p| chain_matches(snap, first, head, p)),
        Combinator::Descendant => snap
            .ancestors(id)
            .any(|a| chain_matches(snap, first, head, a)),
        Combinator::Sibling => snap
            .preceding_siblings(id)
            .into_iter()
            .any(|s| chain_matches(snap, first, head, s)),
    }
}

fn compound_matches(snap: &DomSnapshot, id: NodeId, compound: &Compound) -> bool {
    let node = snap.node(id);
    if let Some(tag) = &compound.tag {
        if node.tag != *tag {
            return false;
        }
    }
    if let Some(expected) = &compound.id {
        if snap.attr(id, "id") != Some(expected.as_str()) {
            return false;
        }
    }
    for class in &compound.classes {
        let listed = snap
            .attr(id, "class")
            .map(|v| v.split_whitespace().any(|c| c == class))
            .unwrap_or(false);
        if !listed {
            return false;
        }
    }
    for test in &compound.attrs {
        let actual = snap.attr(id, &test.name);
        let ok = match (test.op, actual) {
            (AttrOp::Exists, actual) => actual.is_some(),
            (AttrOp::Equals, Some(v)) => v == test.value,
            (AttrOp::Contains, Some(v)) => v.contains(&test.value),
            (AttrOp::StartsWith, Some(v)) => v.starts_with(&test.value),
            (AttrOp::EndsWith, Some(v)) => v.ends_with(&test.value),
            (_, None) => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Split on commas that are not inside brackets or quotes.
fn split_top_level_commas(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match ch {
            '\'' | '"' => {
                if quote == Some(ch) {
                    quote = None;
                } else if quote.is_none() {
                    quote = Some(ch);
                }
                current.push(ch);
            }
            '[' if quote.is_none() => {
                in_brackets = true;
                current.push(ch);
            }
            ']' if quote.is_none() => {
                in_brackets = false;
                current.push(ch);
            }
            ',' if quote.is_none() && !in_brackets => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

struct Cursor<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
            skipped = true;
        }
        skipped
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            out.push(self.bump().unwrap());
        }
        out
    }

    fn err(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::new(self.input, reason)
    }
}

fn parse_complex<'a>(full: &'a str, part: &'a str) -> Result<Complex, SelectorError> {
    let mut cursor = Cursor::new(full);
    cursor.chars = part.chars().peekable();

    let mut first: Option<Compound> = None;
    let mut rest: Vec<(Combinator, Compound)> = Vec::new();
    loop {
        let had_space = cursor.skip_whitespace();
        let Some(next) = cursor.peek() else {
            break;
        };
        let combinator = match next {
            '>' => {
                cursor.bump();
                cursor.skip_whitespace();
                Some(Combinator::Child)
            }
            '~' => {
                cursor.bump();
                cursor.skip_whitespace();
                Some(Combinator::Sibling)
            }
            '+' => return Err(cursor.err("adjacent-sibling combinator is not supported")),
            _ if had_space && first.is_some() => Some(Combinator::Descendant),
            _ => None,
        };
        let compound = parse_compound(&mut cursor)?;
        if compound.is_empty() {
            return Err(cursor.err("expected a simple selector"));
        }
        match (&mut first, combinator) {
            (None, None) => first = Some(compound),
            (None, Some(_)) => return Err(cursor.err("selector starts with a combinator")),
            (Some(_), Some(combinator)) => rest.push((combinator, compound)),
            (Some(_), None) => return Err(cursor.err("missing combinator between selectors")),
        }
    }

    match first {
        Some(first) => Ok(Complex { first, rest }),
        None => Err(SelectorError::new(full, "empty selector")),
    }
}

fn parse_compound(cursor: &mut Cursor<'_>) -> Result<Compound, SelectorError> {
    let mut compound = Compound::default();
    loop {
        match cursor.peek() {
            Some('*') => {
                cursor.bump();
                compound.universal = true;
            }
            Some('#') => {
                cursor.bump();
                let ident = cursor.ident();
                if ident.is_empty() {
                    return Err(cursor.err("expected an id after `#`"));
                }
                compound.id = Some(ident);
            }
            Some('.') => {
                cursor.bump();
                let ident = cursor.ident();
                if ident.is_empty() {
                    return Err(cursor.err("expected a class after `.`"));
                }
                compound.classes.push(ident);
            }
            Some('[') => {
                cursor.bump();
                compound.attrs.push(parse_attr(cursor)?);
            }
            Some(':') => return Err(cursor.err("pseudo-classes are not supported")),
            Some(c) if is_ident_char(c) && compound.is_empty() => {
                compound.tag = Some(cursor.ident().to_ascii_lowercase());
            }
            _ => break,
        }
    }
    Ok(compound)
}

fn parse_attr(cursor: &mut Cursor<'_>) -> Result<AttrTest, SelectorError> {
    let mut name = String::new();
    while matches!(cursor.peek(), Some(c) if is_ident_char(c) || c == ':') {
        name.push(cursor.bump().unwrap());
    }
    if name.is_empty() {
        return Err(cursor.err("expected an attribute name"));
    }

    let op = match cursor.peek() {
        Some(']') => {
            cursor.bump();
            return Ok(AttrTest {
                name,
                op: AttrOp::Exists,
                value: String::new(),
            });
        }
        Some('=') => {
            cursor.bump();
            AttrOp::Equals
        }
        Some('*') => {
            cursor.bump();
            expect_equals(cursor)?;
            AttrOp::Contains
        }
        Some('^') => {
            cursor.bump();
            expect_equals(cursor)?;
            AttrOp::StartsWith
        }
        Some('$') => {
            cursor.bump();
            expect_equals(cursor)?;
            AttrOp::EndsWith
        }
        _ => return Err(cursor.err("unsupported attribute operator")),
    };

    let value = match cursor.peek() {
        Some(q @ ('\'' | '"')) => {
            cursor.bump();
            let mut value = String::new();
            loop {
                match cursor.bump() {
                    Some(c) if c == q => break,
                    Some(c) => value.push(c),
                    None => return Err(cursor.err("unterminated attribute value")),
                }
            }
            value
        }
        _ => {
            let mut value = String::new();
            while matches!(cursor.peek(), Some(c) if c != ']') {
                value.push(cursor.bump().unwrap());
            }
            value
        }
    };
    match cursor.bump() {
        Some(']') => Ok(AttrTest { name, op, value }),
        _ => Err(cursor.err("unterminated attribute selector")),
    }
}

fn expect_equals(cursor: &mut Cursor<'_>) -> Result<(), SelectorError> {
    match cursor.bump() {
        Some('=') => Ok(()),
        _ => Err(cursor.err("unsupported attribute operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    fn list(input: &str) -> SelectorList {
        SelectorList::parse(input).expect("selector should parse")
    }

    #[test]
    fn test_tag_id_class_and_attrs() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let button = b.el(
            "button",
            None,
            &[("id", "ok"), ("class", "black wide"), ("type", "button")],
        );
        let link = b.el("a", None, &[("href", "/factures/mars.pdf")]);
        let snap = b.build();

        assert!(list("button").matches(&snap, button));
        assert!(list("#ok").matches(&snap, button));
        assert!(list("button.black[type='button']").matches(&snap, button));
        assert!(!list("button.missing").matches(&snap, button));
        assert!(list("a[href*='.pdf']").matches(&snap, link));
        assert!(list("a[href^='/factures']").matches(&snap, link));
        assert!(list("a[href$='.pdf']").matches(&snap, link));
        assert!(list("[href]").matches(&snap, link));
        assert!(!list("a[href*='download']").matches(&snap, link));
    }

    #[test]
    fn test_descendant_and_child_combinators() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let menu = b.el("ul", None, &[("class", "dropdown-menu")]);
        let item = b.el("li", Some(menu), &[]);
        let input = b.el("input", Some(item), &[("name", "period"), ("value", "3")]);
        let stray = b.el("input", None, &[("name", "period"), ("value", "3")]);
        let snap = b.build();

        let deep = list("ul.dropdown-menu input[name='period'][value='3']");
        assert!(deep.matches(&snap, input));
        assert!(!deep.matches(&snap, stray));

        assert!(list("ul > li").matches(&snap, item));
        assert!(!list("ul > input").matches(&snap, input));
    }

    #[test]
    fn test_general_sibling_combinator() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let parent = b.el("div", None, &[]);
        let _panel = b.el("section", Some(parent), &[("id", "invoices")]);
        let following = b.el("ul", Some(parent), &[]);
        let tab = b.el("button", Some(following), &[("aria-controls", "invoices")]);
        let snap = b.build();

        let scoped = list("#invoices ~ ul [aria-controls='invoices']");
        assert!(scoped.matches(&snap, tab));
    }

    #[test]
    fn test_comma_list_matches_any_branch() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let anchor = b.el("a", None, &[("data-e2e", "download-link")]);
        let snap = b.build();

        let either = list("button[data-e2e='download-link'], a[data-e2e='download-link']");
        assert!(either.matches(&snap, anchor));
    }

    #[test]
    fn test_query_order_and_scoping() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let panel = b.el("div", None, &[("id", "invoices")]);
        let inside = b.el("a", Some(panel), &[("href", "/api/SI/invoice/9?display=1")]);
        let outside = b.el("a", None, &[("href", "/api/SI/invoice/7?display=1")]);
        let snap = b.build();

        let links = list("a[href*='/api/SI/invoice/']");
        assert_eq!(links.query_all(&snap), vec![inside, outside]);
        assert_eq!(links.query_all_within(&snap, panel), vec![inside]);
        assert_eq!(links.query_first(&snap), Some(inside));
    }

    #[test]
    fn test_universal_selector_matches_everything() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let node = b.el("section", None, &[]);
        let snap = b.build();
        assert!(list("*").matches(&snap, node));
        assert!(SelectorList::parse("div *").is_ok());
    }

    #[test]
    fn test_unsupported_syntax_is_a_parse_error() {
        assert!(SelectorList::parse("div:has(a)").is_err());
        assert!(SelectorList::parse("li + li").is_err());
        assert!(SelectorList::parse("input:not([type])").is_err());
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("a[href='unterminated").is_err());
    }

    #[test]
    fn test_attribute_names_with_colons_and_dashes() {
        let mut b = SnapshotBuilder::new("https://example.com/");
        let input = b.el("input", None, &[("autocomplete", "one-time-code")]);
        let snap = b.build();
        assert!(list("input[autocomplete='one-time-code']").matches(&snap, input));
    }
}
