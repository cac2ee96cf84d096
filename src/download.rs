//! Download URL discovery and canonical filename derivation.
//!
//! A download URL is discovered from candidate sources in fixed priority
//! order, first hit wins:
//!
//! 1. A URL-bearing attribute on the control itself (`href` / `data-href` /
//!    `data-url`).
//! 2. The href of the nearest enclosing link ancestor.
//! 3. A page-wide scan: a known download-affordance anchor or any anchor
//!    pointing at a PDF/download path, failing that a regex scan of inline
//!    script text for a URL fragment ending in `.pdf` or containing
//!    "download".
//! 4. Network resources observed since a pre-click resource-timing snapshot,
//!    filtered by a document-like pattern.
//!
//! Filename rules run in decreasing order of semantic precision: provider
//! URL-parameter decoding, then `Content-Disposition`, then the URL tail,
//! then a fixed extension-appropriate default. Given the same provider and
//! URL, the derived name is byte-identical across calls — the only
//! time-dependent rule takes `today` as an explicit argument.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::dom::text::{fold, FRENCH_MONTHS_PATTERN};
use crate::dom::{self, DomSnapshot, NodeId};
use crate::error::FlowResult;
use crate::interact;
use crate::page::PageDriver;
use crate::protocol::ProviderId;
use crate::wait::{wait_until, SLOW_POLL_INTERVAL};

/// Resolve `href` against `base`, yielding an absolute URL string.
pub fn normalize_url(href: &str, base: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(trimmed)
        .ok()
        .map(|u| u.to_string())
}

fn parse_with_base(href: &str, base: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(href) {
        return Some(url);
    }
    Url::parse(base).ok()?.join(href).ok()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// ─── URL discovery ───────────────────────────────────────────────────────────

/// Steps 1–2: URL-bearing attributes on the control, then the nearest
/// enclosing anchor's href.
pub fn resolve_from_control(snap: &DomSnapshot, control: NodeId) -> Option<String> {
    let direct = snap
        .attr(control, "href")
        .or_else(|| snap.attr(control, "data-href"))
        .or_else(|| snap.attr(control, "data-url"));
    if let Some(url) = direct.and_then(|href| normalize_url(href, &snap.url)) {
        return Some(url);
    }

    snap.ancestors(control)
        .find(|&a| snap.node(a).tag == "a" && snap.attr(a, "href").is_some())
        .and_then(|a| normalize_url(snap.attr(a, "href").unwrap_or_default(), &snap.url))
}

fn script_url_absolute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^"'\s]+(?:\.pdf|download[^"'\s]*)"#).expect("valid regex")
    })
}

fn script_url_relative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)/[^"'\s]*(?:\.pdf|download[^"'\s]*)"#).expect("valid regex")
    })
}

/// Step 3: page-wide heuristic scan over the full HTML.
pub fn scan_page_html(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    for selector in [
        "a[data-e2e='download-link'][href]",
        "a[href*='.pdf']",
        "a[href*='download']",
    ] {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(href) = doc
            .select(&parsed)
            .filter_map(|el| el.value().attr("href"))
            .next()
        {
            if let Some(url) = normalize_url(href, base) {
                return Some(url);
            }
        }
    }

    let script_selector = Selector::parse("script").ok()?;
    let scripts = doc
        .select(&script_selector)
        .map(|s| s.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");
    let hit = script_url_absolute()
        .find(&scripts)
        .or_else(|| script_url_relative().find(&scripts))?;
    normalize_url(hit.as_str(), base)
}

/// Document-like resource pattern for the generic resource-timing fallback.
pub fn document_resource_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)pdf|download|facture").expect("valid regex"))
}

/// Resource pattern for the transit portal's attestation endpoints.
pub fn attestation_resource_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)prelev|prélev|attestation|certificate|pdf").expect("valid regex"))
}

/// Step 4, pure part: first resource name absent from the pre-click snapshot
/// that matches `pattern`.
pub fn resource_diff(
    before: &HashSet<String>,
    entries: &[String],
    pattern: &Regex,
) -> Option<String> {
    entries
        .iter()
        .filter(|name| !before.contains(*name))
        .find(|name| pattern.is_match(name))
        .cloned()
}

/// Snapshot of currently loaded resource names, taken immediately before the
/// triggering click.
pub async fn snapshot_resources(page: &dyn PageDriver) -> FlowResult<HashSet<String>> {
    Ok(interact::list_resources(page).await?.into_iter().collect())
}

/// Step 4, live: diff the page's resource list against `before`.
pub async fn fresh_resource(
    page: &dyn PageDriver,
    before: &HashSet<String>,
    pattern: &Regex,
) -> FlowResult<Option<String>> {
    let entries = interact::list_resources(page).await?;
    Ok(resource_diff(before, &entries, pattern))
}

/// Bounded wait over the full priority chain, re-resolving the control
/// against a fresh snapshot every tick.
pub async fn wait_for_download_url<F>(
    page: &dyn PageDriver,
    before: &HashSet<String>,
    timeout: Duration,
    find_control: F,
) -> Option<String>
where
    F: Fn(&DomSnapshot) -> Option<NodeId>,
{
    let find_control = &find_control;
    wait_until(timeout, SLOW_POLL_INTERVAL, move || {
        let find_control = find_control;
        async move {
            if let Ok(snap) = dom::capture(page).await {
                if let Some(control) = find_control(&snap) {
                    if let Some(url) = resolve_from_control(&snap, control) {
                        return Some(url);
                    }
                }
            }
            if let Ok(html) = page.html().await {
                if let Ok(base) = page.current_url().await {
                    if let Some(url) = scan_page_html(&html, &base) {
                        return Some(url);
                    }
                }
            }
            fresh_resource(page, before, document_resource_pattern())
                .await
                .ok()
                .flatten()
        }
    })
    .await
}

// ─── Filename derivation ─────────────────────────────────────────────────────

/// Year-month key (`YYYYMM`) for invoice-by-month preference.
pub fn month_key(today: NaiveDate) -> String {
    today.format("%Y%m").to_string()
}

/// First day of the month as an ISO date, used for expense date hints.
pub fn month_start_iso(today: NaiveDate) -> String {
    format!("{}-01", today.format("%Y-%m"))
}

fn mois_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[?&]mois=(\d{6})\b").expect("valid regex"))
}

fn french_month_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b({FRENCH_MONTHS_PATTERN})\s+(20\d{{2}})\b")).expect("valid regex")
    })
}

/// Month key (`YYYYMM`) of an invoice link, from its `mois` query parameter
/// first, else a French month-name + year in its visible text.
pub fn month_key_from_invoice(href: &str, text: &str) -> Option<String> {
    if let Some(captures) = mois_param_re().captures(href) {
        return Some(captures[1].to_string());
    }
    let folded = fold(text);
    let captures = french_month_year_re().captures(&folded)?;
    let month = crate::dom::text::french_month_number(&captures[1])?;
    Some(format!("{}{}", &captures[2], month))
}

/// Prefer the invoice link for the current month, else the latest dated one,
/// else the first.
pub fn pick_invoice_by_month(
    snap: &DomSnapshot,
    links: &[NodeId],
    current_key: &str,
) -> Option<NodeId> {
    let scored: Vec<(NodeId, Option<String>)> = links
        .iter()
        .map(|&id| {
            let href = snap.attr(id, "href").unwrap_or_default();
            let title = snap.attr(id, "title").unwrap_or_default();
            let text = format!("{title} {}", snap.text(id));
            (id, month_key_from_invoice(href, &text))
        })
        .collect();

    if let Some((id, _)) = scored
        .iter()
        .find(|(_, key)| key.as_deref() == Some(current_key))
    {
        return Some(*id);
    }

    let mut dated: Vec<(&NodeId, u32)> = scored
        .iter()
        .filter_map(|(id, key)| {
            key.as_deref()
                .and_then(|k| k.parse::<u32>().ok())
                .map(|n| (id, n))
        })
        .collect();
    dated.sort_by(|a, b| b.1.cmp(&a.1));
    if let Some((id, _)) = dated.first() {
        return Some(**id);
    }

    scored.first().map(|(id, _)| *id)
}

/// Mobile portal A: `facture_pdf.pl` endpoint with invoice number and month
/// encoded in query parameters.
pub fn free_pdf_file_name(url: &str, base: &str) -> Option<String> {
    let parsed = parse_with_base(url, base)?;
    let path = parsed.path();
    let is_invoice_endpoint = path.to_ascii_lowercase().ends_with("facture_pdf.pl")
        || query_param(&parsed, "no_facture").is_some();
    if !is_invoice_endpoint {
        return None;
    }

    let no_facture = query_param(&parsed, "no_facture").unwrap_or_default();
    let no_facture = no_facture.trim();
    let mois = query_param(&parsed, "mois").unwrap_or_default();
    let mois = mois.trim();
    let mois_valid = mois.len() == 6 && mois.bytes().all(|b| b.is_ascii_digit());

    if !no_facture.is_empty() && mois_valid {
        return Some(format!("facture_{no_facture}_{mois}.pdf"));
    }
    if !no_facture.is_empty() {
        return Some(format!("facture_{no_facture}.pdf"));
    }
    if mois_valid {
        return Some(format!("facture_{mois}.pdf"));
    }
    Some("facture_free.pdf".to_string())
}

fn free_mobile_invoice_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/api/SI/invoice/(\d+)\b").expect("valid regex"))
}

/// Mobile portal B: invoice id in the API path.
pub fn free_mobile_pdf_file_name(url: &str, base: &str) -> Option<String> {
    let parsed = parse_with_base(url, base)?;
    let invoice_id = free_mobile_invoice_re()
        .captures(parsed.path())
        .map(|c| c[1].to_string())?;
    Some(format!("facture_free_mobile_{invoice_id}.pdf"))
}

fn attestation_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)attestation|prelev").expect("valid regex"))
}

/// Transit portal: document id in query parameters, else a month-stamped
/// name when the path looks like an attestation endpoint.
pub fn navigo_pdf_file_name(url: &str, base: &str, today: NaiveDate) -> Option<String> {
    let parsed = parse_with_base(url, base)?;
    let document_id = query_param(&parsed, "id")
        .or_else(|| query_param(&parsed, "documentId"))
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if !document_id.is_empty() {
        return Some(format!("attestation_navigo_{document_id}.pdf"));
    }
    if attestation_path_re().is_match(parsed.path()) {
        return Some(format!(
            "attestation_navigo_{}.pdf",
            today.format("%Y-%m")
        ));
    }
    None
}

fn facture_paiement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/facture-paiement/(\d+)").expect("valid regex"))
}

/// Telecom portal account id, embedded in the billing detail path.
pub fn orange_account_id_from_path(path: &str) -> Option<String> {
    facture_paiement_re()
        .captures(path)
        .map(|c| c[1].to_string())
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(20\d{2}-\d{2}-\d{2})\b").expect("valid regex"))
}

fn french_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"\b(\d{{1,2}})\s+({FRENCH_MONTHS_PATTERN})\s+(20\d{{2}})\b"
        ))
        .expect("valid regex")
    })
}

/// Bill date in ISO form, read from the download control's label first, else
/// anywhere in the body text. Accepts ISO dates and French textual dates.
pub fn extract_bill_date_iso(snap: &DomSnapshot, download_control: Option<NodeId>) -> Option<String> {
    let source = download_control
        .map(|id| snap.text(id).to_string())
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| snap.body_text.clone());
    let folded = fold(&source);
    if folded.is_empty() {
        return None;
    }

    if let Some(captures) = iso_date_re().captures(&folded) {
        return Some(captures[1].to_string());
    }

    let captures = french_date_re().captures(&folded)?;
    let day = format!("{:0>2}", &captures[1]);
    let month = crate::dom::text::french_month_number(&captures[2])?;
    let year = &captures[3];
    Some(format!("{year}-{month}-{day}"))
}

/// `Content-Disposition` filename, UTF-8 encoded form preferred over plain.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }

    static UTF8_RE: OnceLock<Regex> = OnceLock::new();
    let utf8_re = UTF8_RE
        .get_or_init(|| Regex::new(r#"(?i)filename\*=UTF-8''([^;]+)"#).expect("valid regex"));
    if let Some(captures) = utf8_re.captures(value) {
        let raw = captures[1].replace('"', "");
        return Some(percent_decode(&raw));
    }

    static PLAIN_RE: OnceLock<Regex> = OnceLock::new();
    let plain_re =
        PLAIN_RE.get_or_init(|| Regex::new(r#"(?i)filename="?([^";]+)"?"#).expect("valid regex"));
    plain_re
        .captures(value)
        .map(|captures| captures[1].trim().to_string())
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    // Undecodable input is passed through untouched.
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

/// Last URL path segment when it carries an extension.
pub fn file_name_from_url_tail(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    let tail = without_query.rsplit('/').next().unwrap_or_default();
    if !tail.is_empty() && tail.contains('.') {
        return Some(tail.to_string());
    }
    None
}

/// Fixed extension-appropriate default.
pub fn default_file_name(content_type: &str) -> &'static str {
    if content_type.contains("html") {
        "orange-bill.html"
    } else {
        "orange-bill.pdf"
    }
}

/// Full provider-aware filename chain.
pub fn derive_file_name(
    provider: ProviderId,
    url: &str,
    snap: &DomSnapshot,
    download_control: Option<NodeId>,
    content_type: &str,
    content_disposition: &str,
    today: NaiveDate,
) -> String {
    match provider {
        ProviderId::Orange => {
            if let (Some(account_id), Some(date)) = (
                orange_account_id_from_path(&snap.path()),
                extract_bill_date_iso(snap, download_control),
            ) {
                return format!("facture_{account_id}_{date}.pdf");
            }
        }
        ProviderId::Free => {
            if let Some(name) = free_pdf_file_name(url, &snap.url) {
                return name;
            }
        }
        ProviderId::FreeMobile => {
            if let Some(name) = free_mobile_pdf_file_name(url, &snap.url) {
                return name;
            }
        }
        ProviderId::Navigo => {
            if let Some(name) = navigo_pdf_file_name(url, &snap.url, today) {
                return name;
            }
        }
        _ => {}
    }

    if let Some(name) = parse_content_disposition(content_disposition) {
        return name;
    }
    if let Some(name) = file_name_from_url_tail(url) {
        return name;
    }
    default_file_name(content_type).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_resolve_prefers_direct_attribute_over_ancestor() {
        let mut b = SnapshotBuilder::new("https://portal.example/billing");
        let anchor = b.el("a", None, &[("href", "/from-ancestor.pdf")]);
        let control = b.el("button", Some(anchor), &[("data-url", "/direct.pdf")]);
        let bare = b.el("span", Some(anchor), &[]);
        let snap = b.build();

        assert_eq!(
            resolve_from_control(&snap, control),
            Some("https://portal.example/direct.pdf".to_string())
        );
        assert_eq!(
            resolve_from_control(&snap, bare),
            Some("https://portal.example/from-ancestor.pdf".to_string())
        );
    }

    #[test]
    fn test_scan_page_html_anchor_then_script() {
        let base = "https://portal.example/";
        let with_anchor =
            r#"<html><body><a data-e2e="download-link" href="/doc/7.pdf">dl</a></body></html>"#;
        assert_eq!(
            scan_page_html(with_anchor, base),
            Some("https://portal.example/doc/7.pdf".to_string())
        );

        let with_script = r#"<html><head><script>
            var target = "https://cdn.example/invoices/facture-2024.pdf";
        </script></head><body></body></html>"#;
        assert_eq!(
            scan_page_html(with_script, base),
            Some("https://cdn.example/invoices/facture-2024.pdf".to_string())
        );

        assert_eq!(scan_page_html("<html><body>rien</body></html>", base), None);
    }

    #[test]
    fn test_resource_diff_ignores_preexisting_entries() {
        let before: HashSet<String> =
            ["https://x.fr/app.js".to_string(), "https://x.fr/old.pdf".to_string()]
                .into_iter()
                .collect();
        let entries = vec![
            "https://x.fr/app.js".to_string(),
            "https://x.fr/old.pdf".to_string(),
            "https://x.fr/styles.css".to_string(),
            "https://x.fr/facture/123".to_string(),
        ];
        assert_eq!(
            resource_diff(&before, &entries, document_resource_pattern()),
            Some("https://x.fr/facture/123".to_string())
        );
    }

    #[test]
    fn test_free_file_name_query_decoding() {
        let base = "https://adsl.free.fr/";
        assert_eq!(
            free_pdf_file_name("/facture_pdf.pl?no_facture=8321&mois=202403", base),
            Some("facture_8321_202403.pdf".to_string())
        );
        assert_eq!(
            free_pdf_file_name("/facture_pdf.pl?no_facture=8321", base),
            Some("facture_8321.pdf".to_string())
        );
        assert_eq!(
            free_pdf_file_name("/facture_pdf.pl?mois=202403", base),
            Some("facture_202403.pdf".to_string())
        );
        assert_eq!(
            free_pdf_file_name("/facture_pdf.pl", base),
            Some("facture_free.pdf".to_string())
        );
        assert_eq!(free_pdf_file_name("/autre_page.html", base), None);
    }

    #[test]
    fn test_free_mobile_file_name() {
        assert_eq!(
            free_mobile_pdf_file_name(
                "https://mobile.free.fr/account/v2/api/SI/invoice/5520482?display=1",
                "https://mobile.free.fr/"
            ),
            Some("facture_free_mobile_5520482.pdf".to_string())
        );
        assert_eq!(
            free_mobile_pdf_file_name("https://mobile.free.fr/account/v2", "https://mobile.free.fr/"),
            None
        );
    }

    #[test]
    fn test_navigo_file_names() {
        let today = day(2024, 3, 15);
        assert_eq!(
            navigo_pdf_file_name("https://t.fr/doc?documentId=ab12", "https://t.fr/", today),
            Some("attestation_navigo_ab12.pdf".to_string())
        );
        assert_eq!(
            navigo_pdf_file_name("https://t.fr/attestation/download", "https://t.fr/", today),
            Some("attestation_navigo_2024-03.pdf".to_string())
        );
        assert_eq!(
            navigo_pdf_file_name("https://t.fr/autre", "https://t.fr/", today),
            None
        );
    }

    #[test]
    fn test_file_name_is_deterministic() {
        let url = "https://adsl.free.fr/facture_pdf.pl?no_facture=8321&mois=202403";
        let first = free_pdf_file_name(url, "https://adsl.free.fr/");
        for _ in 0..3 {
            assert_eq!(free_pdf_file_name(url, "https://adsl.free.fr/"), first);
        }
    }

    #[test]
    fn test_orange_file_name_from_path_and_label() {
        let mut b = SnapshotBuilder::new(
            "https://espace-client.orange.fr/facture-paiement/123456789/detail-facture",
        );
        let control = b.push(
            "button",
            None,
            &[("data-e2e", "download-link")],
            "Facture du 2024-03-02",
            true,
        );
        let snap = b.build();

        let name = derive_file_name(
            ProviderId::Orange,
            &snap.url.clone(),
            &snap,
            Some(control),
            "application/pdf",
            "",
            day(2024, 3, 15),
        );
        assert_eq!(name, "facture_123456789_2024-03-02.pdf");
    }

    #[test]
    fn test_orange_bill_date_accepts_french_text() {
        let mut b = SnapshotBuilder::new(
            "https://espace-client.orange.fr/facture-paiement/42424242/detail-facture",
        );
        let control = b.push(
            "a",
            None,
            &[("data-e2e", "download-link")],
            "Facture du 2 août 2024",
            true,
        );
        let snap = b.build();

        assert_eq!(
            extract_bill_date_iso(&snap, Some(control)),
            Some("2024-08-02".to_string())
        );
    }

    #[test]
    fn test_content_disposition_prefers_utf8_form() {
        assert_eq!(
            parse_content_disposition(
                "attachment; filename=\"plain.pdf\"; filename*=UTF-8''facture%20mars.pdf"
            ),
            Some("facture mars.pdf".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=\"releve.pdf\""),
            Some("releve.pdf".to_string())
        );
        assert_eq!(parse_content_disposition(""), None);
    }

    #[test]
    fn test_fallback_chain_url_tail_then_default() {
        let snap = SnapshotBuilder::new("https://portal.example/billing").build();
        let today = day(2024, 3, 15);

        let from_tail = derive_file_name(
            ProviderId::Other,
            "https://portal.example/docs/releve-03.pdf?x=1",
            &snap,
            None,
            "application/pdf",
            "",
            today,
        );
        assert_eq!(from_tail, "releve-03.pdf");

        let html_default = derive_file_name(
            ProviderId::Other,
            "https://portal.example/billing",
            &snap,
            None,
            "text/html",
            "",
            today,
        );
        assert_eq!(html_default, "orange-bill.html");

        let pdf_default = derive_file_name(
            ProviderId::Other,
            "https://portal.example/billing",
            &snap,
            None,
            "application/pdf",
            "",
            today,
        );
        assert_eq!(pdf_default, "orange-bill.pdf");
    }

    #[test]
    fn test_month_key_from_invoice_sources() {
        assert_eq!(
            month_key_from_invoice("/facture_pdf.pl?mois=202403", ""),
            Some("202403".to_string())
        );
        assert_eq!(
            month_key_from_invoice("/facture_pdf.pl", "Facture Mars 2024"),
            Some("202403".to_string())
        );
        assert_eq!(
            month_key_from_invoice("/facture_pdf.pl", "Facture décembre 2023"),
            Some("202312".to_string())
        );
        assert_eq!(month_key_from_invoice("/facture_pdf.pl", "Facture"), None);
    }

    #[test]
    fn test_current_month_link_is_preferred() {
        // Scenario: a candidate PDF link carries `mois=202403` while the
        // current month is 202403 — that exact link wins over any other.
        let mut b = SnapshotBuilder::new("https://adsl.free.fr/liste-factures.pl");
        let older = b.el("a", None, &[("href", "/facture_pdf.pl?no_facture=7001&mois=202402")]);
        let current = b.el("a", None, &[("href", "/facture_pdf.pl?no_facture=7002&mois=202403")]);
        let snap = b.build();

        assert_eq!(
            pick_invoice_by_month(&snap, &[older, current], "202403"),
            Some(current)
        );
    }

    #[test]
    fn test_latest_month_wins_when_current_is_absent() {
        let mut b = SnapshotBuilder::new("https://adsl.free.fr/liste-factures.pl");
        let january = b.el("a", None, &[("href", "/facture_pdf.pl?mois=202401")]);
        let february = b.el("a", None, &[("href", "/facture_pdf.pl?mois=202402")]);
        let undated = b.el("a", None, &[("href", "/facture_pdf.pl")]);
        let snap = b.build();

        assert_eq!(
            pick_invoice_by_month(&snap, &[january, february, undated], "202406"),
            Some(february)
        );
        assert_eq!(pick_invoice_by_month(&snap, &[undated], "202406"), Some(undated));
        assert_eq!(pick_invoice_by_month(&snap, &[], "202406"), None);
    }

    #[test]
    fn test_month_helpers() {
        let today = day(2024, 3, 15);
        assert_eq!(month_key(today), "202403");
        assert_eq!(month_start_iso(today), "2024-03-01");
    }
}
