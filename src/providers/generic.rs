//! Default workflow variant and the shared building blocks the named
//! variants compose.
//!
//! The generic authenticate path covers both form shapes seen in the wild:
//! username and password on one form, or a two-step flow where submitting
//! the username reveals the password field. The generic download path walks
//! the full URL-discovery priority chain and always ends by clicking the
//! control, so the browser-side download actually starts.

use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;

use super::{
    AuthOutcome, BillingOptions, BillingReady, Credentials, DownloadOutcome, FlowContext,
    NavigationOutcome, ProviderFlow, SessionStatus,
};
use crate::dom::selector::SelectorList;
use crate::dom::{self, resolve, DomSnapshot, NodeId};
use crate::download;
use crate::error::{FlowError, FlowResult};
use crate::interact;
use crate::page::PageDriver;
use crate::protocol::{DownloadArtifact, ExpenseHints};
use crate::wait::{wait_until, POLL_INTERVAL};

/// Heuristic CAPTCHA probes. Presence is enough; the challenge iframe is
/// often rendered hidden first.
const CAPTCHA_SELECTORS: [&str; 6] = [
    "iframe[src*='captcha']",
    ".g-recaptcha",
    "#captcha",
    "[id*='captcha']",
    "[class*='captcha']",
    "input[name*='captcha']",
];

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Capture a snapshot, mapping adapter failures into the flow taxonomy.
pub(crate) async fn capture(page: &dyn PageDriver) -> FlowResult<DomSnapshot> {
    dom::capture(page).await.map_err(FlowError::Driver)
}

/// Poll until one of `candidates` yields a visible match, returning the
/// snapshot the match was found in so callers can interact with it.
pub(crate) async fn wait_for_match(
    page: &dyn PageDriver,
    candidates: &[String],
    timeout: Duration,
) -> Option<(DomSnapshot, NodeId)> {
    wait_until(timeout, POLL_INTERVAL, move || {
        let page = page;
        let candidates = candidates;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let id = resolve::first_match(&snap, candidates)?;
            Some((snap, id))
        }
    })
    .await
}

pub(crate) fn captcha_present(snap: &DomSnapshot) -> bool {
    CAPTCHA_SELECTORS.iter().any(|candidate| {
        SelectorList::parse(candidate)
            .map(|list| list.query_first(snap).is_some())
            .unwrap_or(false)
    })
}

/// Generic authenticated-state inference: no visible login field anywhere.
pub(crate) fn login_fields_absent(snap: &DomSnapshot, cx: &FlowContext<'_>) -> bool {
    resolve::first_match(snap, &cx.profile.username).is_none()
        && resolve::first_match(snap, &cx.profile.password).is_none()
}

/// The shared authenticate path. `is_authenticated` is the per-site session
/// detector; sites with richer signals pass their own.
pub(crate) async fn generic_authenticate<F>(
    cx: &FlowContext<'_>,
    credentials: &Credentials,
    is_authenticated: F,
) -> FlowResult<AuthOutcome>
where
    F: Fn(&DomSnapshot) -> bool,
{
    let page = cx.page;

    let snap = capture(page).await?;
    if is_authenticated(&snap) {
        return Ok(AuthOutcome::skipped_login());
    }
    if captcha_present(&snap) {
        return Ok(AuthOutcome::captcha());
    }

    let username = wait_for_match(page, &cx.profile.username, Duration::from_secs(8)).await;
    let Some((snap, username_id)) = username else {
        let snap = capture(page).await?;
        if is_authenticated(&snap) {
            return Ok(AuthOutcome::skipped_login());
        }
        return Err(FlowError::ElementNotFound(
            "could not locate provider username field".into(),
        ));
    };
    if !credentials.username.is_empty() {
        interact::set_value(page, &snap, username_id, &credentials.username).await?;
    }

    // Single-form sites expose the password immediately. Two-step sites
    // reveal it only after the username is submitted.
    let mut password = {
        let snap = capture(page).await?;
        resolve::first_match(&snap, &cx.profile.password).map(|id| (snap, id))
    };
    if password.is_none() {
        let snap = capture(page).await?;
        if let Some(submit) = resolve::first_match(&snap, &cx.profile.submit) {
            interact::click(page, &snap, submit).await?;
        }
        password = wait_for_match(page, &cx.profile.password, Duration::from_secs(10)).await;
    }
    let Some((snap, password_id)) = password else {
        return Err(FlowError::ElementNotFound(
            "could not locate provider password field after username step".into(),
        ));
    };
    if !credentials.password.is_empty() {
        interact::set_value(page, &snap, password_id, &credentials.password).await?;
    }

    // No password provided and nothing prefilled: hand over to the human
    // without touching submit.
    if credentials.password.is_empty() {
        let fresh = capture(page).await?;
        let prefilled = resolve::first_match(&fresh, &cx.profile.password)
            .map(|id| fresh.has_input_value(id))
            .unwrap_or(false);
        if !prefilled {
            return Ok(AuthOutcome::manual_login());
        }
    }

    let fresh = capture(page).await?;
    let submit = resolve::first_match(&fresh, &cx.profile.submit).ok_or_else(|| {
        FlowError::ElementNotFound("could not locate provider submit button".into())
    })?;
    interact::click(page, &fresh, submit).await?;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after = capture(page).await?;
    if captcha_present(&after) {
        return Ok(AuthOutcome::captcha());
    }
    Ok(AuthOutcome::authenticated())
}

/// Shared download tail: resolve a URL for the control, click to trigger the
/// browser-side download, derive the canonical filename. `hints` rides along
/// on the artifact for the expense workflow.
pub(crate) async fn finish_download(
    cx: &FlowContext<'_>,
    snap: DomSnapshot,
    control: NodeId,
    before: &HashSet<String>,
    hints: Option<ExpenseHints>,
) -> FlowResult<DownloadOutcome> {
    let page = cx.page;
    let mut did_click = false;

    let mut href = download::resolve_from_control(&snap, control);
    if href.is_none() {
        interact::click(page, &snap, control).await?;
        did_click = true;
        // The physical download is not awaited; only URL discovery is.
        let buttons = cx.profile.download_button.clone();
        href = download::wait_for_download_url(page, before, Duration::from_secs(8), move |s| {
            resolve::first_match(s, &buttons)
        })
        .await;
    }

    let url_for_name = href.clone().unwrap_or_else(|| snap.url.clone());
    let file_name = download::derive_file_name(
        cx.provider,
        &url_for_name,
        &snap,
        Some(control),
        "application/pdf",
        "",
        today(),
    );

    if !did_click {
        interact::click(page, &snap, control).await?;
    }

    Ok(DownloadOutcome {
        bill_text: snap.body_text.clone(),
        bill_hints: String::new(),
        document: DownloadArtifact {
            file_name,
            mime_type: "application/pdf".into(),
            source_url: href,
            manual_upload_required: true,
            hints,
        },
    })
}

/// Generic download: first visible profile download control within 12 s.
pub(crate) async fn generic_download(cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome> {
    let before = download::snapshot_resources(cx.page).await?;
    let (snap, control) =
        wait_for_match(cx.page, &cx.profile.download_button, Duration::from_secs(12))
            .await
            .ok_or_else(|| {
                FlowError::ElementNotFound("could not find provider PDF download button".into())
            })?;
    finish_download(cx, snap, control, &before, None).await
}

/// Default workflow for unknown provider identities.
pub struct GenericFlow;

#[async_trait::async_trait]
impl ProviderFlow for GenericFlow {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus> {
        let snap = capture(cx.page).await?;
        Ok(SessionStatus::plain(login_fields_absent(&snap, cx)))
    }

    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady> {
        let snap = capture(cx.page).await?;
        Ok(BillingReady::plain(login_fields_absent(&snap, cx)))
    }

    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome> {
        generic_authenticate(cx, credentials, |snap| login_fields_absent(snap, cx)).await
    }

    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        _options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome> {
        // Navigate to any discoverable invoice entry; staying put is fine.
        let entry = wait_for_match(cx.page, &cx.profile.invoice_links, Duration::from_secs(8)).await;
        if let Some((snap, id)) = entry {
            if let Some(href) = snap
                .attr(id, "href")
                .and_then(|href| download::normalize_url(href, &snap.url))
            {
                return Ok(NavigationOutcome::at(href));
            }
            interact::click(cx.page, &snap, id).await?;
        }
        let url = cx.page.current_url().await.map_err(FlowError::Driver)?;
        Ok(NavigationOutcome::at(url))
    }

    async fn download_and_extract(&self, cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome> {
        generic_download(cx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    #[test]
    fn test_captcha_detection() {
        let mut with = SnapshotBuilder::new("https://portal.example/login");
        with.push("iframe", None, &[("src", "https://captcha.example/x")], "", false);
        assert!(captcha_present(&with.build()));

        let mut class_hit = SnapshotBuilder::new("https://portal.example/login");
        class_hit.el("div", None, &[("class", "g-recaptcha")]);
        assert!(captcha_present(&class_hit.build()));

        let mut without = SnapshotBuilder::new("https://portal.example/login");
        without.el("input", None, &[("name", "login")]);
        assert!(!captcha_present(&without.build()));
    }
}
