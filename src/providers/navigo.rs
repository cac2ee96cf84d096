//! Transit-pass portal workflow.
//!
//! Billing lives behind a multi-step UI: open the annual contract, open the
//! direct-debit history, open the attestation download menu, select the
//! three-month reporting period, and only then does the download control
//! become enabled. Each polling round re-reads the page and replans, so a
//! step that already happened is simply skipped on the next pass.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;

use super::generic::{capture, today, wait_for_match};
use super::{
    AuthOutcome, BillingOptions, BillingReady, Credentials, DownloadOutcome, FlowContext,
    NavigationOutcome, ProviderFlow, SessionStatus,
};
use crate::dom::selector::SelectorList;
use crate::dom::text::fold;
use crate::dom::{self, resolve, DomSnapshot, NodeId};
use crate::download;
use crate::error::{FlowError, FlowResult};
use crate::interact;
use crate::protocol::{DownloadArtifact, ExpenseHints};
use crate::wait::{wait_until, POLL_INTERVAL, SLOW_POLL_INTERVAL};

const PORTAL_HOST: &str = "iledefrance-mobilites.fr";
const CARD_HOST: &str = "jegeremacartenavigo.iledefrance-mobilites.fr";
const ESPACE_HOST: &str = "mon-espace.iledefrance-mobilites.fr";

const PERIOD_RADIO: [&str; 2] = [
    "ul.dropdown-menu input[name='period'][value='3']",
    "input[name='period'][value='3']",
];
const DOWNLOAD_BUTTON: [&str; 2] = [
    "button#download-certificate-btn",
    ".dropdown-menu #download-certificate-btn",
];

fn prelevements_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/prelevements/([^/?#]+)").expect("valid regex"))
}

fn detail_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/espace_client/detail/([^/?#]+)").expect("valid regex"))
}

fn present(snap: &DomSnapshot, selector: &str) -> bool {
    SelectorList::parse(selector)
        .map(|list| list.query_first(snap).is_some())
        .unwrap_or(false)
}

/// Signed in: on a portal host, no login form, no Keycloak login route, and
/// at least one authenticated-only marker in the page copy.
pub(crate) fn is_authenticated(snap: &DomSnapshot) -> bool {
    let host = snap.host();
    if !host.contains(PORTAL_HOST) {
        return false;
    }
    if present(snap, "#id-Mail") || present(snap, "#id-pwd") || present(snap, "#form-log") {
        return false;
    }
    if snap.path().contains("/auth/realms/connect/login-actions/authenticate") {
        return false;
    }

    let body = fold(&snap.body_text);
    let marker = body.contains("mon espace personnel")
        || body.contains("mon navigo")
        || body.contains("mes services")
        || body.contains("deconnexion");
    (host.contains(ESPACE_HOST) || host.contains(CARD_HOST)) && marker
}

fn routing_hints_present(snap: &DomSnapshot) -> bool {
    present(snap, "a[href*='/espace_client/detail/']")
        || resolve::find_anchor_by_text(snap, "mon navigo").is_some()
        || detail_path_re().is_match(&snap.path())
        || prelevements_path_re().is_match(&snap.path())
}

/// Visible "Navigo annuel … actif" contract entry linking into the detail
/// area.
fn annual_active_entry(snap: &DomSnapshot) -> Option<NodeId> {
    snap.ids().find(|&id| {
        let node = snap.node(id);
        if node.tag != "a" || !node.visible {
            return false;
        }
        let Some(href) = snap.attr(id, "href") else {
            return false;
        };
        let text = fold(&node.text);
        text.contains("navigo annuel")
            && text.contains("actif")
            && href.contains("/espace_client/detail/")
    })
}

/// Contract id from the annual contract list, active entries first.
fn annual_contract_id(snap: &DomSnapshot) -> Option<String> {
    let mut fallback = None;
    for id in snap.ids() {
        let node = snap.node(id);
        if node.tag != "a" {
            continue;
        }
        let Some(href) = snap.attr(id, "href") else {
            continue;
        };
        let Some(captures) = detail_path_re().captures(href) else {
            continue;
        };
        let text = fold(&node.text);
        if !text.contains("navigo annuel") {
            continue;
        }
        if text.contains("actif") {
            return Some(captures[1].to_string());
        }
        fallback.get_or_insert_with(|| captures[1].to_string());
    }
    fallback
}

/// Canonical direct-debit URL, from the current path, the detail path, or
/// the contract list.
pub(crate) fn resolve_prelevements_url(snap: &DomSnapshot) -> Option<String> {
    let path = snap.path();
    if prelevements_path_re().is_match(&path) {
        return Some(snap.url.clone());
    }
    if let Some(captures) = detail_path_re().captures(&path) {
        return Some(format!("https://www.{CARD_HOST}/prelevements/{}", &captures[1]));
    }
    annual_contract_id(snap).map(|id| format!("https://www.{CARD_HOST}/prelevements/{id}"))
}

fn billing_entry_url(snap: &DomSnapshot) -> Option<String> {
    let anchor = resolve::find_anchor_by_text(snap, "mon navigo")?;
    download::normalize_url(snap.attr(anchor, "href")?, &snap.url)
}

fn prelevements_entry_present(snap: &DomSnapshot) -> bool {
    resolve::find_by_text(snap, "consulter mes prelevements").is_some()
        || resolve::find_by_text(snap, "telecharger mes attestations de prelevements").is_some()
}

/// One page interaction of the attestation flow, with its settle pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttestationAction {
    Click(NodeId),
    CheckPeriod(NodeId),
    SelectThreeMonths { select: NodeId, value: String },
}

/// What one replanning round decided.
#[derive(Debug, Default)]
pub(crate) struct AttestationPlan {
    pub actions: Vec<(AttestationAction, u64)>,
    pub ready: Option<NodeId>,
}

/// Pure per-snapshot planner for the attestation flow. The download control
/// is only `ready` once it is enabled; a disabled control with an unselected
/// period radio queues the period selection for this round.
pub(crate) fn plan_attestation(snap: &DomSnapshot) -> AttestationPlan {
    let mut plan = AttestationPlan::default();

    if let Some(entry) = annual_active_entry(snap) {
        plan.actions.push((AttestationAction::Click(entry), 1000));
    }
    if let Some(entry) = resolve::find_clickable_by_text(snap, "consulter mes prelevements") {
        plan.actions.push((AttestationAction::Click(entry), 1000));
    }
    let download_menu = resolve::first_match(snap, &["#label-download"]).or_else(|| {
        resolve::find_clickable_by_text(snap, "telecharger mes attestations de prelevements")
    });
    if let Some(menu) = download_menu {
        plan.actions.push((AttestationAction::Click(menu), 800));
    }

    if let Some(radio) = resolve::first_match_with(
        snap,
        &PERIOD_RADIO,
        resolve::ResolveOptions { allow_hidden: true },
    ) {
        if snap.node(radio).checked != Some(true) {
            plan.actions.push((AttestationAction::CheckPeriod(radio), 400));
            // Styled radios hide the input; the label takes the click.
            let target = snap
                .ancestors(radio)
                .find(|&a| snap.node(a).tag == "label" && snap.visible(a))
                .or(if snap.visible(radio) { Some(radio) } else { None });
            if let Some(target) = target {
                plan.actions.push((AttestationAction::Click(target), 400));
            }
        }
    } else if let Some(dropdown) = resolve::first_match(
        snap,
        &[
            "select",
            "button[aria-haspopup='listbox']",
            "div[role='combobox']",
            "input[role='combobox']",
        ],
    ) {
        if snap.node(dropdown).tag == "select" {
            let option = snap.ids().find(|&id| {
                snap.node(id).tag == "option"
                    && snap.is_descendant_of(id, dropdown)
                    && fold(snap.text(id)).contains("3 derniers mois")
            });
            if let Some(option) = option {
                let value = snap
                    .attr(option, "value")
                    .unwrap_or(snap.text(option))
                    .to_string();
                plan.actions
                    .push((AttestationAction::SelectThreeMonths { select: dropdown, value }, 600));
            }
        } else {
            plan.actions.push((AttestationAction::Click(dropdown), 300));
            if let Some(option) = resolve::find_clickable_by_text(snap, "3 derniers mois") {
                plan.actions.push((AttestationAction::Click(option), 600));
            }
        }
    } else if let Some(option) = resolve::find_clickable_by_text(snap, "3 derniers mois") {
        plan.actions.push((AttestationAction::Click(option), 800));
    }

    if let Some(button) = resolve::first_match(snap, &DOWNLOAD_BUTTON) {
        if !snap.node(button).disabled {
            plan.ready = Some(button);
            return plan;
        }
    }

    // A direct attestation link works as the control too: the URL resolver
    // reads its href like any other anchor.
    for selector in [
        "a[href*='attestation'][href*='prelevement']",
        "a[href*='attestation'][href*='pdf']",
        "a[href*='prelevement'][href*='pdf']",
    ] {
        if let Ok(list) = SelectorList::parse(selector) {
            if let Some(link) = list.query_first(snap) {
                plan.ready = Some(link);
                return plan;
            }
        }
    }

    plan
}

async fn apply_action(
    cx: &FlowContext<'_>,
    snap: &DomSnapshot,
    action: &AttestationAction,
) -> FlowResult<()> {
    match action {
        AttestationAction::Click(id) => interact::click(cx.page, snap, *id).await,
        AttestationAction::CheckPeriod(id) => interact::check_input(cx.page, *id).await,
        AttestationAction::SelectThreeMonths { select, value } => {
            interact::select_option(cx.page, *select, value).await
        }
    }
}

/// Drive the attestation flow until an enabled control appears.
async fn open_attestation_flow(
    cx: &FlowContext<'_>,
    timeout: Duration,
) -> FlowResult<Option<(DomSnapshot, NodeId)>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let snap = capture(cx.page).await?;
        let plan = plan_attestation(&snap);
        if let Some(control) = plan.ready {
            return Ok(Some((snap, control)));
        }
        if plan.actions.is_empty() {
            tokio::time::sleep(Duration::from_millis(250)).await;
            continue;
        }
        for (action, pause_ms) in &plan.actions {
            apply_action(cx, &snap, action).await?;
            tokio::time::sleep(Duration::from_millis(*pause_ms)).await;
        }
    }
    Ok(None)
}

/// Candidate anchors/buttons worth naming when billing navigation fails.
pub(crate) fn summarize_page(snap: &DomSnapshot) -> String {
    let body = fold(&snap.body_text);
    let candidates: Vec<String> = snap
        .ids()
        .filter(|&id| {
            let node = snap.node(id);
            node.tag == "button"
                || snap.attr(id, "role") == Some("button")
                || (node.tag == "a" && snap.attr(id, "href").is_some())
        })
        .filter_map(|id| {
            let label: String = fold(snap.text(id)).chars().take(80).collect();
            let href = snap.attr(id, "href").unwrap_or_default();
            let line = if href.is_empty() {
                label
            } else {
                format!("{label} -> {href}")
            };
            let relevant = ["navigo", "prelev", "attestation", "facture", "justificatif"]
                .iter()
                .any(|needle| line.contains(needle));
            relevant.then_some(line)
        })
        .take(20)
        .collect();

    format!(
        "href={} path={} hasMonNavigoText={} hasPrelevementsText={} hasAttestationsText={} candidates=[{}]",
        snap.url,
        snap.path(),
        body.contains("mon navigo"),
        body.contains("prelevement"),
        body.contains("attestation"),
        candidates.join(" | ")
    )
}

pub struct NavigoFlow;

#[async_trait]
impl ProviderFlow for NavigoFlow {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus> {
        let snap = capture(cx.page).await?;
        Ok(SessionStatus::plain(is_authenticated(&snap)))
    }

    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady> {
        let snap = capture(cx.page).await?;
        let ready = is_authenticated(&snap)
            && (resolve::find_by_text(&snap, "mon navigo").is_some()
                || resolve::find_by_text(&snap, "mes services").is_some()
                || resolve::find_by_text(&snap, "bienvenue").is_some());
        Ok(BillingReady::plain(ready))
    }

    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome> {
        let page = cx.page;

        let snap = capture(page).await?;
        if is_authenticated(&snap) {
            return Ok(AuthOutcome::skipped_login());
        }

        let username = wait_for_match(page, &cx.profile.username, Duration::from_secs(8)).await;
        let Some((snap, username_id)) = username else {
            let snap = capture(page).await?;
            if is_authenticated(&snap) {
                return Ok(AuthOutcome::skipped_login());
            }
            return Err(FlowError::ElementNotFound(
                "could not locate username field".into(),
            ));
        };
        if !credentials.username.is_empty() {
            interact::set_value(page, &snap, username_id, &credentials.username).await?;
        }

        let password = wait_for_match(page, &cx.profile.password, Duration::from_secs(8)).await;
        let Some((snap, password_id)) = password else {
            return Err(FlowError::ElementNotFound(
                "could not locate password field".into(),
            ));
        };
        if !credentials.password.is_empty() {
            interact::set_value(page, &snap, password_id, &credentials.password).await?;
        }

        let fresh = capture(page).await?;
        let submit = resolve::first_match(&fresh, &cx.profile.submit).ok_or_else(|| {
            FlowError::ElementNotFound("could not locate login button".into())
        })?;
        if credentials.password.is_empty() {
            let prefilled = resolve::first_match(&fresh, &cx.profile.password)
                .map(|id| fresh.has_input_value(id))
                .unwrap_or(false);
            if !prefilled {
                return Ok(AuthOutcome::manual_login());
            }
        }
        interact::click(page, &fresh, submit).await?;

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let after = capture(page).await?;
        if is_authenticated(&after) {
            return Ok(AuthOutcome::authenticated());
        }
        Ok(AuthOutcome::manual_login())
    }

    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        _options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome> {
        let page = cx.page;
        let snap = capture(page).await?;
        if !is_authenticated(&snap) {
            return Err(FlowError::ManualStepRequired(
                "user is not authenticated".into(),
            ));
        }

        // The SPA needs a beat before its routing anchors exist.
        let _ = wait_until(Duration::from_secs(4), POLL_INTERVAL, move || {
            let page = page;
            async move {
                let snap = dom::capture(page).await.ok()?;
                routing_hints_present(&snap).then_some(())
            }
        })
        .await;

        let snap = capture(page).await?;
        if let Some(url) = resolve_prelevements_url(&snap) {
            return Ok(NavigationOutcome::at(url));
        }
        if let Some(url) = billing_entry_url(&snap) {
            return Ok(NavigationOutcome::at(url));
        }

        let deadline = Instant::now() + Duration::from_secs(8);
        while Instant::now() < deadline {
            let snap = capture(page).await?;
            if let Some(entry) = resolve::find_clickable_by_text(&snap, "mon navigo") {
                interact::click(page, &snap, entry).await?;
                tokio::time::sleep(Duration::from_millis(800)).await;
            }
            let snap = capture(page).await?;
            if annual_active_entry(&snap).is_some() || prelevements_entry_present(&snap) {
                let url = page.current_url().await.map_err(FlowError::Driver)?;
                return Ok(NavigationOutcome::at(url));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let snap = capture(page).await?;
        Err(FlowError::ElementNotFound(format!(
            "could not open billing section | {}",
            summarize_page(&snap)
        )))
    }

    async fn download_and_extract(&self, cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome> {
        let page = cx.page;
        let before = download::snapshot_resources(page).await?;

        let Some((snap, control)) = open_attestation_flow(cx, Duration::from_secs(20)).await?
        else {
            return Err(FlowError::ElementNotFound(
                "could not find provider PDF download button".into(),
            ));
        };

        // The button triggers a background fetch rather than carrying a URL:
        // click first, then watch for the fresh attestation resource.
        interact::click(page, &snap, control).await?;
        let before_ref = &before;
        let href = wait_until(Duration::from_secs(8), SLOW_POLL_INTERVAL, move || {
            let page = page;
            let before_ref = before_ref;
            async move {
                download::fresh_resource(page, before_ref, download::attestation_resource_pattern())
                    .await
                    .ok()
                    .flatten()
            }
        })
        .await
        .or_else(|| download::resolve_from_control(&snap, control));

        let today = today();
        let url_for_name = href.clone().unwrap_or_else(|| snap.url.clone());
        let file_name = download::derive_file_name(
            cx.provider,
            &url_for_name,
            &snap,
            Some(control),
            "application/pdf",
            "",
            today,
        );

        Ok(DownloadOutcome {
            bill_text: snap.body_text.clone(),
            bill_hints: String::new(),
            document: DownloadArtifact {
                file_name,
                mime_type: "application/pdf".into(),
                source_url: href,
                manual_upload_required: true,
                hints: Some(ExpenseHints {
                    expense_type: Some("commuter benefits".into()),
                    transaction_date_iso: Some(download::month_start_iso(today)),
                }),
            },
        })
    }
}
