//! Expense-tool workflow: drive the destination expense application's
//! transaction composer.
//!
//! Opens the composer (directly through the "Autofill from a receipt"
//! affordance when visible, else through the New-transaction menu), fills
//! the draft fields, and for document uploads selects the expense category
//! from a searchable, scroll-paged dropdown — the option list is lazily
//! loaded, so it is scrolled to the end before matching, and label matching
//! is fold-based with a configured synonym set covering locale renderings.

pub mod watcher;

use std::time::Duration;

use serde::Serialize;

use crate::config::SelectorConfig;
use crate::dom::selector::SelectorList;
use crate::dom::text::fold;
use crate::dom::{self, resolve, DomSnapshot, NodeId};
use crate::error::{FlowError, FlowResult};
use crate::interact;
use crate::page::PageDriver;
use crate::protocol::{DownloadArtifact, ExpenseHints, TransactionDraft};
use crate::wait::{wait_until, POLL_INTERVAL};

/// Description written into every composed transaction.
const FIXED_DESCRIPTION: &str = "monthly invoice";

/// SPA route of the transaction composer.
pub fn is_transaction_form_path(path: &str) -> bool {
    path.contains("/transactions/new-redesign/")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheck {
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerOutcome {
    pub clicked: bool,
    pub autofill_receipt_clicked: bool,
    pub skipped_new_transaction_click: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_upload_page: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillOutcome {
    pub autofilled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub uploaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_upload_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_single_transaction_clicked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expense_type_selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints_applied: Option<bool>,
}

async fn capture(page: &dyn PageDriver) -> FlowResult<DomSnapshot> {
    dom::capture(page).await.map_err(FlowError::Driver)
}

/// Session probe. The tool fronts its login with SSO; automation stops at
/// the SSO boundary.
pub async fn check_session(page: &dyn PageDriver) -> FlowResult<SessionCheck> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    let url = page.current_url().await.map_err(FlowError::Driver)?;
    if url.contains("/login") || url.contains("accounts.google.com") {
        return Err(FlowError::ManualStepRequired(
            "session not active; complete the SSO login first".into(),
        ));
    }
    Ok(SessionCheck {
        authenticated: true,
    })
}

/// Clickable element whose folded label contains `phrase`: free text first,
/// selector fallback second (the fallback must still carry the phrase).
async fn wait_by_text(
    page: &dyn PageDriver,
    phrase: &str,
    fallback: &[String],
    timeout: Duration,
) -> Option<(DomSnapshot, NodeId)> {
    wait_until(timeout, POLL_INTERVAL, move || {
        let page = page;
        let phrase = phrase;
        let fallback = fallback;
        async move {
            let snap = dom::capture(page).await.ok()?;
            if let Some(node) = resolve::find_by_text(&snap, phrase) {
                let target = resolve::clickable_target(&snap, node);
                if snap.visible(target) {
                    return Some((snap, target));
                }
            }
            if let Some(node) = resolve::first_match(&snap, fallback) {
                let target = resolve::clickable_target(&snap, node);
                if fold(snap.text(target)).contains(&fold(phrase)) {
                    return Some((snap, target));
                }
            }
            None
        }
    })
    .await
}

/// The exact "New transaction" button, preferring the add-transaction menu
/// scope over a page-wide scan.
pub(crate) fn find_new_transaction_button(snap: &DomSnapshot) -> Option<NodeId> {
    let scoped = resolve::first_match(snap, &["pb-dropdown-menu[data-testid='add-transaction']"])
        .map(|menu| resolve::all_matches_within(snap, menu, &["button.black[type='button']"]))
        .unwrap_or_default();
    let candidates = if scoped.is_empty() {
        resolve::all_matches(snap, &["button.black[type='button']"])
    } else {
        scoped
    };

    candidates.into_iter().find(|&button| {
        let label_node = SelectorList::parse("span.text")
            .ok()
            .and_then(|list| list.query_all_within(snap, button).into_iter().next())
            .unwrap_or(button);
        let label = fold(snap.text(label_node));
        label == "new transaction" || label.contains("new transaction")
    })
}

/// Open the transaction composer.
pub async fn click_new_transaction(
    page: &dyn PageDriver,
    config: &SelectorConfig,
) -> FlowResult<ComposerOutcome> {
    let url = page.current_url().await.map_err(FlowError::Driver)?;
    if url.contains("/transactions/upload-receipts") {
        return Ok(ComposerOutcome {
            clicked: true,
            autofill_receipt_clicked: true,
            skipped_new_transaction_click: true,
            direct_upload_page: Some(true),
        });
    }

    // Preferred path: the autofill item is already on screen.
    let direct = wait_by_text(
        page,
        "Autofill from a receipt",
        &config.expense.autofill_from_receipt,
        Duration::from_millis(1500),
    )
    .await;
    if let Some((snap, button)) = direct {
        interact::click(page, &snap, button).await?;
        tokio::time::sleep(Duration::from_millis(600)).await;
        return Ok(ComposerOutcome {
            clicked: true,
            autofill_receipt_clicked: true,
            skipped_new_transaction_click: true,
            direct_upload_page: None,
        });
    }

    // Fallback: open the New-transaction menu first.
    let button = wait_until(Duration::from_secs(15), POLL_INTERVAL, move || {
        let page = page;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let button = find_new_transaction_button(&snap)?;
            snap.visible(button).then_some((snap, button))
        }
    })
    .await;
    let Some((snap, button)) = button else {
        return Err(FlowError::ElementNotFound(
            "could not find the New transaction button".into(),
        ));
    };
    interact::click(page, &snap, button).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let autofill = wait_by_text(
        page,
        "Autofill from a receipt",
        &config.expense.autofill_from_receipt,
        Duration::from_secs(5),
    )
    .await;
    let Some((snap, autofill_button)) = autofill else {
        return Err(FlowError::ElementNotFound(
            "could not find the 'Autofill from a receipt' option".into(),
        ));
    };
    interact::click(page, &snap, autofill_button).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;

    Ok(ComposerOutcome {
        clicked: true,
        autofill_receipt_clicked: true,
        skipped_new_transaction_click: false,
        direct_upload_page: None,
    })
}

/// Fill one field, skipping absent values and absent controls silently.
async fn set_field(
    page: &dyn PageDriver,
    selectors: &[String],
    value: Option<&str>,
) -> FlowResult<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.is_empty() {
        return Ok(());
    }
    let snap = capture(page).await?;
    let Some(input) = resolve::first_match(&snap, selectors) else {
        return Ok(());
    };
    interact::set_value(page, &snap, input, value).await
}

fn format_amount(amount: f64) -> String {
    // 39.0 renders as "39", 39.99 as "39.99".
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        amount.to_string()
    }
}

/// Fill the composer from a caller-supplied draft.
pub async fn autofill_transaction(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    draft: Option<&TransactionDraft>,
) -> FlowResult<AutofillOutcome> {
    let draft = draft.ok_or_else(|| {
        FlowError::Driver(anyhow::anyhow!("no draft payload provided for autofill"))
    })?;
    let selectors = &config.expense;

    set_field(page, &selectors.merchant, draft.merchant.as_deref()).await?;
    let amount = draft.amount.map(format_amount);
    set_field(page, &selectors.amount, amount.as_deref()).await?;
    set_field(page, &selectors.currency, draft.currency.as_deref()).await?;
    set_field(page, &selectors.date, draft.transaction_date_iso.as_deref()).await?;
    let tax = draft.tax_amount.map(format_amount);
    set_field(page, &selectors.tax, tax.as_deref()).await?;
    set_field(page, &selectors.description, draft.description.as_deref()).await?;

    Ok(AutofillOutcome { autofilled: true })
}

/// The "Create a single transaction" button, exact label match only.
pub(crate) fn find_create_single_transaction(
    snap: &DomSnapshot,
    config: &SelectorConfig,
) -> Option<NodeId> {
    if let Some(node) = resolve::first_match(snap, &config.expense.create_single_transaction) {
        if fold(snap.text(node)) == "create a single transaction" {
            return Some(resolve::clickable_target(snap, node));
        }
    }

    if let Some(node) = resolve::find_clickable_by_text(snap, "create a single transaction") {
        let target = resolve::clickable_target(snap, node);
        if fold(snap.text(target)) == "create a single transaction" {
            return Some(target);
        }
    }

    snap.ids().find(|&id| {
        snap.node(id).tag == "button" && fold(snap.text(id)) == "create a single transaction"
    })
}

async fn wait_and_click_create_single_transaction(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    timeout: Duration,
) -> FlowResult<bool> {
    let found = wait_until(timeout, Duration::from_millis(250), move || {
        let page = page;
        let config = config;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let button = find_create_single_transaction(&snap, config)?;
            snap.visible(button).then_some((snap, button))
        }
    })
    .await;
    let Some((snap, button)) = found else {
        return Ok(false);
    };
    interact::click(page, &snap, button).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(true)
}

/// Wait until the document-extraction backend prefills the description.
async fn wait_for_description_prefill(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    timeout: Duration,
) -> bool {
    let selectors = &config.expense.description;
    wait_until(timeout, Duration::from_millis(400), move || {
        let page = page;
        let selectors = selectors;
        async move {
            let snap = dom::capture(page).await.ok()?;
            // The field can still be hidden behind a collapsed section.
            let input = resolve::first_match_with(
                &snap,
                selectors,
                resolve::ResolveOptions { allow_hidden: true },
            )?;
            snap.has_input_value(input).then_some(())
        }
    })
    .await
    .is_some()
}

/// The draft status tag on the freshly created transaction.
pub(crate) fn find_draft_tag(snap: &DomSnapshot) -> Option<NodeId> {
    if let Ok(list) = SelectorList::parse("div.tag-container.gray .ellipse") {
        if let Some(node) = list.query_first(snap) {
            if fold(snap.text(node)) == "draft" {
                let container = snap.ancestors(node).find(|&a| {
                    snap.node(a).tag == "div"
                        && snap
                            .attr(a, "class")
                            .map(|c| c.split_whitespace().any(|x| x == "tag-container"))
                            .unwrap_or(false)
                });
                return Some(container.unwrap_or(node));
            }
        }
    }
    snap.ids()
        .find(|&id| snap.node(id).tag == "div" && fold(snap.text(id)) == "draft")
}

/// The category dropdown's search input.
pub(crate) fn find_expense_type_input(snap: &DomSnapshot, config: &SelectorConfig) -> Option<NodeId> {
    if let Some(input) = resolve::first_match(snap, &config.expense.expense_type_input) {
        return Some(input);
    }

    // Label-anchored fallback: the container naming the field, then the
    // first text input inside it.
    let label = snap.ids().find(|&id| {
        matches!(snap.node(id).tag.as_str(), "span" | "div" | "label")
            && fold(snap.text(id)).contains("expense type")
    })?;
    let container = snap
        .ancestors(label)
        .find(|&a| matches!(snap.node(a).tag.as_str(), "span" | "div" | "section" | "form"))?;
    SelectorList::parse("input[type='text']")
        .ok()?
        .query_all_within(snap, container)
        .into_iter()
        .next()
}

fn overlay_root(snap: &DomSnapshot) -> NodeId {
    SelectorList::parse(".cdk-overlay-container")
        .ok()
        .and_then(|list| list.query_first(snap))
        .or_else(|| snap.ids().find(|&id| snap.node(id).tag == "body"))
        .unwrap_or(0)
}

/// Best visible dropdown option for the folded target, with the configured
/// synonym set as fallback.
pub(crate) fn find_expense_type_option(
    snap: &DomSnapshot,
    config: &SelectorConfig,
    target: &str,
) -> Option<NodeId> {
    let root = overlay_root(snap);
    let folded_target = fold(target);
    let synonyms: Vec<String> = config.category_synonyms.iter().map(|s| fold(s)).collect();

    snap.ids().find(|&id| {
        if id == root || !snap.is_descendant_of(id, root) {
            return false;
        }
        let node = snap.node(id);
        let scannable = matches!(node.tag.as_str(), "li" | "button" | "div" | "span")
            || snap.attr(id, "role") == Some("option");
        if !scannable || !node.visible {
            return false;
        }
        let text = fold(&node.text);
        if text.len() < 2 || text.len() > 80 {
            return false;
        }
        text.contains(&folded_target) || synonyms.iter().any(|s| text.contains(s))
    })
}

fn value_matches_category(config: &SelectorConfig, value: &str) -> bool {
    let folded = fold(value);
    config
        .category_synonyms
        .iter()
        .any(|synonym| folded.contains(&fold(synonym)))
}

/// Select the expense category: open the dropdown, force the lazy option
/// list to materialize, type the query, click the best match, verify.
pub(crate) async fn ensure_expense_type_selected(
    page: &dyn PageDriver,
    config: &SelectorConfig,
) -> FlowResult<bool> {
    let snap = capture(page).await?;
    let Some(input) = find_expense_type_input(&snap, config) else {
        return Ok(false);
    };

    if value_matches_category(config, snap.value_of(input).unwrap_or_default()) {
        return Ok(true);
    }

    // Open the dropdown through its labelled wrapper when present.
    let wrapper = resolve::first_match(&snap, &["[data-testid='label-Expense-type']"])
        .or_else(|| {
            snap.ancestors(input)
                .find(|&a| snap.attr(a, "data-testid") == Some("expense-type-form"))
        })
        .unwrap_or(input);
    interact::click(page, &snap, wrapper).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Scroll the lazily paged option list to its end.
    let scroll_deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        if interact::scroll_overlay_to_end(page).await? {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = interact::scroll_overlay_to_end(page).await?;
            break;
        }
        if std::time::Instant::now() >= scroll_deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    interact::type_query(page, input, &config.category_label).await?;

    let option = wait_until(Duration::from_secs(8), Duration::from_millis(250), move || {
        let page = page;
        let config = config;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let option = find_expense_type_option(&snap, config, &config.category_label)?;
            Some((snap, option))
        }
    })
    .await;
    let Some((snap, option)) = option else {
        return Ok(false);
    };
    interact::click(page, &snap, option).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let fresh = capture(page).await?;
    let updated = find_expense_type_input(&fresh, config)
        .and_then(|id| fresh.value_of(id))
        .unwrap_or_default()
        .to_string();
    Ok(value_matches_category(config, &updated))
}

/// Category selection on the saved-transaction view: click the input, pick
/// the matching option, bounded retry.
async fn select_expense_type_by_label(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    label: &str,
    timeout: Duration,
) -> FlowResult<bool> {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        let snap = capture(page).await?;
        if let Some(input) = find_expense_type_input(&snap, config) {
            interact::click(page, &snap, input).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;

            let fresh = capture(page).await?;
            if let Some(option) = find_expense_type_option(&fresh, config, label) {
                interact::click(page, &fresh, option).await?;
                return Ok(true);
            }
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    Ok(false)
}

async fn set_transaction_date(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    date_iso: &str,
) -> FlowResult<bool> {
    let selectors = &config.expense.date;
    let found = wait_until(Duration::from_secs(10), Duration::from_millis(250), move || {
        let page = page;
        let selectors = selectors;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let input = resolve::first_match(&snap, selectors)?;
            Some((snap, input))
        }
    })
    .await;
    let Some((snap, input)) = found else {
        return Ok(false);
    };
    interact::set_value(page, &snap, input, date_iso).await?;
    Ok(true)
}

async fn apply_hints(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    hints: &ExpenseHints,
) -> FlowResult<bool> {
    let mut changed = false;
    if let Some(date) = hints
        .transaction_date_iso
        .as_deref()
        .filter(|d| !d.is_empty())
    {
        changed = set_transaction_date(page, config, date).await?;
    }
    Ok(changed)
}

/// Document-upload flow: wait out the receipt scan, create the single
/// transaction, pin the description, apply hints, select the category.
pub async fn upload_document(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    document: Option<&DownloadArtifact>,
) -> FlowResult<UploadOutcome> {
    let hints = document
        .and_then(|d| d.hints.clone())
        .unwrap_or_default();

    // The receipt scan backend needs its time before the page reacts.
    tokio::time::sleep(Duration::from_secs(15)).await;

    let created =
        wait_and_click_create_single_transaction(page, config, Duration::from_secs(5)).await?;
    if !created {
        return Ok(UploadOutcome {
            uploaded: false,
            manual_upload_required: Some(true),
            reason: Some("create_single_transaction_not_found".into()),
            create_single_transaction_clicked: None,
            expense_type_selected: None,
            hints_applied: None,
        });
    }

    wait_for_description_prefill(page, config, Duration::from_secs(25)).await;
    set_field(page, &config.expense.description, Some(FIXED_DESCRIPTION)).await?;

    let hints_applied = apply_hints(page, config, &hints).await?;

    // The saved transaction needs a settle pause before its draft view
    // accepts category edits.
    tokio::time::sleep(Duration::from_secs(15)).await;
    let snap = capture(page).await?;
    if let Some(tag) = find_draft_tag(&snap) {
        interact::click(page, &snap, tag).await?;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let label = hints
        .expense_type
        .clone()
        .unwrap_or_else(|| config.category_label.clone());
    let expense_type_selected =
        select_expense_type_by_label(page, config, &label, Duration::from_secs(20)).await?;

    Ok(UploadOutcome {
        uploaded: true,
        manual_upload_required: None,
        reason: None,
        create_single_transaction_clicked: Some(true),
        expense_type_selected: Some(expense_type_selected),
        hints_applied: Some(hints_applied),
    })
}

/// One scheduled background autofill pass: category first, then the fixed
/// description. Returns true once both landed.
pub async fn try_autofill_pass(page: &dyn PageDriver, config: &SelectorConfig) -> FlowResult<bool> {
    if !ensure_expense_type_selected(page, config).await? {
        return Ok(false);
    }

    let selectors = &config.expense.description;
    let input = wait_until(Duration::from_secs(10), Duration::from_millis(300), move || {
        let page = page;
        let selectors = selectors;
        async move {
            let snap = dom::capture(page).await.ok()?;
            let input = resolve::first_match(&snap, selectors)?;
            Some((snap, input))
        }
    })
    .await;
    let Some((snap, input)) = input else {
        return Ok(false);
    };
    interact::set_value(page, &snap, input, FIXED_DESCRIPTION).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testutil::SnapshotBuilder;

    #[test]
    fn test_transaction_form_route_detection() {
        assert!(is_transaction_form_path("/transactions/new-redesign/12"));
        assert!(!is_transaction_form_path("/transactions/upload-receipts"));
        assert!(!is_transaction_form_path("/home"));
    }

    #[test]
    fn test_new_transaction_button_prefers_menu_scope() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/home");
        let _global = b.push(
            "button",
            None,
            &[("class", "black"), ("type", "button")],
            "New transaction",
            true,
        );
        let menu = b.el(
            "pb-dropdown-menu",
            None,
            &[("data-testid", "add-transaction")],
        );
        let scoped = b.push(
            "button",
            Some(menu),
            &[("class", "black"), ("type", "button")],
            "",
            true,
        );
        let label = b.push("span", Some(scoped), &[("class", "text")], "New transaction", true);
        let snap = b.build();

        // The scoped candidate wins; its label rides in the span.text child.
        assert_eq!(find_new_transaction_button(&snap), Some(scoped));
        assert_eq!(fold(snap.text(label)), "new transaction");
    }

    #[test]
    fn test_new_transaction_button_rejects_other_labels() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/home");
        b.push(
            "button",
            None,
            &[("class", "black"), ("type", "button")],
            "New trip",
            true,
        );
        assert_eq!(find_new_transaction_button(&b.build()), None);
    }

    #[test]
    fn test_create_single_transaction_requires_exact_label() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/transactions/upload-receipts");
        b.push("button", None, &[], "Create a single transaction now", true);
        let exact = b.push("button", None, &[], "Create a single transaction", true);
        let snap = b.build();

        let config = SelectorConfig::default();
        assert_eq!(find_create_single_transaction(&snap, &config), Some(exact));
    }

    #[test]
    fn test_draft_tag_resolution_prefers_tag_container() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/transactions/new-redesign/1");
        let container = b.el("div", None, &[("class", "tag-container gray")]);
        let ellipse = b.push("div", Some(container), &[("class", "ellipse")], "Draft", true);
        let snap = b.build();

        assert_eq!(find_draft_tag(&snap), Some(container));
        assert_eq!(fold(snap.text(ellipse)), "draft");
    }

    #[test]
    fn test_expense_type_input_label_fallback() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/transactions/new-redesign/1");
        let section = b.el("section", None, &[]);
        let _label = b.push("span", Some(section), &[], "Expense type", true);
        let input = b.el("input", Some(section), &[("type", "text")]);
        let snap = b.build();

        let config = SelectorConfig::default();
        assert_eq!(find_expense_type_input(&snap, &config), Some(input));
    }

    #[test]
    fn test_expense_type_option_matches_synonyms_in_overlay() {
        let mut b = SnapshotBuilder::new("https://app.navan.com/transactions/new-redesign/1");
        let overlay = b.el("div", None, &[("class", "cdk-overlay-container")]);
        let _noise = b.push("div", Some(overlay), &[], "x", true);
        let option = b.push(
            "li",
            Some(overlay),
            &[("role", "option")],
            "Télétravail",
            true,
        );
        let _outside = b.push("li", None, &[], "Work from home", true);
        let snap = b.build();

        let config = SelectorConfig::default();
        assert_eq!(
            find_expense_type_option(&snap, &config, "work from home"),
            Some(option)
        );
    }

    #[test]
    fn test_amount_formatting() {
        assert_eq!(format_amount(39.99), "39.99");
        assert_eq!(format_amount(40.0), "40");
    }
}
