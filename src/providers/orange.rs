//! Telecom portal workflow.
//!
//! Authentication state is inferred from the client-area host plus the
//! absence of visible login fields. Billing navigation happens on the
//! contract-selection page: the account card is matched by its offer label,
//! the account id is read from a `data-e2e` attribute or the card's href,
//! and the canonical billing detail URL is built from it.

use std::time::Duration;

use async_trait::async_trait;

use super::generic::{self, capture, generic_authenticate, generic_download};
use super::{
    AccountType, AuthOutcome, BillingOptions, BillingReady, Credentials, DownloadOutcome,
    FlowContext, NavigationOutcome, ProviderFlow, SessionStatus,
};
use crate::dom::text::fold;
use crate::dom::{resolve, DomSnapshot, NodeId};
use crate::download::{normalize_url, orange_account_id_from_path};
use crate::error::{FlowError, FlowResult};
use crate::wait::{wait_until, POLL_INTERVAL};

const CLIENT_HOST: &str = "espace-client.orange.fr";
const CONTRACT_SELECTION_URL: &str = "https://espace-client.orange.fr/selectionner-un-contrat";

pub struct OrangeFlow;

/// Signed in when on the client host without a visible login form.
pub(crate) fn is_authenticated(snap: &DomSnapshot, cx: &FlowContext<'_>) -> bool {
    if !snap.host().contains(CLIENT_HOST) {
        return false;
    }
    generic::login_fields_absent(snap, cx)
}

fn matches_account_type(snap: &DomSnapshot, id: NodeId, account_type: AccountType) -> bool {
    let label = fold(snap.text(id));
    match account_type {
        AccountType::MobileInternet => label.contains("forfait mobile"),
        AccountType::HomeInternet => label.contains("offre internet"),
    }
}

/// First visible account card whose label matches the requested type.
pub(crate) fn select_account(
    snap: &DomSnapshot,
    cx: &FlowContext<'_>,
    account_type: AccountType,
) -> Option<NodeId> {
    resolve::all_matches(snap, &cx.profile.account_items)
        .into_iter()
        .find(|&id| matches_account_type(snap, id, account_type))
}

/// Account id from the card: `data-e2e` when it looks like an account
/// number, else the billing path segment of its href.
pub(crate) fn extract_account_id(snap: &DomSnapshot, card: NodeId) -> Option<String> {
    if let Some(data_e2e) = snap.attr(card, "data-e2e") {
        if data_e2e.len() >= 6 && data_e2e.bytes().all(|b| b.is_ascii_digit()) {
            return Some(data_e2e.to_string());
        }
    }
    let href = snap.attr(card, "href")?;
    let url = normalize_url(href, &snap.url)?;
    orange_account_id_from_path(&url)
}

pub(crate) fn detail_url(account_id: &str) -> String {
    format!("https://espace-client.orange.fr/facture-paiement/{account_id}/detail-facture")
}

#[async_trait]
impl ProviderFlow for OrangeFlow {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus> {
        let snap = capture(cx.page).await?;
        Ok(SessionStatus::plain(is_authenticated(&snap, cx)))
    }

    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady> {
        let snap = capture(cx.page).await?;
        Ok(BillingReady::plain(is_authenticated(&snap, cx)))
    }

    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome> {
        generic_authenticate(cx, credentials, |snap| is_authenticated(snap, cx)).await
    }

    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome> {
        let page = cx.page;
        let snap = capture(page).await?;
        if !snap.url.starts_with(CONTRACT_SELECTION_URL) {
            return Err(FlowError::Driver(anyhow::anyhow!(
                "not on the contract selection page"
            )));
        }

        let account_type = options.account_type;
        let card = wait_until(Duration::from_secs(15), POLL_INTERVAL, move || {
            let page = page;
            async move {
                let snap = crate::dom::capture(page).await.ok()?;
                let card = select_account(&snap, cx, account_type)?;
                Some((snap, card))
            }
        })
        .await;
        let Some((snap, card)) = card else {
            return Err(FlowError::ElementNotFound(format!(
                "could not find account card for type {account_type:?}"
            )));
        };

        let account_id = extract_account_id(&snap, card).ok_or_else(|| {
            FlowError::ElementNotFound("could not extract account id from selected card".into())
        })?;
        let detail_url = detail_url(&account_id);
        tracing::info!(%account_id, %detail_url, "resolved billing detail URL");

        Ok(NavigationOutcome {
            navigated: true,
            account_id: Some(account_id),
            detail_url,
        })
    }

    async fn download_and_extract(&self, cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome> {
        generic_download(cx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::dom::testutil::SnapshotBuilder;
    use crate::protocol::ProviderId;

    fn context(config: &SelectorConfig) -> FlowContext<'_> {
        FlowContext {
            page: &NoPage,
            config,
            profile: config.profile(ProviderId::Orange),
            provider: ProviderId::Orange,
        }
    }

    struct NoPage;

    #[async_trait]
    impl crate::page::PageDriver for NoPage {
        async fn navigate(
            &self,
            _url: &str,
            _timeout_ms: u64,
        ) -> anyhow::Result<crate::page::NavigationResult> {
            anyhow::bail!("not driven in unit tests")
        }
        async fn execute_js(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("not driven in unit tests")
        }
        async fn current_url(&self) -> anyhow::Result<String> {
            anyhow::bail!("not driven in unit tests")
        }
        async fn html(&self) -> anyhow::Result<String> {
            anyhow::bail!("not driven in unit tests")
        }
    }

    #[test]
    fn test_account_card_selection_and_detail_url() {
        // Account card carrying data-e2e="123456789", mobile type requested:
        // navigation must resolve the canonical billing detail URL.
        let config = SelectorConfig::default();
        let cx = context(&config);

        let mut b = SnapshotBuilder::new(CONTRACT_SELECTION_URL);
        let _home = b.push(
            "a",
            None,
            &[("data-e2e", "555000111"), ("href", "/contrat/1")],
            "Offre internet Livebox",
            true,
        );
        let mobile = b.push(
            "a",
            None,
            &[("data-e2e", "123456789"), ("href", "/contrat/2")],
            "Forfait mobile 120 Go",
            true,
        );
        let snap = b.build();

        let card = select_account(&snap, &cx, AccountType::MobileInternet);
        assert_eq!(card, Some(mobile));
        let account_id = extract_account_id(&snap, mobile).unwrap();
        assert_eq!(account_id, "123456789");
        assert_eq!(
            detail_url(&account_id),
            "https://espace-client.orange.fr/facture-paiement/123456789/detail-facture"
        );
    }

    #[test]
    fn test_account_id_falls_back_to_href_path() {
        let config = SelectorConfig::default();
        let cx = context(&config);

        let mut b = SnapshotBuilder::new(CONTRACT_SELECTION_URL);
        let card = b.push(
            "a",
            None,
            &[("data-e2e", "card"), ("href", "/facture-paiement/987654321/detail")],
            "Offre internet Fibre",
            true,
        );
        let snap = b.build();

        assert_eq!(select_account(&snap, &cx, AccountType::HomeInternet), Some(card));
        assert_eq!(
            extract_account_id(&snap, card),
            Some("987654321".to_string())
        );
    }

    #[test]
    fn test_authenticated_requires_client_host() {
        let config = SelectorConfig::default();
        let cx = context(&config);

        let away = SnapshotBuilder::new("https://login.orange.fr/").build();
        assert!(!is_authenticated(&away, &cx));

        let mut with_login = SnapshotBuilder::new("https://espace-client.orange.fr/accueil");
        with_login.el("input", None, &[("id", "login")]);
        assert!(!is_authenticated(&with_login.build(), &cx));

        let clean = SnapshotBuilder::new("https://espace-client.orange.fr/accueil").build();
        assert!(is_authenticated(&clean, &cx));
    }
}
