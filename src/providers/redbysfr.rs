//! Red by SFR workflow.
//!
//! The login page is captcha-gated often enough that automated submission is
//! not attempted at all: credentials are prefilled as a courtesy and the
//! human finishes the login. Billing readiness is read from the invoice
//! section headings.

use std::time::Duration;

use async_trait::async_trait;

use super::generic::{self, capture, generic_download, wait_for_match};
use super::{
    AuthOutcome, BillingOptions, BillingReady, Credentials, DownloadOutcome, FlowContext,
    NavigationOutcome, ProviderFlow, SessionStatus,
};
use crate::dom::resolve;
use crate::error::{FlowError, FlowResult};
use crate::interact;

pub struct RedBySfrFlow;

#[async_trait]
impl ProviderFlow for RedBySfrFlow {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus> {
        let snap = capture(cx.page).await?;
        Ok(SessionStatus::plain(generic::login_fields_absent(&snap, cx)))
    }

    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady> {
        let snap = capture(cx.page).await?;
        let ready = resolve::find_by_text(&snap, "vos factures").is_some()
            || resolve::find_by_text(&snap, "facture fixe").is_some()
            || resolve::body_text_contains(&snap, "vos factures")
            || resolve::body_text_contains(&snap, "facture fixe")
            || generic::login_fields_absent(&snap, cx);
        Ok(BillingReady::plain(ready))
    }

    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome> {
        let page = cx.page;
        let snap = capture(page).await?;
        if generic::login_fields_absent(&snap, cx) {
            return Ok(AuthOutcome::skipped_login());
        }

        if let Some((snap, username)) =
            wait_for_match(page, &cx.profile.username, Duration::from_secs(6)).await
        {
            if !credentials.username.is_empty() {
                interact::set_value(page, &snap, username, &credentials.username).await?;
            }
        }
        if let Some((snap, password)) =
            wait_for_match(page, &cx.profile.password, Duration::from_secs(6)).await
        {
            if !credentials.password.is_empty() {
                interact::set_value(page, &snap, password, &credentials.password).await?;
            }
        }

        // The site usually interposes a captcha; the human submits.
        Ok(AuthOutcome::manual_login())
    }

    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        _options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome> {
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
    fn test_billing_markers_detected_in_body_text() {
        let snap = SnapshotBuilder::new("https://espace-client-red.sfr.fr/facture-fixe")
            .body_text("Bienvenue — Vos factures sont disponibles")
            .build();
        assert!(resolve::body_text_contains(&snap, "vos factures"));
    }
}
