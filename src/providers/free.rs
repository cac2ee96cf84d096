//! Free ADSL workflow (mobile portal A in the filename rules).
//!
//! The session rides in URL query parameters, so navigation just verifies
//! that an invoice link is visible on the current page. The invoice list
//! carries one `facture_pdf.pl` link per month; the current month is
//! preferred, else the latest. The site's native anchor behavior opens the
//! PDF in a new browsing context instead of downloading it, so the resolved
//! URL is refetched in the same context and saved through a synthetic
//! anchor.

use std::time::Duration;

use async_trait::async_trait;

use super::generic::{self, capture, generic_authenticate, today};
use super::{
    AuthOutcome, BillingOptions, BillingReady, Credentials, DownloadOutcome, FlowContext,
    NavigationOutcome, ProviderFlow, SessionStatus,
};
use crate::dom::{self, resolve, DomSnapshot, NodeId};
use crate::download;
use crate::error::{FlowError, FlowResult};
use crate::interact;
use crate::protocol::DownloadArtifact;
use crate::wait::{wait_until, SLOW_POLL_INTERVAL};

pub struct FreeFlow;

/// Best invoice link on the page for `current_key` (`YYYYMM`).
fn best_invoice_control(
    snap: &DomSnapshot,
    cx: &FlowContext<'_>,
    current_key: &str,
) -> Option<NodeId> {
    let links = resolve::all_matches(snap, &cx.profile.download_button);
    download::pick_invoice_by_month(snap, &links, current_key)
}

#[async_trait]
impl ProviderFlow for FreeFlow {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus> {
        let snap = capture(cx.page).await?;
        Ok(SessionStatus::plain(generic::login_fields_absent(&snap, cx)))
    }

    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady> {
        let snap = capture(cx.page).await?;
        Ok(BillingReady::plain(generic::login_fields_absent(&snap, cx)))
    }

    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome> {
        generic_authenticate(cx, credentials, |snap| generic::login_fields_absent(snap, cx)).await
    }

    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        _options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome> {
        // Stay on the session-carrying page; just verify an invoice link.
        let snap = capture(cx.page).await?;
        let invoices = resolve::all_matches(&snap, &cx.profile.invoice_links);
        if invoices.is_empty() {
            return Err(FlowError::ElementNotFound(
                "could not find invoice link (facture_pdf.pl)".into(),
            ));
        }
        Ok(NavigationOutcome::at(snap.url))
    }

    async fn download_and_extract(&self, cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome> {
        let page = cx.page;
        let before = download::snapshot_resources(page).await?;
        let current_key = download::month_key(today());

        let found = {
            let key = current_key.clone();
            wait_until(Duration::from_secs(12), SLOW_POLL_INTERVAL, move || {
                let page = page;
                let key = key.clone();
                async move {
                    let snap = dom::capture(page).await.ok()?;
                    let control = best_invoice_control(&snap, cx, &key)?;
                    Some((snap, control))
                }
            })
            .await
        };
        let Some((snap, control)) = found else {
            return Err(FlowError::ElementNotFound(
                "could not find provider PDF download button".into(),
            ));
        };

        let mut did_click = false;
        let mut href = download::resolve_from_control(&snap, control);
        if href.is_none() {
            interact::click(page, &snap, control).await?;
            did_click = true;
            let key = current_key.clone();
            href = download::wait_for_download_url(page, &before, Duration::from_secs(8), move |s| {
                best_invoice_control(s, cx, &key)
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

        // Native anchor opens the PDF in a new context; force a real
        // same-context download instead of clicking through.
        if let Some(url) = &href {
            let outcome = interact::fetch_and_save(page, url, &file_name).await?;
            if !outcome.ok {
                return Err(FlowError::NetworkFailure(format!(
                    "failed to download invoice PDF ({})",
                    outcome.status
                )));
            }
        } else if !did_click {
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
                hints: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::dom::testutil::SnapshotBuilder;
    use crate::protocol::ProviderId;

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
    fn test_current_month_invoice_is_preferred() {
        let config = SelectorConfig::default();
        let cx = FlowContext {
            page: &NoPage,
            config: &config,
            profile: config.profile(ProviderId::Free),
            provider: ProviderId::Free,
        };

        let mut b = SnapshotBuilder::new("https://adsl.free.fr/liste-factures.pl?id=1&idt=2");
        let _old = b.el(
            "a",
            None,
            &[("href", "/facture_pdf.pl?no_facture=7001&mois=202402")],
        );
        let current = b.el(
            "a",
            None,
            &[("href", "/facture_pdf.pl?no_facture=7002&mois=202403")],
        );
        let snap = b.build();

        assert_eq!(best_invoice_control(&snap, &cx, "202403"), Some(current));
    }
}
