//! Provider workflow variants.
//!
//! Each target site gets a tagged, self-contained strategy implementing the
//! same capability contract, selected purely by [`ProviderId`] — no shared
//! inheritance hierarchy. The sites share almost no logic beyond the
//! wait/resolution/interaction/download primitives, so the variants compose
//! those primitives instead of subclassing each other.
//!
//! Abstract transition model per variant: `Unauthenticated → Authenticating
//! → (Authenticated | ChallengePending) → Navigating → Ready → Downloading →
//! Extracted`. `ChallengePending` (CAPTCHA or OTP) is terminal for the
//! automation: it is surfaced as a non-error payload and the orchestrator
//! re-invokes `check_session`/`authenticate` after the human resolves it.

pub mod free;
pub mod free_mobile;
pub mod generic;
pub mod navigo;
pub mod orange;
pub mod redbysfr;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{SelectorConfig, SelectorProfile};
use crate::error::FlowResult;
use crate::page::PageDriver;
use crate::protocol::{DownloadArtifact, ProviderId};

pub use free::FreeFlow;
pub use free_mobile::{FreeMobileDiagnostics, FreeMobileFlow};
pub use generic::GenericFlow;
pub use navigo::NavigoFlow;
pub use orange::OrangeFlow;
pub use redbysfr::RedBySfrFlow;

/// Everything a workflow invocation needs: the page under automation plus
/// the resolved selector profile for the chosen provider.
pub struct FlowContext<'a> {
    pub page: &'a dyn PageDriver,
    pub config: &'a SelectorConfig,
    pub profile: SelectorProfile,
    pub provider: ProviderId,
}

/// Login credentials from the action payload. Empty strings mean "not
/// provided" — the workflows then defer to prefilled fields or the human.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Which billing account to select on multi-contract portals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    HomeInternet,
    MobileInternet,
}

#[derive(Debug, Clone)]
pub struct BillingOptions {
    pub account_type: AccountType,
}

impl BillingOptions {
    pub fn parse(raw: Option<&str>) -> Self {
        let account_type = if raw == Some("mobile_internet") {
            AccountType::MobileInternet
        } else {
            AccountType::HomeInternet
        };
        Self { account_type }
    }
}

/// Session probe result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_code_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<FreeMobileDiagnostics>,
}

impl SessionStatus {
    pub fn plain(authenticated: bool) -> Self {
        Self {
            authenticated,
            sms_code_required: None,
            diagnostics: None,
        }
    }
}

/// Billing page readiness probe result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingReady {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<FreeMobileDiagnostics>,
}

impl BillingReady {
    pub fn plain(ready: bool) -> Self {
        Self {
            ready,
            diagnostics: None,
        }
    }
}

/// Authentication outcome. Manual-action states are success payloads
/// carrying an instruction, not errors: they need a human, not a retry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub captcha_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_login: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_login_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_code_required: Option<bool>,
}

impl AuthOutcome {
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            captcha_required: false,
            skipped_login: None,
            manual_login_required: None,
            sms_code_required: None,
        }
    }

    /// Already signed in: nothing to do.
    pub fn skipped_login() -> Self {
        Self {
            skipped_login: Some(true),
            ..Self::authenticated()
        }
    }

    pub fn manual_login() -> Self {
        Self {
            authenticated: false,
            captcha_required: false,
            skipped_login: None,
            manual_login_required: Some(true),
            sms_code_required: None,
        }
    }

    pub fn captcha() -> Self {
        Self {
            authenticated: false,
            captcha_required: true,
            skipped_login: None,
            manual_login_required: None,
            sms_code_required: None,
        }
    }

    pub fn sms_challenge() -> Self {
        Self {
            sms_code_required: Some(true),
            ..Self::manual_login()
        }
    }
}

/// Billing navigation outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationOutcome {
    pub navigated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub detail_url: String,
}

impl NavigationOutcome {
    pub fn at(detail_url: impl Into<String>) -> Self {
        Self {
            navigated: true,
            account_id: None,
            detail_url: detail_url.into(),
        }
    }
}

/// Download-and-extract outcome: raw page text for downstream extraction
/// plus the artifact descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub bill_text: String,
    pub bill_hints: String,
    pub document: DownloadArtifact,
}

/// The shared capability contract every provider variant implements.
#[async_trait]
pub trait ProviderFlow: Send + Sync {
    async fn check_session(&self, cx: &FlowContext<'_>) -> FlowResult<SessionStatus>;
    async fn billing_ready(&self, cx: &FlowContext<'_>) -> FlowResult<BillingReady>;
    async fn authenticate(
        &self,
        cx: &FlowContext<'_>,
        credentials: &Credentials,
    ) -> FlowResult<AuthOutcome>;
    async fn navigate_billing(
        &self,
        cx: &FlowContext<'_>,
        options: &BillingOptions,
    ) -> FlowResult<NavigationOutcome>;
    async fn download_and_extract(&self, cx: &FlowContext<'_>) -> FlowResult<DownloadOutcome>;
}

/// Select the workflow variant for a provider identity.
pub fn flow_for(provider: ProviderId) -> &'static dyn ProviderFlow {
    match provider {
        ProviderId::Orange => &OrangeFlow,
        ProviderId::RedBySfr => &RedBySfrFlow,
        ProviderId::Free => &FreeFlow,
        ProviderId::FreeMobile => &FreeMobileFlow,
        ProviderId::Navigo => &NavigoFlow,
        ProviderId::Other => &GenericFlow,
    }
}
