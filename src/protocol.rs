// Copyright 2026 Facteur Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inbound action contract and outbound result shaping.
//!
//! One `ActionRequest` arrives per call; the core responds exactly once with
//! `{ ok: true, data }` or `{ ok: false, error: { code, message } }`. An
//! unrecognized action kind is a failure, never a panic, and no unexpected
//! error escapes unshaped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SelectorConfig;
use crate::error::{FlowError, FlowResult};
use crate::expense;
use crate::page::PageDriver;
use crate::providers::{self, BillingOptions, Credentials, FlowContext};

/// Which of the target-site variants to run. Unknown tokens select the
/// default profile and the generic workflow; an absent token means the
/// telecom portal, matching the original contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Orange,
    RedBySfr,
    Free,
    FreeMobile,
    Navigo,
    Other,
}

impl ProviderId {
    pub fn parse(token: Option<&str>) -> Self {
        match token.map(str::trim).unwrap_or("") {
            "" | "orange_provider" => Self::Orange,
            "redbysfr_provider" => Self::RedBySfr,
            "free_provider" => Self::Free,
            // Second token is the legacy spelling kept for old drafts.
            "free_mobile_provider" | "freemobile_provider" => Self::FreeMobile,
            "navigo_provider" => Self::Navigo,
            _ => Self::Other,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Orange => "orange_provider",
            Self::RedBySfr => "redbysfr_provider",
            Self::Free => "free_provider",
            Self::FreeMobile => "free_mobile_provider",
            Self::Navigo => "navigo_provider",
            Self::Other => "unknown_provider",
        }
    }

    /// Host fragment used to pick the right browser tab for this provider.
    pub fn host_hint(self) -> Option<&'static str> {
        match self {
            Self::Orange => Some("orange.fr"),
            Self::RedBySfr => Some("sfr.fr"),
            Self::Free => Some("free.fr"),
            Self::FreeMobile => Some("mobile.free.fr"),
            Self::Navigo => Some("iledefrance-mobilites.fr"),
            Self::Other => None,
        }
    }
}

/// The closed action set. Legacy aliases are kept for older orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CheckProviderSession,
    CheckProviderBillingReady,
    AuthProvider,
    NavigateBilling,
    DownloadAndExtractBill,
    CheckSession,
    ClickNewTransaction,
    AutofillTransaction,
    UploadDocument,
}

impl ActionKind {
    pub fn from_str(s: &str) -> FlowResult<Self> {
        match s {
            "CHECK_PROVIDER_SESSION" | "CHECK_ORANGE_SESSION" => Ok(Self::CheckProviderSession),
            "CHECK_PROVIDER_BILLING_READY" => Ok(Self::CheckProviderBillingReady),
            "AUTH_PROVIDER" | "AUTH_ORANGE" => Ok(Self::AuthProvider),
            "NAVIGATE_BILLING" => Ok(Self::NavigateBilling),
            "DOWNLOAD_AND_EXTRACT_BILL" => Ok(Self::DownloadAndExtractBill),
            "CHECK_SESSION" => Ok(Self::CheckSession),
            "CLICK_NEW_TRANSACTION" => Ok(Self::ClickNewTransaction),
            "AUTOFILL_TRANSACTION" => Ok(Self::AutofillTransaction),
            "UPLOAD_DOCUMENT" => Ok(Self::UploadDocument),
            other => Err(FlowError::UnsupportedAction(other.to_string())),
        }
    }
}

/// One inbound call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub payload: ActionPayload,
}

/// Action-specific payload. Key casing follows the wire contract: provider
/// routing fields are capitalized, credentials are not.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionPayload {
    #[serde(rename = "Provider", skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "AccountType", skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<TransactionDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DownloadArtifact>,
}

/// Draft transaction fields for the expense tool's composer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, rename = "transactionDateISO")]
    pub transaction_date_iso: Option<String>,
    #[serde(default)]
    pub tax_amount: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The downloadable document produced by a provider workflow, with derived
/// metadata. Constructed once per successful download-and-extract call and
/// never persisted by this core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadArtifact {
    pub file_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub manual_upload_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<ExpenseHints>,
}

/// Derived metadata consumed by the downstream expense-entry workflow.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_type: Option<String>,
    #[serde(default, rename = "transactionDateISO", skip_serializing_if = "Option::is_none")]
    pub transaction_date_iso: Option<String>,
}

/// Run one action to completion and shape the response. This is the single
/// entry point the message-routing collaborator calls.
pub async fn handle_action(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    request: &ActionRequest,
) -> Value {
    match run_action(page, config, request).await {
        Ok(data) => serde_json::json!({ "ok": true, "data": data }),
        Err(error) => {
            tracing::warn!(action = %request.action, code = error.code(), "action failed: {error}");
            serde_json::json!({
                "ok": false,
                "error": { "code": error.code(), "message": error.to_string() }
            })
        }
    }
}

fn to_value<T: Serialize>(value: T) -> FlowResult<Value> {
    serde_json::to_value(value).map_err(|e| FlowError::Driver(e.into()))
}

async fn run_action(
    page: &dyn PageDriver,
    config: &SelectorConfig,
    request: &ActionRequest,
) -> FlowResult<Value> {
    let kind = ActionKind::from_str(&request.action)?;
    let payload = &request.payload;
    let provider = ProviderId::parse(payload.provider.as_deref());
    tracing::debug!(action = %request.action, provider = provider.token(), "dispatching action");

    let cx = FlowContext {
        page,
        config,
        profile: config.profile(provider),
        provider,
    };
    let flow = providers::flow_for(provider);

    match kind {
        ActionKind::CheckProviderSession => to_value(flow.check_session(&cx).await?),
        ActionKind::CheckProviderBillingReady => to_value(flow.billing_ready(&cx).await?),
        ActionKind::AuthProvider => {
            let credentials = Credentials {
                username: payload.username.clone().unwrap_or_default(),
                password: payload.password.clone().unwrap_or_default(),
            };
            to_value(flow.authenticate(&cx, &credentials).await?)
        }
        ActionKind::NavigateBilling => {
            let options = BillingOptions::parse(payload.account_type.as_deref());
            to_value(flow.navigate_billing(&cx, &options).await?)
        }
        ActionKind::DownloadAndExtractBill => to_value(flow.download_and_extract(&cx).await?),
        ActionKind::CheckSession => to_value(expense::check_session(page).await?),
        ActionKind::ClickNewTransaction => {
            to_value(expense::click_new_transaction(page, config).await?)
        }
        ActionKind::AutofillTransaction => {
            to_value(expense::autofill_transaction(page, config, payload.draft.as_ref()).await?)
        }
        ActionKind::UploadDocument => {
            to_value(expense::upload_document(page, config, payload.document.as_ref()).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;

    #[test]
    fn test_provider_parsing_and_fallbacks() {
        assert_eq!(ProviderId::parse(None), ProviderId::Orange);
        assert_eq!(ProviderId::parse(Some("  ")), ProviderId::Orange);
        assert_eq!(ProviderId::parse(Some("navigo_provider")), ProviderId::Navigo);
        assert_eq!(
            ProviderId::parse(Some("freemobile_provider")),
            ProviderId::FreeMobile
        );
        assert_eq!(ProviderId::parse(Some("acme_provider")), ProviderId::Other);
    }

    #[test]
    fn test_action_kind_aliases_and_rejection() {
        assert_eq!(
            ActionKind::from_str("CHECK_ORANGE_SESSION").unwrap(),
            ActionKind::CheckProviderSession
        );
        assert_eq!(
            ActionKind::from_str("AUTH_PROVIDER").unwrap(),
            ActionKind::AuthProvider
        );
        let err = ActionKind::from_str("LAUNCH_MISSILES").unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ACTION");
    }

    #[test]
    fn test_payload_wire_casing() {
        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "action": "AUTH_PROVIDER",
            "payload": {
                "Provider": "free_mobile_provider",
                "AccountType": "mobile_internet",
                "username": "0612345678",
                "password": "s3cret"
            }
        }))
        .expect("request should deserialize");

        assert_eq!(request.payload.provider.as_deref(), Some("free_mobile_provider"));
        assert_eq!(request.payload.account_type.as_deref(), Some("mobile_internet"));
        assert_eq!(request.payload.username.as_deref(), Some("0612345678"));
    }

    #[test]
    fn test_draft_date_key_is_iso_suffixed() {
        let draft: TransactionDraft = serde_json::from_value(serde_json::json!({
            "merchant": "Orange SA",
            "amount": 39.99,
            "currency": "EUR",
            "transactionDateISO": "2024-03-01",
            "taxAmount": 6.67,
            "description": "monthly invoice"
        }))
        .expect("draft should deserialize");
        assert_eq!(draft.transaction_date_iso.as_deref(), Some("2024-03-01"));
        assert_eq!(draft.tax_amount, Some(6.67));
    }

    #[test]
    fn test_artifact_round_trip_keeps_camel_case() {
        let artifact = DownloadArtifact {
            file_name: "attestation_navigo_2024-03.pdf".into(),
            mime_type: "application/pdf".into(),
            source_url: Some("https://t.fr/doc?id=1".into()),
            manual_upload_required: true,
            hints: Some(ExpenseHints {
                expense_type: Some("commuter benefits".into()),
                transaction_date_iso: Some("2024-03-01".into()),
            }),
        };

        let value = serde_json::to_value(&artifact).expect("artifact should serialize");
        assert_json_include!(
            actual: value,
            expected: serde_json::json!({
                "fileName": "attestation_navigo_2024-03.pdf",
                "mimeType": "application/pdf",
                "manualUploadRequired": true,
                "hints": { "expenseType": "commuter benefits", "transactionDateISO": "2024-03-01" }
            })
        );
    }
}
