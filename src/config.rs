//! Selector configuration: default profile plus per-provider overrides.
//!
//! Candidate lists are tried in declared order; the first visible match
//! wins. A provider override replaces only the keys it defines — every other
//! key inherits from the default profile — and the absence of a provider
//! entry is not an error. Built-in defaults ship compiled in; an optional
//! JSON file overlays them so selector churn does not need a rebuild.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::ProviderId;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Fully resolved candidate lists for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorProfile {
    pub username: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
    pub download_button: Vec<String>,
    pub invoice_links: Vec<String>,
    pub account_items: Vec<String>,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            username: strings(&[
                "#login",
                "input[name='login']",
                "input[type='email']",
                "input[name='username']",
                "input[autocomplete='username']",
            ]),
            password: strings(&["#password", "input[type='password']"]),
            submit: strings(&["button[type='submit']", "input[type='submit']", "#btnSubmit"]),
            download_button: strings(&[
                "button[data-e2e='download-link']",
                "a[data-e2e='download-link']",
                "a[download]",
            ]),
            invoice_links: strings(&["a[href*='facture']", "a[href*='.pdf']"]),
            account_items: strings(&["a[data-e2e]", "a[href*='facture-paiement']"]),
        }
    }
}

impl SelectorProfile {
    /// Apply an override on top of this profile. Only defined keys replace.
    pub fn merged(&self, other: &SelectorOverride) -> SelectorProfile {
        SelectorProfile {
            username: other.username.clone().unwrap_or_else(|| self.username.clone()),
            password: other.password.clone().unwrap_or_else(|| self.password.clone()),
            submit: other.submit.clone().unwrap_or_else(|| self.submit.clone()),
            download_button: other
                .download_button
                .clone()
                .unwrap_or_else(|| self.download_button.clone()),
            invoice_links: other
                .invoice_links
                .clone()
                .unwrap_or_else(|| self.invoice_links.clone()),
            account_items: other
                .account_items
                .clone()
                .unwrap_or_else(|| self.account_items.clone()),
        }
    }
}

/// Partial profile: only the keys a provider actually deviates on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorOverride {
    pub username: Option<Vec<String>>,
    pub password: Option<Vec<String>>,
    pub submit: Option<Vec<String>>,
    pub download_button: Option<Vec<String>>,
    pub invoice_links: Option<Vec<String>>,
    pub account_items: Option<Vec<String>>,
}

/// Selectors for the expense tool's composer and category dropdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpenseSelectors {
    pub merchant: Vec<String>,
    pub amount: Vec<String>,
    pub currency: Vec<String>,
    pub date: Vec<String>,
    pub tax: Vec<String>,
    pub description: Vec<String>,
    pub autofill_from_receipt: Vec<String>,
    pub create_single_transaction: Vec<String>,
    pub expense_type_input: Vec<String>,
}

impl Default for ExpenseSelectors {
    fn default() -> Self {
        Self {
            merchant: strings(&["[data-testid='merchant-form'] input", "input[name='merchantName']"]),
            amount: strings(&["[data-testid='amount-form'] input", "input[name='amount']"]),
            currency: strings(&["[data-testid='currency-form'] input", "input[name='currency']"]),
            date: strings(&[
                "[data-testid='transaction-date-form'] input",
                "input[name='transactionDate']",
                "input[type='date']",
            ]),
            tax: strings(&["[data-testid='tax-form'] input", "input[name='taxAmount']"]),
            description: strings(&[
                "[data-testid='custom-field-customField3'] input",
                "textarea[name='description']",
                "input[name='description']",
            ]),
            autofill_from_receipt: strings(&["[data-testid='autofill-from-receipt']"]),
            create_single_transaction: strings(&[
                "[data-testid='create-single-transaction']",
                "button.black[type='button']",
            ]),
            expense_type_input: strings(&["[data-testid='expense-type-form'] input[type='text']"]),
        }
    }
}

/// Process-wide selector configuration, keyed by provider identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorConfig {
    pub defaults: SelectorProfile,
    pub providers: HashMap<String, SelectorOverride>,
    pub expense: ExpenseSelectors,
    /// Label the category dropdown is matched against, plus accepted
    /// synonyms across locales. Configuration data, not logic: the shipped
    /// pair covers the English and French renderings of the same category.
    pub category_label: String,
    pub category_synonyms: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();

        providers.insert(
            ProviderId::Orange.token().to_string(),
            SelectorOverride {
                username: Some(strings(&["#login", "input[name='login']"])),
                submit: Some(strings(&["#btnSubmit", "button[type='submit']"])),
                account_items: Some(strings(&[
                    "a[data-e2e][href*='facture-paiement']",
                    "a[data-e2e]",
                    "a[href*='/facture-paiement/']",
                ])),
                ..Default::default()
            },
        );

        providers.insert(
            ProviderId::RedBySfr.token().to_string(),
            SelectorOverride {
                username: Some(strings(&[
                    "#username",
                    "input[name='username']",
                    "input[type='email']",
                ])),
                ..Default::default()
            },
        );

        providers.insert(
            ProviderId::Free.token().to_string(),
            SelectorOverride {
                username: Some(strings(&["#login_b", "input[name='login']"])),
                password: Some(strings(&["#pass_b", "input[name='pass']", "input[type='password']"])),
                submit: Some(strings(&["#ok", "input[type='submit']"])),
                download_button: Some(strings(&["a[href*='facture_pdf.pl']"])),
                invoice_links: Some(strings(&[
                    "a[href*='facture_pdf.pl']",
                    "a[title*='Facture']",
                ])),
                ..Default::default()
            },
        );

        providers.insert(
            ProviderId::FreeMobile.token().to_string(),
            SelectorOverride {
                username: Some(strings(&["#login-username", "input[name='login']"])),
                password: Some(strings(&["#login-password", "input[type='password']"])),
                submit: Some(strings(&["#login-form button[type='submit']", "button[type='submit']"])),
                download_button: Some(strings(&[
                    "a[download][href*='/api/SI/invoice/']",
                    "a[href*='/api/SI/invoice/'][href*='display=1']",
                ])),
                ..Default::default()
            },
        );

        providers.insert(
            ProviderId::Navigo.token().to_string(),
            SelectorOverride {
                username: Some(strings(&["#id-Mail", "input[name='email']"])),
                password: Some(strings(&["#id-pwd", "input[type='password']"])),
                submit: Some(strings(&["#form-log button[type='submit']", "button[type='submit']"])),
                download_button: Some(strings(&[
                    "button#download-certificate-btn",
                    ".dropdown-menu #download-certificate-btn",
                ])),
                ..Default::default()
            },
        );

        Self {
            defaults: SelectorProfile::default(),
            providers,
            expense: ExpenseSelectors::default(),
            category_label: "work from home".to_string(),
            category_synonyms: vec!["work from home".to_string(), "teletravail".to_string()],
        }
    }
}

impl SelectorConfig {
    /// Resolved profile for a provider: defaults merged with its override.
    /// Unknown identities get the default profile unchanged.
    pub fn profile(&self, provider: ProviderId) -> SelectorProfile {
        match self.providers.get(provider.token()) {
            Some(overrides) => self.defaults.merged(overrides),
            None => self.defaults.clone(),
        }
    }

    /// Load a JSON config file. Top-level fields present in the file replace
    /// the compiled-in value wholesale; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read selector config {}", path.display()))?;
        let config: SelectorConfig = serde_json::from_str(&raw)
            .with_context(|| format!("malformed selector config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_replaces_only_defined_keys() {
        let config = SelectorConfig::default();
        let profile = config.profile(ProviderId::Navigo);

        // Overridden keys.
        assert_eq!(profile.username[0], "#id-Mail");
        assert_eq!(profile.download_button[0], "button#download-certificate-btn");
        // Inherited keys.
        assert_eq!(profile.invoice_links, config.defaults.invoice_links);
        assert_eq!(profile.account_items, config.defaults.account_items);
    }

    #[test]
    fn test_unknown_provider_gets_default_profile() {
        let config = SelectorConfig::default();
        let profile = config.profile(ProviderId::Other);
        assert_eq!(profile.username, config.defaults.username);
        assert_eq!(profile.download_button, config.defaults.download_button);
    }

    #[test]
    fn test_candidate_lists_keep_declared_order() {
        let config = SelectorConfig::default();
        let profile = config.profile(ProviderId::Free);
        assert_eq!(profile.password[0], "#pass_b");
        assert_eq!(profile.password[1], "input[name='pass']");
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("selectors.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "providers": {
                    "navigo_provider": { "username": ["#new-mail-field"] }
                },
                "categoryLabel": "commuting"
            })
            .to_string(),
        )
        .expect("write config");

        let config = SelectorConfig::load(&path).expect("load config");
        assert_eq!(
            config.profile(ProviderId::Navigo).username,
            vec!["#new-mail-field".to_string()]
        );
        assert_eq!(config.category_label, "commuting");
        // Absent top-level fields keep compiled-in defaults.
        assert_eq!(config.defaults.password[0], "#password");
    }

    #[test]
    fn test_expense_defaults_cover_all_form_fields() {
        let expense = ExpenseSelectors::default();
        for list in [
            &expense.merchant,
            &expense.amount,
            &expense.currency,
            &expense.date,
            &expense.tax,
            &expense.description,
            &expense.expense_type_input,
        ] {
            assert!(!list.is_empty());
        }
    }
}
