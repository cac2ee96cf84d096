//! Locale-insensitive text comparison.
//!
//! The same UI renders the same label with and without diacritics depending
//! on locale negotiation, so visible-label matching folds accents away.
//! Folding is idempotent: folding an already-folded string yields itself.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, collapse whitespace runs to a single space, trim.
pub fn normalize(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full comparison key: NFD-decompose, strip combining marks, then
/// [`normalize`]. `"Téléchargér"` and `"telechargér "` fold to the same key.
pub fn fold(value: &str) -> String {
    let stripped: String = value.nfd().filter(|c| !is_combining_mark(*c)).collect();
    normalize(&stripped)
}

/// True when `haystack` contains `needle` after folding both sides.
pub fn fold_contains(haystack: &str, needle: &str) -> bool {
    fold(haystack).contains(&fold(needle))
}

/// Map a French month name (accented or not) to its two-digit number.
pub fn french_month_number(name: &str) -> Option<&'static str> {
    match fold(name).as_str() {
        "janvier" => Some("01"),
        "fevrier" => Some("02"),
        "mars" => Some("03"),
        "avril" => Some("04"),
        "mai" => Some("05"),
        "juin" => Some("06"),
        "juillet" => Some("07"),
        "aout" => Some("08"),
        "septembre" => Some("09"),
        "octobre" => Some("10"),
        "novembre" => Some("11"),
        "decembre" => Some("12"),
        _ => None,
    }
}

/// Regex alternation of every French month name, accented and plain forms.
pub const FRENCH_MONTHS_PATTERN: &str = "janvier|fevrier|février|mars|avril|mai|juin|juillet|aout|août|septembre|octobre|novembre|decembre|décembre";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Mes   Factures \n"), "mes factures");
    }

    #[test]
    fn test_fold_strips_diacritics_and_case() {
        assert_eq!(fold("Télécharger mes Attestations"), "telecharger mes attestations");
        assert_eq!(fold("prélèvements"), "prelevements");
        assert_eq!(fold("Déconnexion"), "deconnexion");
    }

    #[test]
    fn test_fold_is_idempotent() {
        let once = fold("  Code de Vérification  ");
        assert_eq!(fold(&once), once);
    }

    #[test]
    fn test_diacritic_case_whitespace_variants_share_a_key() {
        assert_eq!(fold("téléchargér  ma\tfacture"), fold("TELECHARGER MA FACTURE"));
    }

    #[test]
    fn test_fold_contains() {
        assert!(fold_contains("Consulter mes prélèvements", "prelevements"));
        assert!(!fold_contains("Mes services", "facture"));
    }

    #[test]
    fn test_french_month_number() {
        assert_eq!(french_month_number("août"), Some("08"));
        assert_eq!(french_month_number("Aout"), Some("08"));
        assert_eq!(french_month_number("décembre"), Some("12"));
        assert_eq!(french_month_number("smarch"), None);
    }
}
