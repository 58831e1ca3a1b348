//! Merchant descriptor normalization
//!
//! Raw bank descriptors vary per transaction ("AUTOMERCADO ESCAZU 00291",
//! "AUTOMERCADO*ESC"). Normalization produces a stable lookup key so all
//! variants resolve to one canonical merchant, with a fuzzy second pass
//! that merges near-duplicates.

use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::Merchant;

/// Location tokens dropped from descriptors (store-branch suffixes)
const LOCATION_TOKENS: &[&str] = &[
    "SAN JOSE",
    "ESCAZU",
    "HEREDIA",
    "ALAJUELA",
    "CARTAGO",
    "CURRIDABAT",
    "SANTA ANA",
    "GUADALUPE",
    "TIBAS",
    "LIBERIA",
    "MORAVIA",
    "DESAMPARADOS",
    "COSTA RICA",
    "CR",
];

/// Maximum edit distance for the fuzzy merge pass
const FUZZY_MAX_DISTANCE: usize = 2;

/// Strip Spanish diacritics so "JOSÉ" and "JOSE" key identically
fn strip_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            'Á' | 'À' | 'Ä' => 'A',
            'É' | 'È' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            'Ñ' => 'N',
            _ => c,
        })
        .collect()
}

/// Whether a token looks like a trailing reference code (8+ alphanumeric
/// characters containing at least one digit)
fn is_reference_token(token: &str) -> bool {
    token.len() >= 8
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().any(|c| c.is_ascii_digit())
}

/// Normalize a raw descriptor into the canonical merchant lookup key.
///
/// Pipeline: uppercase → strip diacritics → drop trailing reference
/// tokens → drop `*CODE` suffixes → drop known location tokens.
///
/// SINPE descriptors collapse to a first-name family key
/// (`"SINPE MARIA ROSA CRUZ"` → `"SINPE MARIA%"`) so repeated transfers
/// to the same person share one merchant.
pub fn normalize_merchant(raw: &str) -> String {
    let upper = strip_diacritics(raw).to_uppercase();
    let upper = upper.trim();

    if let Some(rest) = upper.strip_prefix("SINPE ") {
        let first = rest
            .split_whitespace()
            .find(|w| !w.chars().all(|c| c.is_ascii_digit()));
        return match first {
            Some(name) => format!("SINPE {}%", name),
            None => "SINPE%".to_string(),
        };
    }

    // Drop *CODE suffixes: "NETFLIX.COM*4A5B2" -> "NETFLIX.COM"
    let without_codes: String = upper
        .split_whitespace()
        .map(|token| match token.find('*') {
            Some(0) => "",
            Some(pos) => &token[..pos],
            None => token,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    // Drop trailing reference tokens
    let mut tokens: Vec<&str> = without_codes.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if is_reference_token(last) || last.chars().all(|c| c.is_ascii_digit()) {
            tokens.pop();
        } else {
            break;
        }
    }
    let mut key = tokens.join(" ");

    // Drop location suffixes
    for location in LOCATION_TOKENS {
        if let Some(stripped) = key.strip_suffix(location) {
            key = stripped.trim_end().to_string();
        }
    }

    if key.is_empty() {
        upper.to_string()
    } else {
        key
    }
}

/// First significant word of a merchant key (skips pure digits)
fn first_significant_word(key: &str) -> Option<&str> {
    key.split_whitespace()
        .find(|w| !w.chars().all(|c| c.is_ascii_digit()))
}

/// Whether two normalized keys denote the same merchant: edit distance
/// within tolerance and a shared first significant word.
pub fn keys_equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (first_significant_word(a), first_significant_word(b)) {
        (Some(wa), Some(wb)) if wa == wb => strsim::levenshtein(a, b) <= FUZZY_MAX_DISTANCE,
        _ => false,
    }
}

/// Resolves raw descriptors to canonical merchants
pub struct MerchantNormalizer {
    db: Database,
}

impl MerchantNormalizer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find the canonical merchant for a raw descriptor, creating it on
    /// first sighting. Near-duplicates merge into the existing record and
    /// the raw descriptor is kept as an alias either way.
    pub fn find_or_create(
        &self,
        raw: &str,
        city: Option<&str>,
        country: Option<&str>,
    ) -> Result<Merchant> {
        let key = normalize_merchant(raw);

        if let Some(merchant) = self.db.get_merchant_by_key(&key)? {
            self.db.add_merchant_alias(merchant.id, raw)?;
            return Ok(merchant);
        }

        // Fuzzy pass over existing merchants before creating a new one
        for existing in self.db.list_merchants()? {
            if keys_equivalent(&key, &existing.normalized_name) {
                debug!(
                    raw,
                    %key,
                    merged_into = %existing.normalized_name,
                    "merchant merged into near-duplicate"
                );
                self.db.add_merchant_alias(existing.id, raw)?;
                return Ok(existing);
            }
        }

        let display_name = title_case(&key);
        let id = self
            .db
            .create_merchant(&key, &display_name, city, country, raw)?;
        self.db
            .get_merchant(id)?
            .ok_or_else(|| crate::error::Error::NotFound(format!("merchant {}", id)))
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_reference_tokens() {
        assert_eq!(normalize_merchant("UBER TRIP 8837429384"), "UBER TRIP");
        assert_eq!(normalize_merchant("AUTOMERCADO 00291"), "AUTOMERCADO");
    }

    #[test]
    fn test_normalize_strips_star_codes() {
        assert_eq!(normalize_merchant("NETFLIX.COM*4A5B2"), "NETFLIX.COM");
        assert_eq!(normalize_merchant("PAYPAL *SPOTIFY"), "PAYPAL");
    }

    #[test]
    fn test_normalize_strips_locations() {
        assert_eq!(normalize_merchant("AUTOMERCADO ESCAZU"), "AUTOMERCADO");
        assert_eq!(normalize_merchant("Walmart Heredia"), "WALMART");
    }

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize_merchant("PANADERÍA JOSÉ"), "PANADERIA JOSE");
    }

    #[test]
    fn test_sinpe_family_key() {
        assert_eq!(normalize_merchant("SINPE MARIA ROSA CRUZ"), "SINPE MARIA%");
        assert_eq!(normalize_merchant("SINPE MARIA CRUZ"), "SINPE MARIA%");
        // Numeric-only SINPE reference gets the bare family key
        assert_eq!(normalize_merchant("SINPE 88887777"), "SINPE%");
    }

    #[test]
    fn test_keys_equivalent_tolerates_typos() {
        assert!(keys_equivalent("AUTOMERCADO", "AUTOMERCADO"));
        assert!(keys_equivalent("WALMART SA", "WALMART S.A"));
        // Too far apart even with a shared first word
        assert!(!keys_equivalent("UBER EATS", "UBER"));
        // Different first word: never equivalent regardless of distance
        assert!(!keys_equivalent("MAXI PALI", "MEGA PALI"));
    }

    #[test]
    fn test_find_or_create_merges_variants() {
        let db = Database::in_memory().unwrap();
        let normalizer = MerchantNormalizer::new(db.clone());

        let first = normalizer
            .find_or_create("AUTOMERCADO ESCAZU 00291", None, None)
            .unwrap();
        let second = normalizer
            .find_or_create("AUTOMERCADO HEREDIA", None, None)
            .unwrap();
        assert_eq!(first.id, second.id);

        let merchant = db.get_merchant(first.id).unwrap().unwrap();
        assert_eq!(merchant.aliases.len(), 2);
    }
}
