//! Layered transaction categorization
//!
//! Ordered decision procedure; the first layer to produce a result wins
//! and its source is recorded with the suggestion:
//!
//! 1. Per-profile learned pattern (glob-aware, confidence >= 0.70)
//! 2. SINPE contact default
//! 3. Most recent confirmed transaction for the same merchant
//! 4. Keyword rules indexed by subcategory
//! 5. Auto-approved crowd suggestion
//! 6. LLM fallback (stochastic; provider errors fall through)
//! 7. Uncategorized, flagged for review
//!
//! Layers 1-5 are deterministic for fixed inputs. The LLM layer handles
//! quota exhaustion, provider errors, and malformed JSON by falling
//! through to layer 7 without raising.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::Result;
use crate::llm::{CategoryOption, LlmBackend, LlmClient};
use crate::merchant::normalize_merchant;
use crate::models::{CategorySource, TxnKind};

/// Learned-pattern confidence floor for layer 1
const PATTERN_CONFIDENCE_FLOOR: f64 = 0.70;

/// Confidence inherited from a confirmed same-merchant transaction
const HISTORY_CONFIDENCE: i64 = 95;

/// Keyword match confidence: long keywords are specific, short ones less so
const KEYWORD_HIGH_CONFIDENCE: i64 = 90;
const KEYWORD_MEDIUM_CONFIDENCE: i64 = 75;
const KEYWORD_MIN_LENGTH_FOR_HIGH: usize = 4;

/// Single-keyword matches below this confidence fall through
const AUTO_CATEGORIZE_THRESHOLD: i64 = 80;

/// Crowd suggestions never report below this floor
const CROWD_CONFIDENCE_FLOOR: i64 = 70;

/// LLM answers below this confidence are flagged for review
const LLM_REVIEW_THRESHOLD: i64 = 70;

/// Outcome of the cascade
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryDecision {
    /// Confident assignment
    Hit {
        subcategory_id: i64,
        source: CategorySource,
        /// 0-100
        confidence: i64,
    },
    /// Best guess that a human should confirm
    NeedsReview {
        subcategory_id: Option<i64>,
        source: CategorySource,
        confidence: i64,
        alternatives: Vec<String>,
    },
    /// Nothing matched anywhere
    Uncategorized,
}

/// Extract the contact key from a SINPE descriptor: the phone number when
/// one is present, otherwise a name prefix.
pub fn sinpe_contact_key(merchant_raw: &str) -> Option<String> {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    let phone = PHONE.get_or_init(|| Regex::new(r"(\d{8})").expect("static regex"));

    let upper = merchant_raw.to_uppercase();
    let rest = upper.strip_prefix("SINPE")?.trim();

    if let Some(caps) = phone.captures(rest) {
        return Some(format!("tel:{}", &caps[1]));
    }
    if rest.is_empty() {
        return None;
    }
    let prefix: String = rest.chars().take(10).collect();
    Some(format!("name:{}", prefix.trim_end()))
}

/// The categorization cascade
pub struct Categorizer {
    db: Database,
    llm: Option<LlmClient>,
}

impl Categorizer {
    pub fn new(db: Database, llm: Option<LlmClient>) -> Self {
        Self { db, llm }
    }

    /// Run the cascade for one transaction's merchant.
    pub async fn categorize(
        &self,
        profile_id: &str,
        merchant_raw: &str,
        merchant_id: Option<i64>,
        amount_local: Decimal,
        kind: TxnKind,
    ) -> Result<CategoryDecision> {
        let merchant_key = normalize_merchant(merchant_raw);

        // 1. User preference
        if let Some(pattern) = self.db.find_matching_pattern(profile_id, &merchant_key)? {
            let confidence = pattern.confidence.to_f64().unwrap_or(0.0);
            if confidence >= PATTERN_CONFIDENCE_FLOOR {
                self.db.record_pattern_match(pattern.id, amount_local)?;
                debug!(
                    %merchant_key,
                    pattern = %pattern.pattern_key,
                    "categorized by learned pattern"
                );
                return Ok(CategoryDecision::Hit {
                    subcategory_id: pattern.subcategory_id,
                    source: CategorySource::UserPreference,
                    confidence: (confidence * 100.0) as i64,
                });
            }
        }

        // 2. SINPE contact
        if kind == TxnKind::Sinpe {
            if let Some(key) = sinpe_contact_key(merchant_raw) {
                if let Some(contact) = self.db.get_contact(profile_id, &key)? {
                    if let Some(subcategory_id) = contact.default_subcategory_id {
                        debug!(merchant_raw, contact = %contact.display_name, "categorized by SINPE contact");
                        return Ok(CategoryDecision::Hit {
                            subcategory_id,
                            source: CategorySource::SinpeContact,
                            confidence: 90,
                        });
                    }
                }
            }
        }

        // 3. History: inherit from the latest confirmed same-merchant txn
        if let Some(merchant_id) = merchant_id {
            if let Some(previous) = self
                .db
                .latest_confirmed_for_merchant(profile_id, merchant_id)?
            {
                if let Some(subcategory_id) = previous.subcategory_id {
                    debug!(%merchant_key, "categorized from history");
                    return Ok(CategoryDecision::Hit {
                        subcategory_id,
                        source: CategorySource::History,
                        confidence: HISTORY_CONFIDENCE,
                    });
                }
            }
        }

        // 4. Keyword rules
        if let Some(decision) = self.categorize_by_keywords(merchant_raw)? {
            return Ok(decision);
        }

        // 5. Crowd suggestion
        if let Some(suggestion) = self.db.find_approved_suggestion(&merchant_key)? {
            let confidence = ((suggestion.confidence.to_f64().unwrap_or(0.0) * 100.0) as i64)
                .max(CROWD_CONFIDENCE_FLOOR);
            debug!(%merchant_key, users = suggestion.user_count, "categorized by crowd suggestion");
            return Ok(CategoryDecision::Hit {
                subcategory_id: suggestion.suggested_subcategory_id,
                source: CategorySource::Crowd,
                confidence,
            });
        }

        // 6. LLM fallback
        if let Some(llm) = &self.llm {
            match self.categorize_with_llm(llm, merchant_raw, amount_local).await {
                Ok(Some(decision)) => return Ok(decision),
                Ok(None) => {}
                Err(e) => {
                    // Quota, provider, and parse errors all fall through
                    warn!(merchant_raw, error = %e, "LLM categorization failed, giving up");
                }
            }
        }

        // 7. Give up
        Ok(CategoryDecision::Uncategorized)
    }

    /// Layer 4: scan the raw merchant string for subcategory keywords.
    ///
    /// A single sufficiently specific match auto-assigns; multiple matches
    /// return the top one flagged for review with the alternatives listed.
    fn categorize_by_keywords(&self, merchant_raw: &str) -> Result<Option<CategoryDecision>> {
        let merchant_lower = merchant_raw.to_lowercase();

        let mut matches: Vec<(i64, String, i64)> = Vec::new();
        for subcat in self.db.list_subcategories()? {
            let Some(keywords) = &subcat.keywords else {
                continue;
            };
            for keyword in keywords.split(',') {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() || !merchant_lower.contains(&keyword) {
                    continue;
                }
                let confidence = if keyword.len() > KEYWORD_MIN_LENGTH_FOR_HIGH {
                    KEYWORD_HIGH_CONFIDENCE
                } else {
                    KEYWORD_MEDIUM_CONFIDENCE
                };
                matches.push((subcat.id, subcat.full_name(), confidence));
                break; // One keyword per subcategory is enough
            }
        }

        matches.sort_by(|a, b| b.2.cmp(&a.2));

        match matches.len() {
            0 => Ok(None),
            1 if matches[0].2 >= AUTO_CATEGORIZE_THRESHOLD => Ok(Some(CategoryDecision::Hit {
                subcategory_id: matches[0].0,
                source: CategorySource::Keyword,
                confidence: matches[0].2,
            })),
            1 => Ok(None), // Single weak match: let later layers try
            _ => Ok(Some(CategoryDecision::NeedsReview {
                subcategory_id: Some(matches[0].0),
                source: CategorySource::Keyword,
                confidence: matches[0].2,
                alternatives: matches.iter().skip(1).take(2).map(|m| m.1.clone()).collect(),
            })),
        }
    }

    /// Layer 6: ask the vendor model. Only subcategory names and
    /// descriptions leave the process, never user data.
    async fn categorize_with_llm(
        &self,
        llm: &LlmClient,
        merchant_raw: &str,
        amount_local: Decimal,
    ) -> Result<Option<CategoryDecision>> {
        let options: Vec<CategoryOption> = self
            .db
            .list_subcategories()?
            .into_iter()
            .map(|s| CategoryOption {
                id: s.id,
                name: s.full_name(),
                description: s.description.unwrap_or_default(),
            })
            .collect();
        if options.is_empty() {
            return Ok(None);
        }

        let response = llm
            .categorize(merchant_raw, &amount_local.to_string(), &options)
            .await?;

        // The model must pick from the offered catalog
        let subcategory_id = response
            .subcategory_id
            .filter(|id| options.iter().any(|o| o.id == *id));
        let Some(subcategory_id) = subcategory_id else {
            return Ok(None);
        };

        if response.confidence < LLM_REVIEW_THRESHOLD {
            return Ok(Some(CategoryDecision::NeedsReview {
                subcategory_id: Some(subcategory_id),
                source: CategorySource::Llm,
                confidence: response.confidence,
                alternatives: response.alternatives,
            }));
        }

        Ok(Some(CategoryDecision::Hit {
            subcategory_id,
            source: CategorySource::Llm,
            confidence: response.confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmCategorization, MockBackend};
    use crate::models::PatternSource;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn setup() -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "user@example.com").unwrap();
        let subcat = db
            .create_subcategory("Familia", "Apoyo familiar", None, None)
            .unwrap();
        (db, subcat)
    }

    #[test]
    fn test_sinpe_contact_key() {
        assert_eq!(
            sinpe_contact_key("SINPE 88887777"),
            Some("tel:88887777".to_string())
        );
        assert_eq!(
            sinpe_contact_key("SINPE MARIA ROSA CRUZ"),
            Some("name:MARIA ROSA".to_string())
        );
        assert_eq!(sinpe_contact_key("WALMART"), None);
    }

    #[tokio::test]
    async fn test_learned_pattern_wins() {
        let (db, subcat) = setup();
        let conn = db.conn().unwrap();
        Database::upsert_learned_pattern_on(
            &conn,
            "p1",
            "SINPE MARIA%",
            subcat,
            Some("Familia"),
            PatternSource::Correction,
            Utc::now(),
        )
        .unwrap();
        drop(conn);

        let categorizer = Categorizer::new(db, None);
        let decision = categorizer
            .categorize("p1", "SINPE MARIA CRUZ", None, dec!(50000), TxnKind::Sinpe)
            .await
            .unwrap();

        match decision {
            CategoryDecision::Hit {
                subcategory_id,
                source,
                confidence,
            } => {
                assert_eq!(subcategory_id, subcat);
                assert_eq!(source, CategorySource::UserPreference);
                assert!(confidence >= 70);
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keyword_single_strong_match() {
        let (db, _) = setup();
        let streaming = db
            .create_subcategory("Entretenimiento", "Streaming", None, Some("netflix,spotify"))
            .unwrap();

        let categorizer = Categorizer::new(db, None);
        let decision = categorizer
            .categorize("p1", "NETFLIX.COM", None, dec!(5500), TxnKind::Purchase)
            .await
            .unwrap();

        assert_eq!(
            decision,
            CategoryDecision::Hit {
                subcategory_id: streaming,
                source: CategorySource::Keyword,
                confidence: 90,
            }
        );
    }

    #[tokio::test]
    async fn test_keyword_multiple_matches_need_review() {
        let (db, _) = setup();
        db.create_subcategory("Alimentación", "Supermercado", None, Some("walmart"))
            .unwrap();
        db.create_subcategory("Compras", "Tiendas", None, Some("walmart"))
            .unwrap();

        let categorizer = Categorizer::new(db, None);
        let decision = categorizer
            .categorize("p1", "WALMART HEREDIA", None, dec!(15000), TxnKind::Purchase)
            .await
            .unwrap();

        match decision {
            CategoryDecision::NeedsReview { alternatives, .. } => {
                assert_eq!(alternatives.len(), 1);
            }
            other => panic!("expected needs-review, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_llm_quota_falls_through_to_uncategorized() {
        let (db, _) = setup();
        let mock = MockBackend::new();
        mock.fail_with_quota();
        let categorizer = Categorizer::new(db, Some(LlmClient::Mock(mock)));

        let decision = categorizer
            .categorize("p1", "COMERCIO RARO XYZ", None, dec!(1000), TxnKind::Purchase)
            .await
            .unwrap();
        assert_eq!(decision, CategoryDecision::Uncategorized);
    }

    #[tokio::test]
    async fn test_llm_low_confidence_needs_review() {
        let (db, subcat) = setup();
        let mock = MockBackend::new();
        mock.push_categorization(LlmCategorization {
            subcategory_id: Some(subcat),
            suggested_name: "Familia/Apoyo familiar".to_string(),
            confidence: 55,
            alternatives: vec!["Otros".to_string()],
            reason: "unsure".to_string(),
        });
        let categorizer = Categorizer::new(db, Some(LlmClient::Mock(mock)));

        let decision = categorizer
            .categorize("p1", "COMERCIO RARO XYZ", None, dec!(1000), TxnKind::Purchase)
            .await
            .unwrap();
        match decision {
            CategoryDecision::NeedsReview {
                source, confidence, ..
            } => {
                assert_eq!(source, CategorySource::Llm);
                assert_eq!(confidence, 55);
            }
            other => panic!("expected needs-review, got {:?}", other),
        }
    }
}
