//! Read models for the dashboard surface
//!
//! Derived views over stored data: the review queue, budget comparison,
//! and headline stats. Each answers from the read cache or one indexed
//! query; nothing here writes.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::ReadCache;
use crate::db::Database;
use crate::error::Result;
use crate::models::Transaction;

/// Budget line: planned vs spent for one subcategory, month to date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLine {
    pub subcategory_id: i64,
    pub subcategory_name: String,
    pub budgeted: Decimal,
    pub spent: Decimal,
    pub remaining: Decimal,
    pub over_budget: bool,
}

/// Headline numbers for a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileStats {
    pub total_transactions: i64,
    pub needs_review: i64,
    pub anomalies: i64,
    pub active_subscriptions: i64,
}

/// Read-model layer over the database with a shared cache
pub struct Views {
    db: Database,
    stats_cache: Arc<ReadCache<ProfileStats>>,
    budget_cache: Arc<ReadCache<Vec<BudgetLine>>>,
}

impl Views {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            stats_cache: Arc::new(ReadCache::new()),
            budget_cache: Arc::new(ReadCache::new()),
        }
    }

    /// Transactions waiting for the user's category decision
    pub fn review_queue(&self, profile_id: &str) -> Result<Vec<Transaction>> {
        self.db.transactions_needing_review(profile_id)
    }

    /// Month-to-date spend against each active budget
    pub fn budget_comparison(&self, profile_id: &str, today: NaiveDate) -> Result<Vec<BudgetLine>> {
        self.budget_cache.get_or_insert_with(profile_id, "budget", || {
            let month_start =
                NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("month start");
            let spent = self.db.spend_by_subcategory(profile_id, month_start, today)?;

            let mut lines = Vec::new();
            for budget in self.db.list_budgets(profile_id)? {
                let name = self
                    .db
                    .get_subcategory(budget.subcategory_id)?
                    .map(|s| s.full_name())
                    .unwrap_or_else(|| format!("#{}", budget.subcategory_id));
                let spent_amount = spent
                    .iter()
                    .find(|(id, _)| *id == budget.subcategory_id)
                    .map(|(_, amount)| amount.abs())
                    .unwrap_or_default();
                let remaining = budget.monthly_amount - spent_amount;
                lines.push(BudgetLine {
                    subcategory_id: budget.subcategory_id,
                    subcategory_name: name,
                    budgeted: budget.monthly_amount,
                    spent: spent_amount,
                    remaining,
                    over_budget: remaining < Decimal::ZERO,
                });
            }
            Ok(lines)
        })
    }

    /// Headline stats from single aggregate queries
    pub fn profile_stats(&self, profile_id: &str) -> Result<ProfileStats> {
        self.stats_cache.get_or_insert_with(profile_id, "stats", || {
            let conn = self.db.conn()?;
            let (total, review, anomalies): (i64, i64, i64) = conn.query_row(
                r#"
                SELECT COUNT(*),
                       SUM(CASE WHEN category_needs_review = 1 THEN 1 ELSE 0 END),
                       SUM(CASE WHEN is_anomaly = 1 THEN 1 ELSE 0 END)
                FROM "transaction" WHERE profile_id = ?
                "#,
                rusqlite::params![profile_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    ))
                },
            )?;
            let subscriptions: i64 = conn.query_row(
                "SELECT COUNT(*) FROM subscription WHERE profile_id = ? AND active = 1",
                rusqlite::params![profile_id],
                |row| row.get(0),
            )?;
            Ok(ProfileStats {
                total_transactions: total,
                needs_review: review,
                anomalies,
                active_subscriptions: subscriptions,
            })
        })
    }

    /// Drop cached views for a profile. Call after a sync or correction
    /// commits; reads never block on it.
    pub fn invalidate(&self, profile_id: &str) {
        self.stats_cache.invalidate(profile_id);
        self.budget_cache.invalidate(profile_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_budget_comparison_empty_profile() {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "u@example.com").unwrap();
        let subcat = db
            .create_subcategory("Hogar", "Servicios", None, None)
            .unwrap();
        db.set_budget("p1", subcat, dec!(100000)).unwrap();

        let views = Views::new(db);
        let today = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap();
        let lines = views.budget_comparison("p1", today).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].budgeted, dec!(100000));
        assert_eq!(lines[0].spent, dec!(0));
        assert!(!lines[0].over_budget);
    }

    #[test]
    fn test_profile_stats_counts() {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "u@example.com").unwrap();
        let views = Views::new(db);
        let stats = views.profile_stats("p1").unwrap();
        assert_eq!(stats.total_transactions, 0);
        assert_eq!(stats.needs_review, 0);
    }
}
