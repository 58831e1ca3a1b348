//! Offline detector commands

use anyhow::{bail, Result};
use chrono::Utc;

use centavo_core::anomaly::AnomalyDetector;
use centavo_core::dedup;
use centavo_core::recurring::RecurringDetector;
use centavo_core::Database;

pub fn cmd_detect(db: &Database, profile: &str, kind: &str) -> Result<()> {
    let today = Utc::now().date_naive();
    let mut ran = false;

    if kind == "recurring" || kind == "all" {
        ran = true;
        let detector = RecurringDetector::new(db.clone());
        let stats = detector.sync(profile, today)?;
        println!(
            "Recurring: {} detected, {} persisted, {} deactivated",
            stats.detected, stats.persisted, stats.deactivated
        );

        for alert in detector.upcoming_alerts(profile, today)? {
            let marker = if alert.urgent { "OVERDUE" } else { "upcoming" };
            println!(
                "  {} {}: ~{} expected {} ({} days)",
                marker, alert.merchant_key, alert.amount, alert.expected_on, alert.days_until
            );
        }
    }

    if kind == "duplicates" || kind == "all" {
        ran = true;
        let transactions = db.list_transactions(profile)?;
        let matches = dedup::find_duplicates(&transactions);
        println!("Duplicates: {} candidate pairs", matches.len());
        for candidate in matches {
            println!(
                "  {} ~ {} (score {}): {}",
                candidate.transaction_a,
                candidate.transaction_b,
                candidate.similarity_score,
                candidate.reasons.join(", "),
            );
        }
    }

    if kind == "anomalies" || kind == "all" {
        ran = true;
        let detector = AnomalyDetector::new(db.clone());
        let flagged = detector.detect(profile, today)?;
        println!("Anomalies: {} newly flagged", flagged);
    }

    if !ran {
        bail!("unknown detection kind '{}' (recurring, duplicates, anomalies, all)", kind);
    }
    Ok(())
}
