//! Review queue and correction commands

use anyhow::{Context, Result};

use centavo_core::learn::FeedbackService;
use centavo_core::views::Views;
use centavo_core::Database;

pub fn cmd_review(db: &Database, profile: &str) -> Result<()> {
    let views = Views::new(db.clone());
    let queue = views.review_queue(profile)?;
    if queue.is_empty() {
        println!("Nothing to review.");
        return Ok(());
    }

    println!(
        "{:<8} {:<12} {:<34} {:>14} {:<12}",
        "ID", "DATE", "MERCHANT", "AMOUNT", "SUGGESTED"
    );
    for txn in queue {
        let suggested = match txn.subcategory_id {
            Some(id) => db
                .get_subcategory(id)?
                .map(|s| s.full_name())
                .unwrap_or_else(|| format!("#{}", id)),
            None => "-".to_string(),
        };
        println!(
            "{:<8} {:<12} {:<34} {:>14} {:<12}",
            txn.id,
            txn.txn_time.date_naive(),
            truncate(&txn.merchant_raw, 32),
            txn.amount_local.to_string(),
            suggested,
        );
    }
    println!("\nCorrect with: centavo correct -t <id> -s <subcategory-id>");
    Ok(())
}

pub fn cmd_correct(
    db: &Database,
    transaction_id: i64,
    subcategory_id: i64,
    label: Option<&str>,
) -> Result<()> {
    let subcategory = db
        .get_subcategory(subcategory_id)?
        .context("unknown subcategory id")?;

    let service = FeedbackService::new(db.clone());
    let updated = service.record_correction(transaction_id, subcategory_id, label)?;

    println!(
        "Transaction {} -> {} (learned for future '{}' activity)",
        updated.id,
        subcategory.full_name(),
        updated.merchant_raw,
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}
