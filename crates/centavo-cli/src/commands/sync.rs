//! Sync command

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use centavo_core::models::IngestStats;
use centavo_core::sync::{SyncOutcome, SyncScheduler};

use super::{build_sync_engine, open_db};

pub async fn cmd_sync(db_path: &Path, no_encrypt: bool, profile: Option<&str>) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;
    let engine = Arc::new(build_sync_engine(&db)?);
    let scheduler = Arc::new(SyncScheduler::new(engine));

    match profile {
        Some(profile_id) => {
            let outcome = scheduler.sync_profile(profile_id).await?;
            print_outcome(profile_id, &outcome);
            Ok(())
        }
        None => {
            let results = scheduler.sync_all().await;
            let mut first_error = None;
            for (profile_id, result) in results {
                match result {
                    Ok(outcome) => print_outcome(&profile_id, &outcome),
                    Err(e) => {
                        eprintln!("{}: sync failed: {}", profile_id, e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            match first_error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
    }
}

fn print_outcome(profile_id: &str, outcome: &SyncOutcome) {
    println!("{}: {} sync complete", profile_id, outcome.mode.as_str());
    print_stats("  emails", &outcome.email_stats);
    if let Some(stats) = &outcome.statement_stats {
        print_stats("  statement", stats);
    }
    if let Some(report) = &outcome.reconciliation {
        println!(
            "  reconciliation: {}/{} matched ({:.1}%, {})",
            report.matched.len(),
            report.total_pdf,
            report.match_percentage,
            report.status.as_str(),
        );
    }
}

fn print_stats(label: &str, stats: &IngestStats) {
    println!(
        "{}: {} processed, {} duplicates, {} errors, {} converted, {} auto-categorized, {} for review",
        label,
        stats.processed,
        stats.duplicates,
        stats.errors,
        stats.fx_converted,
        stats.auto_categorized,
        stats.needs_review,
    );
}
