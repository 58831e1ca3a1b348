//! Status command

use anyhow::Result;

use centavo_core::views::Views;
use centavo_core::Database;

pub fn cmd_status(db: &Database) -> Result<()> {
    let profiles = db.list_profiles(true)?;
    if profiles.is_empty() {
        println!("No profiles yet. Run: centavo profiles add <id> -n <name> -m <mail>");
        return Ok(());
    }

    let views = Views::new(db.clone());
    for profile in profiles {
        let stats = views.profile_stats(&profile.id)?;
        println!(
            "{} ({}){}",
            profile.id,
            profile.name,
            if profile.active { "" } else { " [disabled]" }
        );
        println!(
            "  last sync: {}   last statement: {}   cycle: {} days",
            profile
                .last_sync_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "never".to_string()),
            profile
                .last_statement_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string()),
            profile
                .statement_cycle_days
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
        println!(
            "  {} transactions, {} for review, {} anomalies, {} active subscriptions",
            stats.total_transactions,
            stats.needs_review,
            stats.anomalies,
            stats.active_subscriptions,
        );
    }
    Ok(())
}
