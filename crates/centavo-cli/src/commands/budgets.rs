//! Budget commands

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;

use centavo_core::views::Views;
use centavo_core::Database;

pub fn cmd_budgets_list(db: &Database, profile: &str) -> Result<()> {
    let views = Views::new(db.clone());
    let lines = views.budget_comparison(profile, Utc::now().date_naive())?;
    if lines.is_empty() {
        println!("No budgets set. Use: centavo budgets set -p {} -s <id> -a <amount>", profile);
        return Ok(());
    }

    println!(
        "{:<30} {:>14} {:>14} {:>14}",
        "SUBCATEGORY", "BUDGET", "SPENT", "REMAINING"
    );
    for line in lines {
        println!(
            "{:<30} {:>14} {:>14} {:>14}{}",
            line.subcategory_name,
            line.budgeted.to_string(),
            line.spent.to_string(),
            line.remaining.to_string(),
            if line.over_budget { "  OVER" } else { "" },
        );
    }
    Ok(())
}

pub fn cmd_budgets_set(
    db: &Database,
    profile: &str,
    subcategory_id: i64,
    amount: &str,
) -> Result<()> {
    let subcategory = db
        .get_subcategory(subcategory_id)?
        .context("unknown subcategory id")?;
    let amount: Decimal = amount.parse().context("amount is not a valid number")?;

    db.set_budget(profile, subcategory_id, amount)?;
    println!(
        "Budget for {} set to {} per month",
        subcategory.full_name(),
        amount
    );
    Ok(())
}
