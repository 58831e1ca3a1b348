//! Reconciliation command

use std::path::Path;

use anyhow::{Context, Result};

use centavo_core::reconcile::ReconciliationEngine;
use centavo_core::sync::SyncConfig;

use super::{build_processor, open_db};

pub async fn cmd_reconcile(
    db_path: &Path,
    no_encrypt: bool,
    profile: &str,
    statement: Option<i64>,
    add_missing: bool,
) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;

    let statement_id = match statement {
        Some(id) => id,
        None => db
            .list_statements(profile)?
            .first()
            .map(|s| s.id)
            .context("no statements stored for this profile")?,
    };

    let traslape = SyncConfig::default().traslape_days;
    let engine = ReconciliationEngine::new(db.clone(), traslape);
    let report = engine.reconcile(profile, statement_id)?;

    println!(
        "Statement {}: {}/{} matched ({:.1}%, {})",
        statement_id,
        report.matched.len(),
        report.total_pdf,
        report.match_percentage,
        report.status.as_str(),
    );
    println!(
        "  {} amount mismatches, {} only in PDF, {} only in system",
        report.amount_mismatches.len(),
        report.only_in_pdf.len(),
        report.only_in_system.len(),
    );

    for mismatch in &report.amount_mismatches {
        println!(
            "  mismatch: row {} ({}) vs transaction {} ({})",
            mismatch.row_id,
            mismatch.row_amount,
            mismatch.transaction_id,
            mismatch.transaction_amount,
        );
    }
    for row in &report.only_in_pdf {
        println!(
            "  only in PDF: {} {} {} {}",
            row.reference, row.date, row.description, row.amount
        );
    }

    if add_missing && !report.only_in_pdf.is_empty() {
        let statement_record = db
            .get_statement(statement_id)?
            .context("statement disappeared mid-run")?;
        let processor = build_processor(&db)?;
        let stats = processor
            .process_stored_rows(profile, &statement_record, &report.only_in_pdf)
            .await?;
        println!(
            "Added {} missing rows ({} duplicates, {} errors)",
            stats.processed, stats.duplicates, stats.errors
        );

        let report = engine.reconcile(profile, statement_id)?;
        println!(
            "After adding: {}/{} matched ({:.1}%)",
            report.matched.len(),
            report.total_pdf,
            report.match_percentage,
        );
    }

    Ok(())
}
