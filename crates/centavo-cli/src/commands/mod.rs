//! Command implementations

mod budgets;
mod detect;
mod profiles;
mod reconcile;
mod review;
mod status;
mod sync;

pub use budgets::{cmd_budgets_list, cmd_budgets_set};
pub use detect::cmd_detect;
pub use profiles::{cmd_profiles_add, cmd_profiles_disable, cmd_profiles_list};
pub use reconcile::cmd_reconcile;
pub use review::{cmd_correct, cmd_review};
pub use status::cmd_status;
pub use sync::cmd_sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use centavo_core::categorize::Categorizer;
use centavo_core::fx::ExchangeRateCache;
use centavo_core::ingest::TransactionProcessor;
use centavo_core::llm::LlmClient;
use centavo_core::mail::{MailClient, MailConfig};
use centavo_core::parse::statement::{PlainTextExtractor, StatementParser};
use centavo_core::sync::{SyncConfig, SyncEngine};
use centavo_core::{Database, Error};

/// Batch exit codes (0 success, 1 generic, 2 mail auth, 3 database)
pub fn exit_code(result: Result<()>) -> i32 {
    let Err(error) = result else {
        return 0;
    };
    eprintln!("Error: {:#}", error);

    match error.downcast_ref::<Error>() {
        Some(Error::MailAuth(_)) => 2,
        Some(Error::Database(_)) | Some(Error::Pool(_)) | Some(Error::Encryption(_)) => 3,
        _ => 1,
    }
}

/// Open the database, honoring the encryption flag
pub fn open_db(path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = path.to_string_lossy();
    let db = if no_encrypt {
        Database::new_unencrypted(&path_str)
    } else {
        Database::new(&path_str)
    };
    db.context("failed to open database")
}

/// Initialize the database and seed the subcategory catalog
pub fn cmd_init(path: &Path, no_encrypt: bool) -> Result<()> {
    let db = open_db(path, no_encrypt)?;
    db.seed_subcategories()?;
    println!("Database initialized at {}", path.display());
    println!("{} subcategories available", db.list_subcategories()?.len());
    Ok(())
}

/// The composition root: wire storage, mail, FX, LLM, and the pipeline
/// into a sync engine. Global state in older designs becomes injected
/// dependencies here.
pub fn build_sync_engine(db: &Database) -> Result<SyncEngine> {
    let mail_config = MailConfig::from_env().context(
        "mail provider not configured; set CENTAVO_MAIL_URL and CENTAVO_MAIL_TOKEN",
    )?;
    let mail = MailClient::new(mail_config)?;

    let llm = LlmClient::from_env();
    let fx = Arc::new(ExchangeRateCache::from_env(db.clone())?);
    let categorizer = Categorizer::new(db.clone(), llm.clone());
    let processor = TransactionProcessor::new(db.clone(), fx, categorizer);
    let statement_parser = StatementParser::new(llm);

    Ok(SyncEngine::new(
        db.clone(),
        mail,
        processor,
        statement_parser,
        Box::new(PlainTextExtractor),
        SyncConfig::default(),
    ))
}

/// Build just the ingestion processor (for reconcile --add-missing)
pub fn build_processor(db: &Database) -> Result<TransactionProcessor> {
    let llm = LlmClient::from_env();
    let fx = Arc::new(ExchangeRateCache::from_env(db.clone())?);
    let categorizer = Categorizer::new(db.clone(), llm);
    Ok(TransactionProcessor::new(db.clone(), fx, categorizer))
}
