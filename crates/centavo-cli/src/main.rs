//! Centavo CLI - bank email and statement sync
//!
//! Usage:
//!   centavo init                          Initialize database
//!   centavo profiles add p1 -n Personal -m user@example.com
//!   centavo sync --profile p1             Sync one profile
//!   centavo reconcile --profile p1        Reconcile the latest statement
//!   centavo detect --profile p1           Run the offline detectors
//!
//! Batch exit codes: 0 success, 1 generic failure, 2 mail provider
//! authentication failure, 3 database unreachable.

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let result = run(&cli).await;
    std::process::exit(commands::exit_code(result));
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Profiles { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(ProfilesAction::List { all: false }) => {
                    commands::cmd_profiles_list(&db, false)
                }
                Some(ProfilesAction::List { all }) => commands::cmd_profiles_list(&db, *all),
                Some(ProfilesAction::Add { id, name, mail }) => {
                    commands::cmd_profiles_add(&db, id, name, mail)
                }
                Some(ProfilesAction::Disable { id }) => commands::cmd_profiles_disable(&db, id),
            }
        }
        Commands::Sync { profile } => {
            commands::cmd_sync(&cli.db, cli.no_encrypt, profile.as_deref()).await
        }
        Commands::Reconcile {
            profile,
            statement,
            add_missing,
        } => {
            commands::cmd_reconcile(&cli.db, cli.no_encrypt, profile, *statement, *add_missing)
                .await
        }
        Commands::Detect { profile, kind } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_detect(&db, profile, kind)
        }
        Commands::Review { profile } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_review(&db, profile)
        }
        Commands::Correct {
            transaction,
            subcategory,
            label,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_correct(&db, *transaction, *subcategory, label.as_deref())
        }
        Commands::Budgets { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => Err(anyhow::anyhow!(
                    "specify a budgets action: list or set (see --help)"
                )),
                Some(BudgetsAction::List { profile }) => commands::cmd_budgets_list(&db, profile),
                Some(BudgetsAction::Set {
                    profile,
                    subcategory,
                    amount,
                }) => commands::cmd_budgets_set(&db, profile, *subcategory, amount),
            }
        }
        Commands::Status => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_status(&db)
        }
    }
}
