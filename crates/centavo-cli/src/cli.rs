//! CLI argument definitions using clap
//!
//! This module contains the clap structs and enums for parsing CLI
//! arguments. The actual command implementations are in the `commands`
//! module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Centavo - Bank email and statement sync for personal finances
#[derive(Parser)]
#[command(name = "centavo")]
#[command(about = "Personal finance ingestion and reconciliation engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "centavo.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set CENTAVO_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed the subcategory catalog
    Init,

    /// Manage profiles
    Profiles {
        #[command(subcommand)]
        action: Option<ProfilesAction>,
    },

    /// Run a sync (onboarding/daily/monthly is chosen automatically)
    Sync {
        /// Profile to sync; omit to sync every active profile
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Reconcile a stored statement against the transaction history
    Reconcile {
        /// Profile owning the statement
        #[arg(short, long)]
        profile: String,

        /// Statement id; omit to reconcile the most recent statement
        #[arg(short, long)]
        statement: Option<i64>,

        /// Add "only in PDF" rows through the regular ingestion path
        #[arg(long)]
        add_missing: bool,
    },

    /// Run the offline detectors (recurring charges, duplicates, anomalies)
    Detect {
        /// Profile to analyze
        #[arg(short, long)]
        profile: String,

        /// Detection type: recurring, duplicates, anomalies, all
        #[arg(short, long, default_value = "all")]
        kind: String,
    },

    /// List transactions waiting for category review
    Review {
        /// Profile to list
        #[arg(short, long)]
        profile: String,
    },

    /// Correct a transaction's category (feeds the learning tables)
    Correct {
        /// Transaction id
        #[arg(short, long)]
        transaction: i64,

        /// Subcategory id to assign
        #[arg(short, long)]
        subcategory: i64,

        /// Optional label for the learned pattern
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Manage monthly budgets
    Budgets {
        #[command(subcommand)]
        action: Option<BudgetsAction>,
    },

    /// Show profile status and sync metadata
    Status,
}

#[derive(Subcommand)]
pub enum ProfilesAction {
    /// List profiles
    List {
        /// Include disabled profiles
        #[arg(long)]
        all: bool,
    },

    /// Create a profile
    Add {
        /// Profile id (opaque, stable)
        id: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Mail address the notifications arrive at
        #[arg(short, long)]
        mail: String,
    },

    /// Soft-disable a profile (profiles are never destroyed)
    Disable {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum BudgetsAction {
    /// List budgets with month-to-date spend
    List {
        #[arg(short, long)]
        profile: String,
    },

    /// Set a monthly budget for a subcategory
    Set {
        #[arg(short, long)]
        profile: String,

        #[arg(short, long)]
        subcategory: i64,

        /// Monthly amount in local currency
        #[arg(short, long)]
        amount: String,
    },
}
