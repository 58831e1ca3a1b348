//! Database layer tests

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{Database, TransactionInsertResult};
use crate::models::{Bank, Currency, NewTransaction, TxnKind, TxnStatus};

fn new_txn(profile: &str, email_id: &str, merchant: &str, amount: Decimal) -> NewTransaction {
    NewTransaction {
        profile_id: profile.to_string(),
        email_id: email_id.to_string(),
        bank: Bank::Bac,
        card_id: None,
        kind: TxnKind::Purchase,
        merchant_raw: merchant.to_string(),
        merchant_id: None,
        amount_original: amount,
        currency_original: Currency::Crc,
        fx_rate: None,
        amount_local: amount,
        txn_time: Utc
            .from_utc_datetime(
                &NaiveDate::from_ymd_opt(2024, 11, 7)
                    .unwrap()
                    .and_hms_opt(18, 0, 0)
                    .unwrap(),
            ),
        beneficiary: None,
        transfer_memo: None,
        subtype: None,
        bank_reference: None,
        bank_account_iban: None,
        subcategory_id: None,
        category_confidence: None,
        category_source: None,
        ai_suggested_subcategory_id: None,
        category_needs_review: false,
        status: TxnStatus::Confirmed,
        is_internal_transfer: false,
        exclude_from_budget: false,
        is_ambiguous_merchant: false,
        is_international: false,
        special_type: None,
    }
}

#[test]
fn test_migrations_are_idempotent() {
    let db = Database::in_memory().unwrap();
    // A second pool against the same file re-runs the migrations
    let again = Database::new_unencrypted(db.path());
    assert!(again.is_ok());
}

#[test]
fn test_email_id_unique_per_profile() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();
    db.create_profile("p2", "Business", "b@example.com").unwrap();

    let first = db.insert_transaction(&new_txn("p1", "same-id", "X", dec!(100))).unwrap();
    assert!(matches!(first, TransactionInsertResult::Inserted(_)));

    // Same email_id, same profile: duplicate no-op
    let dup = db.insert_transaction(&new_txn("p1", "same-id", "X", dec!(100))).unwrap();
    assert!(matches!(dup, TransactionInsertResult::Duplicate(_)));

    // Same email_id, different profile: allowed
    let other = db.insert_transaction(&new_txn("p2", "same-id", "X", dec!(100))).unwrap();
    assert!(matches!(other, TransactionInsertResult::Inserted(_)));

    assert_eq!(db.list_transactions("p1").unwrap().len(), 1);
    assert_eq!(db.list_transactions("p2").unwrap().len(), 1);
}

#[test]
fn test_insert_rejects_internal_transfer_in_budget() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();

    let mut txn = new_txn("p1", "e1", "PAGO TARJETA", dec!(100));
    txn.is_internal_transfer = true;
    txn.exclude_from_budget = false;
    let result = db.insert_transaction(&txn);
    assert!(matches!(result, Err(crate::error::Error::Integrity(_))));
}

#[test]
fn test_insert_rejects_missing_fx_rate() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();

    let mut txn = new_txn("p1", "e1", "AMAZON", dec!(25.99));
    txn.currency_original = Currency::Usd;
    txn.fx_rate = None;
    let result = db.insert_transaction(&txn);
    assert!(matches!(result, Err(crate::error::Error::Integrity(_))));
}

#[test]
fn test_decimal_round_trip() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();

    let mut txn = new_txn("p1", "e1", "AMAZON", dec!(25.99));
    txn.currency_original = Currency::Usd;
    txn.fx_rate = Some(dec!(512.34));
    txn.amount_local = dec!(13315.72);
    let id = match db.insert_transaction(&txn).unwrap() {
        TransactionInsertResult::Inserted(id) => id,
        other => panic!("unexpected {:?}", other),
    };

    let stored = db.get_transaction(id).unwrap().unwrap();
    assert_eq!(stored.amount_original, dec!(25.99));
    assert_eq!(stored.fx_rate, Some(dec!(512.34)));
    assert_eq!(stored.amount_local, dec!(13315.72));
    assert_eq!(stored.currency_original, Currency::Usd);
}

#[test]
fn test_transactions_in_period_sorted() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();

    for (i, day) in [15, 3, 9].iter().enumerate() {
        let mut txn = new_txn("p1", &format!("e{}", i), "X", dec!(100));
        txn.txn_time = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 11, *day)
                .unwrap()
                .and_hms_opt(18, 0, 0)
                .unwrap(),
        );
        db.insert_transaction(&txn).unwrap();
    }

    let txns = db
        .transactions_in_period(
            "p1",
            NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(),
        )
        .unwrap();
    let days: Vec<u32> = txns
        .iter()
        .map(|t| chrono::Datelike::day(&t.txn_time.date_naive()))
        .collect();
    assert_eq!(days, vec![3, 9, 15]);

    // Period boundaries are inclusive
    let partial = db
        .transactions_in_period(
            "p1",
            NaiveDate::from_ymd_opt(2024, 11, 9).unwrap(),
            NaiveDate::from_ymd_opt(2024, 11, 15).unwrap(),
        )
        .unwrap();
    assert_eq!(partial.len(), 2);
}

#[test]
fn test_commit_sync_metadata_partial_fields() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();

    let statement_date = NaiveDate::from_ymd_opt(2024, 10, 25).unwrap();
    let sync_date = NaiveDate::from_ymd_opt(2024, 11, 7).unwrap();
    db.commit_sync_metadata("p1", Some(statement_date), Some(sync_date), Some(30))
        .unwrap();

    // None keeps existing values
    db.commit_sync_metadata("p1", None, Some(sync_date + chrono::Duration::days(1)), None)
        .unwrap();

    let profile = db.get_profile("p1").unwrap().unwrap();
    assert_eq!(profile.last_statement_date, Some(statement_date));
    assert_eq!(
        profile.last_sync_date,
        Some(sync_date + chrono::Duration::days(1))
    );
    assert_eq!(profile.statement_cycle_days, Some(30));
}

#[test]
fn test_deactivate_profile_is_soft() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();
    db.deactivate_profile("p1").unwrap();

    assert!(db.list_profiles(false).unwrap().is_empty());
    assert_eq!(db.list_profiles(true).unwrap().len(), 1);
    // The row still exists; profiles are never destroyed
    assert!(db.get_profile("p1").unwrap().is_some());
}

#[test]
fn test_latest_confirmed_for_merchant() {
    let db = Database::in_memory().unwrap();
    db.create_profile("p1", "Personal", "u@example.com").unwrap();
    let subcat = db.create_subcategory("C", "S", None, None).unwrap();
    let merchant = db
        .create_merchant("AUTOMERCADO", "Automercado", None, None, "AUTOMERCADO")
        .unwrap();

    // An older confirmed transaction and a newer unconfirmed one
    let mut old = new_txn("p1", "e-old", "AUTOMERCADO", dec!(100));
    old.merchant_id = Some(merchant);
    old.subcategory_id = Some(subcat);
    db.insert_transaction(&old).unwrap();

    let mut newer = new_txn("p1", "e-new", "AUTOMERCADO", dec!(200));
    newer.merchant_id = Some(merchant);
    newer.category_needs_review = true;
    newer.txn_time = old.txn_time + chrono::Duration::days(2);
    db.insert_transaction(&newer).unwrap();

    let found = db
        .latest_confirmed_for_merchant("p1", merchant)
        .unwrap()
        .unwrap();
    assert_eq!(found.email_id, "e-old");
    assert_eq!(found.subcategory_id, Some(subcat));
}

#[test]
fn test_subcategory_seed_idempotent() {
    let db = Database::in_memory().unwrap();
    db.seed_subcategories().unwrap();
    let first = db.list_subcategories().unwrap().len();
    db.seed_subcategories().unwrap();
    assert_eq!(db.list_subcategories().unwrap().len(), first);
    assert!(db.uncategorized_subcategory().unwrap().is_some());
}
