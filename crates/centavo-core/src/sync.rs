//! Sync strategy and scheduling
//!
//! Per-profile state machine with three modes chosen from the profile's
//! sync metadata:
//!
//! - **onboarding**: no previous sync. Fetch statements from the last 90
//!   days, process the most recent, infer the statement cycle, then fill
//!   the gap from (cut - traslape) to today with emails.
//! - **daily**: inside the current cycle. Incremental email fetch since
//!   the last sync.
//! - **monthly**: a new statement is due. Search a short window for the
//!   PDF; process and gap-fill when found, degrade to daily otherwise.
//!
//! The five-day traslape on both sides of a statement boundary makes the
//! email and PDF streams overlap on purpose; dedup turns the collisions
//! into no-ops. Sync metadata commits as one unit only after a phase
//! succeeds, so a crash or cancellation never leaves it half-written.
//!
//! Profiles sync concurrently under a bounded worker pool, but never more
//! than one run per profile: the scheduler holds a per-profile lock for
//! the duration of a run.

use base64::Engine as _;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::ingest::TransactionProcessor;
use crate::mail::{MailClient, RawMessage};
use crate::models::{IngestStats, Profile};
use crate::parse::statement::{ParsedStatement, StatementParser, TextExtractor};
use crate::reconcile::{ReconciliationEngine, ReconciliationReport};

/// Sync mode, selected automatically per profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Onboarding,
    Daily,
    Monthly,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

/// Sync tunables. The traslape lives here and only here; reconciliation
/// and gap-fill receive it from this config.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Overlap on each side of a statement boundary (days)
    pub traslape_days: i64,
    /// How far back onboarding searches for statements
    pub onboarding_statement_days: i64,
    /// How far back monthly sync searches for a new statement
    pub monthly_search_days: i64,
    /// Concurrent profile syncs
    pub max_concurrent_profiles: usize,
    /// Senders accepted by the mail fetch
    pub sender_allowlist: HashSet<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let mut sender_allowlist = HashSet::new();
        for sender in [
            "notificacion@notificacionesbaccr.com",
            "alerta@baccredomatic.com",
            "servicio_al_cliente@baccredomatic.cr",
            "bancopopular@bancopopularinforma.fi.cr",
            "notificaciones@bancopopular.fi.cr",
        ] {
            sender_allowlist.insert(sender.to_string());
        }
        Self {
            traslape_days: 5,
            onboarding_statement_days: 90,
            monthly_search_days: 10,
            max_concurrent_profiles: 4,
            sender_allowlist,
        }
    }
}

/// Outcome of one sync run
#[derive(Debug)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub email_stats: IngestStats,
    pub statement_stats: Option<IngestStats>,
    pub reconciliation: Option<ReconciliationReport>,
}

/// Choose the sync mode from profile metadata.
///
/// No sync yet → onboarding. A statement is due once the cycle has
/// elapsed since the last cut → monthly. Otherwise → daily.
pub fn select_mode(profile: &Profile, today: NaiveDate) -> SyncMode {
    if profile.last_sync_date.is_none() {
        return SyncMode::Onboarding;
    }
    if let Some(last_statement) = profile.last_statement_date {
        let cycle = profile.statement_cycle_days.unwrap_or(30);
        if today >= last_statement + chrono::Duration::days(cycle) {
            return SyncMode::Monthly;
        }
    }
    SyncMode::Daily
}

/// Infer the statement cycle from the two most recent statement emails
pub fn infer_cycle_days(received_dates: &[NaiveDate]) -> Option<i64> {
    if received_dates.len() < 2 {
        return None;
    }
    let days = (received_dates[0] - received_dates[1]).num_days().abs();
    (days > 0).then_some(days)
}

/// Onboarding fallback window when no statement exists: from the first
/// day of the previous month to today.
pub fn fallback_window_start(today: NaiveDate) -> NaiveDate {
    if today.month() == 1 {
        NaiveDate::from_ymd_opt(today.year() - 1, 12, 1).expect("first of december is valid")
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() - 1, 1)
            .expect("first of month is valid")
    }
}

/// One profile's sync pipeline, wired by the composition root
pub struct SyncEngine {
    db: Database,
    mail: MailClient,
    processor: TransactionProcessor,
    statement_parser: StatementParser,
    text_extractor: Box<dyn TextExtractor>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        db: Database,
        mail: MailClient,
        processor: TransactionProcessor,
        statement_parser: StatementParser,
        text_extractor: Box<dyn TextExtractor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            mail,
            processor,
            statement_parser,
            text_extractor,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync for a profile. The caller holds the per-profile lock.
    pub async fn run(&self, profile_id: &str) -> Result<SyncOutcome> {
        let profile = self
            .db
            .get_profile(profile_id)?
            .ok_or_else(|| Error::NotFound(format!("profile {}", profile_id)))?;
        if !profile.active {
            return Err(Error::Sync(format!("profile {} is disabled", profile_id)));
        }

        let today = Utc::now().date_naive();
        let mode = select_mode(&profile, today);
        info!(profile_id, mode = mode.as_str(), "sync starting");

        match mode {
            SyncMode::Onboarding => self.onboarding_sync(&profile, today).await,
            SyncMode::Daily => self.daily_sync(&profile, today).await,
            SyncMode::Monthly => self.monthly_sync(&profile, today).await,
        }
    }

    /// Initial sync: most recent statement + cycle inference + gap fill
    async fn onboarding_sync(&self, profile: &Profile, today: NaiveDate) -> Result<SyncOutcome> {
        let statements = self
            .mail
            .fetch_statements(self.config.onboarding_statement_days)
            .await?;

        if statements.is_empty() {
            // Email-only fallback: cover from the first day of the
            // previous month
            let since = fallback_window_start(today);
            warn!(
                profile = %profile.id,
                since = %since,
                "no statements found, onboarding from email only"
            );
            let email_stats = self.fetch_and_process(&profile.id, since, today).await?;
            self.db
                .commit_sync_metadata(&profile.id, None, Some(today), Some(30))?;
            return Ok(SyncOutcome {
                mode: SyncMode::Onboarding,
                email_stats,
                statement_stats: None,
                reconciliation: None,
            });
        }

        // Most recent statement first (fetch_statements sorts descending)
        let (parsed, statement_stats, report) =
            self.process_statement_message(&profile.id, &statements[0]).await?;
        let cut_date = parsed.period_end;

        let received_dates: Vec<NaiveDate> =
            statements.iter().map(|s| s.received_date()).collect();
        let cycle_days = infer_cycle_days(&received_dates);

        // Gap fill: the statement covers through the cut; emails take over
        // from (cut - traslape) so the streams overlap
        let gap_start = cut_date - chrono::Duration::days(self.config.traslape_days);
        let email_stats = self.fetch_and_process(&profile.id, gap_start, today).await?;

        self.db
            .commit_sync_metadata(&profile.id, Some(cut_date), Some(today), cycle_days)?;

        Ok(SyncOutcome {
            mode: SyncMode::Onboarding,
            email_stats,
            statement_stats: Some(statement_stats),
            reconciliation: Some(report),
        })
    }

    /// Incremental email sync inside the statement cycle
    async fn daily_sync(&self, profile: &Profile, today: NaiveDate) -> Result<SyncOutcome> {
        let since = profile
            .last_sync_date
            .unwrap_or_else(|| today - chrono::Duration::days(1));

        let email_stats = self.fetch_and_process(&profile.id, since, today).await?;
        self.db
            .commit_sync_metadata(&profile.id, None, Some(today), None)?;

        Ok(SyncOutcome {
            mode: SyncMode::Daily,
            email_stats,
            statement_stats: None,
            reconciliation: None,
        })
    }

    /// A statement is due: look for it, process it, gap-fill. Degrades to
    /// daily when nothing new has arrived.
    async fn monthly_sync(&self, profile: &Profile, today: NaiveDate) -> Result<SyncOutcome> {
        let statements = self
            .mail
            .fetch_statements(self.config.monthly_search_days)
            .await?;

        let newest = statements.first().filter(|s| {
            profile
                .last_statement_date
                .map(|last| s.received_date() > last)
                .unwrap_or(true)
        });

        let Some(newest) = newest else {
            info!(profile = %profile.id, "no new statement yet, degrading to daily");
            let mut outcome = self.daily_sync(profile, today).await?;
            outcome.mode = SyncMode::Monthly;
            return Ok(outcome);
        };

        let (parsed, statement_stats, report) =
            self.process_statement_message(&profile.id, newest).await?;
        let cut_date = parsed.period_end;

        // Gap fill from the previous cut through today; the traslape makes
        // both boundaries overlap
        let gap_start = profile
            .last_statement_date
            .unwrap_or(cut_date - chrono::Duration::days(7))
            - chrono::Duration::days(self.config.traslape_days);
        let email_stats = self.fetch_and_process(&profile.id, gap_start, today).await?;

        self.db
            .commit_sync_metadata(&profile.id, Some(cut_date), Some(today), None)?;

        Ok(SyncOutcome {
            mode: SyncMode::Monthly,
            email_stats,
            statement_stats: Some(statement_stats),
            reconciliation: Some(report),
        })
    }

    async fn fetch_and_process(
        &self,
        profile_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<IngestStats> {
        let messages = self.mail.fetch(since, &self.config.sender_allowlist).await?;
        let in_range: Vec<RawMessage> = messages
            .into_iter()
            .filter(|m| {
                let date = m.received_date();
                date >= since && date <= until
            })
            .collect();
        self.processor.process_messages(profile_id, &in_range).await
    }

    /// Decode, parse, persist, ingest, and reconcile one statement email
    async fn process_statement_message(
        &self,
        profile_id: &str,
        message: &RawMessage,
    ) -> Result<(ParsedStatement, IngestStats, ReconciliationReport)> {
        let attachment = message
            .attachments
            .iter()
            .find(|a| a.content_type == "application/pdf")
            .ok_or_else(|| Error::Parse("statement email has no PDF attachment".to_string()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&attachment.content_bytes)
            .map_err(|e| Error::Parse(format!("attachment base64 invalid: {}", e)))?;
        let text = self.text_extractor.extract(&bytes).await?;

        // Credit-card grammar first; deposit layout as fallback
        let parsed = match self.statement_parser.parse_credit_card(&text, &attachment.name) {
            Ok(parsed) => parsed,
            Err(_) => {
                self.statement_parser
                    .parse_deposit(&text, &attachment.name)
                    .await?
            }
        };

        let (statement_id, fresh) = self.db.save_statement(profile_id, &parsed)?;
        let stats = if fresh {
            self.processor
                .process_statement_rows(profile_id, &parsed, None)
                .await?
        } else {
            IngestStats::default()
        };

        let reconciler = ReconciliationEngine::new(self.db.clone(), self.config.traslape_days);
        let report = reconciler.reconcile(profile_id, statement_id)?;

        Ok((parsed, stats, report))
    }
}

/// Bounded scheduler over the active profiles.
///
/// Cancellation safety: dropping the spawned task aborts at the next await
/// point; metadata only commits after a phase completes, so a cancelled
/// run leaves the profile exactly as it was.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    /// One lock per profile; never more than one run per profile
    profile_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pool: Arc<Semaphore>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let permits = engine.config.max_concurrent_profiles;
        Self {
            engine,
            profile_locks: Mutex::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Sync one profile, serialized against other runs for the same
    /// profile and bounded by the worker pool.
    pub async fn sync_profile(&self, profile_id: &str) -> Result<SyncOutcome> {
        let lock = {
            let mut locks = self.profile_locks.lock().await;
            locks.entry(profile_id.to_string()).or_default().clone()
        };
        let _profile_guard = lock.lock().await;
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| Error::Sync("scheduler shut down".to_string()))?;

        self.engine.run(profile_id).await
    }

    /// Sync every active profile, concurrently up to the pool bound
    pub async fn sync_all(self: &Arc<Self>) -> Vec<(String, Result<SyncOutcome>)> {
        let profiles = match self.engine.db.list_profiles(false) {
            Ok(profiles) => profiles,
            Err(e) => return vec![("*".to_string(), Err(e))],
        };

        let mut handles = Vec::new();
        for profile in profiles {
            let scheduler = Arc::clone(self);
            let profile_id = profile.id.clone();
            handles.push(tokio::spawn(async move {
                let outcome = scheduler.sync_profile(&profile_id).await;
                (profile_id, outcome)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(("?".to_string(), Err(Error::Sync(e.to_string())))),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(
        last_sync: Option<NaiveDate>,
        last_statement: Option<NaiveDate>,
        cycle: Option<i64>,
    ) -> Profile {
        Profile {
            id: "p1".to_string(),
            name: "Personal".to_string(),
            mail_address: "u@example.com".to_string(),
            active: true,
            last_statement_date: last_statement,
            last_sync_date: last_sync,
            statement_cycle_days: cycle,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_mode_onboarding_without_sync_date() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 10).unwrap();
        assert_eq!(select_mode(&profile(None, None, None), today), SyncMode::Onboarding);
    }

    #[test]
    fn test_mode_daily_inside_cycle() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 10).unwrap();
        let p = profile(
            Some(today - chrono::Duration::days(1)),
            Some(NaiveDate::from_ymd_opt(2024, 10, 25).unwrap()),
            Some(30),
        );
        assert_eq!(select_mode(&p, today), SyncMode::Daily);
    }

    #[test]
    fn test_mode_monthly_once_cycle_elapses() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 25).unwrap();
        let p = profile(
            Some(today - chrono::Duration::days(1)),
            Some(NaiveDate::from_ymd_opt(2024, 10, 25).unwrap()),
            Some(30),
        );
        assert_eq!(select_mode(&p, today), SyncMode::Monthly);
    }

    #[test]
    fn test_mode_daily_without_statement_history() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 25).unwrap();
        let p = profile(Some(today), None, None);
        assert_eq!(select_mode(&p, today), SyncMode::Daily);
    }

    #[test]
    fn test_infer_cycle_days() {
        let newest = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap();
        let previous = NaiveDate::from_ymd_opt(2024, 10, 16).unwrap();
        assert_eq!(infer_cycle_days(&[newest, previous]), Some(30));
        assert_eq!(infer_cycle_days(&[newest]), None);
        // Duplicate deliveries on the same day infer nothing
        assert_eq!(infer_cycle_days(&[newest, newest]), None);
    }

    #[test]
    fn test_fallback_window_start() {
        assert_eq!(
            fallback_window_start(NaiveDate::from_ymd_opt(2024, 12, 7).unwrap()),
            NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()
        );
        // January reaches back into the previous year
        assert_eq!(
            fallback_window_start(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()),
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
        );
    }
}
