// ⚖️ Reconciliation Driver - Two passes over the wallet tables
//
// Pass 1 walks the airdrop (source) table:
//   Present        → stays
//   Absent         → missing table
//   Indeterminate  → retry table
//
// Pass 2 walks the retry table, only if pass 1 queued anything:
//   Present                 → deleted (confirmed)
//   Absent | Indeterminate  → missing table
//
// No wallet is classified more than twice per run.

use crate::classifier::{TrustlineClassifier, TrustlineStatus};
use crate::config::Config;
use crate::db::{WalletStore, WalletTable};
use crate::failover::{FailoverQueryEngine, Sleeper};
use crate::oracle::TrustlineOracle;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePassReport {
    pub checked: usize,
    pub confirmed: usize,
    pub moved_missing: usize,
    pub moved_retry: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPassReport {
    pub checked: usize,
    pub confirmed: usize,
    pub moved_missing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_pass: SourcePassReport,
    /// `None` when pass 1 queued nothing for retry
    pub retry_pass: Option<RetryPassReport>,
}

impl RunReport {
    pub fn total_moved_missing(&self) -> usize {
        self.source_pass.moved_missing
            + self.retry_pass.as_ref().map_or(0, |r| r.moved_missing)
    }

    pub fn summary(&self) -> String {
        let retry = match &self.retry_pass {
            Some(r) => format!(
                "retry pass re-checked {}, confirmed {}, moved {} to missing",
                r.checked, r.confirmed, r.moved_missing
            ),
            None => "retry pass skipped".to_string(),
        };

        format!(
            "Run {}: checked {} wallets, moved {} to missing and {} to retry; {}",
            self.run_id,
            self.source_pass.checked,
            self.source_pass.moved_missing,
            self.source_pass.moved_retry,
            retry
        )
    }
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct ReconciliationDriver<O, S> {
    classifier: TrustlineClassifier<O, S>,
    throttle: Duration,
    sleeper: S,
}

impl<O: TrustlineOracle, S: Sleeper + Clone> ReconciliationDriver<O, S> {
    pub fn new(config: &Config, oracle: O, sleeper: S) -> Self {
        let engine = FailoverQueryEngine::new(
            config.ledger.endpoints.clone(),
            config.retry.clone(),
            oracle,
            sleeper.clone(),
        );

        ReconciliationDriver {
            classifier: TrustlineClassifier::new(engine, config.trustline.clone()),
            throttle: config.retry.throttle(),
            sleeper,
        }
    }

    pub fn classifier(&self) -> &TrustlineClassifier<O, S> {
        &self.classifier
    }

    fn check(&self, wallet: &str) -> TrustlineStatus {
        let status = self.classifier.has_trustline(wallet);
        // Rate limiting: pause after every wallet, whatever the outcome
        self.sleeper.sleep(self.throttle);
        status
    }

    /// Both passes. The retry pass runs only if the source pass queued wallets.
    pub fn run(&self, store: &mut WalletStore) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(run_id = %run_id, table = %store.tables().source, "=== First pass: checking airdrop table ===");
        let source_pass = self.process_source_table(store, &run_id)?;
        info!(
            moved_missing = source_pass.moved_missing,
            moved_retry = source_pass.moved_retry,
            "First pass complete"
        );

        let retry_pass = if source_pass.moved_retry > 0 {
            info!(run_id = %run_id, table = %store.tables().retry, "=== Second pass: re-checking retry queue ===");
            let report = self.process_retry_queue(store, &run_id)?;
            info!(moved_missing = report.moved_missing, "Second pass complete");
            Some(report)
        } else {
            None
        };

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_pass,
            retry_pass,
        })
    }

    /// Pass 1 over the source table.
    pub fn process_source_table(&self, store: &mut WalletStore, run_id: &str) -> Result<SourcePassReport> {
        let rows = store.source_wallets()?;
        let missing_table = store.tables().missing.clone();
        let retry_table = store.tables().retry.clone();
        let mut report = SourcePassReport::default();

        for record in rows {
            report.checked += 1;

            match self.check(&record.wallet) {
                TrustlineStatus::Present => {
                    info!(wallet = %record.wallet, "Trustline present, keeping in airdrop table");
                    report.confirmed += 1;
                }
                TrustlineStatus::Absent => {
                    info!(wallet = %record.wallet, table = %missing_table, "No trustline found, moving to missing table");
                    store.move_to_missing(WalletTable::Source, &record, run_id, TrustlineStatus::Absent)?;
                    report.moved_missing += 1;
                }
                TrustlineStatus::Indeterminate => {
                    warn!(wallet = %record.wallet, table = %retry_table, "Could not fetch trustlines, adding to retry queue");
                    store.move_to_retry(&record, run_id)?;
                    report.moved_retry += 1;
                }
            }
        }

        Ok(report)
    }

    /// Pass 2 over the retry table. Unknown is final here: it goes to missing.
    pub fn process_retry_queue(&self, store: &mut WalletStore, run_id: &str) -> Result<RetryPassReport> {
        let rows = store.retry_wallets()?;
        let missing_table = store.tables().missing.clone();
        let mut report = RetryPassReport::default();

        for row in rows {
            report.checked += 1;

            match self.check(&row.wallet) {
                TrustlineStatus::Present => {
                    info!(wallet = %row.wallet, tries = row.tries, "Found trustline on retry pass, removing from retry queue");
                    store.confirm_retry(&row.wallet, run_id)?;
                    report.confirmed += 1;
                }
                status @ (TrustlineStatus::Absent | TrustlineStatus::Indeterminate) => {
                    info!(
                        wallet = %row.wallet,
                        outcome = status.as_str(),
                        table = %missing_table,
                        "No trustline found or still cannot fetch, moving to missing table"
                    );
                    store.move_to_missing(WalletTable::Retry, &row.as_wallet(), run_id, status)?;
                    report.moved_missing += 1;
                }
            }
        }

        Ok(report)
    }
}
