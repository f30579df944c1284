use crate::classifier::TrustlineStatus;
use crate::config::TableNames;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;

const EVENTS_TABLE: &str = "reconcile_events";

/// Wallet row as stored in the source and missing tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    #[serde(alias = "Wallet")]
    pub wallet: String,

    #[serde(alias = "Balance")]
    pub balance: f64,
}

impl WalletRecord {
    pub fn new(wallet: &str, balance: f64) -> Self {
        WalletRecord {
            wallet: wallet.to_string(),
            balance,
        }
    }
}

/// Wallet row in the retry table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub wallet: String,
    pub balance: f64,
    pub tries: i64,
}

impl RetryRecord {
    pub fn as_wallet(&self) -> WalletRecord {
        WalletRecord::new(&self.wallet, self.balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTable {
    Source,
    Retry,
    Missing,
}

impl WalletTable {
    pub fn name<'a>(&self, tables: &'a TableNames) -> &'a str {
        match self {
            WalletTable::Source => &tables.source,
            WalletTable::Retry => &tables.retry,
            WalletTable::Missing => &tables.missing,
        }
    }
}

/// Audit trail entry: one per routing decision that changed the store
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcileEvent {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub wallet: String,
    pub from_table: String,
    /// `None` when the wallet was deleted outright (confirmed on retry)
    pub to_table: Option<String>,
    pub outcome: String,
}

/// SQLite-backed source / retry / missing tables.
///
/// Each move (insert into destination, delete from origin, audit row) runs in
/// its own transaction, so a wallet is never left in two tables.
pub struct WalletStore {
    conn: Connection,
    tables: TableNames,
}

impl WalletStore {
    pub fn open(path: &Path, tables: TableNames) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn, tables)
    }

    pub fn open_in_memory(tables: TableNames) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, tables)
    }

    pub fn from_connection(conn: Connection, tables: TableNames) -> Result<Self> {
        let store = WalletStore { conn, tables };
        store.setup_database()?;
        Ok(store)
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create every table if absent. Safe to call repeatedly.
    pub fn setup_database(&self) -> Result<()> {
        // WAL for crash recovery; in-memory databases report "memory"
        let _mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {source} (
                    Wallet TEXT PRIMARY KEY,
                    Balance REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS {missing} (
                    Wallet TEXT PRIMARY KEY,
                    Balance REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS {retry} (
                    Wallet TEXT PRIMARY KEY,
                    Balance REAL NOT NULL,
                    tries INTEGER DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS {events} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    wallet TEXT NOT NULL,
                    from_table TEXT NOT NULL,
                    to_table TEXT,
                    outcome TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{events}_wallet ON {events}(wallet);",
                source = self.tables.source,
                missing = self.tables.missing,
                retry = self.tables.retry,
                events = EVENTS_TABLE,
            ))
            .context("Failed to create wallet tables")?;

        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// All rows of the source table, in the order SQLite yields them.
    pub fn source_wallets(&self) -> Result<Vec<WalletRecord>> {
        self.wallets(WalletTable::Source)
    }

    pub fn missing_wallets(&self) -> Result<Vec<WalletRecord>> {
        self.wallets(WalletTable::Missing)
    }

    fn wallets(&self, table: WalletTable) -> Result<Vec<WalletRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT Wallet, Balance FROM {}",
            table.name(&self.tables)
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(WalletRecord {
                    wallet: row.get(0)?,
                    balance: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn retry_wallets(&self) -> Result<Vec<RetryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT Wallet, Balance, COALESCE(tries, 0) FROM {}",
            self.tables.retry
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RetryRecord {
                    wallet: row.get(0)?,
                    balance: row.get(1)?,
                    tries: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn count(&self, table: WalletTable) -> Result<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.name(&self.tables)),
            [],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    pub fn retry_tries(&self, wallet: &str) -> Result<Option<i64>> {
        let tries = self
            .conn
            .query_row(
                &format!("SELECT COALESCE(tries, 0) FROM {} WHERE Wallet = ?1", self.tables.retry),
                [wallet],
                |row| row.get(0),
            )
            .optional()?;

        Ok(tries)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert or overwrite a source row.
    pub fn upsert_source(&mut self, record: &WalletRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (Wallet, Balance) VALUES (?1, ?2)",
                self.tables.source
            ),
            params![record.wallet, record.balance],
        )?;
        Ok(())
    }

    /// Insert or update a retry row. An existing `tries` counter is kept.
    pub fn upsert_retry(&mut self, record: &WalletRecord) -> Result<()> {
        upsert_retry(&self.conn, &self.tables, record)
    }

    /// Move `record` from `from` into the missing table (overwriting).
    pub fn move_to_missing(
        &mut self,
        from: WalletTable,
        record: &WalletRecord,
        run_id: &str,
        outcome: TrustlineStatus,
    ) -> Result<()> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (Wallet, Balance) VALUES (?1, ?2)",
                tables.missing
            ),
            params![record.wallet, record.balance],
        )?;
        delete_wallet(&tx, from.name(&tables), &record.wallet)?;
        record_event(&tx, run_id, &record.wallet, from.name(&tables), Some(tables.missing.as_str()), outcome)?;

        tx.commit()
            .with_context(|| format!("Failed to commit move of {} to {}", record.wallet, tables.missing))
    }

    /// Move `record` from the source table into the retry table.
    pub fn move_to_retry(&mut self, record: &WalletRecord, run_id: &str) -> Result<()> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;

        upsert_retry(&tx, &tables, record)?;
        delete_wallet(&tx, &tables.source, &record.wallet)?;
        record_event(
            &tx,
            run_id,
            &record.wallet,
            &tables.source,
            Some(tables.retry.as_str()),
            TrustlineStatus::Indeterminate,
        )?;

        tx.commit()
            .with_context(|| format!("Failed to commit move of {} to {}", record.wallet, tables.retry))
    }

    /// Drop a wallet from the retry table once its trustline is confirmed.
    pub fn confirm_retry(&mut self, wallet: &str, run_id: &str) -> Result<()> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;

        delete_wallet(&tx, &tables.retry, wallet)?;
        record_event(&tx, run_id, wallet, &tables.retry, None, TrustlineStatus::Present)?;

        tx.commit()
            .with_context(|| format!("Failed to commit removal of {} from {}", wallet, tables.retry))
    }

    // ========================================================================
    // AUDIT TRAIL
    // ========================================================================

    pub fn events_for_wallet(&self, wallet: &str) -> Result<Vec<ReconcileEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT run_id, timestamp, wallet, from_table, to_table, outcome
             FROM {}
             WHERE wallet = ?1
             ORDER BY id",
            EVENTS_TABLE
        ))?;

        let events = stmt
            .query_map([wallet], |row| {
                let timestamp_str: String = row.get(1)?;

                Ok(ReconcileEvent {
                    run_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                        })?
                        .with_timezone(&Utc),
                    wallet: row.get(2)?,
                    from_table: row.get(3)?,
                    to_table: row.get(4)?,
                    outcome: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    // ========================================================================
    // CSV IMPORT / EXPORT
    // ========================================================================

    /// Load `wallet,balance` rows into the source table. Returns rows written.
    pub fn import_csv(&mut self, csv_path: &Path) -> Result<usize> {
        let mut rdr = csv::Reader::from_path(csv_path)
            .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

        let source = self.tables.source.clone();
        let tx = self.conn.transaction()?;
        let mut imported = 0;

        for result in rdr.deserialize() {
            let record: WalletRecord = result.context("Failed to deserialize wallet row")?;

            tx.execute(
                &format!("INSERT OR REPLACE INTO {} (Wallet, Balance) VALUES (?1, ?2)", source),
                params![record.wallet.trim(), record.balance],
            )?;
            imported += 1;
        }

        tx.commit().context("Failed to commit CSV import")?;
        Ok(imported)
    }

    /// Write the missing table as `wallet,balance` CSV. Returns rows written.
    pub fn export_missing_csv(&self, csv_path: &Path) -> Result<usize> {
        let rows = self.missing_wallets()?;

        let mut wtr = csv::Writer::from_path(csv_path)
            .with_context(|| format!("Failed to create CSV file {}", csv_path.display()))?;
        for row in &rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;

        Ok(rows.len())
    }
}

fn upsert_retry(conn: &Connection, tables: &TableNames, record: &WalletRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (Wallet, Balance, tries) VALUES (?1, ?2, 0)
             ON CONFLICT(Wallet) DO UPDATE SET Balance = excluded.Balance",
            tables.retry
        ),
        params![record.wallet, record.balance],
    )?;
    Ok(())
}

fn delete_wallet(tx: &Transaction<'_>, table: &str, wallet: &str) -> Result<()> {
    let deleted = tx.execute(&format!("DELETE FROM {} WHERE Wallet = ?1", table), [wallet])?;

    if deleted != 1 {
        bail!("Expected to delete {} from {}, removed {} rows", wallet, table, deleted);
    }
    Ok(())
}

fn record_event(
    tx: &Transaction<'_>,
    run_id: &str,
    wallet: &str,
    from_table: &str,
    to_table: Option<&str>,
    outcome: TrustlineStatus,
) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO {} (run_id, timestamp, wallet, from_table, to_table, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            EVENTS_TABLE
        ),
        params![
            run_id,
            Utc::now().to_rfc3339(),
            wallet,
            from_table,
            to_table,
            outcome.as_str(),
        ],
    )?;
    Ok(())
}
