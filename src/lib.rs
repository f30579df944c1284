// Trustline Reconciler - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod oracle;         // One ledger request against one endpoint
pub mod failover;       // Endpoint failover + bounded retries
pub mod classifier;     // Present / Absent / Indeterminate
pub mod db;             // Source / retry / missing tables in SQLite
pub mod reconciliation; // Two-pass driver

// Re-export commonly used types
pub use config::{
    Config, ConfigError, LedgerConfig, RetryPolicy, TableNames, TrustlineTarget,
    normalize_currency,
};
pub use oracle::{
    TrustlineOracle, JsonRpcOracle, TrustlineEntry, QueryError,
    AccountLinesPage, LedgerSelector,
    account_lines_request, collect_pages, parse_account_lines,
};
pub use failover::{FailoverQueryEngine, Sleeper, ThreadSleeper};
pub use classifier::{TrustlineClassifier, TrustlineStatus, classify_lines};
pub use db::{
    WalletStore, WalletRecord, RetryRecord, WalletTable, ReconcileEvent,
};
pub use reconciliation::{
    ReconciliationDriver, RunReport, SourcePassReport, RetryPassReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
