// 🏷️ Trustline Classifier - Present / Absent / Indeterminate
//
// "Confirmed no" and "don't know" lead to different tables, so the answer is
// an enum, never an Option<bool>.

use crate::config::TrustlineTarget;
use crate::failover::{FailoverQueryEngine, Sleeper};
use crate::oracle::{TrustlineEntry, TrustlineOracle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustlineStatus {
    /// The ledger lists the issuer/currency trustline
    Present,

    /// The ledger answered and the trustline is not there
    Absent,

    /// No endpoint could answer
    Indeterminate,
}

impl TrustlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustlineStatus::Present => "present",
            TrustlineStatus::Absent => "absent",
            TrustlineStatus::Indeterminate => "indeterminate",
        }
    }
}

impl TrustlineTarget {
    /// Exact, case-sensitive match on both counterparty and currency.
    pub fn matches(&self, entry: &TrustlineEntry) -> bool {
        entry.account == self.issuer && entry.currency == self.currency
    }
}

/// Classify an already fetched trustline list.
pub fn classify_lines(target: &TrustlineTarget, lines: &[TrustlineEntry]) -> TrustlineStatus {
    if lines.iter().any(|line| target.matches(line)) {
        TrustlineStatus::Present
    } else {
        TrustlineStatus::Absent
    }
}

pub struct TrustlineClassifier<O, S> {
    engine: FailoverQueryEngine<O, S>,
    target: TrustlineTarget,
}

impl<O: TrustlineOracle, S: Sleeper> TrustlineClassifier<O, S> {
    pub fn new(engine: FailoverQueryEngine<O, S>, target: TrustlineTarget) -> Self {
        TrustlineClassifier { engine, target }
    }

    pub fn engine(&self) -> &FailoverQueryEngine<O, S> {
        &self.engine
    }

    pub fn has_trustline(&self, wallet: &str) -> TrustlineStatus {
        match self.engine.fetch_trustlines(wallet) {
            Some(lines) => classify_lines(&self.target, &lines),
            None => TrustlineStatus::Indeterminate,
        }
    }
}
