// 🔮 Trustline Oracle - One request, one endpoint
//
// Asks a single ledger endpoint for every trustline a wallet holds in the
// validated ledger. No retries, no failover: that belongs to `failover.rs`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// TRUSTLINE ENTRY
// ============================================================================

/// One line from `account_lines`.
///
/// The ledger sends more fields (balance, limit, flags); only the two used for
/// matching are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineEntry {
    /// Counterparty of the line (the issuer, for issued tokens)
    pub account: String,

    /// Currency code as the ledger reports it (3 chars or 40 hex digits)
    pub currency: String,
}

impl TrustlineEntry {
    pub fn new(account: &str, currency: &str) -> Self {
        TrustlineEntry {
            account: account.to_string(),
            currency: currency.to_string(),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ledger returned unsuccessful response: {0}")]
    Unsuccessful(String),

    #[error("could not decode ledger response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Decode(err.to_string())
        } else {
            QueryError::Transport(err.to_string())
        }
    }
}

// ============================================================================
// ORACLE CONTRACT
// ============================================================================

pub trait TrustlineOracle {
    /// Full trustline set of `wallet` as seen by `endpoint`.
    fn account_lines(&self, endpoint: &str, wallet: &str) -> Result<Vec<TrustlineEntry>, QueryError>;
}

impl<T: TrustlineOracle + ?Sized> TrustlineOracle for &T {
    fn account_lines(&self, endpoint: &str, wallet: &str) -> Result<Vec<TrustlineEntry>, QueryError> {
        (**self).account_lines(endpoint, wallet)
    }
}

// ============================================================================
// JSON-RPC ORACLE
// ============================================================================

/// Upper bound on pages per wallet; a ledger that keeps handing out markers
/// past this is treated as misbehaving.
const MAX_PAGES: usize = 1_000;

/// Which ledger a page request reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSelector {
    /// Latest validated ledger (first page)
    Validated,
    /// A specific ledger; continuation markers are only valid against the
    /// ledger that issued them
    Index(u64),
}

/// `account_lines` over JSON-RPC with a blocking HTTP client.
pub struct JsonRpcOracle {
    http: reqwest::blocking::Client,
    page_limit: u32,
}

impl JsonRpcOracle {
    pub fn new(request_timeout: Duration, page_limit: u32) -> Result<Self, QueryError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(JsonRpcOracle { http, page_limit })
    }

    fn fetch_page(
        &self,
        endpoint: &str,
        wallet: &str,
        ledger: LedgerSelector,
        marker: Option<&Value>,
    ) -> Result<AccountLinesPage, QueryError> {
        let body = account_lines_request(wallet, self.page_limit, ledger, marker);

        let response = self.http.post(endpoint).json(&body).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Transport(format!("HTTP {}", status)));
        }

        let payload: Value = response.json()?;
        parse_account_lines(payload)
    }
}

impl TrustlineOracle for JsonRpcOracle {
    fn account_lines(&self, endpoint: &str, wallet: &str) -> Result<Vec<TrustlineEntry>, QueryError> {
        collect_pages(|ledger, marker| self.fetch_page(endpoint, wallet, ledger, marker))
    }
}

/// Follow `marker` pages until the trustline set is complete.
///
/// The first page reads the validated ledger; every later page is pinned to
/// the ledger index the first page reported. Any failing page fails the whole
/// set.
pub fn collect_pages<F>(mut fetch: F) -> Result<Vec<TrustlineEntry>, QueryError>
where
    F: FnMut(LedgerSelector, Option<&Value>) -> Result<AccountLinesPage, QueryError>,
{
    let mut lines = Vec::new();
    let mut ledger = LedgerSelector::Validated;
    let mut marker: Option<Value> = None;

    for _ in 0..MAX_PAGES {
        let page = fetch(ledger, marker.as_ref())?;
        lines.extend(page.lines);

        let Some(next) = page.marker else {
            return Ok(lines);
        };

        if ledger == LedgerSelector::Validated {
            let index = page.ledger_index.ok_or_else(|| {
                QueryError::Unsuccessful("paginated response did not report its ledger_index".to_string())
            })?;
            ledger = LedgerSelector::Index(index);
        }
        marker = Some(next);
    }

    Err(QueryError::Unsuccessful(format!(
        "account_lines did not finish within {} pages",
        MAX_PAGES
    )))
}

/// Request body for one `account_lines` page.
pub fn account_lines_request(
    wallet: &str,
    limit: u32,
    ledger: LedgerSelector,
    marker: Option<&Value>,
) -> Value {
    let ledger_index = match ledger {
        LedgerSelector::Validated => json!("validated"),
        LedgerSelector::Index(index) => json!(index),
    };

    let mut params = json!({
        "account": wallet,
        "ledger_index": ledger_index,
        "limit": limit,
    });

    if let Some(marker) = marker {
        params["marker"] = marker.clone();
    }

    json!({
        "method": "account_lines",
        "params": [params],
    })
}

#[derive(Debug)]
pub struct AccountLinesPage {
    pub lines: Vec<TrustlineEntry>,
    pub marker: Option<Value>,
    /// Ledger the page was read from
    pub ledger_index: Option<u64>,
}

#[derive(Deserialize)]
struct RpcEnvelope {
    result: RpcResult,
}

#[derive(Deserialize)]
struct RpcResult {
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    lines: Vec<TrustlineEntry>,
    #[serde(default)]
    marker: Option<Value>,
    #[serde(default)]
    ledger_index: Option<u64>,
}

/// Decode a JSON-RPC `account_lines` response.
///
/// Anything other than `"status": "success"` is an unsuccessful response.
pub fn parse_account_lines(payload: Value) -> Result<AccountLinesPage, QueryError> {
    let envelope: RpcEnvelope =
        serde_json::from_value(payload).map_err(|e| QueryError::Decode(e.to_string()))?;
    let result = envelope.result;

    if result.status.as_deref() != Some("success") {
        let reason = result
            .error_message
            .or(result.error)
            .unwrap_or_else(|| format!("status {:?}", result.status));
        return Err(QueryError::Unsuccessful(reason));
    }

    Ok(AccountLinesPage {
        lines: result.lines,
        marker: result.marker.filter(|m| !m.is_null()),
        ledger_index: result.ledger_index,
    })
}
