//! Ledger rows and investigation results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the input ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "fromAddress")]
    pub from_address: String,
    #[serde(rename = "toAddress")]
    pub to_address: String,
    pub token: String,
    pub usd_value: f64,
    pub unixtimestamp: i64,
}

impl TransactionRecord {
    pub fn new(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        token: impl Into<String>,
        usd_value: f64,
        unixtimestamp: i64,
    ) -> Self {
        Self {
            from_address: from_address.into(),
            to_address: to_address.into(),
            token: token.into(),
            usd_value,
            unixtimestamp,
        }
    }
}

/// A ledger row that satisfied one of the amount criteria, with its
/// derived UTC datetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedTransaction {
    #[serde(flatten)]
    pub record: TransactionRecord,
    pub datetime: DateTime<Utc>,
}

/// Per-wallet breakdown for a wallet that met every criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMatchRecord {
    pub wallet: String,
    #[serde(rename = "800_USDT")]
    pub large_transfers: Vec<MatchedTransaction>,
    #[serde(rename = "25_USDT_before_800")]
    pub small_transfers_before: Vec<MatchedTransaction>,
    #[serde(rename = "500_to_700_USDT")]
    pub mid_transfers: Vec<MatchedTransaction>,
    pub multiple_addresses: u32,
}

/// Row counts and timings of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub rows_loaded: usize,
    pub month_rows: usize,
    pub large_rows: usize,
    pub small_rows: usize,
    pub mid_rows: usize,
    pub candidates: usize,
    pub wallets_matched: usize,
    pub timings_ms: StageTimings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub load: u64,
    pub filter: u64,
    pub assemble: u64,
    pub total: u64,
}

/// Result of an investigation: matched wallets plus pipeline statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub wallets: Vec<WalletMatchRecord>,
    pub stats: StageStats,
}
