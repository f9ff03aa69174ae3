//! Wallet Investigator
//!
//! Screens a transaction ledger for wallets whose USDT activity in a given
//! month matches a fixed pattern: a large transfer on one day, a small
//! transfer before it, a mid-sized transfer on another day, and sends to more
//! than one recipient. Filtering runs on Polars lazy frames; the ledger is
//! read from Parquet or built from in-memory records.

pub mod config;
pub mod error;
pub mod investigator;
pub mod loader;
pub mod model;
pub mod report;

pub use config::{AmountWindow, CutoffMode, InvestigationCriteria, InvestigatorConfig, OutputFormat};
pub use error::{InvestigationError, Result};
pub use investigator::{investigate, WalletInvestigator};
pub use model::{
    Investigation, MatchedTransaction, StageStats, StageTimings, TransactionRecord,
    WalletMatchRecord,
};
