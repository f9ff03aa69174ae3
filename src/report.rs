//! Rendering of investigation results

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use chrono::SecondsFormat;
use polars::prelude::*;
use tracing::info;

use crate::config::OutputFormat;
use crate::error::{InvestigationError, Result};
use crate::model::{Investigation, MatchedTransaction, WalletMatchRecord};

pub fn render(investigation: &Investigation, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(investigation)?),
        OutputFormat::Table => render_table(&investigation.wallets),
    }
}

/// Write a rendered report to `output`, or stdout when no path is given.
pub fn write_report(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, rendered)?;
            info!(path = %path.display(), bytes = rendered.len(), "report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

fn render_table(wallets: &[WalletMatchRecord]) -> Result<String> {
    if wallets.is_empty() {
        return Ok("No wallets matched\n".to_string());
    }

    let mut out = format!("{}\n", summary_frame(wallets)?);
    for wallet in wallets {
        let _ = writeln!(
            out,
            "\n{} ({} recipients)",
            wallet.wallet, wallet.multiple_addresses
        );
        for (label, txs) in [
            ("800_USDT", &wallet.large_transfers),
            ("25_USDT_before_800", &wallet.small_transfers_before),
            ("500_to_700_USDT", &wallet.mid_transfers),
        ] {
            for tx in txs {
                let _ = writeln!(out, "  {label:<20} {}", describe(tx));
            }
        }
    }
    Ok(out)
}

/// One row per wallet with the size of each matching sub-list.
fn summary_frame(wallets: &[WalletMatchRecord]) -> Result<DataFrame> {
    let count = |f: fn(&WalletMatchRecord) -> usize| -> Vec<u32> {
        wallets.iter().map(|w| f(w) as u32).collect()
    };

    DataFrame::new(vec![
        Series::new(
            "wallet",
            wallets.iter().map(|w| w.wallet.as_str()).collect::<Vec<_>>(),
        ),
        Series::new("800_USDT", count(|w| w.large_transfers.len())),
        Series::new("25_USDT_before_800", count(|w| w.small_transfers_before.len())),
        Series::new("500_to_700_USDT", count(|w| w.mid_transfers.len())),
        Series::new(
            "multiple_addresses",
            wallets.iter().map(|w| w.multiple_addresses).collect::<Vec<_>>(),
        ),
    ])
    .map_err(|e| InvestigationError::eval("failed to build summary table", e))
}

fn describe(tx: &MatchedTransaction) -> String {
    format!(
        "{} {:>10.2} {} -> {}",
        tx.datetime.to_rfc3339_opts(SecondsFormat::Secs, true),
        tx.record.usd_value,
        tx.record.token,
        tx.record.to_address
    )
}
