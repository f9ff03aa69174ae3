//! Wallet Investigator binary entry point
//!
//! Loads a Parquet ledger, runs the screen and prints the per-wallet breakdown.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use wallet_investigator::report::{render, write_report};
use wallet_investigator::{
    CutoffMode, InvestigationError, InvestigatorConfig, OutputFormat, WalletInvestigator,
};

/// Screen a Parquet ledger for wallets matching the USDT transfer pattern
#[derive(Parser)]
#[command(name = "wallet-investigator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Parquet ledger (fromAddress, toAddress, token, usd_value, unixtimestamp)
    input: Option<PathBuf>,

    /// Output format: table or json
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Small-transfer cutoff: global or per-wallet
    #[arg(long)]
    cutoff: Option<CutoffMode>,

    /// Token symbol to screen
    #[arg(long)]
    token: Option<String>,

    /// Calendar year to screen
    #[arg(long)]
    year: Option<i32>,

    /// Calendar month to screen (1-12)
    #[arg(long)]
    month: Option<u32>,
}

impl Cli {
    fn apply(self, config: &mut InvestigatorConfig) {
        if let Some(input) = self.input {
            config.input = Some(input);
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }
        let criteria = &mut config.criteria;
        if let Some(cutoff) = self.cutoff {
            criteria.cutoff = cutoff;
        }
        if let Some(token) = self.token {
            criteria.token = token;
        }
        if let Some(year) = self.year {
            criteria.year = year;
        }
        if let Some(month) = self.month {
            criteria.month = month;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("failed to initialise logging: {e:?}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<InvestigationError>()
                .map(InvestigationError::code)
                .unwrap_or("internal");
            error!(code, "investigation failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wallet_investigator=info".parse()?),
        )
        .init();
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = InvestigatorConfig::from_env()?;
    cli.apply(&mut config);

    let input = config
        .input
        .clone()
        .context("no input ledger given (pass a path or set INVESTIGATOR_INPUT)")?;

    info!(
        input = %input.display(),
        token = %config.criteria.token,
        year = config.criteria.year,
        month = config.criteria.month,
        cutoff = %config.criteria.cutoff,
        "starting investigation"
    );

    let investigator = WalletInvestigator::new(config.criteria.clone())?;
    let investigation = investigator.investigate_file(&input)?;

    let rendered = render(&investigation, config.format)?;
    write_report(&rendered, config.output.as_deref())
        .context("failed to write report")?;

    info!(
        wallets = investigation.wallets.len(),
        total_ms = investigation.stats.timings_ms.total,
        "done"
    );
    Ok(())
}
