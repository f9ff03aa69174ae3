use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use tracing::{debug, info, instrument};

use crate::config::{AmountWindow, CutoffMode, InvestigationCriteria};
use crate::error::{InvestigationError, Result};
use crate::loader::{
    load_parquet, normalize_frame, records_to_frame, FROM_ADDRESS, TOKEN, TO_ADDRESS,
    UNIX_TIMESTAMP, USD_VALUE,
};
use crate::model::{
    Investigation, MatchedTransaction, StageStats, TransactionRecord, WalletMatchRecord,
};

const DATETIME: &str = "datetime";
const FIRST_LARGE_TS: &str = "first_large_ts";
const RECIPIENT_COUNT: &str = "recipient_count";

/// Run the stock screen over in-memory records.
pub fn investigate(transactions: &[TransactionRecord]) -> Result<Vec<WalletMatchRecord>> {
    WalletInvestigator::default().investigate_records(transactions)
}

/// Frames produced by the filter stages. All share the normalised ledger
/// columns plus `datetime`.
struct Stages {
    month: DataFrame,
    large: DataFrame,
    small: DataFrame,
    mid: DataFrame,
}

/// Screens a ledger for wallets meeting every [`InvestigationCriteria`].
#[derive(Debug, Clone, Default)]
pub struct WalletInvestigator {
    criteria: InvestigationCriteria,
}

impl WalletInvestigator {
    pub fn new(criteria: InvestigationCriteria) -> Result<Self> {
        criteria.validate()?;
        Ok(Self { criteria })
    }

    pub fn criteria(&self) -> &InvestigationCriteria {
        &self.criteria
    }

    #[instrument(skip(self))]
    pub fn investigate_file(&self, path: &Path) -> Result<Investigation> {
        let load_start = Instant::now();
        let ledger = load_parquet(path)?;
        let load_ms = load_start.elapsed().as_millis() as u64;

        let mut investigation = self.run(ledger)?;
        investigation.stats.timings_ms.load = load_ms;
        investigation.stats.timings_ms.total += load_ms;
        Ok(investigation)
    }

    /// Investigate an arbitrary frame; its columns are checked and normalised first.
    pub fn investigate_frame(&self, ledger: DataFrame) -> Result<Investigation> {
        self.run(normalize_frame(ledger)?)
    }

    pub fn investigate_records(
        &self,
        transactions: &[TransactionRecord],
    ) -> Result<Vec<WalletMatchRecord>> {
        Ok(self.run(records_to_frame(transactions)?)?.wallets)
    }

    #[instrument(skip(self, ledger), fields(rows = ledger.height(), cutoff = %self.criteria.cutoff))]
    fn run(&self, ledger: DataFrame) -> Result<Investigation> {
        let total_start = Instant::now();
        let mut stats = StageStats {
            rows_loaded: ledger.height(),
            ..Default::default()
        };

        let filter_start = Instant::now();
        let stages = self.filter_stages(ledger)?;
        stats.month_rows = stages.month.height();
        stats.large_rows = stages.large.height();
        stats.small_rows = stages.small.height();
        stats.mid_rows = stages.mid.height();

        let candidates = candidate_wallets(&stages)?;
        stats.candidates = candidates.len();
        let recipients = self.recipient_counts(&stages.month, &candidates)?;
        stats.timings_ms.filter = filter_start.elapsed().as_millis() as u64;

        let assemble_start = Instant::now();
        let wallets = assemble(&stages, recipients)?;
        stats.wallets_matched = wallets.len();
        stats.timings_ms.assemble = assemble_start.elapsed().as_millis() as u64;
        stats.timings_ms.total = total_start.elapsed().as_millis() as u64;

        info!(
            month_rows = stats.month_rows,
            large_rows = stats.large_rows,
            small_rows = stats.small_rows,
            mid_rows = stats.mid_rows,
            candidates = stats.candidates,
            wallets_matched = stats.wallets_matched,
            total_ms = stats.timings_ms.total,
            "investigation complete"
        );

        Ok(Investigation { wallets, stats })
    }

    fn filter_stages(&self, ledger: DataFrame) -> Result<Stages> {
        let c = &self.criteria;

        let month = collect(
            ledger
                .lazy()
                .with_column(datetime_expr().alias(DATETIME))
                .filter(
                    col(TOKEN)
                        .eq(lit(c.token.as_str()))
                        .and(col(DATETIME).dt().year().eq(lit(c.year)))
                        .and(
                            col(DATETIME)
                                .dt()
                                .month()
                                .cast(DataType::Int32)
                                .eq(lit(c.month as i32)),
                        ),
                ),
            "month filter",
        )?;
        debug!(rows = month.height(), token = %c.token, year = c.year, month = c.month, "month stage");

        let large = collect(
            month.clone().lazy().filter(window_expr(&c.large_transfer)),
            "large transfer filter",
        )?;
        let small = self.small_transfers(&month, &large)?;
        let mid = collect(
            month.clone().lazy().filter(window_expr(&c.mid_transfer)),
            "mid transfer filter",
        )?;
        debug!(
            large = large.height(),
            small = small.height(),
            mid = mid.height(),
            "amount stages"
        );

        Ok(Stages {
            month,
            large,
            small,
            mid,
        })
    }

    /// Small transfers strictly before the cutoff. Without any large
    /// transfer there is no cutoff and the stage is empty.
    fn small_transfers(&self, month: &DataFrame, large: &DataFrame) -> Result<DataFrame> {
        if large.height() == 0 {
            return Ok(month.head(Some(0)));
        }

        let small = month
            .clone()
            .lazy()
            .filter(window_expr(&self.criteria.small_transfer));

        match self.criteria.cutoff {
            CutoffMode::Global => {
                let cutoff = large
                    .column(UNIX_TIMESTAMP)
                    .and_then(|s| s.i64())
                    .map_err(|e| InvestigationError::eval("reading large transfer timestamps", e))?
                    .min();
                let Some(cutoff) = cutoff else {
                    return Ok(month.head(Some(0)));
                };
                debug!(cutoff, "global cutoff");
                collect(
                    small.filter(col(UNIX_TIMESTAMP).lt(lit(cutoff))),
                    "small transfer filter",
                )
            }
            CutoffMode::PerWallet => {
                let first_large = large
                    .clone()
                    .lazy()
                    .group_by([col(FROM_ADDRESS)])
                    .agg([col(UNIX_TIMESTAMP).min().alias(FIRST_LARGE_TS)]);
                collect(
                    small
                        .join(
                            first_large,
                            [col(FROM_ADDRESS)],
                            [col(FROM_ADDRESS)],
                            JoinArgs::new(JoinType::Inner),
                        )
                        .filter(col(UNIX_TIMESTAMP).lt(col(FIRST_LARGE_TS)))
                        .select(stage_columns()),
                    "per-wallet small transfer filter",
                )
            }
        }
    }

    /// Distinct recipient counts for candidates meeting the fan-out threshold.
    /// Counts cover every send in the month stage, not only matched rows.
    fn recipient_counts(
        &self,
        month: &DataFrame,
        candidates: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, u32>> {
        if candidates.is_empty() {
            return Ok(BTreeMap::new());
        }

        let wallets = Series::new(
            "candidates",
            candidates.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        let counts = collect(
            month
                .clone()
                .lazy()
                .filter(col(FROM_ADDRESS).is_in(lit(wallets)))
                .group_by([col(FROM_ADDRESS)])
                .agg([col(TO_ADDRESS)
                    .drop_nulls()
                    .n_unique()
                    .cast(DataType::UInt32)
                    .alias(RECIPIENT_COUNT)])
                .filter(col(RECIPIENT_COUNT).gt_eq(lit(self.criteria.min_distinct_recipients))),
            "recipient fan-out",
        )?;

        let senders = str_column(&counts, FROM_ADDRESS)?;
        let totals = counts
            .column(RECIPIENT_COUNT)
            .and_then(|s| s.u32())
            .map_err(|e| InvestigationError::eval("reading recipient counts", e))?;

        let mut out = BTreeMap::new();
        for (wallet, total) in senders.into_iter().zip(totals) {
            let (Some(wallet), Some(total)) = (wallet, total) else {
                continue;
            };
            if candidates.contains(wallet) {
                out.insert(wallet.to_string(), total);
            }
        }
        debug!(wallets = out.len(), "fan-out stage");
        Ok(out)
    }
}

fn candidate_wallets(stages: &Stages) -> Result<BTreeSet<String>> {
    let large = distinct_senders(&stages.large)?;
    let small = distinct_senders(&stages.small)?;
    let mid = distinct_senders(&stages.mid)?;

    Ok(large
        .into_iter()
        .filter(|wallet| small.contains(wallet) && mid.contains(wallet))
        .collect())
}

fn assemble(
    stages: &Stages,
    recipients: BTreeMap<String, u32>,
) -> Result<Vec<WalletMatchRecord>> {
    if recipients.is_empty() {
        return Ok(Vec::new());
    }

    let mut large = transactions_by_wallet(&stages.large, &recipients)?;
    let mut small = transactions_by_wallet(&stages.small, &recipients)?;
    let mut mid = transactions_by_wallet(&stages.mid, &recipients)?;

    Ok(recipients
        .into_iter()
        .map(|(wallet, count)| WalletMatchRecord {
            large_transfers: large.remove(&wallet).unwrap_or_default(),
            small_transfers_before: small.remove(&wallet).unwrap_or_default(),
            mid_transfers: mid.remove(&wallet).unwrap_or_default(),
            multiple_addresses: count,
            wallet,
        })
        .collect())
}

/// Rows of a stage frame grouped by sender, restricted to `wallets` and
/// ordered by timestamp.
fn transactions_by_wallet(
    df: &DataFrame,
    wallets: &BTreeMap<String, u32>,
) -> Result<HashMap<String, Vec<MatchedTransaction>>> {
    let from = str_column(df, FROM_ADDRESS)?;
    let to = str_column(df, TO_ADDRESS)?;
    let token = str_column(df, TOKEN)?;
    let usd = df
        .column(USD_VALUE)
        .and_then(|s| s.f64())
        .map_err(|e| InvestigationError::eval("reading usd_value", e))?;
    let ts = df
        .column(UNIX_TIMESTAMP)
        .and_then(|s| s.i64())
        .map_err(|e| InvestigationError::eval("reading unixtimestamp", e))?;

    let mut grouped: HashMap<String, Vec<MatchedTransaction>> = HashMap::new();
    for idx in 0..df.height() {
        let Some(wallet) = from.get(idx) else {
            continue;
        };
        if !wallets.contains_key(wallet) {
            continue;
        }
        let (Some(usd_value), Some(unixtimestamp)) = (usd.get(idx), ts.get(idx)) else {
            continue;
        };
        let datetime = DateTime::<Utc>::from_timestamp(unixtimestamp, 0).ok_or_else(|| {
            InvestigationError::EvalError(format!(
                "timestamp {unixtimestamp} is outside the representable range"
            ))
        })?;

        grouped
            .entry(wallet.to_string())
            .or_default()
            .push(MatchedTransaction {
                record: TransactionRecord {
                    from_address: wallet.to_string(),
                    to_address: to.get(idx).unwrap_or_default().to_string(),
                    token: token.get(idx).unwrap_or_default().to_string(),
                    usd_value,
                    unixtimestamp,
                },
                datetime,
            });
    }

    for txs in grouped.values_mut() {
        txs.sort_by_key(|tx| tx.record.unixtimestamp);
    }
    Ok(grouped)
}

fn distinct_senders(df: &DataFrame) -> Result<BTreeSet<String>> {
    Ok(str_column(df, FROM_ADDRESS)?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

fn str_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a StringChunked> {
    df.column(name)
        .and_then(|s| s.str())
        .map_err(|e| InvestigationError::eval(&format!("reading '{name}'"), e))
}

fn collect(lf: LazyFrame, stage: &str) -> Result<DataFrame> {
    lf.collect()
        .map_err(|e| InvestigationError::eval(&format!("{stage} failed"), e))
}

fn datetime_expr() -> Expr {
    (col(UNIX_TIMESTAMP) * lit(1_000_i64)).cast(DataType::Datetime(TimeUnit::Milliseconds, None))
}

fn window_expr(window: &AmountWindow) -> Expr {
    let in_range = col(USD_VALUE)
        .gt_eq(lit(window.min))
        .and(col(USD_VALUE).lt_eq(lit(window.max)));
    match window.day {
        Some(day) => in_range.and(
            col(DATETIME)
                .dt()
                .day()
                .cast(DataType::Int32)
                .eq(lit(day as i32)),
        ),
        None => in_range,
    }
}

fn stage_columns() -> [Expr; 6] {
    [
        col(FROM_ADDRESS),
        col(TO_ADDRESS),
        col(TOKEN),
        col(USD_VALUE),
        col(UNIX_TIMESTAMP),
        col(DATETIME),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// 2025-01-01T00:00:00Z
    const JAN_1_2025: i64 = 1_735_689_600;

    fn jan(day: i64, hour: i64) -> i64 {
        JAN_1_2025 + (day - 1) * 86_400 + hour * 3_600
    }

    fn usdt(from: &str, to: &str, usd_value: f64, ts: i64) -> TransactionRecord {
        TransactionRecord::new(from, to, "USDT", usd_value, ts)
    }

    /// $25 on the 1st, $800 on the 3rd, $600 on the 10th, two recipients.
    fn qualifying(wallet: &str, small: f64, large: f64, mid: f64) -> Vec<TransactionRecord> {
        vec![
            usdt(wallet, "R1", small, jan(1, 12)),
            usdt(wallet, "R2", large, jan(3, 12)),
            usdt(wallet, "R1", mid, jan(10, 12)),
        ]
    }

    fn wallets(records: &[TransactionRecord]) -> Vec<String> {
        investigate(records)
            .unwrap()
            .into_iter()
            .map(|w| w.wallet)
            .collect()
    }

    #[test]
    fn qualifying_wallet_gets_full_breakdown() {
        let result = investigate(&qualifying("W1", 25.0, 800.0, 600.0)).unwrap();

        assert_eq!(result.len(), 1);
        let w = &result[0];
        assert_eq!(w.wallet, "W1");
        assert_eq!(w.large_transfers.len(), 1);
        assert_eq!(w.small_transfers_before.len(), 1);
        assert_eq!(w.mid_transfers.len(), 1);
        assert_eq!(w.multiple_addresses, 2);
        assert_eq!(w.large_transfers[0].record.usd_value, 800.0);
        assert_eq!(w.small_transfers_before[0].record.to_address, "R1");
        assert_eq!(
            w.mid_transfers[0].datetime.to_rfc3339(),
            "2025-01-10T12:00:00+00:00"
        );
    }

    #[test]
    fn single_recipient_is_excluded() {
        let records: Vec<_> = qualifying("W1", 25.0, 800.0, 600.0)
            .into_iter()
            .map(|mut r| {
                r.to_address = "R1".to_string();
                r
            })
            .collect();
        assert!(wallets(&records).is_empty());
    }

    #[test]
    fn fan_out_counts_every_send_in_the_month() {
        let mut records: Vec<_> = qualifying("W1", 25.0, 800.0, 600.0)
            .into_iter()
            .map(|mut r| {
                r.to_address = "R1".to_string();
                r
            })
            .collect();
        records.push(usdt("W1", "R9", 5.0, jan(20, 0)));

        let result = investigate(&records).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].multiple_addresses, 2);
    }

    #[test]
    fn no_small_transfer_before_large_is_excluded() {
        let records = vec![
            usdt("W1", "R2", 800.0, jan(3, 12)),
            usdt("W1", "R1", 25.0, jan(5, 12)),
            usdt("W1", "R1", 600.0, jan(10, 12)),
        ];
        assert!(wallets(&records).is_empty());
    }

    #[test]
    fn other_months_and_tokens_are_ignored() {
        let mut records = Vec::new();
        // February 2025
        for r in qualifying("FEB", 25.0, 800.0, 600.0) {
            records.push(TransactionRecord {
                unixtimestamp: r.unixtimestamp + 31 * 86_400,
                ..r
            });
        }
        // a year earlier
        for r in qualifying("OLD", 25.0, 800.0, 600.0) {
            records.push(TransactionRecord {
                unixtimestamp: r.unixtimestamp - 365 * 86_400,
                ..r
            });
        }
        for r in qualifying("USDC", 25.0, 800.0, 600.0) {
            records.push(TransactionRecord {
                token: "USDC".to_string(),
                ..r
            });
        }

        assert!(wallets(&records).is_empty());
    }

    #[test]
    fn amount_windows_are_inclusive() {
        let cases = [
            ("large_799", 25.0, 799.0, 600.0, true),
            ("large_815", 25.0, 815.0, 600.0, true),
            ("large_798_99", 25.0, 798.99, 600.0, false),
            ("large_815_01", 25.0, 815.01, 600.0, false),
            ("small_24", 24.0, 800.0, 600.0, true),
            ("small_26", 26.0, 800.0, 600.0, true),
            ("small_23_99", 23.99, 800.0, 600.0, false),
            ("small_26_01", 26.01, 800.0, 600.0, false),
            ("mid_500", 25.0, 800.0, 500.0, true),
            ("mid_700", 25.0, 800.0, 700.0, true),
            ("mid_499_99", 25.0, 800.0, 499.99, false),
            ("mid_700_01", 25.0, 800.0, 700.01, false),
        ];

        for (wallet, small, large, mid, expected) in cases {
            let found = !wallets(&qualifying(wallet, small, large, mid)).is_empty();
            assert_eq!(found, expected, "{wallet}");
        }
    }

    #[test]
    fn day_of_month_uses_utc_calendar_day() {
        let mut last_second = qualifying("EDGE", 25.0, 800.0, 600.0);
        last_second[1].unixtimestamp = jan(4, 0) - 1;
        assert_eq!(wallets(&last_second), vec!["EDGE".to_string()]);

        let mut next_day = qualifying("EDGE", 25.0, 800.0, 600.0);
        next_day[1].unixtimestamp = jan(4, 0);
        assert!(wallets(&next_day).is_empty());
    }

    #[test]
    fn global_cutoff_uses_earliest_large_transfer_of_any_wallet() {
        let mut records = qualifying("EARLY", 25.0, 800.0, 600.0);
        records[1].unixtimestamp = jan(3, 0);
        // LATE's $25 precedes its own $800 but not EARLY's.
        records.extend([
            usdt("LATE", "R1", 25.0, jan(3, 6)),
            usdt("LATE", "R2", 800.0, jan(3, 12)),
            usdt("LATE", "R1", 600.0, jan(10, 12)),
        ]);

        assert_eq!(wallets(&records), vec!["EARLY".to_string()]);

        let per_wallet = WalletInvestigator::new(InvestigationCriteria {
            cutoff: CutoffMode::PerWallet,
            ..Default::default()
        })
        .unwrap();
        let found: Vec<String> = per_wallet
            .investigate_records(&records)
            .unwrap()
            .into_iter()
            .map(|w| w.wallet)
            .collect();
        assert_eq!(found, vec!["EARLY".to_string(), "LATE".to_string()]);
    }

    #[test]
    fn sub_lists_only_hold_the_wallets_own_rows_in_time_order() {
        let mut records = qualifying("W1", 25.0, 800.0, 600.0);
        records.extend(qualifying("W2", 25.5, 805.0, 650.0));
        records.push(usdt("W1", "R3", 650.0, jan(10, 1)));

        let result = investigate(&records).unwrap();
        assert_eq!(result.len(), 2);

        let w1 = &result[0];
        assert_eq!(w1.wallet, "W1");
        assert_eq!(w1.multiple_addresses, 3);
        let mids: Vec<f64> = w1.mid_transfers.iter().map(|t| t.record.usd_value).collect();
        assert_eq!(mids, vec![650.0, 600.0]);
        assert!(result
            .iter()
            .all(|w| w.large_transfers.iter().all(|t| t.record.from_address == w.wallet)));
    }

    #[test]
    fn empty_ledger_yields_empty_result() {
        assert!(investigate(&[]).unwrap().is_empty());
    }

    #[test]
    fn repeated_runs_are_identical() {
        let mut records = qualifying("W1", 25.0, 800.0, 600.0);
        records.extend(qualifying("W2", 24.5, 810.0, 510.0));
        records.push(usdt("W3", "R1", 800.0, jan(3, 1)));

        let first = investigate(&records).unwrap();
        let second = investigate(&records).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn stats_track_each_stage() {
        let mut records = qualifying("W1", 25.0, 800.0, 600.0);
        records.push(usdt("W2", "R1", 800.0, jan(3, 13)));
        records.push(TransactionRecord::new("W3", "R1", "TRX", 800.0, jan(3, 13)));

        let df = records_to_frame(&records).unwrap();
        let investigation = WalletInvestigator::default().investigate_frame(df).unwrap();
        let stats = investigation.stats;

        assert_eq!(stats.rows_loaded, 5);
        assert_eq!(stats.month_rows, 4);
        assert_eq!(stats.large_rows, 2);
        assert_eq!(stats.small_rows, 1);
        assert_eq!(stats.mid_rows, 1);
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.wallets_matched, 1);
    }

    #[test]
    fn higher_recipient_threshold_excludes_two_recipient_wallets() {
        let investigator = WalletInvestigator::new(InvestigationCriteria {
            min_distinct_recipients: 3,
            ..Default::default()
        })
        .unwrap();
        let result = investigator
            .investigate_records(&qualifying("W1", 25.0, 800.0, 600.0))
            .unwrap();
        assert!(result.is_empty());
    }
}
