//! Ledger loading and column normalisation

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, instrument};

use crate::error::{InvestigationError, Result};
use crate::model::TransactionRecord;

pub const FROM_ADDRESS: &str = "fromAddress";
pub const TO_ADDRESS: &str = "toAddress";
pub const TOKEN: &str = "token";
pub const USD_VALUE: &str = "usd_value";
pub const UNIX_TIMESTAMP: &str = "unixtimestamp";

pub const REQUIRED_COLUMNS: [&str; 5] = [FROM_ADDRESS, TO_ADDRESS, TOKEN, USD_VALUE, UNIX_TIMESTAMP];

/// Read a Parquet ledger in full and normalise it.
#[instrument]
pub fn load_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => InvestigationError::FileNotFound(path.to_path_buf()),
        _ => InvestigationError::Io(e),
    })?;

    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| InvestigationError::eval("failed to read parquet", e))?;
    debug!(rows = df.height(), columns = df.width(), "ledger loaded");

    normalize_frame(df)
}

/// Check the required columns and project the frame onto them with the
/// canonical types (`String`, `Float64` amount, `Int64` timestamp).
/// Extra columns are dropped.
pub fn normalize_frame(df: DataFrame) -> Result<DataFrame> {
    for name in [FROM_ADDRESS, TO_ADDRESS, TOKEN] {
        let dtype = column_dtype(&df, name)?;
        if !matches!(dtype, DataType::String | DataType::Categorical(..)) {
            return Err(InvestigationError::SchemaMismatch(format!(
                "column '{name}' must be string (got {dtype})"
            )));
        }
    }

    let dtype = column_dtype(&df, USD_VALUE)?;
    if !(is_integer(&dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)) {
        return Err(InvestigationError::SchemaMismatch(format!(
            "column '{USD_VALUE}' must be numeric (got {dtype})"
        )));
    }

    let dtype = column_dtype(&df, UNIX_TIMESTAMP)?;
    if !is_integer(&dtype) {
        return Err(InvestigationError::SchemaMismatch(format!(
            "column '{UNIX_TIMESTAMP}' must be an integer (got {dtype})"
        )));
    }

    df.lazy()
        .select([
            col(FROM_ADDRESS).cast(DataType::String),
            col(TO_ADDRESS).cast(DataType::String),
            col(TOKEN).cast(DataType::String),
            col(USD_VALUE).cast(DataType::Float64),
            col(UNIX_TIMESTAMP).cast(DataType::Int64),
        ])
        .collect()
        .map_err(|e| InvestigationError::eval("failed to normalise ledger columns", e))
}

/// Build a normalised ledger frame from in-memory records.
pub fn records_to_frame(records: &[TransactionRecord]) -> Result<DataFrame> {
    let from: Vec<&str> = records.iter().map(|r| r.from_address.as_str()).collect();
    let to: Vec<&str> = records.iter().map(|r| r.to_address.as_str()).collect();
    let token: Vec<&str> = records.iter().map(|r| r.token.as_str()).collect();
    let usd: Vec<f64> = records.iter().map(|r| r.usd_value).collect();
    let ts: Vec<i64> = records.iter().map(|r| r.unixtimestamp).collect();

    DataFrame::new(vec![
        Series::new(FROM_ADDRESS, from),
        Series::new(TO_ADDRESS, to),
        Series::new(TOKEN, token),
        Series::new(USD_VALUE, usd),
        Series::new(UNIX_TIMESTAMP, ts),
    ])
    .map_err(|e| InvestigationError::eval("failed to build ledger frame", e))
}

fn column_dtype(df: &DataFrame, name: &str) -> Result<DataType> {
    df.column(name)
        .map(|s| s.dtype().clone())
        .map_err(|_| {
            InvestigationError::SchemaMismatch(format!("missing required column '{name}'"))
        })
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}
