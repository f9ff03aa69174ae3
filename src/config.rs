//! Investigation criteria and runtime configuration
//!
//! Values are layered: `Default` impls carry the stock screening heuristics,
//! the environment (and a `.env` file, if present) overrides them, and the
//! CLI overrides the environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{InvestigationError, Result};

/// Inclusive USD amount window, optionally pinned to a day of the month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountWindow {
    pub min: f64,
    pub max: f64,
    pub day: Option<u32>,
}

impl AmountWindow {
    pub const fn new(min: f64, max: f64, day: Option<u32>) -> Self {
        Self { min, max, day }
    }

    pub fn contains(&self, usd_value: f64) -> bool {
        usd_value >= self.min && usd_value <= self.max
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(InvestigationError::InvalidConfig(format!(
                "{name} window [{}, {}] is not a valid range",
                self.min, self.max
            )));
        }
        if let Some(day) = self.day {
            if !(1..=31).contains(&day) {
                return Err(InvestigationError::InvalidConfig(format!(
                    "{name} day {day} must be within 1..=31"
                )));
            }
        }
        Ok(())
    }
}

/// Which timestamp the small transfers must precede.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CutoffMode {
    /// Earliest large transfer across all wallets.
    #[default]
    Global,
    /// Each wallet's own earliest large transfer.
    PerWallet,
}

impl FromStr for CutoffMode {
    type Err = InvestigationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per-wallet" | "per_wallet" | "wallet" => Ok(Self::PerWallet),
            other => Err(InvestigationError::InvalidConfig(format!(
                "unknown cutoff mode '{other}' (expected 'global' or 'per-wallet')"
            ))),
        }
    }
}

impl fmt::Display for CutoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::PerWallet => write!(f, "per-wallet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl FromStr for OutputFormat {
    type Err = InvestigationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(InvestigationError::InvalidConfig(format!(
                "unknown output format '{other}' (expected 'table' or 'json')"
            ))),
        }
    }
}

/// The five screening criteria.
///
/// `Default` is the stock January 2025 USDT screen:
/// - a 799..=815 transfer on the 3rd
/// - a 24..=26 transfer before that
/// - a 500..=700 transfer on the 10th
/// - sends to more than one distinct recipient during the month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationCriteria {
    pub token: String,
    pub year: i32,
    pub month: u32,
    pub large_transfer: AmountWindow,
    pub small_transfer: AmountWindow,
    pub mid_transfer: AmountWindow,
    pub min_distinct_recipients: u32,
    pub cutoff: CutoffMode,
}

impl Default for InvestigationCriteria {
    fn default() -> Self {
        Self {
            token: "USDT".to_string(),
            year: 2025,
            month: 1,
            large_transfer: AmountWindow::new(799.0, 815.0, Some(3)),
            small_transfer: AmountWindow::new(24.0, 26.0, None),
            mid_transfer: AmountWindow::new(500.0, 700.0, Some(10)),
            min_distinct_recipients: 2,
            cutoff: CutoffMode::Global,
        }
    }
}

impl InvestigationCriteria {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(InvestigationError::InvalidConfig(
                "token must not be empty".to_string(),
            ));
        }
        if !(1..=12).contains(&self.month) {
            return Err(InvestigationError::InvalidConfig(format!(
                "month {} must be within 1..=12",
                self.month
            )));
        }
        if self.min_distinct_recipients == 0 {
            return Err(InvestigationError::InvalidConfig(
                "min_distinct_recipients must be at least 1".to_string(),
            ));
        }
        self.large_transfer.validate("large_transfer")?;
        self.small_transfer.validate("small_transfer")?;
        self.mid_transfer.validate("mid_transfer")?;
        Ok(())
    }

    fn apply(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = lookup("INVESTIGATOR_TOKEN") {
            self.token = token.trim().to_string();
        }
        if let Some(year) = parse_var(lookup, "INVESTIGATOR_YEAR")? {
            self.year = year;
        }
        if let Some(month) = parse_var(lookup, "INVESTIGATOR_MONTH")? {
            self.month = month;
        }
        if let Some(cutoff) = parse_var(lookup, "INVESTIGATOR_CUTOFF")? {
            self.cutoff = cutoff;
        }
        if let Some(min) = parse_var(lookup, "INVESTIGATOR_MIN_RECIPIENTS")? {
            self.min_distinct_recipients = min;
        }
        Ok(())
    }
}

/// Runtime configuration for the investigator binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigatorConfig {
    pub input: Option<PathBuf>,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub criteria: InvestigationCriteria,
}

impl InvestigatorConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from a property map. Keys are matched as given or upper-cased,
    /// so both `investigator_token` and `INVESTIGATOR_TOKEN` work.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|name| {
            props
                .get(&name.to_ascii_lowercase())
                .or_else(|| props.get(name))
                .cloned()
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            input: lookup("INVESTIGATOR_INPUT").map(PathBuf::from),
            output: lookup("INVESTIGATOR_OUTPUT").map(PathBuf::from),
            ..Self::default()
        };
        if let Some(format) = parse_var(&lookup, "INVESTIGATOR_FORMAT")? {
            config.format = format;
        }
        config.criteria.apply(&lookup)?;
        config.criteria.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|e| {
        InvestigationError::InvalidConfig(format!("{name}='{raw}' could not be parsed: {e}"))
    })
}
