//! Daily close prices.
//!
//! `YahooPriceSource` queries the Yahoo Finance chart API; `CsvDirPriceSource`
//! reads `<TICKER>.csv` files from a directory for offline use.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// History windows the tools ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    OneYear,
    ThreeMonths,
    TwoMonths,
}

impl Range {
    /// Value of the Yahoo `range` query parameter.
    pub fn yahoo_range(self) -> &'static str {
        match self {
            Self::OneYear => "1y",
            Self::ThreeMonths => "3mo",
            Self::TwoMonths => "2mo",
        }
    }

    /// Approximate number of trading days in the window.
    pub fn trading_days(self) -> usize {
        match self {
            Self::OneYear => 252,
            Self::ThreeMonths => 63,
            Self::TwoMonths => 42,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("Invalid ticker symbol: '{0}'")]
    InvalidTicker(String),

    #[error("No price data found for '{0}'")]
    UnknownTicker(String),

    #[error("Price request failed: {0}")]
    Http(String),

    #[error("Price data source error: {0}")]
    Upstream(String),

    #[error("Malformed price data: {0}")]
    Malformed(String),

    #[error("Failed to read price file: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of daily closing prices, oldest first.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn daily_closes(&self, ticker: &str, range: Range) -> Result<Vec<f64>, PriceError>;
}

/// Accept the characters exchange symbols use (`BRK-B`, `^GSPC`, `EURUSD=X`).
pub fn validate_ticker(ticker: &str) -> Result<(), PriceError> {
    let valid = !ticker.is_empty()
        && ticker.len() <= 16
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid && !ticker.starts_with('.') {
        Ok(())
    } else {
        Err(PriceError::InvalidTicker(ticker.to_string()))
    }
}

// --- Yahoo Finance ---

pub struct YahooPriceSource {
    base_url: String,
    client: reqwest::Client,
}

impl YahooPriceSource {
    pub fn new() -> Result<Self, PriceError> {
        Self::with_base_url("https://query1.finance.yahoo.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("chartwise-ta-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PriceError::Http(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl PriceSource for YahooPriceSource {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn daily_closes(&self, ticker: &str, range: Range) -> Result<Vec<f64>, PriceError> {
        validate_ticker(ticker)?;
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        debug!(ticker = %ticker, range = range.yahoo_range(), "Fetching closes");

        let response = self
            .client
            .get(&url)
            .query(&[("range", range.yahoo_range()), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| PriceError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PriceError::Http(e.to_string()))?;

        let envelope: ChartEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(PriceError::Http(format!("status {}", status.as_u16())));
            }
            Err(e) => return Err(PriceError::Malformed(e.to_string())),
        };

        if let Some(error) = envelope.chart.error {
            return Err(if error.code == "Not Found" {
                PriceError::UnknownTicker(ticker.to_string())
            } else {
                PriceError::Upstream(error.description)
            });
        }

        let closes: Vec<f64> = envelope
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .and_then(|result| result.indicators.quote.into_iter().next())
            .map(|quote| quote.close.into_iter().flatten().collect())
            .unwrap_or_default();

        if closes.is_empty() {
            return Err(PriceError::UnknownTicker(ticker.to_string()));
        }
        Ok(closes)
    }
}

// --- CSV directory ---

/// Reads `<dir>/<TICKER>.csv`: one row per day, oldest first, close price
/// in the last column. Rows whose last column is not a number (headers)
/// are skipped.
pub struct CsvDirPriceSource {
    dir: PathBuf,
}

impl CsvDirPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker.to_ascii_uppercase()))
    }
}

/// Parse close prices from CSV text.
pub fn parse_closes(text: &str) -> Vec<f64> {
    text.lines()
        .filter_map(|line| line.rsplit(',').next())
        .filter_map(|field| field.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

#[async_trait]
impl PriceSource for CsvDirPriceSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn daily_closes(&self, ticker: &str, range: Range) -> Result<Vec<f64>, PriceError> {
        validate_ticker(ticker)?;
        let path = self.path_for(ticker);
        debug!(path = %path.display(), "Reading closes");

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PriceError::UnknownTicker(ticker.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut closes = parse_closes(&text);
        if closes.is_empty() {
            return Err(PriceError::UnknownTicker(ticker.to_string()));
        }
        let keep = range.trading_days();
        if closes.len() > keep {
            closes.drain(..closes.len() - keep);
        }
        Ok(closes)
    }
}
