//! The technical-analysis tools: `trend`, `momentum` and `volatility`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::indicators;
use crate::prices::{PriceSource, Range};
use crate::tool::{Tool, ToolError, ticker_argument};

const RSI_PERIOD: usize = 14;
const SHORT_MA: usize = 50;
const LONG_MA: usize = 200;

fn ticker_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "stock_ticker": {
                "type": "string",
                "description": "Stock ticker symbol, e.g. AAPL"
            }
        },
        "required": ["stock_ticker"]
    })
}

fn not_enough(ticker: &str, needed: usize, got: usize) -> ToolError {
    ToolError::InsufficientHistory {
        ticker: ticker.to_string(),
        needed,
        got,
    }
}

/// Trend detection from the 50- and 200-day moving averages.
pub struct TrendTool {
    prices: Arc<dyn PriceSource>,
}

impl TrendTool {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self { prices }
    }
}

/// Classify price against its moving averages.
pub fn classify_trend(last: f64, ma50: f64, ma200: f64) -> &'static str {
    if last > ma50 && ma50 > ma200 {
        "Strong Uptrend"
    } else if last < ma50 && ma50 < ma200 {
        "Strong Downtrend"
    } else {
        "Sideways / Consolidation"
    }
}

#[async_trait]
impl Tool for TrendTool {
    fn name(&self) -> &str {
        "trend"
    }

    fn description(&self) -> &str {
        "Trend detection using the 50-day and 200-day moving averages of one year of daily closes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        ticker_schema()
    }

    async fn execute(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let ticker = ticker_argument(arguments)?;
        let closes = self.prices.daily_closes(&ticker, Range::OneYear).await?;

        let (Some(ma50), Some(ma200), Some(&last)) = (
            indicators::sma(&closes, SHORT_MA),
            indicators::sma(&closes, LONG_MA),
            closes.last(),
        ) else {
            return Err(not_enough(&ticker, LONG_MA, closes.len()));
        };

        Ok(format!(
            "{ticker} Trend Analysis:\nPrice: {last:.2}\n50 DMA: {ma50:.2}\n200 DMA: {ma200:.2}\nTrend: {}",
            classify_trend(last, ma50, ma200)
        ))
    }
}

/// RSI(14) momentum over three months of closes.
pub struct MomentumTool {
    prices: Arc<dyn PriceSource>,
}

impl MomentumTool {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self { prices }
    }
}

pub fn classify_rsi(value: f64) -> &'static str {
    if value > 70.0 {
        "Overbought"
    } else if value < 30.0 {
        "Oversold"
    } else {
        "Neutral"
    }
}

#[async_trait]
impl Tool for MomentumTool {
    fn name(&self) -> &str {
        "momentum"
    }

    fn description(&self) -> &str {
        "RSI-based momentum indicator (14 periods) over three months of daily closes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        ticker_schema()
    }

    async fn execute(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let ticker = ticker_argument(arguments)?;
        let closes = self.prices.daily_closes(&ticker, Range::ThreeMonths).await?;

        let value = indicators::rsi(&closes, RSI_PERIOD)
            .ok_or_else(|| not_enough(&ticker, RSI_PERIOD + 1, closes.len()))?;

        Ok(format!(
            "{ticker} RSI({RSI_PERIOD}): {value:.2} → {}",
            classify_rsi(value)
        ))
    }
}

/// Annualized historical volatility over two months of closes.
pub struct VolatilityTool {
    prices: Arc<dyn PriceSource>,
}

impl VolatilityTool {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl Tool for VolatilityTool {
    fn name(&self) -> &str {
        "volatility"
    }

    fn description(&self) -> &str {
        "Annualized historical volatility from two months of daily returns."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        ticker_schema()
    }

    async fn execute(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let ticker = ticker_argument(arguments)?;
        let closes = self.prices.daily_closes(&ticker, Range::TwoMonths).await?;

        let vol = indicators::annualized_volatility(&closes)
            .ok_or_else(|| not_enough(&ticker, 3, closes.len()))?;

        Ok(format!("{ticker} Annualized Volatility: {:.2}%", vol * 100.0))
    }
}
