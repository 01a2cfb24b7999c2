//! Technical-analysis tool server for Chartwise.
//!
//! Exposes `trend`, `momentum` and `volatility` over the MCP stdio
//! transport. Each tool takes a `stock_ticker` and answers with a short
//! text report computed from daily closes.

pub mod indicators;
pub mod prices;
pub mod server;
pub mod tool;
pub mod tools;

use std::sync::Arc;

pub use prices::{CsvDirPriceSource, PriceError, PriceSource, Range, YahooPriceSource};
pub use server::McpServer;
pub use tool::{Tool, ToolError, ToolSet};

/// Directory of `<TICKER>.csv` files to use instead of Yahoo Finance.
pub const PRICE_DIR_ENV: &str = "CHARTWISE_PRICE_DIR";

/// Page size for `tools/list`; unset means a single page.
pub const PAGE_SIZE_ENV: &str = "CHARTWISE_TA_PAGE_SIZE";

/// The three technical-analysis tools over one price source.
pub fn default_tools(prices: Arc<dyn PriceSource>) -> ToolSet {
    let mut set = ToolSet::new();
    set.register(Box::new(tools::TrendTool::new(prices.clone())));
    set.register(Box::new(tools::MomentumTool::new(prices.clone())));
    set.register(Box::new(tools::VolatilityTool::new(prices)));
    set
}

/// Pick the price source from the environment.
pub fn price_source_from_env(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn PriceSource>, PriceError> {
    match lookup(PRICE_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
        Some(dir) => Ok(Arc::new(CsvDirPriceSource::new(dir))),
        None => Ok(Arc::new(YahooPriceSource::new()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tools_in_order() {
        let tools = default_tools(Arc::new(CsvDirPriceSource::new("/tmp")));
        assert_eq!(tools.names(), vec!["trend", "momentum", "volatility"]);
        for descriptor in tools.descriptors() {
            assert_eq!(descriptor.input_schema["required"][0], "stock_ticker");
        }
    }

    #[test]
    fn price_dir_selects_csv_source() {
        let source = price_source_from_env(|key| {
            (key == PRICE_DIR_ENV).then(|| "/var/prices".to_string())
        })
        .unwrap();
        assert_eq!(source.name(), "csv");

        let source = price_source_from_env(|_| None).unwrap();
        assert_eq!(source.name(), "yahoo");
    }
}
