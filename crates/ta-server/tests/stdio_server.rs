//! Drives the real `chartwise-ta-server` binary through the MCP connector,
//! with prices served from a temporary CSV directory.

use std::path::Path;

use chartwise_core::capability::{InvocationRequest, ToolHandle};
use chartwise_core::error::InvocationFailure;
use chartwise_mcp::{ConnectorState, ToolServerConnector, ToolServerSpec};
use serde_json::json;

fn write_closes(dir: &Path, ticker: &str, closes: impl IntoIterator<Item = f64>) {
    let mut text = String::from("date,close\n");
    for (day, close) in closes.into_iter().enumerate() {
        text.push_str(&format!("d{day},{close}\n"));
    }
    std::fs::write(dir.join(format!("{ticker}.csv")), text).unwrap();
}

fn spec(dir: &Path) -> ToolServerSpec {
    ToolServerSpec::new("ta", env!("CARGO_BIN_EXE_chartwise-ta-server"))
        .with_env("CHARTWISE_PRICE_DIR", dir.display().to_string())
        .with_env("RUST_LOG", "warn")
}

fn ticker(capability: &str, t: &str) -> InvocationRequest {
    InvocationRequest::from_value(capability, json!({"stock_ticker": t}))
}

#[tokio::test]
async fn advertises_the_three_tools() {
    let dir = tempfile::tempdir().unwrap();
    let connector = ToolServerConnector::start(spec(dir.path())).await.unwrap();

    let names: Vec<&str> = connector
        .list_capabilities()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["trend", "momentum", "volatility"]);
    assert_eq!(
        connector.server_info().map(|i| i.name.as_str()),
        Some("technicalanalysisserver")
    );

    connector.stop().await;
    assert_eq!(connector.state(), ConnectorState::Stopped);
}

#[tokio::test]
async fn paginated_listing_is_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let connector = ToolServerConnector::start(spec(dir.path()).with_env("CHARTWISE_TA_PAGE_SIZE", "1"))
        .await
        .unwrap();

    assert_eq!(connector.list_capabilities().len(), 3);
    connector.stop().await;
}

#[tokio::test]
async fn trend_report_from_csv_prices() {
    let dir = tempfile::tempdir().unwrap();
    write_closes(dir.path(), "AAPL", (1..=252).map(f64::from));
    let connector = ToolServerConnector::start(spec(dir.path())).await.unwrap();

    let report = connector.call_tool(&ticker("trend", "AAPL")).await.unwrap();
    assert_eq!(
        report,
        "AAPL Trend Analysis:\nPrice: 252.00\n50 DMA: 227.50\n200 DMA: 152.50\nTrend: Strong Uptrend"
    );

    let momentum = connector.call_tool(&ticker("momentum", "AAPL")).await.unwrap();
    assert_eq!(momentum, "AAPL RSI(14): 100.00 → Overbought");

    connector.stop().await;
}

#[tokio::test]
async fn unknown_ticker_is_a_tool_error_and_the_server_survives() {
    let dir = tempfile::tempdir().unwrap();
    write_closes(dir.path(), "GME", [100.0, 110.0, 99.0]);
    let connector = ToolServerConnector::start(spec(dir.path())).await.unwrap();

    let err = connector.call_tool(&ticker("volatility", "ZZZZ")).await.unwrap_err();
    assert!(matches!(err, InvocationFailure::ToolReported { .. }), "{err:?}");
    assert!(err.to_string().contains("ZZZZ"));

    let result = connector.invoke(&ticker("volatility", "GME")).await;
    assert!(result.is_success());
    assert_eq!(result.render(), "GME Annualized Volatility: 224.50%");

    connector.stop().await;
}

#[tokio::test]
async fn missing_argument_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let connector = ToolServerConnector::start(spec(dir.path())).await.unwrap();

    let result = connector
        .invoke(&InvocationRequest::from_value("trend", json!({})))
        .await;
    assert!(!result.is_success());
    assert!(result.render().contains("stock_ticker"));

    connector.stop().await;
}
