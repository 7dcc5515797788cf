//! Kalshi WebSocket ingest: subscribes to order-book deltas for a set of
//! tickers and publishes normalized tops to the sink.
//!
//! Reconnects with exponential backoff (1 s, x1.6, capped at 30 s), pings
//! every 20 s and treats 30 s of silence as a dead connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::connectors::{coerce_price, coerce_size, first_string, first_value, QuoteSink, TopOfBook};
use crate::db::models::Venue;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const RECV_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_START: f64 = 1.0;
const BACKOFF_FACTOR: f64 = 1.6;
const BACKOFF_CAP: f64 = 30.0;

pub struct KalshiWsClient {
    ws_url: String,
}

impl KalshiWsClient {
    pub fn new(ws_url: &str) -> Self {
        KalshiWsClient {
            ws_url: ws_url.to_string(),
        }
    }

    /// Stream order-book deltas for the given tickers until the stop signal
    /// flips. Every parsed update goes to the sink; connection errors
    /// trigger a backoff and reconnect.
    pub async fn stream_orderbooks(
        &self,
        tickers: &[String],
        sink: &dyn QuoteSink,
        mut stop: watch::Receiver<bool>,
    ) {
        if tickers.is_empty() {
            return;
        }

        let mut backoff = BACKOFF_START;
        while !*stop.borrow() {
            match self.run_connection(tickers, sink, &mut stop).await {
                Ok(()) => return, // stop requested
                Err(err) => {
                    warn!(
                        "kalshi ws reconnect in {:.1}s ({} tickers): {err}",
                        backoff,
                        tickers.len()
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(backoff)) => {}
                _ = stop.changed() => {}
            }
            backoff = (backoff * BACKOFF_FACTOR).min(BACKOFF_CAP);
        }
    }

    async fn run_connection(
        &self,
        tickers: &[String],
        sink: &dyn QuoteSink,
        stop: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url).await?;
        info!("kalshi ws connected ({} tickers)", tickers.len());
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "id": 1,
            "cmd": "subscribe",
            "params": {
                "channels": ["orderbook_delta"],
                "market_tickers": tickers,
            },
        });
        write.send(Message::Text(subscribe.to_string())).await?;

        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                message = tokio::time::timeout(RECV_TIMEOUT, read.next()) => {
                    match message {
                        Err(_) => anyhow::bail!("recv timeout"),
                        Ok(None) => anyhow::bail!("stream ended"),
                        Ok(Some(Err(err))) => anyhow::bail!("ws error: {err}"),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Ok(payload) = serde_json::from_str::<Value>(&text) {
                                if let Some(top) = parse_orderbook_payload(&payload) {
                                    let _ = sink.publish_top(top).await;
                                }
                            }
                        }
                        Ok(Some(Ok(Message::Ping(data)))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Some(Ok(Message::Close(_)))) => anyhow::bail!("server closed connection"),
                        Ok(Some(Ok(_))) => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Messages arrive either wrapped as {"msg": {...}} or as the inner object
/// directly. Integer-cent prices are scaled down; rows without both YES
/// prices are dropped.
pub(crate) fn parse_orderbook_payload(payload: &Value) -> Option<TopOfBook> {
    let msg = payload.get("msg").filter(|v| v.is_object()).unwrap_or(payload);

    let market_ticker = first_string(msg, &["market_ticker", "ticker"])?;
    let best_bid = coerce_price(msg.get("yes_bid")?)?;
    let best_ask = coerce_price(msg.get("yes_ask")?)?;
    let bid_size = first_value(msg, &["yes_bid_size", "bid_size"])
        .and_then(coerce_size)
        .unwrap_or(0.0);
    let ask_size = first_value(msg, &["yes_ask_size", "ask_size"])
        .and_then(coerce_size)
        .unwrap_or(0.0);

    Some(TopOfBook {
        venue: Venue::Kalshi,
        venue_market_id: market_ticker,
        outcome: "YES".to_string(),
        best_bid,
        best_ask,
        bid_size,
        ask_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_message_with_cent_prices() {
        let payload = json!({
            "type": "orderbook_delta",
            "msg": {
                "market_ticker": "KXNBAGAME-25DEC25DENLAL-DEN",
                "yes_bid": 57,
                "yes_ask": 59,
                "yes_bid_size": 1400,
                "yes_ask_size": 1100,
            },
        });
        let top = parse_orderbook_payload(&payload).unwrap();
        assert_eq!(top.venue, Venue::Kalshi);
        assert_eq!(top.venue_market_id, "KXNBAGAME-25DEC25DENLAL-DEN");
        assert!((top.best_bid - 0.57).abs() < 1e-12);
        assert!((top.best_ask - 0.59).abs() < 1e-12);
        assert!((top.bid_size - 1400.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_unwrapped_message_with_alias_sizes() {
        let payload = json!({
            "ticker": "KXEPL-ARSCHE",
            "yes_bid": 0.44,
            "yes_ask": 0.46,
            "bid_size": 120,
            "ask_size": 130,
        });
        let top = parse_orderbook_payload(&payload).unwrap();
        assert_eq!(top.venue_market_id, "KXEPL-ARSCHE");
        assert!((top.best_bid - 0.44).abs() < 1e-12);
        assert!((top.ask_size - 130.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_rejects_incomplete_rows() {
        assert!(parse_orderbook_payload(&json!({"msg": {"market_ticker": "T"}})).is_none());
        assert!(parse_orderbook_payload(&json!({"yes_bid": 57, "yes_ask": 59})).is_none());
    }
}
