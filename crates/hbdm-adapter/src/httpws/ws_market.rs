//! WebSocket client for the HBDM market data channel
//!
//! Endpoint: wss://www.hbdm.com/ws
//!
//! # Features
//! - Connect to the market channel (no auth required)
//! - Subscribe to full-depth (`step0`) updates per symbol
//! - Answer `{"ping":N}` keepalives with `{"pong":N}`
//! - Route `market.<symbol>.<method>...` updates to the symbol's sink
//!
//! # Source
//! - Market WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-market-interface

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::httpws::config::StreamConfig;
use crate::httpws::sink::EventSink;
use crate::httpws::stream::{open, Inbound, StreamConnection, StreamProtocol};
use crate::types::{MarketDepthEvent, MarketEnvelope, MarketPong, MarketSubscribeRequest};

/// Market channel message handling
pub(crate) struct MarketProtocol;

impl StreamProtocol for MarketProtocol {
    type Event = MarketDepthEvent;

    const CHANNEL: &'static str = "market";

    fn classify(message: &[u8]) -> Result<Inbound<MarketDepthEvent>, StreamError> {
        let object: Map<String, Value> =
            serde_json::from_slice(message).map_err(|e| StreamError::decode("market", e))?;

        if let Some(ping) = ping_value(&object)? {
            let reply = serde_json::to_string(&MarketPong { pong: ping })
                .map_err(StreamError::Encode)?;
            return Ok(Inbound::Keepalive(reply));
        }

        let envelope = MarketEnvelope::from_object(&object);

        if envelope.is_error() {
            warn!(
                "Market channel error: {} ({:?})",
                envelope.err_msg.as_deref().unwrap_or("no message"),
                envelope.err_code
            );
            return Ok(Inbound::Ignored);
        }

        if let Some(topic) = envelope.subbed.as_deref() {
            debug!("Subscribed to {}", topic);
            return Ok(Inbound::Ignored);
        }

        let (symbol, method) = route(&envelope.ch);
        match method {
            "depth" => {
                let symbol = symbol.to_string();
                let event = MarketDepthEvent::deserialize(Value::Object(object))
                    .map_err(|e| StreamError::decode("depth", e))?;
                Ok(Inbound::Deliver { symbol, event })
            }
            "" => {
                debug!("Market message without topic ignored");
                Ok(Inbound::Ignored)
            }
            other => {
                debug!("Unrecognized market method '{}' on {}", other, envelope.ch);
                Ok(Inbound::Ignored)
            }
        }
    }
}

/// Value carried by a market ping frame
///
/// An integer `ping` field first; failing that any key containing `ping`,
/// which must then carry an integer.
fn ping_value(object: &Map<String, Value>) -> Result<Option<i64>, StreamError> {
    if let Some(ping) = object.get("ping").and_then(Value::as_i64) {
        return Ok(Some(ping));
    }

    match object.iter().find(|(key, _)| key.contains("ping")) {
        Some((_, value)) => i64::deserialize(value)
            .map(Some)
            .map_err(|e| StreamError::decode("market ping", e)),
        None => Ok(None),
    }
}

/// `market.<symbol>.<method>...` → (symbol, method); missing segments are empty
fn route(ch: &str) -> (&str, &str) {
    let mut segments = ch.split('.').skip(1);
    let symbol = segments.next().unwrap_or("");
    let method = segments.next().unwrap_or("");
    (symbol, method)
}

/// Market channel WebSocket client
///
/// One socket, one receive loop. Depth sinks are created by
/// [`MarketWsClient::subscribe_market_depth`] and closed when the connection
/// ends, whether through [`MarketWsClient::close`] or a fatal error.
pub struct MarketWsClient {
    conn: StreamConnection<MarketProtocol>,
}

impl MarketWsClient {
    /// Connect with the given configuration and start the receive loop
    pub async fn connect(config: StreamConfig) -> Result<Self, StreamError> {
        let (writer, source) = open(&config).await?;
        info!("Connected to market channel");
        Ok(Self { conn: StreamConnection::start(&config, writer, source) })
    }

    /// Subscribe to `market.<symbol>.depth.step0`
    ///
    /// Calling again for the same symbol sends a fresh request and returns
    /// the same sink.
    pub async fn subscribe_market_depth(
        &self,
        symbol: &str,
    ) -> Result<EventSink<MarketDepthEvent>, StreamError> {
        let request = MarketSubscribeRequest::depth(symbol);
        self.conn.subscribe(symbol, &request).await
    }

    /// Fatal connection errors; at most one is ever delivered
    pub fn errors(&self) -> EventSink<StreamError> {
        self.conn.errors()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close the connection and every depth sink. Safe to call repeatedly.
    pub async fn close(&self) {
        self.conn.close().await
    }
}

/// Connect to the production market channel with default settings
pub async fn connect_market() -> Result<MarketWsClient, StreamError> {
    MarketWsClient::connect(StreamConfig::market()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(json: &str) -> Result<Inbound<MarketDepthEvent>, StreamError> {
        MarketProtocol::classify(json.as_bytes())
    }

    #[test]
    fn test_ping_reply_echoes_value() {
        match classify(r#"{"ping":1492420473027}"#).unwrap() {
            Inbound::Keepalive(reply) => assert_eq!(reply, r#"{"pong":1492420473027}"#),
            other => panic!("expected keepalive, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_named_key_fallback() {
        match classify(r#"{"ts":1,"heartbeat_ping":77}"#).unwrap() {
            Inbound::Keepalive(reply) => assert_eq!(reply, r#"{"pong":77}"#),
            other => panic!("expected keepalive, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_without_integer_is_decode_error() {
        let err = classify(r#"{"ping":"soon"}"#).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_depth_routes_to_symbol() {
        let json = r#"{"ch":"market.BTC_CQ.depth.step0","ts":1539843937417,
            "tick":{"ch":"market.BTC_CQ.depth.step0","mrid":1,"id":1,"ts":1,"version":1,
                    "bids":[[6500.5,10]],"asks":[[6501,3]]}}"#;

        match classify(json).unwrap() {
            Inbound::Deliver { symbol, event } => {
                assert_eq!(symbol, "BTC_CQ");
                assert_eq!(event.tick.bids[0].price, 6500.5);
                assert_eq!(event.tick.asks[0].amount, 3.0);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_method_is_ignored() {
        let json = r#"{"ch":"market.BTC_CQ.kline.1min","ts":1,"tick":{"open":1}}"#;
        assert!(matches!(classify(json).unwrap(), Inbound::Ignored));
    }

    #[test]
    fn test_acks_and_errors_are_ignored() {
        let ack = r#"{"id":"x","status":"ok","subbed":"market.BTC_CQ.depth.step0","ts":1}"#;
        assert!(matches!(classify(ack).unwrap(), Inbound::Ignored));

        let err = r#"{"status":"error","err-code":"bad-request","err-msg":"invalid topic","ts":1}"#;
        assert!(matches!(classify(err).unwrap(), Inbound::Ignored));
    }

    #[test]
    fn test_unrouted_frames_with_odd_field_types_are_ignored() {
        for json in [
            r#"{"status":"ok","ch":null}"#,
            r#"{"ch":42,"ts":1}"#,
            r#"{"id":"x","status":"ok","subbed":7,"err-code":0}"#,
            r#"{"status":["ok"],"err-msg":false}"#,
        ] {
            assert!(matches!(classify(json).unwrap(), Inbound::Ignored), "{}", json);
        }
    }

    #[test]
    fn test_malformed_depth_is_decode_error() {
        let json = r#"{"ch":"market.BTC_CQ.depth.step0","ts":1,"tick":{"bids":"none"}}"#;
        assert!(classify(json).unwrap_err().is_decode());

        assert!(classify("not json").unwrap_err().is_decode());
    }

    #[test]
    fn test_route_segments() {
        assert_eq!(route("market.BTC_CQ.depth.step0"), ("BTC_CQ", "depth"));
        assert_eq!(route("market.BTC_CQ"), ("BTC_CQ", ""));
        assert_eq!(route(""), ("", ""));
    }
}
