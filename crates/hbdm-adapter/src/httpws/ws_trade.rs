//! WebSocket client for the HBDM order notification channel
//!
//! Endpoint: wss://api.hbdm.com/notification
//!
//! # Authentication Required
//! The first frame on the socket is a signed `op:"auth"` request (see
//! [`ApiCredentials::auth_request`]). With `auth_timeout` set, `connect`
//! waits for the exchange's answer before returning, so every subscribe
//! follows a successful handshake.
//!
//! # Source
//! - Notification WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-order-and-user-data-interface
//! - WS Auth: https://huobiapi.github.io/docs/dm/v1/en/#websocket-authentication

use chrono::Utc;
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::httpws::auth::ApiCredentials;
use crate::httpws::codec::decompress;
use crate::httpws::config::StreamConfig;
use crate::httpws::sink::EventSink;
use crate::httpws::stream::{
    open, read_frame, FrameWriter, Inbound, RawFrame, StreamConnection, StreamProtocol, WsSource,
};
use crate::types::{AuthResponse, OrderEvent, TradeEnvelope, TradePong, TradeSubscribeRequest};

/// Notification channel message handling
pub(crate) struct TradeProtocol;

impl StreamProtocol for TradeProtocol {
    type Event = OrderEvent;

    const CHANNEL: &'static str = "notification";

    fn classify(message: &[u8]) -> Result<Inbound<OrderEvent>, StreamError> {
        let object = parse_object(message)?;

        if is_ping(&object) {
            return pong().map(Inbound::Keepalive);
        }

        let envelope = TradeEnvelope::from_object(&object);

        if envelope.op != "notify" {
            log_reply(&envelope);
            return Ok(Inbound::Ignored);
        }

        let (method, symbol) = split_topic(&envelope.topic);
        match method {
            "orders" => {
                if symbol.is_empty() {
                    return Err(StreamError::decode(
                        "orders",
                        serde_json::Error::custom(format!("topic '{}' has no symbol", envelope.topic)),
                    ));
                }
                let symbol = symbol.to_string();
                let event = OrderEvent::deserialize(Value::Object(object))
                    .map_err(|e| StreamError::decode("orders", e))?;
                Ok(Inbound::Deliver { symbol, event })
            }
            other => {
                debug!("Unrecognized notification method '{}' on {}", other, envelope.topic);
                Ok(Inbound::Ignored)
            }
        }
    }
}

fn parse_object(message: &[u8]) -> Result<Map<String, Value>, StreamError> {
    serde_json::from_slice(message).map_err(|e| StreamError::decode("notification", e))
}

/// `op == "ping"`, or for anything but a notify envelope, any top-level
/// string value mentioning `ping`
fn is_ping(object: &Map<String, Value>) -> bool {
    match object.get("op").and_then(Value::as_str) {
        Some("ping") => true,
        Some("notify") => false,
        _ => object.values().any(|v| v.as_str().is_some_and(|s| s.contains("ping"))),
    }
}

fn pong() -> Result<String, StreamError> {
    serde_json::to_string(&TradePong::at(Utc::now().timestamp())).map_err(StreamError::Encode)
}

/// `<method>.<symbol>`, split on the first dot
fn split_topic(topic: &str) -> (&str, &str) {
    topic.split_once('.').unwrap_or((topic, ""))
}

fn log_reply(envelope: &TradeEnvelope) {
    match &envelope.err_code {
        Some(code) if envelope.is_error() => warn!(
            "Notification channel '{}' error {}: {}",
            envelope.op,
            code,
            envelope.err_msg.as_deref().unwrap_or("no message")
        ),
        _ if envelope.op == "sub" => debug!("Subscribed to {}", envelope.topic),
        _ => debug!("Notification channel '{}' message ignored", envelope.op),
    }
}

/// Read frames until the `op:"auth"` answer, replying to pings meanwhile
async fn await_auth(writer: &FrameWriter, source: &mut WsSource) -> Result<(), StreamError> {
    loop {
        let frame = match read_frame(source, None).await? {
            RawFrame::Payload(frame) => frame,
            RawFrame::Control => continue,
            RawFrame::End => {
                return Err(StreamError::AuthRejected(
                    "connection closed during authentication".to_string(),
                ))
            }
        };

        let object = parse_object(&decompress(&frame)?)?;

        if is_ping(&object) {
            writer.send_text(pong()?).await?;
            continue;
        }

        if object.get("op").and_then(Value::as_str) != Some("auth") {
            debug!("Message before auth response ignored");
            continue;
        }

        let response = AuthResponse::deserialize(Value::Object(object))
            .map_err(|e| StreamError::decode("auth response", e))?;

        if response.err_code == 0 {
            debug!("Auth response '{}' accepted", response.op);
            return Ok(());
        }

        return Err(StreamError::AuthRejected(format!(
            "{} (err-code {})",
            response.err_msg.as_deref().unwrap_or("no message"),
            response.err_code
        )));
    }
}

/// Order notification channel WebSocket client
pub struct TradeWsClient {
    conn: StreamConnection<TradeProtocol>,
}

impl TradeWsClient {
    /// Connect, authenticate and start the receive loop
    ///
    /// # Errors
    /// `AuthRejected` / `AuthTimeout` when the handshake fails; the socket
    /// is closed before returning.
    pub async fn connect(
        credentials: ApiCredentials,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        let (host, path) = config.host_and_path()?;
        let (writer, mut source) = open(&config).await?;

        let handshake =
            Self::authenticate(&credentials, &config, &host, &path, &writer, &mut source).await;
        if let Err(e) = handshake {
            warn!("Notification channel authentication failed: {}", e);
            writer.shutdown().await;
            return Err(e);
        }

        info!("Connected to notification channel");
        Ok(Self { conn: StreamConnection::start(&config, writer, source) })
    }

    async fn authenticate(
        credentials: &ApiCredentials,
        config: &StreamConfig,
        host: &str,
        path: &str,
        writer: &FrameWriter,
        source: &mut WsSource,
    ) -> Result<(), StreamError> {
        let request = credentials.auth_request(host, path, Utc::now());
        writer.send_json(&request).await?;
        debug!("Auth request sent for {}{}", host, path);

        let Some(limit) = config.auth_timeout else {
            return Ok(());
        };

        match tokio::time::timeout(limit, await_auth(writer, source)).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::AuthTimeout(limit)),
        }
    }

    /// Subscribe to `orders.<symbol>`
    ///
    /// Calling again for the same symbol sends a fresh request and returns
    /// the same sink.
    pub async fn subscribe_order_push(
        &self,
        symbol: &str,
    ) -> Result<EventSink<OrderEvent>, StreamError> {
        let request = TradeSubscribeRequest::orders(symbol);
        self.conn.subscribe(symbol, &request).await
    }

    /// Fatal connection errors; at most one is ever delivered
    pub fn errors(&self) -> EventSink<StreamError> {
        self.conn.errors()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close the connection and every order sink. Safe to call repeatedly.
    pub async fn close(&self) {
        self.conn.close().await
    }
}

/// Connect to the production notification channel with default settings
pub async fn connect_trade(
    access_key: &str,
    secret_key: &str,
) -> Result<TradeWsClient, StreamError> {
    TradeWsClient::connect(ApiCredentials::new(access_key, secret_key), StreamConfig::trade()).await
}
