//! Protocol types for HBDM WebSocket and REST APIs
//!
//! # Design Principles
//! 1. Field names match the exchange payloads exactly (serde renames where
//!    the wire uses hyphens or PascalCase)
//! 2. Wire quirks are absorbed at the type level: depth levels arrive as
//!    `[price, amount]` arrays, the contract index `data` as a one-element array
//! 3. Order notifications keep unrecognized fields in `extra`
//!
//! # Sources
//! - Market WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-market-interface
//! - Notification WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-order-and-user-data-interface
//! - REST: https://huobiapi.github.io/docs/dm/v1/en/#restful-market-data-interface

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// WebSocket Outbound Messages
// ============================================================================

/// Market channel subscription request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketSubscribeRequest {
    /// Topic, e.g. `market.BTC_CQ.depth.step0`
    pub sub: String,
    /// Correlation id
    pub id: String,
}

impl MarketSubscribeRequest {
    /// Full-depth (`step0`) subscription with a fresh correlation id
    pub fn depth(symbol: &str) -> Self {
        Self { sub: depth_topic(symbol), id: Uuid::new_v4().to_string() }
    }
}

/// Market depth topic for a symbol
pub fn depth_topic(symbol: &str) -> String {
    format!("market.{}.depth.step0", symbol)
}

/// Reply to a market `{"ping":N}` keepalive
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketPong {
    pub pong: i64,
}

/// Notification channel subscription request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeSubscribeRequest {
    pub op: String,
    /// Correlation id
    pub cid: String,
    /// Topic, e.g. `orders.BTC`
    pub topic: String,
}

impl TradeSubscribeRequest {
    /// Order push subscription with a fresh correlation id
    pub fn orders(symbol: &str) -> Self {
        Self {
            op: "sub".to_string(),
            cid: Uuid::new_v4().to_string(),
            topic: orders_topic(symbol),
        }
    }
}

/// Order push topic for a symbol
pub fn orders_topic(symbol: &str) -> String {
    format!("orders.{}", symbol)
}

/// Reply to a notification channel ping
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradePong {
    pub op: String,
    /// Unix seconds, as a string
    pub ts: String,
}

impl TradePong {
    pub fn at(unix_secs: i64) -> Self {
        Self { op: "pong".to_string(), ts: unix_secs.to_string() }
    }
}

/// Credential frame for the notification channel
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub op: String,
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SignatureMethod")]
    pub signature_method: String,
    #[serde(rename = "SignatureVersion")]
    pub signature_version: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Signature")]
    pub signature: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("op", &self.op)
            .field("timestamp", &self.timestamp)
            .field("signature", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// WebSocket Inbound Messages
// ============================================================================

/// Routing fields of a market channel frame
///
/// Also covers subscription acks (`subbed`) and error replies (`status`).
/// Read leniently: a field holding an unexpected type counts as absent, so
/// frames that never route to a sink cannot fail to decode.
#[derive(Clone, Debug, Default)]
pub(crate) struct MarketEnvelope {
    pub ch: String,
    pub status: Option<String>,
    pub subbed: Option<String>,
    pub err_code: Option<Value>,
    pub err_msg: Option<String>,
}

impl MarketEnvelope {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            ch: text(object, "ch").unwrap_or_default(),
            status: text(object, "status"),
            subbed: text(object, "subbed"),
            err_code: error_code(object),
            err_msg: text(object, "err-msg"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
            || self.err_code.as_ref().is_some_and(is_error_code)
    }
}

/// Routing fields of a notification channel frame, read as leniently as
/// [`MarketEnvelope`]
#[derive(Clone, Debug, Default)]
pub(crate) struct TradeEnvelope {
    pub op: String,
    pub topic: String,
    pub err_code: Option<Value>,
    pub err_msg: Option<String>,
}

impl TradeEnvelope {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            op: text(object, "op").unwrap_or_default(),
            topic: text(object, "topic").unwrap_or_default(),
            err_code: error_code(object),
            err_msg: text(object, "err-msg"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.err_code.as_ref().is_some_and(is_error_code)
    }
}

fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn error_code(object: &Map<String, Value>) -> Option<Value> {
    object.get("err-code").filter(|v| !v.is_null()).cloned()
}

/// `err-code` arrives as a number or a string; `0` and `""` mean success
fn is_error_code(code: &Value) -> bool {
    match code {
        Value::Null => false,
        Value::Number(n) => n.as_i64() != Some(0),
        Value::String(s) => !s.is_empty() && s != "0",
        _ => true,
    }
}

/// Response to the credential frame
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct AuthResponse {
    pub op: String,
    #[serde(rename = "err-code", default)]
    pub err_code: i64,
    #[serde(rename = "err-msg", default)]
    pub err_msg: Option<String>,
}

/// Market depth update (`market.<symbol>.depth.step0`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarketDepthEvent {
    pub ch: String,
    /// Unix milliseconds
    pub ts: i64,
    pub tick: MarketDepthTick,
}

/// Depth snapshot payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarketDepthTick {
    pub ch: String,
    pub mrid: i64,
    pub id: i64,
    pub ts: i64,
    pub version: i64,
    #[serde(default)]
    pub bids: Vec<DepthLevel>,
    #[serde(default)]
    pub asks: Vec<DepthLevel>,
}

/// One price level; on the wire a bare `[price, amount]` array
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct DepthLevel {
    pub price: f64,
    pub amount: f64,
}

impl From<[f64; 2]> for DepthLevel {
    fn from([price, amount]: [f64; 2]) -> Self {
        Self { price, amount }
    }
}

impl From<DepthLevel> for [f64; 2] {
    fn from(level: DepthLevel) -> Self {
        [level.price, level.amount]
    }
}

/// Order state change pushed on `orders.<symbol>`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrderEvent {
    pub op: String,
    pub topic: String,
    /// Unix milliseconds
    pub ts: i64,
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub contract_code: String,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub order_price_type: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub offset: String,
    /// Exchange order status code (3 submitted, 4 partially filled, 6 filled, ...)
    #[serde(default)]
    pub status: i32,
    #[serde(default, alias = "level_rate")]
    pub lever_rate: i32,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: Option<i64>,
    #[serde(default)]
    pub order_source: String,
    #[serde(default)]
    pub order_type: i32,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub trade_volume: f64,
    #[serde(default)]
    pub trade_turnover: f64,
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub trade_avg_price: Option<f64>,
    #[serde(default)]
    pub margin_frozen: f64,
    #[serde(default)]
    pub profit: f64,
    /// Fills carried by this update
    #[serde(default)]
    pub trade: Vec<OrderTrade>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fill inside an order notification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrderTrade {
    pub trade_id: i64,
    pub trade_volume: f64,
    pub trade_price: f64,
    pub trade_fee: f64,
    pub trade_turnover: f64,
    pub created_at: i64,
}

/// Any event a stream can deliver
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    MarketDepth(MarketDepthEvent),
    Order(OrderEvent),
}

impl StreamEvent {
    pub fn topic(&self) -> &str {
        match self {
            StreamEvent::MarketDepth(e) => &e.ch,
            StreamEvent::Order(e) => &e.topic,
        }
    }

    /// Exchange timestamp, unix milliseconds
    pub fn timestamp(&self) -> i64 {
        match self {
            StreamEvent::MarketDepth(e) => e.ts,
            StreamEvent::Order(e) => e.ts,
        }
    }
}

impl From<MarketDepthEvent> for StreamEvent {
    fn from(event: MarketDepthEvent) -> Self {
        StreamEvent::MarketDepth(event)
    }
}

impl From<OrderEvent> for StreamEvent {
    fn from(event: OrderEvent) -> Self {
        StreamEvent::Order(event)
    }
}

// ============================================================================
// REST Responses
// ============================================================================

/// Deserialize a one-element JSON array into its single element
fn deserialize_single_element<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    use serde::de::Error;

    let items: Vec<T> = Vec::deserialize(deserializer)?;
    items.into_iter().next().ok_or_else(|| D::Error::invalid_length(0, &"a one-element array"))
}

/// GET contract_index
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractIndexResponse {
    pub status: String,
    pub ts: i64,
    /// The exchange wraps the single index object in an array
    #[serde(deserialize_with = "deserialize_single_element")]
    pub data: ContractIndexData,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContractIndexData {
    pub symbol: String,
    #[serde(rename = "index_price")]
    pub price: f64,
    #[serde(rename = "index_ts")]
    pub ts: i64,
}

/// POST contract_account_info
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountInfoResponse {
    pub status: String,
    pub ts: i64,
    #[serde(default)]
    pub data: Vec<AccountInfoData>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountInfoData {
    pub symbol: String,
    pub margin_balance: f64,
    pub margin_position: f64,
    pub margin_frozen: f64,
    pub margin_available: f64,
    pub profit_real: f64,
    pub profit_unreal: f64,
    pub withdraw_available: f64,
    pub risk_rate: Option<f64>,
    pub liquidation_price: Option<f64>,
}

/// POST contract_position_info
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractPositionResponse {
    pub status: String,
    pub ts: i64,
    #[serde(default)]
    pub data: Vec<ContractPositionData>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractPositionData {
    pub symbol: String,
    pub contract_type: String,
    pub contract_code: String,
    pub volume: f64,
    pub price: f64,
    pub available: f64,
    pub frozen: f64,
    pub cost_open: f64,
    pub cost_hold: f64,
    pub profit_unreal: f64,
    pub profit_rate: f64,
    pub profit: f64,
    pub position_margin: f64,
    #[serde(alias = "level_rate")]
    pub lever_rate: i32,
    pub direction: String,
}

/// POST contract_order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractOrderResponse {
    pub status: String,
    pub ts: i64,
    pub data: ContractOrderData,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractOrderData {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: Option<i64>,
}

/// POST contract_cancel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub status: String,
    pub ts: i64,
    #[serde(default)]
    pub errors: Vec<CancelOrderError>,
    #[serde(default)]
    pub successes: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelOrderError {
    pub order_id: String,
    pub err_code: i64,
    pub err_msg: String,
}

/// POST contract_cancelall
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelAllOrdersResponse {
    pub status: String,
    pub ts: i64,
    #[serde(default)]
    pub data: Vec<CancelAllOrdersData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelAllOrdersData {
    pub order_id: String,
    #[serde(default)]
    pub err_code: i64,
    #[serde(default)]
    pub err_msg: String,
}

/// POST contract_order_info
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderInfoResponse {
    pub status: String,
    pub ts: i64,
    #[serde(default)]
    pub data: Vec<OrderInfoData>,
}

/// Order record shared by order_info, open orders and history queries
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderInfoData {
    pub symbol: String,
    pub contract_type: String,
    pub contract_code: String,
    pub volume: f64,
    pub price: f64,
    pub order_price_type: String,
    pub direction: String,
    pub offset: String,
    #[serde(alias = "level_rate")]
    pub lever_rate: i32,
    pub order_id: i64,
    pub client_order_id: Option<i64>,
    pub order_source: String,
    pub created_at: i64,
    pub trade_volume: f64,
    pub trade_turnover: f64,
    pub fee: f64,
    pub trade_avg_price: Option<f64>,
    pub margin_frozen: f64,
    pub profit: f64,
    pub status: i32,
}

/// POST contract_openorders / contract_hisorders
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub status: String,
    pub ts: i64,
    pub data: OrdersPage,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrdersPage {
    #[serde(default)]
    pub orders: Vec<OrderInfoData>,
    #[serde(default)]
    pub total_page: Option<u32>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_size: Option<u32>,
}

// ============================================================================
// REST Requests
// ============================================================================

/// Order placement parameters (client_order_id is assigned by the client)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractOrderRequest {
    pub symbol: String,
    pub contract_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_code: Option<String>,
    pub price: f64,
    pub volume: u32,
    /// "buy" / "sell"
    pub direction: String,
    /// "open" / "close"
    pub offset: String,
    pub lever_rate: u32,
    /// "limit", "opponent", ...
    pub order_price_type: String,
}

/// Filters for contract_hisorders
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryOrdersQuery {
    pub symbol: String,
    /// 0 all, 1 buy long, 2 sell short, 3 buy short, 4 sell long, ...
    pub trade_type: i32,
    /// 1 all orders, 2 finished orders
    #[serde(rename = "type")]
    pub order_type: i32,
    /// Comma separated status codes, 0 for all
    pub status: String,
    /// Days back, e.g. 7 or 90
    pub create_date: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}
