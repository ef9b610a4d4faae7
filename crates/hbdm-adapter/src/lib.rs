//! HBDM (Huobi derivatives) contract adapter
//!
//! - `httpws::ws_market`: public depth stream
//! - `httpws::ws_trade`: authenticated order notification stream
//! - `httpws::rest`: contract REST API (index, account, orders)
//!
//! # Official Documentation
//! - API: https://huobiapi.github.io/docs/dm/v1/en/
//! - Market WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-market-interface
//! - Notification WS: https://huobiapi.github.io/docs/dm/v1/en/#websocket-order-and-user-data-interface
//! - Authentication: https://huobiapi.github.io/docs/dm/v1/en/#signature-authentication

pub mod error;
pub mod httpws;
pub mod types;

pub use error::StreamError;
pub use httpws::*;
pub use types::*;

/// Contract REST API base URL
pub const REST_API_BASE: &str = "https://api.hbdm.com/api/v1";

/// Host covered by REST request signatures
pub const REST_HOST: &str = "api.hbdm.com";

/// Public market data WebSocket endpoint
pub const MARKET_WSS_ENDPOINT: &str = "wss://www.hbdm.com/ws";

/// Authenticated order notification WebSocket endpoint
pub const NOTIFICATION_WSS_ENDPOINT: &str = "wss://api.hbdm.com/notification";
