//! HTTP/WebSocket backend implementation
//!
//! Custom implementation using reqwest + tokio-tungstenite.
//! Both WebSocket channels share one connection core (`stream`): a single
//! receive loop per socket, gzip frame decoding, keepalive replies and
//! per-symbol delivery into bounded sinks.

pub mod auth;
pub mod codec;
pub mod config;
pub mod nonce;
mod registry;
pub mod rest;
pub mod sink;
mod stream;
pub mod ws_market;
pub mod ws_trade;

pub use auth::*;
pub use codec::decompress;
pub use config::*;
pub use nonce::*;
pub use rest::*;
pub use sink::{Delivery, EventSink};
pub use ws_market::{connect_market, MarketWsClient};
pub use ws_trade::{connect_trade, TradeWsClient};
