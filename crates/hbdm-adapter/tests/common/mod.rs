//! In-process WebSocket exchange for stream tests
//!
//! Accepts one connection, gzips every frame it pushes and records every
//! text frame the client sends.

#![allow(dead_code)]

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// What the client sent
#[derive(Debug)]
pub enum Received {
    Text(Value),
    Close,
}

enum Push {
    Frame(Vec<u8>),
    Close,
}

pub struct MockExchange {
    addr: std::net::SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    push: mpsc::UnboundedSender<Push>,
}

impl MockExchange {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    inbound = read.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            let value = serde_json::from_str(text.as_str()).unwrap();
                            let _ = received_tx.send(Received::Text(value));
                        }
                        Some(Ok(Message::Close(_))) => {
                            let _ = received_tx.send(Received::Close);
                            // flushes the queued close reply
                            let _ = write.flush().await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    },
                    outbound = push_rx.recv() => match outbound {
                        Some(Push::Frame(bytes)) => {
                            if write.send(Message::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Push::Close) => {
                            let _ = write.send(Message::Close(None)).await;
                        }
                        None => break,
                    },
                }
            }
        });

        Self { addr, received, push }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Push a gzipped JSON frame
    pub fn send_json(&self, value: &Value) {
        self.send_raw(gzip(value.to_string().as_bytes()));
    }

    /// Push bytes as-is in a binary frame
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.push.send(Push::Frame(bytes)).unwrap();
    }

    /// Start a close handshake from the exchange side
    pub fn close(&self) {
        self.push.send(Push::Close).unwrap();
    }

    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("client sent nothing")
            .expect("exchange task ended")
    }

    /// Next text frame the client sent
    pub async fn next_json(&mut self) -> Value {
        match self.next().await {
            Received::Text(value) => value,
            Received::Close => panic!("expected a text frame, got close"),
        }
    }

    /// Nothing further arrives within `window`
    pub async fn assert_silent(&mut self, window: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(window, self.received.recv()).await {
            panic!("unexpected frame from client: {:?}", frame);
        }
    }
}

pub fn depth_frame(symbol: &str, ts: i64) -> Value {
    let ch = format!("market.{}.depth.step0", symbol);
    serde_json::json!({
        "ch": ch,
        "ts": ts,
        "tick": {
            "ch": ch, "mrid": ts, "id": ts, "ts": ts, "version": ts,
            "bids": [[100.5, 2]], "asks": [[101, 3]]
        }
    })
}

pub fn order_frame(symbol: &str, order_id: i64) -> Value {
    serde_json::json!({
        "op": "notify", "topic": format!("orders.{}", symbol), "ts": 1489474082831i64,
        "symbol": symbol, "contract_type": "quarter", "contract_code": "BTC190329",
        "volume": 1, "price": 3900.5, "order_price_type": "limit", "direction": "buy",
        "offset": "open", "status": 6, "lever_rate": 20, "order_id": order_id,
        "client_order_id": 7, "order_source": "api", "order_type": 1,
        "created_at": 1408076414000i64, "trade_volume": 1, "trade_turnover": 100,
        "fee": -0.0001, "trade_avg_price": 3900.5, "margin_frozen": 0, "profit": 0,
        "trade": [{"trade_id": 112, "trade_volume": 1, "trade_price": 3900.5,
                   "trade_fee": -0.0001, "trade_turnover": 100, "created_at": 1490759594752i64}]
    })
}
