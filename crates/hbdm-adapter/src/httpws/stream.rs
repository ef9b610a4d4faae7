//! Connection lifecycle shared by the market and notification channels
//!
//! One socket, one receive loop, one write mutex. The loop runs
//! decompress → classify (keepalive / route / ignore) → deliver until the
//! socket fails, a frame cannot be handled, or `close` is called. The
//! first fatal error goes to the error feed; on every exit path all
//! subscription sinks and the error feed are closed.
//!
//! Channel specifics (ping shape, topic layout, event type) live behind
//! [`StreamProtocol`], implemented in `ws_market` and `ws_trade`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::StreamError;
use crate::httpws::codec::decompress;
use crate::httpws::config::{DecodeFailurePolicy, DeliveryPolicy, StreamConfig};
use crate::httpws::registry::SubscriptionRegistry;
use crate::httpws::sink::{Delivery, EventSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// What one decompressed inbound message turned out to be
#[derive(Debug)]
pub(crate) enum Inbound<E> {
    /// Keepalive ping; the payload is the reply frame
    Keepalive(String),
    /// Routed event for a symbol
    Deliver { symbol: String, event: E },
    /// Acks, unhandled methods, foreign envelopes
    Ignored,
}

/// Channel-specific message handling
pub(crate) trait StreamProtocol: Send + Sync + 'static {
    type Event: Send + 'static;

    /// Channel name for logs
    const CHANNEL: &'static str;

    /// Keepalive detection first, then topic routing and typed decode
    fn classify(message: &[u8]) -> Result<Inbound<Self::Event>, StreamError>;
}

/// Write half of the socket behind the connection's write mutex
pub(crate) struct FrameWriter {
    sink: tokio::sync::Mutex<WsSink>,
    write_timeout: Duration,
}

impl FrameWriter {
    fn new(sink: WsSink, write_timeout: Duration) -> Self {
        Self { sink: tokio::sync::Mutex::new(sink), write_timeout }
    }

    pub(crate) async fn send(&self, message: Message) -> Result<(), StreamError> {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.send(message)).await {
            Ok(result) => result.map_err(StreamError::Transport),
            Err(_) => Err(StreamError::WriteTimeout(self.write_timeout)),
        }
    }

    pub(crate) async fn send_text(&self, text: String) -> Result<(), StreamError> {
        self.send(Message::Text(text.into())).await
    }

    pub(crate) async fn send_json<S: Serialize>(&self, value: &S) -> Result<(), StreamError> {
        let text = serde_json::to_string(value).map_err(StreamError::Encode)?;
        self.send_text(text).await
    }

    pub(crate) async fn shutdown(&self) {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Socket close: {}", e),
            Err(_) => debug!("Socket close timed out"),
        }
    }
}

/// Dial the endpoint and split the socket
pub(crate) async fn open(config: &StreamConfig) -> Result<(FrameWriter, WsSource), StreamError> {
    config.validate()?;

    info!("Connecting to {}", config.endpoint);

    let (ws_stream, response) = connect_async(config.endpoint.as_str())
        .await
        .map_err(|source| StreamError::Connect { endpoint: config.endpoint.clone(), source })?;

    debug!("WebSocket connected, status: {}", response.status());

    let (write, read) = ws_stream.split();
    Ok((FrameWriter::new(write, config.write_timeout), read))
}

/// One read from the socket
pub(crate) enum RawFrame {
    /// Binary or text payload, still compressed
    Payload(Vec<u8>),
    /// Ping/pong/raw frames, handled by the WebSocket layer
    Control,
    /// Close frame or end of stream
    End,
}

pub(crate) async fn read_frame(
    source: &mut WsSource,
    idle_timeout: Option<Duration>,
) -> Result<RawFrame, StreamError> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, source.next())
            .await
            .map_err(|_| StreamError::IdleTimeout(limit))?,
        None => source.next().await,
    };

    match next {
        Some(Ok(Message::Binary(data))) => Ok(RawFrame::Payload(data.to_vec())),
        Some(Ok(Message::Text(text))) => Ok(RawFrame::Payload(text.as_bytes().to_vec())),
        Some(Ok(Message::Close(frame))) => {
            debug!("Close frame received: {:?}", frame);
            Ok(RawFrame::End)
        }
        Some(Ok(_)) => Ok(RawFrame::Control),
        Some(Err(e)) => Err(StreamError::Transport(e)),
        None => Ok(RawFrame::End),
    }
}

/// A running connection: writer, registry, error feed and the receive loop
pub(crate) struct StreamConnection<P: StreamProtocol> {
    writer: Arc<FrameWriter>,
    registry: Arc<SubscriptionRegistry<P::Event>>,
    errors: EventSink<StreamError>,
    closing: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    close_timeout: Duration,
}

impl<P: StreamProtocol> StreamConnection<P> {
    /// Spawn the receive loop over an already opened (and, for the
    /// notification channel, authenticated) socket
    pub(crate) fn start(config: &StreamConfig, writer: FrameWriter, source: WsSource) -> Self {
        let writer = Arc::new(writer);
        let registry = Arc::new(SubscriptionRegistry::new(config.sink_capacity));
        let errors = EventSink::new(1);
        let closing = Arc::new(AtomicBool::new(false));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let receive_loop = ReceiveLoop::<P> {
            writer: Arc::clone(&writer),
            registry: Arc::clone(&registry),
            errors: errors.clone(),
            closing: Arc::clone(&closing),
            delivery: config.delivery,
            decode_failure: config.decode_failure,
            idle_timeout: config.idle_timeout,
            _protocol: PhantomData,
        };
        let handle = tokio::spawn(receive_loop.run(source, shutdown_rx));

        Self {
            writer,
            registry,
            errors,
            closing,
            shutdown,
            reader: Mutex::new(Some(handle)),
            close_timeout: config.close_timeout,
        }
    }

    /// Closed by `close` or by the receive loop exiting
    pub(crate) fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.registry.is_closed()
    }

    /// Register the sink for `symbol` (idempotent) and send `request`
    ///
    /// The sink exists before the request leaves, so the first update
    /// cannot race past its subscription.
    pub(crate) async fn subscribe<R: Serialize>(
        &self,
        symbol: &str,
        request: &R,
    ) -> Result<EventSink<P::Event>, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        let sink = self.registry.get_or_create(symbol);
        self.writer.send_json(request).await?;

        debug!(
            channel = P::CHANNEL,
            symbol,
            subscriptions = self.registry.len(),
            "Subscribe request sent"
        );
        Ok(sink)
    }

    pub(crate) fn errors(&self) -> EventSink<StreamError> {
        self.errors.clone()
    }

    /// Close handshake, then tear everything down; later calls are no-ops
    pub(crate) async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            debug!(channel = P::CHANNEL, "Close already requested");
            return;
        }

        info!(channel = P::CHANNEL, "Closing stream connection");

        // Unblocks a delivery waiting on a full sink so the loop can read the close ack
        self.registry.close_all();

        let frame = CloseFrame { code: CloseCode::Normal, reason: Utf8Bytes::from_static("") };
        if let Err(e) = self.writer.send(Message::Close(Some(frame))).await {
            debug!(channel = P::CHANNEL, "Close frame not sent: {}", e);
        }

        let handle = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.close_timeout, &mut handle).await.is_err() {
                warn!(
                    channel = P::CHANNEL,
                    "Close not acknowledged within {:?}, stopping receive loop", self.close_timeout
                );
                let _ = self.shutdown.send(true);
                if tokio::time::timeout(self.close_timeout, &mut handle).await.is_err() {
                    handle.abort();
                }
            }
        }

        self.writer.shutdown().await;
        self.errors.close();

        info!(channel = P::CHANNEL, "Stream connection closed");
    }
}

impl<P: StreamProtocol> Drop for StreamConnection<P> {
    fn drop(&mut self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
        self.registry.close_all();
        self.errors.close();
    }
}

struct ReceiveLoop<P: StreamProtocol> {
    writer: Arc<FrameWriter>,
    registry: Arc<SubscriptionRegistry<P::Event>>,
    errors: EventSink<StreamError>,
    closing: Arc<AtomicBool>,
    delivery: DeliveryPolicy,
    decode_failure: DecodeFailurePolicy,
    idle_timeout: Option<Duration>,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: StreamProtocol> ReceiveLoop<P> {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    async fn run(self, mut source: WsSource, mut shutdown: watch::Receiver<bool>) {
        debug!(channel = P::CHANNEL, "Receive loop started");

        let outcome = self.pump(&mut source, &mut shutdown).await;

        // Sinks are closed before the error is visible to anyone
        self.registry.close_all();

        match outcome {
            Ok(()) => debug!(channel = P::CHANNEL, "Receive loop stopped"),
            Err(err) if self.is_closing() => {
                debug!(channel = P::CHANNEL, "Receive loop stopped during close: {}", err)
            }
            Err(err) => {
                error!(channel = P::CHANNEL, "Stream failed: {}", err);
                self.errors.try_push(err);
            }
        }

        self.errors.close();
    }

    async fn pump(
        &self,
        source: &mut WsSource,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), StreamError> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                frame = read_frame(source, self.idle_timeout) => frame?,
            };

            match frame {
                RawFrame::Payload(bytes) => self.handle(&bytes).await?,
                RawFrame::Control => {}
                RawFrame::End if self.is_closing() => return Ok(()),
                RawFrame::End => return Err(StreamError::RemoteClosed),
            }
        }
    }

    async fn handle(&self, frame: &[u8]) -> Result<(), StreamError> {
        let message = decompress(frame)?;

        let inbound = match P::classify(&message) {
            Ok(inbound) => inbound,
            Err(err) if err.is_decode() && self.decode_failure == DecodeFailurePolicy::Skip => {
                warn!(channel = P::CHANNEL, "Skipping message: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match inbound {
            Inbound::Keepalive(reply) => {
                trace!(channel = P::CHANNEL, "Keepalive reply: {}", reply);
                self.writer.send_text(reply).await
            }
            Inbound::Deliver { symbol, event } => {
                self.deliver(&symbol, event).await;
                Ok(())
            }
            Inbound::Ignored => Ok(()),
        }
    }

    async fn deliver(&self, symbol: &str, event: P::Event) {
        let Some(sink) = self.registry.get(symbol) else {
            debug!(channel = P::CHANNEL, symbol, "No subscription, event dropped");
            return;
        };

        match sink.deliver(event, self.delivery).await {
            Delivery::Delivered => {}
            Delivery::DroppedOldest => {
                debug!(channel = P::CHANNEL, symbol, dropped = sink.dropped(), "Sink full, oldest event evicted")
            }
            Delivery::TimedOut => {
                warn!(channel = P::CHANNEL, symbol, dropped = sink.dropped(), "Consumer not keeping up, event dropped")
            }
            Delivery::Closed => debug!(channel = P::CHANNEL, symbol, "Sink closed, event dropped"),
        }
    }
}
