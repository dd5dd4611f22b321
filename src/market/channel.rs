use crate::error::AppError;
use crate::market::types::ConnectionStatus;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed delay between a closure and the next connection attempt.
pub const RECONNECT_DELAY_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    Payload(String),
    Close,
}

pub type TransportStream = BoxStream<'static, Result<TransportFrame, AppError>>;

/// Opens one duplex connection and exposes its inbound frames.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<TransportStream, AppError>> + Send;
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn frame_from_message(message: Message) -> Option<TransportFrame> {
    match message {
        Message::Text(text) => Some(TransportFrame::Payload(text)),
        Message::Binary(bytes) => Some(TransportFrame::Payload(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Message::Close(_) => Some(TransportFrame::Close),
        _ => None,
    }
}

impl StreamConnector for WsConnector {
    async fn connect(&self) -> Result<TransportStream, AppError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(16 << 20),
            max_frame_size: Some(4 << 20),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(self.url.as_str(), Some(ws_config), true).await?;
        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(message) => frame_from_message(message).map(Ok),
                Err(error) => Some(Err(AppError::from(error))),
            }
        });
        Ok(frames.boxed())
    }
}

/// What subscribers of the channel observe, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ConnectionStatus),
    Payload(Arc<str>),
    Closed,
    /// Local to one subscriber: it fell behind and `skipped` events were
    /// overwritten before it read them. Never broadcast.
    Lagged { skipped: u64 },
}

pub struct ChannelEvents {
    receiver: broadcast::Receiver<ChannelEvent>,
}

impl ChannelEvents {
    /// Next event, or `None` once the channel itself is gone. A subscriber
    /// that falls behind gets one `Lagged` marker in place of the events it
    /// lost, then resumes at the oldest retained event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "stream subscriber lagged; oldest events dropped");
                Some(ChannelEvent::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub connect_attempts: u64,
    pub reconnects_scheduled: u64,
    pub reconnect_pending: bool,
    pub connection_open: bool,
}

#[derive(Debug)]
struct LiveConnection {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ReconnectTimer {
    id: u64,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct ChannelState {
    should_reconnect: bool,
    connection: Option<LiveConnection>,
    reconnect_timer: Option<ReconnectTimer>,
    next_id: u64,
    connect_attempts: u64,
    reconnects_scheduled: u64,
}

impl ChannelState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn is_current(&self, connection_id: u64) -> bool {
        matches!(&self.connection, Some(connection) if connection.id == connection_id)
    }

    /// Clears the timer slot only if it still holds `timer_id`.
    fn clear_timer_if(&mut self, timer_id: u64) -> bool {
        match &self.reconnect_timer {
            Some(timer) if timer.id == timer_id => {
                self.reconnect_timer = None;
                true
            }
            _ => false,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort.abort();
        }
    }
}

struct ChannelShared {
    state: Mutex<ChannelState>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ChannelEvent>,
}

/// One self-healing duplex connection fanned out to any number of
/// subscribers. Must be driven from inside a tokio runtime.
pub struct StreamChannel<C: StreamConnector> {
    connector: Arc<C>,
    shared: Arc<ChannelShared>,
}

impl<C: StreamConnector> Clone for StreamChannel<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: StreamConnector> StreamChannel<C> {
    pub fn new(connector: C, event_capacity: usize) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(ChannelShared {
                state: Mutex::new(ChannelState::default()),
                status,
                events,
            }),
        }
    }

    /// Subscribes to the event source and makes sure a connection exists or
    /// is being established. Calling it again never opens a second one.
    pub fn open(&self) -> ChannelEvents {
        let receiver = self.shared.events.subscribe();
        let mut state = self.shared.state.lock();
        state.should_reconnect = true;
        if state.connection.is_none() {
            state.cancel_timer();
            self.create_connection(&mut state);
        }
        ChannelEvents { receiver }
    }

    /// Stops reconnecting, drops any pending timer and the live connection.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.should_reconnect = false;
        state.cancel_timer();
        let had_connection = match state.connection.take() {
            Some(connection) => {
                connection.cancel.cancel();
                true
            }
            None => false,
        };
        self.shared.status.send_replace(ConnectionStatus::Disconnected);
        if had_connection {
            let _ = self.shared.events.send(ChannelEvent::Closed);
        }
        info!(had_connection, "stream channel closed");
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn stats(&self) -> ChannelStats {
        let state = self.shared.state.lock();
        ChannelStats {
            connect_attempts: state.connect_attempts,
            reconnects_scheduled: state.reconnects_scheduled,
            reconnect_pending: state.reconnect_timer.is_some(),
            connection_open: state.connection.is_some(),
        }
    }

    fn create_connection(&self, state: &mut ChannelState) {
        let connection_id = state.allocate_id();
        state.connect_attempts = state.connect_attempts.saturating_add(1);
        let cancel = CancellationToken::new();
        state.connection = Some(LiveConnection {
            id: connection_id,
            cancel: cancel.clone(),
        });

        let channel = self.clone();
        tokio::spawn(async move {
            channel.run_connection(connection_id, cancel).await;
        });
    }

    async fn run_connection(&self, connection_id: u64, cancel: CancellationToken) {
        info!(connection_id, "opening stream connection");
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.connector.connect() => result,
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(error) => {
                self.handle_error(connection_id, &error);
                self.handle_closed(connection_id);
                return;
            }
        };

        if !self.handle_open(connection_id) {
            return;
        }

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return,
                next_frame = transport.next() => next_frame,
            };

            match frame {
                Some(Ok(TransportFrame::Payload(payload))) => {
                    self.emit_from(connection_id, ChannelEvent::Payload(Arc::from(payload)));
                }
                Some(Ok(TransportFrame::Close)) | None => break,
                Some(Err(error)) => {
                    self.handle_error(connection_id, &error);
                    break;
                }
            }
        }

        self.handle_closed(connection_id);
    }

    fn handle_open(&self, connection_id: u64) -> bool {
        let mut state = self.shared.state.lock();
        if !state.is_current(connection_id) {
            debug!(connection_id, "dropping superseded connection");
            return false;
        }
        state.cancel_timer();
        self.shared.status.send_replace(ConnectionStatus::Connected);
        let _ = self
            .shared
            .events
            .send(ChannelEvent::Status(ConnectionStatus::Connected));
        info!(connection_id, "stream connected");
        true
    }

    fn emit_from(&self, connection_id: u64, event: ChannelEvent) {
        let state = self.shared.state.lock();
        if state.is_current(connection_id) {
            let _ = self.shared.events.send(event);
        }
    }

    fn handle_error(&self, connection_id: u64, error: &AppError) {
        let state = self.shared.state.lock();
        if state.is_current(connection_id) {
            self.shared.status.send_replace(ConnectionStatus::Error);
        }
        warn!(connection_id, %error, "stream transport error");
    }

    /// Closure handling. Overlapping close events share one reconnect timer.
    fn handle_closed(&self, connection_id: u64) {
        let mut state = self.shared.state.lock();
        match &state.connection {
            Some(connection) if connection.id != connection_id => {
                debug!(connection_id, "ignoring close of superseded connection");
                return;
            }
            Some(_) => state.connection = None,
            None if !state.should_reconnect => return,
            None => {}
        }

        self.shared.status.send_replace(ConnectionStatus::Disconnected);
        let _ = self.shared.events.send(ChannelEvent::Closed);
        info!(connection_id, "stream disconnected");

        if state.should_reconnect && state.reconnect_timer.is_none() {
            self.schedule_reconnect(&mut state);
        }
    }

    fn schedule_reconnect(&self, state: &mut ChannelState) {
        let timer_id = state.allocate_id();
        state.reconnects_scheduled = state.reconnects_scheduled.saturating_add(1);

        let channel = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
            channel.fire_reconnect(timer_id);
        });
        state.reconnect_timer = Some(ReconnectTimer {
            id: timer_id,
            abort: task.abort_handle(),
        });
        info!(delay_ms = RECONNECT_DELAY_MS, "reconnect scheduled");
    }

    fn fire_reconnect(&self, timer_id: u64) {
        let mut state = self.shared.state.lock();
        if !state.clear_timer_if(timer_id) {
            return;
        }
        if !state.should_reconnect || state.connection.is_some() {
            return;
        }
        info!("reconnecting stream");
        self.create_connection(&mut state);
    }
}
