//! Authenticated real-time channel (`/ws/transactions/`).
//!
//! One [`ConnectionManager`] owns one connection state:
//!
//! ```text
//! Idle ──connect──► Connecting ──► Open ──server close──► ClosedUnintentional
//!  ▲                    │                                   │
//!  │                    └──────── failed attempt ───────────┤
//!  └───────────── reconnect after delay (if initialized) ◄──┘
//!
//! Connecting | Open | ClosedUnintentional ──disconnect──► ClosedIntentional ──reset──► Idle
//! ```
//!
//! Every attempt gets a generation number; close handlers from an older
//! generation are ignored, which keeps a late close from a replaced socket
//! from scheduling a second reconnect.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    folio_protocol::{ClientMessage, ServerMessage},
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    secrecy::ExposeSecret,
    tokio::{
        net::TcpStream,
        sync::{broadcast, mpsc},
        task::JoinHandle,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
    },
    tracing::{debug, info, instrument, warn},
    url::Url,
};

use crate::{error::RealtimeError, state::SessionState, tokens::TokenStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const OUTBOUND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Channel URL without credentials, e.g. `wss://host/ws/transactions/`.
    pub url: Url,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl RealtimeConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosedIntentional,
    ClosedUnintentional,
}

impl ConnectionState {
    /// Latched states make `connect()` a no-op.
    pub fn is_latched(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::ClosedIntentional)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Opened,
    Message(ServerMessage),
    Closed { intentional: bool },
    ReconnectScheduled { delay: Duration },
}

struct Channel {
    generation: u64,
    state: ConnectionState,
    outbound: Option<mpsc::Sender<Message>>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    config: RealtimeConfig,
    tokens: Arc<TokenStore>,
    session: Arc<SessionState>,
    channel: Mutex<Channel>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RealtimeEvent) {
        let _ = self.events.send(event);
    }
}

/// Owner of the real-time connection. Dropping it disconnects.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: RealtimeConfig, tokens: Arc<TokenStore>, session: Arc<SessionState>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                session,
                channel: Mutex::new(Channel {
                    generation: 0,
                    state: ConnectionState::Idle,
                    outbound: None,
                    reader: None,
                    reconnect: None,
                }),
                events,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.events.subscribe()
    }

    /// Open the channel with the current access token.
    ///
    /// Returns the current state without doing anything when a connection is
    /// already underway, open, or was closed on purpose.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<ConnectionState, RealtimeError> {
        connect(&self.inner).await
    }

    /// Close the channel on purpose. No reconnect follows; calling it again
    /// does nothing.
    pub fn disconnect(&self) {
        let mut channel = self.inner.lock();
        if let Some(reconnect) = channel.reconnect.take() {
            reconnect.abort();
        }
        match channel.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                channel.state = ConnectionState::ClosedIntentional;
                channel.generation += 1;
                if let Some(outbound) = channel.outbound.take() {
                    let _ = outbound.try_send(Message::Close(None));
                }
                if let Some(reader) = channel.reader.take() {
                    reader.abort();
                }
                info!("real-time channel closed");
                self.inner.emit(RealtimeEvent::Closed { intentional: true });
            },
            ConnectionState::ClosedUnintentional => {
                channel.state = ConnectionState::ClosedIntentional;
                debug!("pending reconnect cancelled");
            },
            ConnectionState::Idle | ConnectionState::ClosedIntentional => {},
        }
    }

    /// Clear a closed state so a later `connect()` starts a fresh cycle.
    pub fn reset(&self) {
        let mut channel = self.inner.lock();
        if matches!(
            channel.state,
            ConnectionState::ClosedIntentional | ConnectionState::ClosedUnintentional
        ) {
            if let Some(reconnect) = channel.reconnect.take() {
                reconnect.abort();
            }
            channel.state = ConnectionState::Idle;
            debug!("real-time channel reset");
        }
    }

    /// Send a message on the open channel. Nothing is queued while closed.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), RealtimeError> {
        let json = serde_json::to_string(message)?;
        let outbound = {
            let channel = self.inner.lock();
            match (&channel.state, &channel.outbound) {
                (ConnectionState::Open, Some(outbound)) => outbound.clone(),
                _ => return Err(RealtimeError::NotConnected),
            }
        };
        outbound
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| RealtimeError::NotConnected)?;
        debug!(?message, "sent real-time message");
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn connect(inner: &Arc<Inner>) -> Result<ConnectionState, RealtimeError> {
    let (generation, url) = {
        let mut channel = inner.lock();
        if channel.state.is_latched() {
            debug!(state = ?channel.state, "connect skipped");
            return Ok(channel.state);
        }
        let Some(token) = inner.tokens.access_token() else {
            debug!("no access token, not connecting");
            return Err(RealtimeError::NoAccessToken);
        };
        channel.state = ConnectionState::Connecting;
        channel.generation += 1;
        (
            channel.generation,
            inner.config.url_with_token(token.expose_secret()),
        )
    };

    info!(url = %inner.config.url, generation, "connecting real-time channel");
    let timeout = inner.config.connect_timeout;
    let stream = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, "real-time connection failed");
            on_closed(inner, generation);
            return Err(RealtimeError::Connect(e.to_string()));
        },
        Err(_) => {
            warn!(?timeout, "real-time connection timed out");
            on_closed(inner, generation);
            return Err(RealtimeError::Timeout(timeout));
        },
    };

    let mut channel = inner.lock();
    if channel.generation != generation || channel.state != ConnectionState::Connecting {
        debug!(state = ?channel.state, "connection superseded, dropping socket");
        return Ok(channel.state);
    }

    let (write, read) = stream.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    channel.state = ConnectionState::Open;
    channel.outbound = Some(tx);
    channel.reader = Some(tokio::spawn(read_loop(Arc::clone(inner), generation, read)));
    tokio::spawn(write_loop(rx, write));

    info!(generation, "real-time channel open");
    inner.emit(RealtimeEvent::Opened);
    Ok(ConnectionState::Open)
}

async fn read_loop(inner: Arc<Inner>, generation: u64, mut read: SplitStream<WsStream>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => {
                    debug!(?message, "received real-time message");
                    inner.emit(RealtimeEvent::Message(message));
                },
                Err(e) => {
                    warn!(error = %e, "dropping malformed real-time message");
                },
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "real-time channel closed by server");
                break;
            },
            Ok(_) => {},
            Err(e) => {
                warn!(error = %e, "real-time read error");
                break;
            },
        }
    }
    on_closed(&inner, generation);
}

async fn write_loop(mut rx: mpsc::Receiver<Message>, mut write: SplitSink<WsStream, Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            warn!(error = %e, "real-time write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = write.close().await;
}

/// The socket of `generation` went away without `disconnect()`.
fn on_closed(inner: &Arc<Inner>, generation: u64) {
    let mut channel = inner.lock();
    if channel.generation != generation
        || !matches!(
            channel.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    {
        return;
    }
    channel.state = ConnectionState::ClosedUnintentional;
    channel.outbound = None;
    channel.reader = None;
    inner.emit(RealtimeEvent::Closed { intentional: false });

    if !inner.session.is_initialized() {
        debug!("session not initialized, not reconnecting");
        return;
    }
    let delay = inner.config.reconnect_delay;
    info!(?delay, "scheduling real-time reconnect");
    inner.emit(RealtimeEvent::ReconnectScheduled { delay });
    channel.reconnect = Some(schedule_reconnect(Arc::clone(inner), generation, delay));
}

fn schedule_reconnect(inner: Arc<Inner>, generation: u64, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let mut channel = inner.lock();
            if channel.generation != generation
                || channel.state != ConnectionState::ClosedUnintentional
            {
                return;
            }
            channel.state = ConnectionState::Idle;
            channel.reconnect = None;
        }
        if let Err(e) = connect(&inner).await {
            warn!(error = %e, "real-time reconnect failed");
        }
    })
}
