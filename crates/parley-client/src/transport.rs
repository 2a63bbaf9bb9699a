use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::OptionFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::connector::{Connector, Socket, WsConnector};
use crate::error::TransportError;
use crate::frame::Envelope;
use crate::registry::{HandlerRegistry, Subscription};
use crate::state::ConnectionState;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Consecutive failed reconnections before giving up. A reconnection
    /// whose session closes before it settles counts as failed.
    pub max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl TransportConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay)
    }
}

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// A reconnecting real-time connection with topic dispatch.
///
/// One background driver task owns the socket for the lifetime of a
/// session: it reads frames, writes queued sends, and runs the reconnect
/// backoff. The handle is cheap to clone and shares all state.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    handlers: HandlerRegistry,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<StateListener>>,
    /// Present only while the session is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Serializes connect/disconnect.
    session: tokio::sync::Mutex<Option<Session>>,
}

/// `handle` is `None` while the initial connect is still in flight.
struct Session {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

enum SessionEnd {
    Cancelled,
    Dropped {
        error: Option<TransportError>,
        /// Received a frame or stayed open for at least `base_delay`.
        settled: bool,
    },
}

impl Transport {
    pub fn new(connector: impl Connector, config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                config,
                handlers: HandlerRegistry::new(),
                state_tx,
                listeners: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                session: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn websocket(url: impl Into<String>, config: TransportConfig) -> Self {
        Self::new(WsConnector::new(url), config)
    }

    /// Establish the session. Fails without retrying if the transport
    /// cannot be established; the state returns to `Idle`. A `disconnect`
    /// during the handshake abandons it and this returns `Closed`.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let cancel = CancellationToken::new();
        {
            let mut session = self.inner.session.lock().await;
            if let Some(previous) = session.take() {
                if !self.state().is_terminal() {
                    *session = Some(previous);
                    return Err(TransportError::AlreadyActive);
                }
                previous.cancel.cancel();
                if let Some(handle) = previous.handle {
                    let _ = handle.await;
                }
            }
            *session = Some(Session {
                cancel: cancel.clone(),
                handle: None,
            });
            self.inner.set_state(ConnectionState::Connecting);
        }

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Closed),
            result = self.inner.connector.connect() => result,
        };

        let mut session = self.inner.session.lock().await;
        if cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let socket = match attempt {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Initial connect failed: {}", e);
                session.take();
                self.inner.set_state(ConnectionState::Idle);
                return Err(e);
            }
        };

        let outbound = self.inner.open();
        let handle = tokio::spawn(drive(self.inner.clone(), socket, outbound, cancel.clone()));
        *session = Some(Session {
            cancel,
            handle: Some(handle),
        });

        info!("Transport connected");
        Ok(())
    }

    /// Close the session and cancel any pending reconnection. Ends in `Closed`.
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        if let Some(active) = session.take() {
            active.cancel.cancel();
            if let Some(Err(e)) = OptionFuture::from(active.handle).await {
                warn!("Transport driver ended abnormally: {}", e);
            }
        }
        self.inner.close_outbound();
        self.inner.set_state(ConnectionState::Closed);
        info!("Transport disconnected");
    }

    /// Serialize and send a payload. Nothing is queued unless the session is open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }
        let text = serde_json::to_string(payload)?;

        let outbound = lock(&self.inner.outbound);
        let Some(tx) = outbound.as_ref() else {
            return Err(TransportError::NotOpen(self.state()));
        };
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    /// Register a handler for frames whose `type` equals `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.handlers.subscribe(topic, handler)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch the state. Intermediate states may be skipped by a slow reader;
    /// use [`on_state_change`](Self::on_state_change) to see every transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Called synchronously on every state transition, including the
    /// terminal `Failed` and `Closed`.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return;
        }

        debug!("Transport state: {}", state);
        let listeners: Vec<StateListener> = lock(&self.listeners).clone();
        for listener in &listeners {
            listener(state);
        }
    }

    /// Install a fresh outbound queue and mark the session open.
    fn open(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx);
        self.set_state(ConnectionState::Open);
        rx
    }

    fn close_outbound(&self) {
        lock(&self.outbound).take();
    }

    fn deliver(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => {
                let handled = self.handlers.dispatch(&envelope);
                trace!("Frame {} dispatched to {} handlers", envelope.kind(), handled);
            }
            Err(e) => warn!("Dropping inbound frame: {}", e),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session driver: pump the open session, then reconnect with backoff until
/// a new session settles, the attempts run out, or the token is cancelled.
async fn drive(
    inner: Arc<Inner>,
    mut socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let backoff = inner.config.backoff();
    let mut failures = 0u32;
    let mut reconnected = false;

    loop {
        match run_session(&inner, &mut socket, &mut outbound, &cancel).await {
            SessionEnd::Cancelled => return,
            SessionEnd::Dropped { error, settled } => {
                match error {
                    Some(e) => warn!("Session dropped: {}", e),
                    None => info!("Session closed by peer"),
                }
                if settled {
                    failures = 0;
                } else if reconnected {
                    failures += 1;
                    warn!("Reconnection attempt {} closed before settling", failures);
                }
            }
        }

        socket = loop {
            if failures >= inner.config.max_attempts {
                warn!("Giving up after {} reconnection attempts", failures);
                inner.set_state(ConnectionState::Failed { attempts: failures });
                return;
            }

            let delay = backoff.delay(failures);
            inner.set_state(ConnectionState::Reconnecting {
                attempt: failures + 1,
                delay,
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            inner.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = inner.connector.connect() => result,
            };
            match attempt {
                Ok(socket) => break socket,
                Err(e) => {
                    failures += 1;
                    warn!("Reconnection attempt {} failed: {}", failures, e);
                }
            }
        };

        outbound = inner.open();
        reconnected = true;
        info!("Transport reconnected");
    }
}

/// Runs until cancelled or the session drops. On a drop the outbound queue
/// is removed before returning, so no `send` is accepted for a dead session.
async fn run_session(
    inner: &Inner,
    socket: &mut Socket,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let opened_at = Instant::now();
    let mut received = false;

    let error = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = socket.sink.close().await {
                    debug!("Error closing socket: {}", e);
                }
                return SessionEnd::Cancelled;
            }
            frame = socket.stream.next() => match frame {
                Some(Ok(text)) => {
                    received = true;
                    inner.deliver(&text);
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = socket.sink.send(text).await {
                    break Some(e);
                }
            }
        }
    };

    inner.close_outbound();
    SessionEnd::Dropped {
        error,
        settled: received || opened_at.elapsed() >= inner.config.base_delay,
    }
}
