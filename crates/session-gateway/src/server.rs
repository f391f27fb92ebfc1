//! WebSocket session server
//!
//! Accepts upgrades on a TCP listener, registers each connection as a
//! session, and runs three kinds of background work: a per-session
//! reader/writer task pair, a shared heartbeat broadcaster that only
//! lives while sessions exist, and a periodic sweep that evicts idle
//! sessions. All tasks are `smol` tasks; the accept and sweep tasks are
//! cancelled by dropping their handles on `stop()`.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::models::{MessageType, SessionEvent, SessionInfo, SessionMessage};
use crate::registry::{SessionHandle, SessionRegistry};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::WebSocketSender;
use async_tungstenite::accept_hdr_async;
use chrono::Utc;
use futures::future::{Either, select};
use futures::lock::Mutex;
use futures::pin_mut;
use futures_util::{SinkExt, StreamExt};
use smol::Timer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use tungstenite::Message;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use uuid::Uuid;

/// Outbound frames queued per session before the writer applies backpressure
const OUTBOUND_QUEUE: usize = 256;

/// Handles that exist only while the listener is up
struct Listening {
    local_addr: SocketAddr,
    _accept_task: smol::Task<()>,
    _sweep_task: smol::Task<()>,
}

/// Heartbeat broadcaster; present only while sessions are connected
struct Heartbeat {
    stop: async_channel::Sender<()>,
    task: smol::Task<()>,
}

struct Inner {
    config: SessionConfig,
    registry: SessionRegistry,
    accepting: AtomicBool,
    inbound_tx: async_channel::Sender<(Uuid, SessionMessage)>,
    inbound_rx: async_channel::Receiver<(Uuid, SessionMessage)>,
    event_tx: async_channel::Sender<SessionEvent>,
    event_rx: async_channel::Receiver<SessionEvent>,
    listener: Mutex<Option<Listening>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

/// WebSocket session server
///
/// Cheap to clone; all clones drive the same listener and registry.
#[derive(Clone)]
pub struct SessionServer {
    inner: Arc<Inner>,
}

impl SessionServer {
    /// Create a stopped server with the given configuration
    pub fn new(config: SessionConfig) -> Self {
        let registry = SessionRegistry::new(config.max_sessions);
        let (inbound_tx, inbound_rx) = async_channel::unbounded();
        let (event_tx, event_rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                accepting: AtomicBool::new(false),
                inbound_tx,
                inbound_rx,
                event_tx,
                event_rx,
                listener: Mutex::new(None),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Bind the listener and begin accepting sessions
    pub async fn start(&self) -> Result<()> {
        let mut listening = self.inner.listener.lock().await;
        if listening.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.inner.config.port))
            .await
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "session gateway listening");

        self.inner.accepting.store(true, Ordering::SeqCst);
        let accept_task = smol::spawn(accept_loop(self.inner.clone(), listener));
        let sweep_task = smol::spawn(sweep_loop(self.inner.clone()));

        *listening = Some(Listening {
            local_addr,
            _accept_task: accept_task,
            _sweep_task: sweep_task,
        });
        Ok(())
    }

    /// Stop accepting, disconnect every session, and release the port
    ///
    /// Idempotent: stopping a stopped server is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let listening = self.inner.listener.lock().await.take();
        if listening.is_none() {
            return Ok(());
        }
        self.inner.accepting.store(false, Ordering::SeqCst);
        // Dropping the handles cancels the accept and sweep tasks
        drop(listening);

        for info in self.inner.registry.list().await {
            disconnect_session(&self.inner, info.id, "server shutdown").await;
        }
        stop_heartbeat(&self.inner).await;
        info!("session gateway stopped");
        Ok(())
    }

    /// Whether the listener is up
    pub async fn is_running(&self) -> bool {
        self.inner.listener.lock().await.is_some()
    }

    /// Bound address, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    /// Toggle acceptance of new upgrade requests
    ///
    /// When off, upgrade requests are rejected with 503 while existing
    /// sessions continue undisturbed.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Whether new upgrade requests are currently accepted
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Fan a message out to every connected session
    pub async fn broadcast(&self, message: SessionMessage) -> Result<()> {
        self.broadcast_excluding(message, &[]).await
    }

    /// Fan a message out to every session except those in `exclude`
    pub async fn broadcast_excluding(
        &self,
        message: SessionMessage,
        exclude: &[Uuid],
    ) -> Result<()> {
        if !self.is_running().await {
            return Err(Error::NotRunning);
        }
        broadcast_reaping(&self.inner, &message, exclude).await
    }

    /// Send a message to the given sessions only
    ///
    /// Ids that are not connected are skipped.
    pub async fn send_to(&self, ids: &[Uuid], message: SessionMessage) -> Result<()> {
        if !self.is_running().await {
            return Err(Error::NotRunning);
        }
        let failed = self
            .inner
            .registry
            .broadcast(&message, &[], Some(ids))
            .await?;
        for id in failed {
            disconnect_session(&self.inner, id, "send failed").await;
        }
        Ok(())
    }

    /// Forcibly disconnect a session
    pub async fn disconnect(&self, id: Uuid, reason: &str) -> Result<()> {
        if disconnect_session(&self.inner, id, reason).await {
            Ok(())
        } else {
            Err(Error::SessionNotFound(id))
        }
    }

    /// Stream of inbound application messages, tagged with the sender
    pub fn messages(&self) -> async_channel::Receiver<(Uuid, SessionMessage)> {
        self.inner.inbound_rx.clone()
    }

    /// Stream of session lifecycle events
    pub fn events(&self) -> async_channel::Receiver<SessionEvent> {
        self.inner.event_rx.clone()
    }

    /// Snapshot of every connected session
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.registry.list().await
    }

    /// Snapshot of one session
    pub async fn session(&self, id: Uuid) -> Option<SessionInfo> {
        self.inner.registry.get(id).await
    }

    /// Number of connected sessions
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let inner = inner.clone();
                smol::spawn(async move {
                    handle_connection(inner, stream, addr).await;
                })
                .detach();
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }
}

async fn handle_connection(inner: Arc<Inner>, stream: TcpStream, addr: SocketAddr) {
    let mut user_agent = None;

    let callback = |request: &Request, response: Response| {
        user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let at_capacity = inner
            .config
            .max_sessions
            .is_some_and(|max| inner.registry.len() >= max);
        if !inner.accepting.load(Ordering::SeqCst) || at_capacity {
            let mut rejection = ErrorResponse::new(Some("service unavailable".to_string()));
            *rejection.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return Err(rejection);
        }
        Ok(response)
    };

    let mut ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(addr = %addr, error = %e, "websocket upgrade rejected");
            return;
        }
    };

    let id = Uuid::new_v4();
    let now = Utc::now();
    let info = SessionInfo {
        id,
        kind: "client".to_string(),
        connected_at: now,
        last_seen_at: now,
        remote_addr: addr,
        user_agent,
        metadata: HashMap::new(),
    };

    let (out_tx, out_rx) = async_channel::bounded(OUTBOUND_QUEUE);
    let (close_tx, close_rx) = async_channel::bounded::<()>(1);
    let handle = SessionHandle {
        info,
        sender: out_tx.clone(),
        closer: close_tx,
    };

    // The upgrade callback pre-checks capacity, but the registry is the
    // authority; a racing connection can still lose here.
    if let Err(e) = inner.registry.insert(handle).await {
        warn!(session_id = %id, error = %e, "session rejected after upgrade");
        let _ = ws_stream.close(None).await;
        return;
    }
    info!(session_id = %id, addr = %addr, "session connected");

    let (sink, mut ws_rx) = ws_stream.split();
    smol::spawn(writer_loop(inner.clone(), id, sink, out_rx)).detach();

    if let Err(e) = inner
        .registry
        .send_to_one(id, &SessionMessage::session_connect(id))
        .await
    {
        warn!(session_id = %id, error = %e, "failed to queue connect handshake");
    }
    if let Err(e) =
        broadcast_reaping(&inner, &SessionMessage::session_connect(id), &[id]).await
    {
        warn!(session_id = %id, error = %e, "failed to announce session");
    }
    let _ = inner.event_tx.try_send(SessionEvent::Connected { id });
    ensure_heartbeat(&inner).await;

    loop {
        let next = ws_rx.next();
        let closed = close_rx.recv();
        pin_mut!(next);
        pin_mut!(closed);
        match select(next, closed).await {
            Either::Left((Some(Ok(message)), _)) => match message {
                Message::Text(text) => {
                    if !handle_inbound(&inner, id, text.as_str()).await {
                        break;
                    }
                }
                Message::Ping(payload) => {
                    inner.registry.touch(id).await;
                    let _ = out_tx.try_send(Message::Pong(payload));
                }
                Message::Pong(_) => {
                    inner.registry.touch(id).await;
                }
                Message::Close(_) => {
                    disconnect_session(&inner, id, "client closed").await;
                    break;
                }
                Message::Binary(_) | Message::Frame(_) => {
                    debug!(session_id = %id, "ignoring non-text frame");
                }
            },
            Either::Left((Some(Err(e)), _)) => {
                debug!(session_id = %id, error = %e, "read failed");
                disconnect_session(&inner, id, "transport error").await;
                break;
            }
            Either::Left((None, _)) => {
                disconnect_session(&inner, id, "client closed").await;
                break;
            }
            // Close channel dropped by the registry: the session was
            // already evicted, just exit.
            Either::Right((_, _)) => break,
        }
    }
    debug!(session_id = %id, "reader finished");
}

async fn writer_loop(
    inner: Arc<Inner>,
    id: Uuid,
    mut sink: WebSocketSender<TcpStream>,
    out_rx: async_channel::Receiver<Message>,
) {
    while let Ok(frame) = out_rx.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!(session_id = %id, error = %e, "write failed");
            disconnect_session(&inner, id, "transport error").await;
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = SinkExt::close(&mut sink).await;
}

/// Process one inbound text frame; returns false when the session was
/// disconnected and the reader should exit
async fn handle_inbound(inner: &Arc<Inner>, id: Uuid, text: &str) -> bool {
    let mut message: SessionMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(session_id = %id, error = %e, "malformed message");
            disconnect_session(inner, id, "malformed message").await;
            return false;
        }
    };

    inner.registry.touch(id).await;
    if message.message_type == MessageType::Heartbeat {
        return true;
    }

    // Tag with the sender so peers and the monitor know the origin
    message.session_id = Some(id);

    if message.message_type.is_relayable() {
        if let Err(e) = broadcast_reaping(inner, &message, &[id]).await {
            warn!(session_id = %id, error = %e, "relay failed");
        }
    }
    let _ = inner.inbound_tx.try_send((id, message));
    true
}

/// Broadcast and evict any session whose outbound queue rejected the frame
async fn broadcast_reaping(
    inner: &Arc<Inner>,
    message: &SessionMessage,
    exclude: &[Uuid],
) -> Result<()> {
    let failed = inner.registry.broadcast(message, exclude, None).await?;
    for id in failed {
        disconnect_session(inner, id, "send failed").await;
    }
    Ok(())
}

/// Remove a session, notify the rest, and emit the lifecycle event
///
/// Returns false when the session was already gone. Departure notices
/// that fail to queue are only logged; the failing sessions' own writer
/// or the sweep will evict them.
async fn disconnect_session(inner: &Arc<Inner>, id: Uuid, reason: &str) -> bool {
    let Some(handle) = inner.registry.remove(id).await else {
        return false;
    };
    info!(session_id = %id, reason, "session disconnected");

    let _ = handle.sender.try_send(Message::Close(None));
    // Dropping the handle closes the close channel, which unblocks the
    // reader, and drops the outbound sender, which lets the writer drain
    // and exit.
    drop(handle);

    match inner
        .registry
        .broadcast(&SessionMessage::session_disconnect(id, reason), &[], None)
        .await
    {
        Ok(failed) => {
            for failed_id in failed {
                debug!(session_id = %failed_id, "departure notice dropped");
            }
        }
        Err(e) => warn!(error = %e, "failed to broadcast departure"),
    }

    let _ = inner.event_tx.try_send(SessionEvent::Disconnected {
        id,
        reason: reason.to_string(),
    });

    if inner.registry.is_empty() {
        stop_heartbeat(inner).await;
    }
    true
}

/// Start the heartbeat broadcaster if it is not already running
async fn ensure_heartbeat(inner: &Arc<Inner>) {
    let mut heartbeat = inner.heartbeat.lock().await;
    if let Some(existing) = heartbeat.as_ref() {
        if !existing.task.is_finished() {
            return;
        }
    }
    let (stop_tx, stop_rx) = async_channel::bounded::<()>(1);
    let task = smol::spawn(heartbeat_loop(inner.clone(), stop_rx));
    *heartbeat = Some(Heartbeat { stop: stop_tx, task });
    debug!("heartbeat broadcaster started");
}

/// Signal the heartbeat broadcaster to exit and let it wind down
async fn stop_heartbeat(inner: &Arc<Inner>) {
    let mut heartbeat = inner.heartbeat.lock().await;
    if let Some(Heartbeat { stop, task }) = heartbeat.take() {
        let _ = stop.try_send(());
        task.detach();
        debug!("heartbeat broadcaster stopped");
    }
}

async fn heartbeat_loop(inner: Arc<Inner>, stop_rx: async_channel::Receiver<()>) {
    let interval = inner.config.heartbeat_interval();
    loop {
        let tick = Timer::after(interval);
        let stopped = stop_rx.recv();
        pin_mut!(tick);
        pin_mut!(stopped);
        if let Either::Right(_) = select(tick, stopped).await {
            break;
        }
        if inner.registry.is_empty() {
            break;
        }
        if let Err(e) = broadcast_reaping(&inner, &SessionMessage::heartbeat(), &[]).await {
            warn!(error = %e, "heartbeat broadcast failed");
        }
    }
}

async fn sweep_loop(inner: Arc<Inner>) {
    let interval = inner.config.sweep_interval();
    let idle_timeout = inner.config.idle_timeout();
    loop {
        Timer::after(interval).await;
        let idle = inner.registry.idle_sessions(idle_timeout).await;
        for id in idle {
            debug!(session_id = %id, "evicting idle session");
            disconnect_session(&inner, id, "timeout").await;
        }
    }
}
