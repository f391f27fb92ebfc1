//! Lifecycle orchestration for the connectivity stack
//!
//! The orchestrator owns one discovery server, one session gateway and
//! one HTTP facade, and drives them through a single lifecycle state
//! machine. Lifecycle operations are serialized by an operations lock;
//! the status value itself sits behind its own mutex so probes and
//! statistics never block a running transition.

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::events::OrchestratorEvent;
use crate::http::{HttpFacade, NullHttpFacade, RouteHandler, WebSocketNotifier};
use crate::recovery::{RecoveryDecision, RecoveryTracker};
use crate::status::{HealthState, OrchestratorStatus, ServiceHealthRecord, aggregate_health};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{Either, select};
use futures::lock::Mutex;
use futures::pin_mut;
use lan_discovery::{DiscoveryServer, ServerInfo, subnet};
use serde::Serialize;
use serde_json::Value;
use session_gateway::{SessionInfo, SessionMessage, SessionServer};
use smol::Timer;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the session gateway in health records and events
pub const SESSION_SERVICE: &str = "session-gateway";
/// Name of the HTTP facade in health records and events
pub const HTTP_SERVICE: &str = "http";
/// Name of the discovery server in health records and events
pub const DISCOVERY_SERVICE: &str = "discovery";

/// Point-in-time snapshot of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// Current lifecycle status
    pub status: OrchestratorStatus,
    /// Aggregate health across all supervised services
    pub health: HealthState,
    /// When the last successful start completed
    pub started_at: Option<DateTime<Utc>>,
    /// Milliseconds since the last successful start
    pub uptime_ms: Option<u64>,
    /// Connected WebSocket sessions
    pub session_count: usize,
    /// Inbound messages observed since the last start
    pub messages_observed: u64,
    /// Recovery attempts currently outstanding across services
    pub recovery_attempts: u32,
}

/// Background tasks alive while the orchestrator is running
struct Supervision {
    _health_task: smol::Task<()>,
    _monitor_task: smol::Task<()>,
}

struct Inner {
    config: OrchestratorConfig,
    discovery: DiscoveryServer,
    gateway: SessionServer,
    http: Box<dyn HttpFacade>,
    status: Mutex<OrchestratorStatus>,
    /// Serializes start/stop/pause/resume
    ops: Mutex<()>,
    health: Mutex<HashMap<String, ServiceHealthRecord>>,
    recovery: Mutex<RecoveryTracker>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    messages_observed: AtomicU64,
    supervision: Mutex<Option<Supervision>>,
    event_tx: async_channel::Sender<OrchestratorEvent>,
    event_rx: async_channel::Receiver<OrchestratorEvent>,
}

/// Supervisor for the discovery server, session gateway and HTTP facade
///
/// Cheap to clone; all clones share the same supervised services.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create a stopped orchestrator with a no-op HTTP facade
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_http_facade(config, Box::new(NullHttpFacade::new()))
    }

    /// Create a stopped orchestrator supervising the given HTTP facade
    pub fn with_http_facade(config: OrchestratorConfig, http: Box<dyn HttpFacade>) -> Self {
        let discovery = DiscoveryServer::new(config.discovery.clone());
        let gateway = SessionServer::new(config.session.clone());
        let recovery = RecoveryTracker::new(config.max_recovery_attempts);
        let (event_tx, event_rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                config,
                discovery,
                gateway,
                http,
                status: Mutex::new(OrchestratorStatus::Stopped),
                ops: Mutex::new(()),
                health: Mutex::new(HashMap::new()),
                recovery: Mutex::new(recovery),
                started_at: Mutex::new(None),
                messages_observed: AtomicU64::new(0),
                supervision: Mutex::new(None),
                event_tx,
                event_rx,
            }),
        }
    }

    /// Start the session gateway, the HTTP facade, then discovery
    ///
    /// A no-op when already starting or running. Any start failure or
    /// timeout rolls back the services that did start and leaves the
    /// orchestrator in the Error status.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        let current = self.status().await;
        match current {
            OrchestratorStatus::Starting | OrchestratorStatus::Running => {
                info!(status = ?current, "start requested while already up");
                return Ok(());
            }
            OrchestratorStatus::Stopped | OrchestratorStatus::Error => {}
            other => {
                return Err(Error::InvalidStateTransition {
                    from: other,
                    to: OrchestratorStatus::Starting,
                });
            }
        }
        set_status(&self.inner, OrchestratorStatus::Starting).await;

        if let Err(e) = start_services(&self.inner).await {
            error!(error = %e, "startup failed, rolling back");
            set_status(&self.inner, OrchestratorStatus::Error).await;
            return Err(Error::StartupFailed(e.to_string()));
        }

        {
            self.inner.recovery.lock().await.reset();
            *self.inner.started_at.lock().await = Some(Utc::now());
            self.inner.messages_observed.store(0, Ordering::SeqCst);
        }

        let health_task = smol::spawn(health_loop(self.inner.clone()));
        let monitor_task = smol::spawn(monitor_loop(self.inner.clone()));
        *self.inner.supervision.lock().await = Some(Supervision {
            _health_task: health_task,
            _monitor_task: monitor_task,
        });

        set_status(&self.inner, OrchestratorStatus::Running).await;
        info!(server_name = %self.inner.config.server_name, "orchestrator running");
        Ok(())
    }

    /// Stop discovery, the HTTP facade, then the session gateway
    ///
    /// Individual stop failures are logged and teardown continues; the
    /// orchestrator always settles in the Stopped status.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        let current = self.status().await;
        if matches!(
            current,
            OrchestratorStatus::Stopped | OrchestratorStatus::Stopping
        ) {
            return Ok(());
        }
        set_status(&self.inner, OrchestratorStatus::Stopping).await;

        // Cancel the health and monitoring tasks before touching services
        self.inner.supervision.lock().await.take();

        let timeout = self.inner.config.shutdown_timeout();
        stop_logged(DISCOVERY_SERVICE, timeout, async {
            self.inner.discovery.stop().await;
            Ok(())
        })
        .await;
        stop_logged(HTTP_SERVICE, timeout, self.inner.http.stop()).await;
        stop_logged(SESSION_SERVICE, timeout, async {
            self.inner.gateway.stop().await.map_err(Error::from)
        })
        .await;

        *self.inner.started_at.lock().await = None;
        set_status(&self.inner, OrchestratorStatus::Stopped).await;
        info!("orchestrator stopped");
        Ok(())
    }

    /// Stop accepting new session upgrades while keeping everything up
    pub async fn pause(&self) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        let current = self.status().await;
        if current != OrchestratorStatus::Running {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: OrchestratorStatus::Paused,
            });
        }
        self.inner.gateway.set_accepting(false);
        set_status(&self.inner, OrchestratorStatus::Paused).await;
        Ok(())
    }

    /// Resume accepting session upgrades after a pause
    pub async fn resume(&self) -> Result<()> {
        let _guard = self.inner.ops.lock().await;
        let current = self.status().await;
        if current != OrchestratorStatus::Paused {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: OrchestratorStatus::Running,
            });
        }
        self.inner.gateway.set_accepting(true);
        set_status(&self.inner, OrchestratorStatus::Running).await;
        Ok(())
    }

    /// Current lifecycle status
    pub async fn status(&self) -> OrchestratorStatus {
        *self.inner.status.lock().await
    }

    /// Latest health record per service
    pub async fn health(&self) -> HashMap<String, ServiceHealthRecord> {
        self.inner.health.lock().await.clone()
    }

    /// Aggregate health across all supervised services
    pub async fn aggregate_health(&self) -> HealthState {
        let health = self.inner.health.lock().await;
        aggregate_health(health.values())
    }

    /// Point-in-time snapshot of status, health and counters
    pub async fn statistics(&self) -> OrchestratorStats {
        let status = self.status().await;
        let health = self.aggregate_health().await;
        let started_at = *self.inner.started_at.lock().await;
        let uptime_ms = started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64);
        let recovery_attempts = self.inner.recovery.lock().await.total_attempts();
        OrchestratorStats {
            status,
            health,
            started_at,
            uptime_ms,
            session_count: self.inner.gateway.session_count(),
            messages_observed: self.inner.messages_observed.load(Ordering::SeqCst),
            recovery_attempts,
        }
    }

    /// Stream of status, health and recovery events
    pub fn events(&self) -> async_channel::Receiver<OrchestratorEvent> {
        self.inner.event_rx.clone()
    }

    /// Fan a message out to every connected session
    pub async fn broadcast(&self, message: SessionMessage) -> Result<()> {
        Ok(self.inner.gateway.broadcast(message).await?)
    }

    /// Fan a message out to every session except those in `exclude`
    pub async fn broadcast_excluding(
        &self,
        message: SessionMessage,
        exclude: &[Uuid],
    ) -> Result<()> {
        Ok(self.inner.gateway.broadcast_excluding(message, exclude).await?)
    }

    /// Send a message to the given sessions only
    pub async fn send_to(&self, ids: &[Uuid], message: SessionMessage) -> Result<()> {
        Ok(self.inner.gateway.send_to(ids, message).await?)
    }

    /// Snapshot of connected sessions
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.gateway.sessions().await
    }

    /// Bound address of the session gateway, once running
    pub async fn session_local_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner.gateway.local_addr().await
    }

    /// Register a route handler on the supervised HTTP service
    pub async fn add_route_handler(&self, handler: Arc<dyn RouteHandler>) -> Result<()> {
        self.inner.http.add_route_handler(handler).await
    }
}

#[async_trait]
impl WebSocketNotifier for Orchestrator {
    async fn notify_data_change(&self, event: &str, data: Value) -> Result<()> {
        self.broadcast(SessionMessage::data_update(event, data)).await
    }

    async fn broadcast_system_message(&self, message: &str, level: &str) -> Result<()> {
        self.broadcast(SessionMessage::system_message(message, level))
            .await
    }
}

async fn set_status(inner: &Arc<Inner>, to: OrchestratorStatus) {
    let mut status = inner.status.lock().await;
    let from = *status;
    if from == to {
        return;
    }
    *status = to;
    debug!(?from, ?to, "status changed");
    let _ = inner.event_tx.try_send(OrchestratorEvent::StatusChanged { from, to });
}

/// Run `operation` against a deadline
async fn with_timeout<F, T>(service: &str, deadline: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timer = Timer::after(deadline);
    pin_mut!(operation);
    pin_mut!(timer);
    match select(operation, timer).await {
        Either::Left((result, _)) => result,
        Either::Right(_) => Err(Error::ServiceTimeout {
            service: service.to_string(),
        }),
    }
}

/// Stop one service during teardown; failures are logged, never fatal
async fn stop_logged<F>(service: &str, timeout: Duration, operation: F)
where
    F: Future<Output = Result<()>>,
{
    if let Err(e) = with_timeout(service, timeout, operation).await {
        warn!(service, error = %e, "stop failed during teardown");
    }
}

/// The announcement discovery broadcasts for this server
async fn build_server_info(inner: &Arc<Inner>) -> ServerInfo {
    let ws_port = inner
        .gateway
        .local_addr()
        .await
        .map(|addr| addr.port())
        .unwrap_or(inner.config.session.port);
    let mut info = ServerInfo::new(
        &inner.config.server_name,
        &inner.config.version,
        subnet::primary_local_ip(),
        inner.config.http_port,
        ws_port,
    );
    for (key, value) in &inner.config.capabilities {
        info = info.with_capability(key, value.clone());
    }
    info
}

/// Start all services in order, rolling back on the first failure
async fn start_services(inner: &Arc<Inner>) -> Result<()> {
    let timeout = inner.config.startup_timeout();

    with_timeout(SESSION_SERVICE, timeout, async {
        inner.gateway.start().await.map_err(Error::from)
    })
    .await?;

    if let Err(e) = with_timeout(HTTP_SERVICE, timeout, inner.http.start()).await {
        rollback(inner, &[SESSION_SERVICE]).await;
        return Err(e);
    }

    let info = build_server_info(inner).await;
    if let Err(e) = with_timeout(DISCOVERY_SERVICE, timeout, async {
        inner.discovery.start(info).await.map_err(Error::from)
    })
    .await
    {
        rollback(inner, &[HTTP_SERVICE, SESSION_SERVICE]).await;
        return Err(e);
    }
    Ok(())
}

/// Best-effort teardown of services that started before a failure
async fn rollback(inner: &Arc<Inner>, started: &[&str]) {
    let timeout = inner.config.shutdown_timeout();
    for service in started {
        match *service {
            SESSION_SERVICE => {
                stop_logged(SESSION_SERVICE, timeout, async {
                    inner.gateway.stop().await.map_err(Error::from)
                })
                .await;
            }
            HTTP_SERVICE => stop_logged(HTTP_SERVICE, timeout, inner.http.stop()).await,
            DISCOVERY_SERVICE => {
                stop_logged(DISCOVERY_SERVICE, timeout, async {
                    inner.discovery.stop().await;
                    Ok(())
                })
                .await;
            }
            other => warn!(service = other, "unknown service in rollback"),
        }
    }
}

async fn health_loop(inner: Arc<Inner>) {
    let interval = inner.config.health_check_interval();
    loop {
        Timer::after(interval).await;
        let status = *inner.status.lock().await;
        if !matches!(
            status,
            OrchestratorStatus::Running | OrchestratorStatus::Paused
        ) {
            continue;
        }
        probe_all(&inner).await;
    }
}

async fn probe_all(inner: &Arc<Inner>) {
    let probes = [
        probe_session(inner).await,
        probe_http(inner).await,
        probe_discovery(inner).await,
    ];
    for record in probes {
        let healthy = record.status == HealthState::Healthy;
        let service = record.service_name.clone();
        {
            let mut health = inner.health.lock().await;
            health.insert(service.clone(), record.clone());
        }
        let _ = inner.event_tx.try_send(OrchestratorEvent::HealthChanged {
            service: service.clone(),
            record,
        });

        if healthy {
            inner.recovery.lock().await.record_success(&service);
            continue;
        }
        if !inner.config.auto_recovery {
            continue;
        }
        let decision = inner.recovery.lock().await.record_failure(&service);
        match decision {
            RecoveryDecision::Retry(attempt) => {
                warn!(service = %service, attempt, "attempting recovery");
                let _ = inner
                    .event_tx
                    .try_send(OrchestratorEvent::RecoveryAttempt {
                        service: service.clone(),
                        attempt,
                    });
                restart_service(inner, &service).await;
            }
            RecoveryDecision::Exhausted => {
                warn!(service = %service, "recovery attempts exhausted");
                let _ = inner
                    .event_tx
                    .try_send(OrchestratorEvent::RecoveryExhausted { service });
            }
        }
    }
}

async fn probe_session(inner: &Arc<Inner>) -> ServiceHealthRecord {
    let start = Instant::now();
    let is_running = inner.gateway.is_running().await;
    let mut metrics = HashMap::new();
    metrics.insert(
        "session_count".to_string(),
        Value::from(inner.gateway.session_count()),
    );
    ServiceHealthRecord {
        service_name: SESSION_SERVICE.to_string(),
        is_running,
        status: if is_running {
            HealthState::Healthy
        } else {
            HealthState::Critical
        },
        last_checked_at: Utc::now(),
        response_latency_ms: Some(start.elapsed().as_millis() as u64),
        metrics,
    }
}

async fn probe_http(inner: &Arc<Inner>) -> ServiceHealthRecord {
    let start = Instant::now();
    let is_running = inner.http.is_running().await;
    ServiceHealthRecord {
        service_name: HTTP_SERVICE.to_string(),
        is_running,
        status: if is_running {
            HealthState::Healthy
        } else {
            HealthState::Critical
        },
        last_checked_at: Utc::now(),
        response_latency_ms: Some(start.elapsed().as_millis() as u64),
        metrics: HashMap::new(),
    }
}

async fn probe_discovery(inner: &Arc<Inner>) -> ServiceHealthRecord {
    let start = Instant::now();
    let is_running = inner.discovery.is_running().await;
    let mut metrics = HashMap::new();
    if let Some(announcement) = inner.discovery.announcement().await {
        metrics.insert("announced_name".to_string(), Value::from(announcement.name));
    }
    ServiceHealthRecord {
        service_name: DISCOVERY_SERVICE.to_string(),
        is_running,
        // Discovery being down degrades reachability but connected
        // clients keep working
        status: if is_running {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        },
        last_checked_at: Utc::now(),
        response_latency_ms: Some(start.elapsed().as_millis() as u64),
        metrics,
    }
}

/// Stop, back off, and restart one failed service
async fn restart_service(inner: &Arc<Inner>, service: &str) {
    let timeout = inner.config.shutdown_timeout();
    let result: Result<()> = match service {
        SESSION_SERVICE => {
            stop_logged(SESSION_SERVICE, timeout, async {
                inner.gateway.stop().await.map_err(Error::from)
            })
            .await;
            Timer::after(inner.config.recovery_backoff()).await;
            inner.gateway.start().await.map_err(Error::from)
        }
        HTTP_SERVICE => {
            stop_logged(HTTP_SERVICE, timeout, inner.http.stop()).await;
            Timer::after(inner.config.recovery_backoff()).await;
            inner.http.start().await
        }
        DISCOVERY_SERVICE => {
            inner.discovery.stop().await;
            Timer::after(inner.config.recovery_backoff()).await;
            let info = build_server_info(inner).await;
            inner.discovery.start(info).await.map_err(Error::from)
        }
        other => {
            warn!(service = other, "unknown service in recovery");
            Ok(())
        }
    };
    if let Err(e) = result {
        error!(service, error = %e, "recovery restart failed");
        let _ = inner.event_tx.try_send(OrchestratorEvent::ServiceError {
            service: service.to_string(),
            message: e.to_string(),
        });
    } else {
        info!(service, "service restarted");
    }
}

/// Drain the gateway's inbound stream, counting observed traffic
async fn monitor_loop(inner: Arc<Inner>) {
    let messages = inner.gateway.messages();
    while let Ok((session_id, message)) = messages.recv().await {
        inner.messages_observed.fetch_add(1, Ordering::SeqCst);
        debug!(
            session_id = %session_id,
            message_type = ?message.message_type,
            "inbound message observed"
        );
    }
}
