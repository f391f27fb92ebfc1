//! Orchestrator lifecycle, rollback and recovery tests

use async_net::{TcpListener, TcpStream};
use async_trait::async_trait;
use async_tungstenite::client_async;
use futures::StreamExt;
use futures::future::{Either, select};
use futures::pin_mut;
use server_orchestration::{
    Error, HTTP_SERVICE, HttpFacade, Orchestrator, OrchestratorConfig, OrchestratorEvent,
    OrchestratorStatus, Result, RouteHandler, WebSocketNotifier,
};
use smol::Timer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tungstenite::Message;

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.session.port = 0;
    config.discovery.port = 0;
    config.discovery.broadcast_interval_ms = 3_600_000;
    config.health_check_interval_ms = 3_600_000;
    config
}

/// Collect events already queued on the receiver
fn drain(events: &async_channel::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

async fn recv_event_with_timeout(
    events: &async_channel::Receiver<OrchestratorEvent>,
    timeout: Duration,
) -> Option<OrchestratorEvent> {
    let recv = events.recv();
    let expired = Timer::after(timeout);
    pin_mut!(recv);
    pin_mut!(expired);
    match select(recv, expired).await {
        Either::Left((Ok(event), _)) => Some(event),
        _ => None,
    }
}

#[smol_potat::test]
async fn test_start_emits_ordered_status_events() {
    let orchestrator = Orchestrator::new(test_config());
    let events = orchestrator.events();

    orchestrator.start().await.unwrap();
    let observed: Vec<_> = drain(&events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::StatusChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        observed,
        vec![
            (OrchestratorStatus::Stopped, OrchestratorStatus::Starting),
            (OrchestratorStatus::Starting, OrchestratorStatus::Running),
        ]
    );

    orchestrator.stop().await.unwrap();
    let observed: Vec<_> = drain(&events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::StatusChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        observed,
        vec![
            (OrchestratorStatus::Running, OrchestratorStatus::Stopping),
            (OrchestratorStatus::Stopping, OrchestratorStatus::Stopped),
        ]
    );
}

#[smol_potat::test]
async fn test_startup_rollback_on_occupied_session_port() {
    // Occupy a port so the session gateway cannot bind it
    let blocker = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let taken_port = blocker.local_addr().unwrap().port();

    let mut config = test_config();
    config.session.port = taken_port;
    let orchestrator = Orchestrator::new(config);

    let result = orchestrator.start().await;
    assert!(matches!(result, Err(Error::StartupFailed(_))));
    assert_eq!(orchestrator.status().await, OrchestratorStatus::Error);

    // Error is sticky until the next explicit start
    assert!(orchestrator.pause().await.is_err());

    // Releasing the port lets a fresh start succeed
    drop(blocker);
    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.status().await, OrchestratorStatus::Running);
    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_statistics_reflect_running_state() {
    let orchestrator = Orchestrator::new(test_config());

    let stats = orchestrator.statistics().await;
    assert_eq!(stats.status, OrchestratorStatus::Stopped);
    assert!(stats.started_at.is_none());
    assert!(stats.uptime_ms.is_none());

    orchestrator.start().await.unwrap();
    let stats = orchestrator.statistics().await;
    assert_eq!(stats.status, OrchestratorStatus::Running);
    assert!(stats.started_at.is_some());
    assert!(stats.uptime_ms.is_some());
    assert_eq!(stats.session_count, 0);
    assert_eq!(stats.recovery_attempts, 0);

    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_notifier_reaches_connected_sessions() {
    let orchestrator = Orchestrator::new(test_config());
    orchestrator.start().await.unwrap();
    let addr = orchestrator.session_local_addr().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut client, _response) = client_async(format!("ws://{addr}"), stream).await.unwrap();

    // Skip the connect handshake, then expect the data-update
    let mut saw_update = false;
    orchestrator
        .notify_data_change("notes-changed", serde_json::json!({ "count": 2 }))
        .await
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        let next = client.next();
        let expired = Timer::at(deadline);
        pin_mut!(next);
        pin_mut!(expired);
        match select(next, expired).await {
            Either::Left((Some(Ok(Message::Text(text))), _)) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == "data-update" {
                    assert_eq!(value["data"]["event"], "notes-changed");
                    assert_eq!(value["data"]["payload"]["count"], 2);
                    saw_update = true;
                    break;
                }
            }
            Either::Left((Some(Ok(_)), _)) => continue,
            _ => break,
        }
    }
    assert!(saw_update);

    orchestrator.stop().await.unwrap();
}

/// HTTP facade that can be made to fail on demand
#[derive(Default)]
struct FlakyHttpFacade {
    running: AtomicBool,
    fail_start: AtomicBool,
}

#[async_trait]
impl HttpFacade for FlakyHttpFacade {
    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Http("refusing to start".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn add_route_handler(&self, _handler: Arc<dyn RouteHandler>) -> Result<()> {
        Ok(())
    }
}

#[smol_potat::test]
async fn test_recovery_attempts_are_bounded() {
    let facade = Arc::new(FlakyHttpFacade::default());

    struct SharedFacade(Arc<FlakyHttpFacade>);
    #[async_trait]
    impl HttpFacade for SharedFacade {
        async fn start(&self) -> Result<()> {
            self.0.start().await
        }
        async fn stop(&self) -> Result<()> {
            self.0.stop().await
        }
        async fn is_running(&self) -> bool {
            self.0.is_running().await
        }
        async fn add_route_handler(&self, handler: Arc<dyn RouteHandler>) -> Result<()> {
            self.0.add_route_handler(handler).await
        }
    }

    let mut config = test_config();
    config.health_check_interval_ms = 100;
    config.recovery_backoff_ms = 10;
    config.max_recovery_attempts = 2;
    let orchestrator =
        Orchestrator::with_http_facade(config, Box::new(SharedFacade(facade.clone())));
    let events = orchestrator.events();

    orchestrator.start().await.unwrap();

    // Break the facade: it reports down and refuses to restart
    facade.fail_start.store(true, Ordering::SeqCst);
    facade.running.store(false, Ordering::SeqCst);

    let mut attempts = Vec::new();
    let mut exhausted = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline && !exhausted {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match recv_event_with_timeout(&events, remaining).await {
            Some(OrchestratorEvent::RecoveryAttempt { service, attempt })
                if service == HTTP_SERVICE =>
            {
                attempts.push(attempt);
            }
            Some(OrchestratorEvent::RecoveryExhausted { service })
                if service == HTTP_SERVICE =>
            {
                exhausted = true;
            }
            Some(_) => {}
            None => break,
        }
    }

    assert_eq!(attempts, vec![1, 2]);
    assert!(exhausted);

    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_paused_orchestrator_refuses_new_sessions() {
    let orchestrator = Orchestrator::new(test_config());
    orchestrator.start().await.unwrap();
    let addr = orchestrator.session_local_addr().await.unwrap();

    orchestrator.pause().await.unwrap();
    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(client_async(format!("ws://{addr}"), stream).await.is_err());

    orchestrator.resume().await.unwrap();
    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(client_async(format!("ws://{addr}"), stream).await.is_ok());

    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_broadcast_system_message_via_notifier() {
    let orchestrator = Orchestrator::new(test_config());
    orchestrator.start().await.unwrap();
    let addr = orchestrator.session_local_addr().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut client, _response) = client_async(format!("ws://{addr}"), stream).await.unwrap();

    orchestrator
        .broadcast_system_message("maintenance", "warn")
        .await
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    let mut saw_message = false;
    while std::time::Instant::now() < deadline {
        let next = client.next();
        let expired = Timer::at(deadline);
        pin_mut!(next);
        pin_mut!(expired);
        match select(next, expired).await {
            Either::Left((Some(Ok(Message::Text(text))), _)) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == "system-message" {
                    assert_eq!(value["data"]["message"], "maintenance");
                    assert_eq!(value["data"]["level"], "warn");
                    saw_message = true;
                    break;
                }
            }
            Either::Left((Some(Ok(_)), _)) => continue,
            _ => break,
        }
    }
    assert!(saw_message);

    orchestrator.stop().await.unwrap();
}
