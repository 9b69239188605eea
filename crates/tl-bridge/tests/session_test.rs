use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tl_bridge::event_bus::EventBus;
use tl_bridge::protocol::{BridgeMessage, InboundEvent, StatusPayload};
use tl_bridge::session::{SessionExit, TaskSession};
use tl_bridge::subscription::{
    AccessToken, ErrorClass, StaticTokenSource, SubscriptionState, TokenSource,
};
use tl_bridge::transport::{
    self, InProcessTransport, ProxyTransport, TransportError, TransportKind, TransportState,
};
use tl_core::config::Config;
use tl_core::types::{Task, TaskStatus};

fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.subscription.reconnect_delay_ms = 1;
    cfg.subscription.max_reconnect_delay_ms = 4;
    cfg
}

fn token() -> StaticTokenSource {
    StaticTokenSource(Some(AccessToken::new("tok", None)))
}

fn chunk(text: &str, index: u64) -> BridgeMessage {
    BridgeMessage::Event(InboundEvent::update(
        "task-t1",
        "t1",
        json!({
            "role": "assistant", "type": "text",
            "data": { "streamId": "s1", "text": text, "isStreaming": true, "chunkIndex": index }
        }),
    ))
}

fn complete() -> BridgeMessage {
    BridgeMessage::Event(InboundEvent::update(
        "task-t1",
        "t1",
        json!({ "role": "assistant", "type": "text", "data": { "streamId": "s1" } }),
    ))
}

fn status(channel: &str, task_id: &str, status: &str) -> BridgeMessage {
    BridgeMessage::Event(InboundEvent::status(
        channel,
        &StatusPayload {
            task_id: task_id.into(),
            status: status.into(),
        },
    ))
}

// ---------------------------------------------------------------------------
// Scripted transport: each connection replays a list of frames, then closes
// (or, with `hold_open`, stays up and idle).
// ---------------------------------------------------------------------------

type Script = Vec<Result<BridgeMessage, TransportError>>;

struct Inner {
    state: TransportState,
    current: VecDeque<Result<BridgeMessage, TransportError>>,
    pending: VecDeque<Script>,
    hold_open: bool,
}

struct ScriptedTransport {
    inner: Mutex<Inner>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TransportState::Disconnected,
                current: VecDeque::new(),
                pending: scripts.into(),
                hold_open: false,
            }),
            connects: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Errors no longer drop the connection, and an exhausted script waits
    /// instead of closing.
    fn hold_open(self) -> Self {
        self.inner.lock().unwrap().hold_open = true;
        self
    }
}

#[async_trait]
impl ProxyTransport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn state(&self) -> TransportState {
        self.inner.lock().unwrap().state
    }

    async fn send(&self, _msg: BridgeMessage) -> transport::Result<()> {
        Ok(())
    }

    async fn recv(&self) -> transport::Result<BridgeMessage> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.current.pop_front() {
                Some(Ok(msg)) => return Ok(msg),
                Some(Err(e)) => {
                    if !inner.hold_open {
                        inner.state = TransportState::Failed;
                    }
                    return Err(e);
                }
                None if !inner.hold_open => {
                    inner.state = TransportState::Disconnected;
                    return Err(TransportError::ConnectionClosed);
                }
                None => {}
            }
        }
        std::future::pending().await
    }

    async fn connect(&mut self) -> transport::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        match inner.pending.pop_front() {
            Some(script) => {
                inner.current = script.into();
                inner.state = TransportState::Connected;
                Ok(())
            }
            None => Err(TransportError::Rejected("401 unauthorized".into())),
        }
    }

    async fn disconnect(&mut self) -> transport::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().state = TransportState::Disconnected;
        Ok(())
    }
}

struct CountingSource {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TokenSource for CountingSource {
    async fn fetch_token(&self) -> Option<AccessToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(AccessToken::new("tok", None))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_flow_into_snapshots_until_shutdown() {
    let (mut client, server) = InProcessTransport::pair();
    let (mut session, handle) = TaskSession::new(Task::with_id("t1", "Demo"), token(), &fast_config());
    assert_eq!(session.channel(), "task-t1");

    let runner = tokio::spawn(async move { session.run(&mut client).await });

    server.send(chunk("Hel", 0)).await.unwrap();
    server.send(chunk("lo", 1)).await.unwrap();
    server.send(status("task-t2", "t1", "CANCELLED")).await.unwrap();
    server.send(complete()).await.unwrap();
    server.send(status("task-t1", "t1", "PAUSED")).await.unwrap();

    let mut rx = handle.snapshots();
    let snap = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.view.task.status == TaskStatus::Paused),
    )
    .await
    .expect("snapshot in time")
    .expect("session alive")
    .clone();

    assert_eq!(snap.subscription, SubscriptionState::Enabled);
    assert_eq!(snap.view.task.messages.len(), 1);
    assert_eq!(snap.view.task.messages[0].text(), "Hello");
    assert!(snap.view.in_flight.is_empty());

    handle.shutdown();
    let exit = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("stops in time")
        .unwrap();
    assert_eq!(exit, SessionExit::Shutdown);
    assert_eq!(handle.latest().subscription, SubscriptionState::Disabled);
}

#[tokio::test]
async fn missing_token_disables_without_connecting() {
    let mut transport = ScriptedTransport::new(vec![vec![Ok(chunk("x", 0))]]);
    let connects = Arc::clone(&transport.connects);
    let (mut session, handle) = TaskSession::new(
        Task::with_id("t1", "Demo"),
        StaticTokenSource(None),
        &fast_config(),
    );

    let exit = session.run(&mut transport).await;
    assert_eq!(exit, SessionExit::Disabled);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(handle.latest().subscription, SubscriptionState::Disabled);
    assert!(!session.controller().is_enabled());
}

#[tokio::test]
async fn auth_error_frame_disables_and_disconnects() {
    let mut transport = ScriptedTransport::new(vec![vec![
        Ok(chunk("x", 0)),
        Ok(BridgeMessage::Error {
            code: "401".into(),
            message: "unauthorized".into(),
        }),
        Ok(chunk("y", 1)),
    ]]);
    let disconnects = Arc::clone(&transport.disconnects);
    let (mut session, handle) =
        TaskSession::new(Task::with_id("t1", "Demo"), token(), &fast_config());

    assert_eq!(session.run(&mut transport).await, SessionExit::Disabled);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    let snap = handle.latest();
    assert_eq!(snap.subscription, SubscriptionState::Disabled);
    assert_eq!(snap.last_error.unwrap().class, ErrorClass::Auth);
    assert_eq!(snap.view.in_flight["s1"].text(), "x");
}

#[tokio::test]
async fn clean_close_reconnects_and_keeps_stream_state() {
    let mut transport = ScriptedTransport::new(vec![
        vec![Ok(chunk("Hel", 0))],
        vec![Ok(chunk("lo", 1)), Ok(complete())],
    ]);
    let connects = Arc::clone(&transport.connects);
    let (mut session, handle) =
        TaskSession::new(Task::with_id("t1", "Demo"), token(), &fast_config());

    let exit = tokio::time::timeout(Duration::from_secs(5), session.run(&mut transport))
        .await
        .expect("finishes in time");

    // Third connect is rejected with 401, which disables the subscription.
    assert_eq!(exit, SessionExit::Disabled);
    assert_eq!(connects.load(Ordering::SeqCst), 3);

    let snap = handle.latest();
    assert_eq!(snap.view.task.messages.len(), 1);
    assert_eq!(snap.view.task.messages[0].text(), "Hello");
    assert_eq!(snap.last_error.unwrap().class, ErrorClass::Auth);
}

#[tokio::test]
async fn transient_error_rechecks_token_before_reconnecting() {
    let mut transport = ScriptedTransport::new(vec![
        vec![Err(TransportError::ReceiveFailed("socket reset".into()))],
        vec![Ok(status("task-t1", "t1", "DONE"))],
    ]);
    let calls = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        calls: Arc::clone(&calls),
    };
    let (mut session, handle) =
        TaskSession::new(Task::with_id("t1", "Demo"), source, &fast_config());

    let exit = tokio::time::timeout(Duration::from_secs(5), session.run(&mut transport))
        .await
        .expect("finishes in time");
    assert_eq!(exit, SessionExit::Disabled);

    // Initial fetch plus one recheck after the transient failure.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.latest().view.task.status, TaskStatus::Done);
}

#[tokio::test]
async fn dropping_handle_shuts_session_down() {
    let (mut client, _server) = InProcessTransport::pair();
    let (mut session, handle) = TaskSession::new(Task::with_id("t1", "Demo"), token(), &fast_config());
    drop(handle);
    let exit = tokio::time::timeout(Duration::from_secs(5), session.run(&mut client))
        .await
        .expect("stops in time");
    assert_eq!(exit, SessionExit::Shutdown);
    assert_eq!(client.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn delivered_event_clears_transient_error() {
    let mut transport = ScriptedTransport::new(vec![vec![
        Err(TransportError::ReceiveFailed("socket hiccup".into())),
        Ok(chunk("Hel", 0)),
    ]])
    .hold_open();
    let (mut session, handle) = TaskSession::new(Task::with_id("t1", "Demo"), token(), &fast_config());
    let runner = tokio::spawn(async move { session.run(&mut transport).await });

    let mut rx = handle.snapshots();
    let snap = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.view.in_flight.contains_key("s1")),
    )
    .await
    .expect("snapshot in time")
    .expect("session alive")
    .clone();

    assert_eq!(snap.subscription, SubscriptionState::Enabled);
    assert!(snap.last_error.is_none());
    assert_eq!(snap.view.in_flight["s1"].text(), "Hel");

    handle.shutdown();
    let exit = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("stops in time")
        .unwrap();
    assert_eq!(exit, SessionExit::Shutdown);
}

#[tokio::test]
async fn shared_bus_carries_every_channel_but_view_keeps_its_own() {
    let bus = EventBus::new();
    let all = bus.subscribe();
    let mut transport = ScriptedTransport::new(vec![vec![
        Ok(status("task-t2", "t2", "CANCELLED")),
        Ok(status("task-t1", "t1", "PAUSED")),
    ]])
    .hold_open();
    let (mut session, handle) = TaskSession::with_bus(
        Task::with_id("t1", "Demo"),
        token(),
        &fast_config(),
        bus.clone(),
    );
    assert_eq!(session.bus().subscriber_count(), 2);
    let runner = tokio::spawn(async move { session.run(&mut transport).await });

    let mut rx = handle.snapshots();
    let snap = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.view.task.status == TaskStatus::Paused),
    )
    .await
    .expect("snapshot in time")
    .expect("session alive")
    .clone();
    assert_eq!(snap.view.task.status_message.as_deref(), Some("Task paused"));

    let channels: Vec<String> = all.try_iter().map(|e| e.channel).collect();
    assert_eq!(channels, vec!["task-t2", "task-t1"]);

    handle.shutdown();
    let exit = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("stops in time")
        .unwrap();
    assert_eq!(exit, SessionExit::Shutdown);
}
