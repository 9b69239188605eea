use serde::Serialize;
use tl_core::config::Config;
use tl_core::types::Task;
use tl_telemetry::tracing_setup::{event_span, lifecycle_span};
use tokio::sync::watch;
use tracing::Instrument;

use crate::event_bus::EventBus;
use crate::protocol::{BridgeMessage, InboundEvent};
use crate::reconcile::{TaskSnapshot, TaskView};
use crate::subscription::{
    ClassifiedError, CloseAction, ErrorClass, SubscriptionController, SubscriptionState,
    TokenSource,
};
use crate::transport::{ProxyTransport, TransportError, TransportState};

/// What observers of a session see: the reconciled task plus the
/// subscription state, so the UI can react to "disabled" or "error" without
/// ever seeing a raw transport error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub view: TaskSnapshot,
    pub subscription: SubscriptionState,
    pub last_error: Option<ClassifiedError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// No token, auth failure, or the transport could not be recovered.
    Disabled,
    /// Shut down through the handle (or the handle was dropped).
    Shutdown,
}

/// Observer and shutdown side of a [`TaskSession`].
///
/// Dropping the handle shuts the session down, like unmounting the view.
pub struct SessionHandle {
    snapshots: watch::Receiver<SessionSnapshot>,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

enum Step {
    Frame(Result<BridgeMessage, TransportError>),
    Shutdown,
}

enum Pumped {
    Closed,
    Disabled,
    Shutdown,
}

enum Retry {
    Go,
    Stop,
    Shutdown,
}

/// Drives a [`TaskView`] from a live transport.
///
/// Every inbound event is published on the session's [`EventBus`]; the view
/// listens through a subscription on the task's own channel, so events for
/// other tasks never reach it. After every change a [`SessionSnapshot`] is
/// published on a `watch` channel.
pub struct TaskSession<S> {
    channel: String,
    bus: EventBus,
    events: flume::Receiver<InboundEvent>,
    view: TaskView,
    controller: SubscriptionController<S>,
    snapshots: watch::Sender<SessionSnapshot>,
    shutdown: watch::Receiver<bool>,
}

impl<S: TokenSource> TaskSession<S> {
    pub fn new(task: Task, source: S, config: &Config) -> (Self, SessionHandle) {
        Self::with_bus(task, source, config, EventBus::new())
    }

    /// Like [`new`](Self::new), but inbound events go through a shared bus so
    /// other subscribers see the same traffic.
    pub fn with_bus(
        task: Task,
        source: S,
        config: &Config,
        bus: EventBus,
    ) -> (Self, SessionHandle) {
        let channel = config.subscription.channel_for(&task.id);
        let events = bus.subscribe_channel(channel.clone());
        let controller = SubscriptionController::new(task.id.clone(), source, &config.subscription);
        let view = TaskView::from_config(task, &config.reconcile);

        let first = SessionSnapshot {
            view: view.snapshot(),
            subscription: controller.state(),
            last_error: None,
        };
        let (snap_tx, snap_rx) = watch::channel(first);
        let (stop_tx, stop_rx) = watch::channel(false);

        let session = Self {
            channel,
            bus,
            events,
            view,
            controller,
            snapshots: snap_tx,
            shutdown: stop_rx,
        };
        let handle = SessionHandle {
            snapshots: snap_rx,
            shutdown: stop_tx,
        };
        (session, handle)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn view(&self) -> &TaskView {
        &self.view
    }

    pub fn controller(&self) -> &SubscriptionController<S> {
        &self.controller
    }

    /// Run until the subscription is disabled or the session is shut down.
    /// Never fails: degraded conditions end up in the published state.
    pub async fn run<T: ProxyTransport + ?Sized>(&mut self, transport: &mut T) -> SessionExit {
        let span = lifecycle_span(self.view.task_id(), "run");
        self.drive(transport).instrument(span).await
    }

    async fn drive<T: ProxyTransport + ?Sized>(&mut self, transport: &mut T) -> SessionExit {
        if self.controller.start().await == SubscriptionState::Disabled {
            self.publish();
            return SessionExit::Disabled;
        }
        self.publish();

        let mut connect_now = transport.state() != TransportState::Connected;
        loop {
            if *self.shutdown.borrow() {
                return self.stop(transport).await;
            }
            if connect_now {
                match transport.connect().await {
                    Ok(()) | Err(TransportError::AlreadyConnected) => {}
                    Err(e) => {
                        self.controller.on_error(&e.to_string());
                        match self.wait_for_retry().await {
                            Retry::Go => continue,
                            Retry::Stop => return SessionExit::Disabled,
                            Retry::Shutdown => return self.stop(transport).await,
                        }
                    }
                }
            }

            self.controller.on_open();
            self.publish();

            match self.pump(transport).await {
                Pumped::Shutdown => return self.stop(transport).await,
                Pumped::Disabled => {
                    if let Err(e) = transport.disconnect().await {
                        tracing::warn!(error = %e, "disconnect after auth failure failed");
                    }
                    return SessionExit::Disabled;
                }
                Pumped::Closed => match self.wait_for_retry().await {
                    Retry::Go => connect_now = true,
                    Retry::Stop => return SessionExit::Disabled,
                    Retry::Shutdown => return self.stop(transport).await,
                },
            }
        }
    }

    async fn pump<T: ProxyTransport + ?Sized>(&mut self, transport: &mut T) -> Pumped {
        loop {
            let step = tokio::select! {
                frame = transport.recv() => Step::Frame(frame),
                _ = shutdown_requested(&mut self.shutdown) => Step::Shutdown,
            };
            let frame = match step {
                Step::Shutdown => return Pumped::Shutdown,
                Step::Frame(frame) => frame,
            };
            if matches!(frame, Ok(BridgeMessage::Event(_))) && self.controller.on_frame() {
                self.publish();
            }
            match frame {
                Ok(BridgeMessage::Event(event)) => {
                    self.bus.publish(event);
                    self.drain_events();
                }
                Ok(BridgeMessage::Error { code, message }) => {
                    if self.fail(&format!("{code}: {message}")) {
                        return Pumped::Disabled;
                    }
                }
                Ok(other) => tracing::debug!(kind = other.kind(), "ignoring client frame"),
                Err(TransportError::ConnectionClosed) => return Pumped::Closed,
                Err(e) => {
                    if self.fail(&e.to_string()) {
                        return Pumped::Disabled;
                    }
                    if transport.state() != TransportState::Connected {
                        return Pumped::Closed;
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let (span, _trace_id) = event_span(&event.channel, event.topic.as_str());
            let _guard = span.enter();
            if self.view.apply(&event).changed() {
                self.publish();
            }
        }
    }

    /// Record an error; `true` when it disabled the subscription.
    fn fail(&mut self, message: &str) -> bool {
        let class = self.controller.on_error(message);
        self.publish();
        class == ErrorClass::Auth
    }

    async fn wait_for_retry(&mut self) -> Retry {
        let action = self.controller.on_close();
        self.publish();
        let (delay, recheck) = match action {
            CloseAction::Stop => return Retry::Stop,
            CloseAction::Reconnect { delay, .. } => (delay, false),
            CloseAction::Recheck { delay, .. } => (delay, true),
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut self.shutdown) => return Retry::Shutdown,
        }
        if recheck && self.controller.refresh_token().await.is_none() {
            self.publish();
            return Retry::Stop;
        }
        Retry::Go
    }

    async fn stop<T: ProxyTransport + ?Sized>(&mut self, transport: &mut T) -> SessionExit {
        self.controller.teardown(transport).await;
        let dropped = self.view.discard_in_flight();
        if dropped > 0 {
            tracing::debug!(dropped, "open streams discarded on shutdown");
        }
        self.publish();
        SessionExit::Shutdown
    }

    fn publish(&self) {
        self.snapshots.send_replace(SessionSnapshot {
            view: self.view.snapshot(),
            subscription: self.controller.state(),
            last_error: self.controller.last_error().cloned(),
        });
    }
}

/// Resolves once shutdown was requested or the handle was dropped.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
