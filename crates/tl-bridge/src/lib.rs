//! Real-time bridge between the task event source and a task view.
//!
//! Inbound events arrive over a [`transport`] as [`protocol`] frames. Each
//! `update` payload is parsed by the [`classifier`] into a typed message and
//! folded into the view by the [`accumulator`] (streaming chunks) or the
//! [`finalizer`] (stream completion); `status` payloads go through the
//! [`status`] reconciler. [`reconcile::TaskView`] owns the resulting state and
//! [`session::TaskSession`] drives it from a live connection, with the
//! [`subscription`] controller deciding when to connect, retry, or give up.
//!
//! Key modules:
//! - [`classifier`]: payload validation at the trust boundary
//! - [`accumulator`] / [`finalizer`]: streaming message folding
//! - [`status`]: task lifecycle transitions
//! - [`subscription`]: connection state machine and error classification
//! - [`event_bus`]: pub/sub fan-out of inbound events by channel

pub mod accumulator;
pub mod actions;
pub mod classifier;
pub mod event_bus;
pub mod finalizer;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod subscription;
pub mod transport;
