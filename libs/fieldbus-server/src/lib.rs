//! Modbus server core.
//!
//! A handler registry keyed by function code, the per-exchange dispatcher
//! with its send-or-drop semantics, the per-connection transport session,
//! and the listener that owns the session pool. The codec lives in
//! `fieldbus-proto`; register access is supplied by the application
//! through [`HandlerRegistry`].

pub mod blocking;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;
pub mod stats;

pub use blocking::BlockingServer;
pub use config::{AddrClass, Framing, ServerConfig};
pub use dispatcher::{Outcome, ProtocolDispatcher};
pub use error::ServerError;
pub use listener::{ConnectionListener, SessionHandle};
pub use registry::{Handler, HandlerRegistry, HandlerResult};
pub use session::TransportSession;
pub use stats::{Counters, ServerStats, StatScope};
