//! Raw-TCP RESP client core.
//!
//! An [`Engine`] owns a role-based [`ConnectionPool`] for one server and
//! dispatches [`Command`]s in one of five [`ExecMode`]s. On top of it sit
//! the typed command helpers, the [`HashScan`] cursor iterator and the
//! [`ListPoller`] blocking-pop state machine.

pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod poller;
pub mod registry;
pub mod request;
pub mod resp;
pub mod scan;

pub use command::Command;
pub use commands::{PopDirection, ScanOptions};
pub use config::ServerConfig;
pub use connection::{BlockedConnection, ConnectionPool, ConnectionRole};
pub use engine::{Engine, WeakEngine};
pub use error::{RedisErrorKind, RedustError, Result};
pub use poller::{ListPoller, PollEvent, PollPolicy, PollState};
pub use registry::Registry;
pub use request::{ExecMode, Request};
pub use resp::{RespValue, Response};
pub use scan::HashScan;
