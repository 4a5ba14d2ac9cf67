//! MT5 TCP Bridge
//!
//! Queues trading commands from API callers, hands each one to the next
//! Expert Advisor connection, and routes the EA's JSON reply back to the
//! caller that issued it.

pub mod acceptor;
pub mod api;
pub mod bridge;
pub mod config;
pub mod correlator;
pub mod framer;
pub mod queue;
pub mod stats;
pub mod types;

pub use acceptor::{ConnectionAcceptor, Exchange, IDLE_PLACEHOLDER};
pub use bridge::{Bridge, BridgeError};
pub use config::{BridgeConfig, ConfigError};
pub use framer::{FrameError, FrameMode, WireFramer};
pub use types::{Action, Command, OrderRequest, RequestId};
