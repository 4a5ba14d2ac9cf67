//! Bridge Facade - submit a command and wait for the Expert Advisor's reply
//!
//! Callers see one async call per command. Behind it the command is queued,
//! handed to the next EA connection by the [`ConnectionAcceptor`], and the
//! reply is routed back through the [`Correlator`].

use crate::acceptor::ConnectionAcceptor;
use crate::config::BridgeConfig;
use crate::correlator::Correlator;
use crate::queue::CommandQueue;
use crate::stats::{BridgeStats, StatsSnapshot};
use crate::types::{Command, OrderRequest, RequestId};

use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced to callers of the bridge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("MT5 timeout - EA did not pick up the command within {0:?}")]
    Timeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Bridge is shutting down")]
    Shutdown,
}

impl BridgeError {
    /// Timeouts are worth resubmitting; the EA may simply not be polling yet
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Timeout(_))
    }
}

/// Withdraws the request from the queue and the correlator when the caller
/// stops waiting, whether it returned or its future was dropped
struct Inflight<'a> {
    queue: &'a CommandQueue,
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        if self.queue.remove(self.id) {
            debug!("Withdrew undispatched request {}", self.id);
        }
        self.correlator.expire(self.id);
    }
}

/// Entry point for everything that wants to talk to the EA
pub struct Bridge {
    queue: Arc<CommandQueue>,
    correlator: Arc<Correlator>,
    stats: Arc<BridgeStats>,
    command_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl Bridge {
    pub fn new(command_timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(CommandQueue::new()),
            correlator: Arc::new(Correlator::new()),
            stats: Arc::new(BridgeStats::new()),
            command_timeout,
            shutdown_tx,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.command_timeout)
    }

    /// Bind the EA listener and build the acceptor that serves this bridge
    pub async fn bind(&self, config: &BridgeConfig) -> io::Result<ConnectionAcceptor> {
        let listener = TcpListener::bind((config.tcp_host.as_str(), config.tcp_port)).await?;
        Ok(ConnectionAcceptor::new(
            listener,
            Arc::clone(&self.queue),
            Arc::clone(&self.correlator),
            Arc::clone(&self.stats),
            config.framer(),
            config.tag_requests,
            self.shutdown_tx.subscribe(),
        ))
    }

    /// Queue `command` and wait up to `timeout` for the EA's reply
    pub async fn submit(&self, command: Command, timeout: Duration) -> Result<Value, BridgeError> {
        if *self.shutdown_tx.borrow() {
            return Err(BridgeError::Shutdown);
        }

        let id = RequestId::new();
        let action = command.action;
        // Refused once shutdown has drained the correlator, even if the flag
        // check above ran first
        let pending = self.correlator.register(id, action, timeout)?;
        let _inflight = Inflight {
            queue: &self.queue,
            correlator: &self.correlator,
            id,
        };

        self.queue.enqueue(id, command);
        self.stats.record_submitted();
        info!(
            "Queued {} as {} (timeout {:?}, queue depth {})",
            action,
            id,
            timeout,
            self.queue.len()
        );

        let result = self.correlator.await_result(pending).await;
        if let Err(BridgeError::Timeout(_)) = &result {
            self.stats.record_timed_out();
            warn!("{} request {} timed out - EA not connecting", action, id);
        }
        result
    }

    /// Submit with the configured default timeout
    pub async fn submit_default(&self, command: Command) -> Result<Value, BridgeError> {
        self.submit(command, self.command_timeout).await
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<Value, BridgeError> {
        self.submit_default(Command::place_order(order)).await
    }

    pub async fn get_positions(&self) -> Result<Value, BridgeError> {
        self.submit_default(Command::get_positions()).await
    }

    pub async fn get_orders(&self) -> Result<Value, BridgeError> {
        self.submit_default(Command::get_orders()).await
    }

    pub async fn delete_order(&self, ticket: u64) -> Result<Value, BridgeError> {
        self.submit_default(Command::delete_order(ticket)).await
    }

    pub async fn close_position(&self, ticket: u64) -> Result<Value, BridgeError> {
        self.submit_default(Command::close_position(ticket)).await
    }

    pub async fn get_stats(&self) -> Result<Value, BridgeError> {
        self.submit_default(Command::get_stats()).await
    }

    /// Ask the EA to consolidate take-profit levels before it goes unattended
    pub async fn safe_shutdown(&self) -> Result<Value, BridgeError> {
        self.submit_default(Command::safe_shutdown()).await
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_len(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queue.len(), self.correlator.pending_count())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop the acceptor and fail everyone still waiting
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let mut withdrawn = 0;
        while self.queue.try_dequeue().is_some() {
            withdrawn += 1;
        }
        let failed = self.correlator.fail_all(BridgeError::Shutdown);
        info!(
            "Bridge shut down: {} queued commands withdrawn, {} callers released",
            withdrawn, failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;
    use serde_json::json;

    #[tokio::test]
    async fn test_timeout_withdraws_command() {
        let bridge = Bridge::new(DEFAULT_COMMAND_TIMEOUT);
        let result = bridge.submit(Command::get_stats(), Duration::from_millis(30)).await;

        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(30))));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(bridge.queued_len(), 0);
        assert_eq!(bridge.pending_len(), 0);
        assert_eq!(bridge.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_cleans_up() {
        let bridge = Arc::new(Bridge::new(DEFAULT_COMMAND_TIMEOUT));
        let caller = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.get_positions().await })
        };
        while bridge.queued_len() == 0 {
            tokio::task::yield_now().await;
        }

        caller.abort();
        let _ = caller.await;
        assert_eq!(bridge.queued_len(), 0);
        assert_eq!(bridge.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_delivery_through_queue() {
        let bridge = Arc::new(Bridge::new(DEFAULT_COMMAND_TIMEOUT));
        let caller = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.delete_order(42).await })
        };
        let queued = loop {
            if let Some(queued) = bridge.queue.try_dequeue() {
                break queued;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(queued.command.action, Action::DeleteOrder);
        bridge.correlator.deliver(queued.id, Ok(json!({"success": true, "ticket": 42})));

        assert_eq!(caller.await.unwrap().unwrap(), json!({"success": true, "ticket": 42}));
    }

    #[tokio::test]
    async fn test_shutdown_releases_callers() {
        let bridge = Arc::new(Bridge::new(DEFAULT_COMMAND_TIMEOUT));
        let caller = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.safe_shutdown().await })
        };
        while bridge.pending_len() == 0 {
            tokio::task::yield_now().await;
        }

        bridge.shutdown();
        assert_eq!(caller.await.unwrap(), Err(BridgeError::Shutdown));
        assert!(bridge.is_shutting_down());
        assert_eq!(
            bridge.submit(Command::get_stats(), Duration::from_secs(1)).await,
            Err(BridgeError::Shutdown)
        );
    }

    #[tokio::test]
    async fn test_submit_racing_shutdown_fails_fast() {
        // Correlator already drained but the flag not yet observed by submit
        let bridge = Bridge::new(DEFAULT_COMMAND_TIMEOUT);
        bridge.correlator.fail_all(BridgeError::Shutdown);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            bridge.submit(Command::get_positions(), Duration::from_secs(30)),
        )
        .await
        .expect("submit waited instead of failing");
        assert_eq!(result, Err(BridgeError::Shutdown));
        assert_eq!(bridge.queued_len(), 0);
        assert_eq!(bridge.stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_panic() {
        let bridge = Arc::new(Bridge::new(DEFAULT_COMMAND_TIMEOUT));
        let caller = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.submit(Command::get_stats(), Duration::MAX).await })
        };
        while bridge.pending_len() == 0 {
            tokio::task::yield_now().await;
        }

        bridge.shutdown();
        assert_eq!(caller.await.unwrap(), Err(BridgeError::Shutdown));
    }
}
