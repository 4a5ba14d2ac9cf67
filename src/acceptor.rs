//! Connection Acceptor - serves one command per EA connection
//!
//! The Expert Advisor polls by opening a TCP connection. Each connection gets
//! either the head of the command queue or the idle placeholder, and for a
//! command the reply is read back on the same socket and handed to the
//! correlator. Connections are handled one at a time, in accept order.

use crate::bridge::BridgeError;
use crate::correlator::{Correlator, Delivery};
use crate::framer::WireFramer;
use crate::queue::{CommandQueue, QueuedCommand};
use crate::stats::BridgeStats;
use crate::types::RequestId;

use chrono::Utc;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sent when the EA polls and nothing is queued
pub const IDLE_PLACEHOLDER: &[u8] = br#"{"status":"waiting"}"#;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What happened on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Nothing queued, placeholder sent
    Idle,
    /// Reply handed to the waiting caller
    Delivered(RequestId),
    /// Reply read, but its caller had already given up
    Dropped(RequestId),
    /// Command sent (or attempted) but no usable reply came back
    Failed(RequestId),
}

pub struct ConnectionAcceptor {
    listener: TcpListener,
    queue: Arc<CommandQueue>,
    correlator: Arc<Correlator>,
    stats: Arc<BridgeStats>,
    framer: WireFramer,
    tag_requests: bool,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionAcceptor {
    pub fn new(
        listener: TcpListener,
        queue: Arc<CommandQueue>,
        correlator: Arc<Correlator>,
        stats: Arc<BridgeStats>,
        framer: WireFramer,
        tag_requests: bool,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            queue,
            correlator,
            stats,
            framer,
            tag_requests,
            shutdown_rx,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept loop. Only bridge shutdown ends it.
    pub async fn run(mut self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("TCP Server listening on {} ({:?} framing)", addr, self.framer.mode()),
            Err(e) => warn!("TCP Server listening on unknown address: {}", e),
        }

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                changed = self.shutdown_rx.changed() => {
                    // Sender gone means the bridge itself was dropped
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    let exchange = self.handle_connection(stream, peer).await;
                    debug!("Connection from {} finished: {:?}", peer, exchange);
                }
                Err(e) => {
                    error!("TCP accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!("Connection acceptor stopped");
    }

    /// One full exchange; errors are logged here and never escape
    pub async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Exchange {
        debug!("EA connected from {}", peer);
        self.stats.record_poll();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        let exchange = match self.queue.try_dequeue() {
            Some(queued) => self.dispatch(&mut stream, peer, queued).await,
            None => self.send_idle(&mut stream, peer).await,
        };

        if let Err(e) = stream.shutdown().await {
            debug!("Closing connection to {} failed: {}", peer, e);
        }
        exchange
    }

    async fn send_idle(&self, stream: &mut TcpStream, peer: SocketAddr) -> Exchange {
        self.stats.record_idle_poll();
        match self.framer.write_document(stream, IDLE_PLACEHOLDER).await {
            Ok(()) => debug!("No command queued, sent waiting to {}", peer),
            Err(e) => debug!("Idle reply to {} failed: {}", peer, e),
        }
        Exchange::Idle
    }

    async fn dispatch(&self, stream: &mut TcpStream, peer: SocketAddr, queued: QueuedCommand) -> Exchange {
        let QueuedCommand {
            id,
            command,
            enqueued_at,
        } = queued;
        let action = command.action;

        let wire = match command.to_wire(self.tag_requests.then_some(id)) {
            Ok(wire) => wire,
            Err(e) => {
                error!("Failed to encode {} for {}: {}", action, id, e);
                self.correlator.deliver(
                    id,
                    Err(BridgeError::Protocol(format!("failed to encode command: {}", e))),
                );
                return Exchange::Failed(id);
            }
        };

        if let Err(e) = self.framer.write_document(stream, &wire).await {
            self.stats.record_send_failure();
            warn!("Sending {} ({}) to {} failed: {}", action, id, peer, e);
            return Exchange::Failed(id);
        }

        self.stats.record_dispatched();
        let queued_ms = (Utc::now() - enqueued_at).num_milliseconds();
        info!("Sent {} ({}) to EA at {} after {}ms in queue", action, id, peer, queued_ms);
        debug!("Command payload: {}", String::from_utf8_lossy(&wire));

        match self.framer.read_document(stream).await {
            Ok(reply) => {
                info!("Received {} reply for {} from {}", action, id, peer);
                let delivery = self.check_reply(id, reply);
                if self.correlator.deliver(id, delivery) {
                    self.stats.record_delivered();
                    Exchange::Delivered(id)
                } else {
                    self.stats.record_late_reply();
                    Exchange::Dropped(id)
                }
            }
            Err(e) => {
                self.stats.record_framing_failure();
                warn!("No usable reply for {} ({}) from {}: {}", action, id, peer, e);
                Exchange::Failed(id)
            }
        }
    }

    /// Any parsed JSON value is passed through. With tagging on, an object
    /// reply that echoes another request's id is rejected.
    fn check_reply(&self, id: RequestId, reply: Value) -> Delivery {
        if self.tag_requests {
            if let Some(echoed) = reply.get("request_id") {
                let expected = id.to_string();
                if echoed.as_str() != Some(expected.as_str()) {
                    return Err(BridgeError::Protocol(format!(
                        "reply tagged {} does not match request {}",
                        echoed, expected
                    )));
                }
            }
        }

        Ok(reply)
    }
}
