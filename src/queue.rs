//! Command Queue - FIFO of commands waiting for the next client connection

use crate::types::{Command, RequestId};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A command with the id of the caller waiting on it
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub id: RequestId,
    pub command: Command,
    pub enqueued_at: DateTime<Utc>,
}

/// Multi-producer, single-consumer command FIFO
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<QueuedCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to the tail
    pub fn enqueue(&self, id: RequestId, command: Command) {
        self.commands.lock().push_back(QueuedCommand {
            id,
            command,
            enqueued_at: Utc::now(),
        });
    }

    /// Take the head without blocking
    pub fn try_dequeue(&self) -> Option<QueuedCommand> {
        self.commands.lock().pop_front()
    }

    /// Withdraw a command that has not been dispatched yet.
    /// Returns false when it already left the queue.
    pub fn remove(&self, id: RequestId) -> bool {
        let mut commands = self.commands.lock();
        match commands.iter().position(|c| c.id == id) {
            Some(index) => commands.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}
