//! Domain events for agent lifecycle changes.
//!
//! The agent manager publishes an event whenever an executor is built,
//! evicted, or invalidated; executors publish tool and response events.
//! Subscribers (diagnostics, tests) filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::user::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A fresh agent executor was constructed for a user
    AgentBuilt {
        user_id: UserId,
        tool_count: usize,
        config_version: u64,
        timestamp: DateTime<Utc>,
    },

    /// The least-recently-used agent was dropped to respect capacity
    AgentEvicted {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// A cached agent was removed after a configuration change
    AgentInvalidated {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// The agent generated a response
    ResponseGenerated {
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
