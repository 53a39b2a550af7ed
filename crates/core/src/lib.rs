//! # Parlor Core
//!
//! Domain types, traits, and error definitions for the Parlor chat backend.
//! This crate has no framework dependencies: it defines the model that the
//! provider, tool, agent and gateway crates implement against.
//!
//! Every external collaborator (model provider, tool, retriever, source
//! registry, user store) is a trait here so implementations can be swapped
//! and tests can use stubs.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod tool;
pub mod user;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{ChatSession, Message, MessageToolCall, Role, SessionId};
pub use provider::{ModelHandle, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use retrieval::{KnownSource, RetrievedChunk, Retriever, SourceRegistry};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use user::{
    InMemoryUserStore, McpServerConfig, McpTransport, ToolConfiguration, UserId, UserRecord,
    UserStore,
};
