//! Per-user agent executors for Parlor.
//!
//! - [`executor`]: answers a chat turn with the model and the user's tools
//! - [`factory`]: builds an executor from a resolved tool set
//! - [`cache`]: the bounded LRU map behind the manager
//! - [`manager`]: the access facade every request goes through
//!
//! Building an executor means contacting remote tool providers, so
//! executors are cached per user and rebuilt only on eviction, explicit
//! invalidation, or a newer tool configuration.

pub mod cache;
pub mod executor;
pub mod factory;
pub mod manager;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use cache::LruCache;
pub use executor::{AgentExecutor, AgentReply};
pub use factory::{AgentFactory, DefaultAgentFactory};
pub use manager::{AgentManager, CacheStats};
