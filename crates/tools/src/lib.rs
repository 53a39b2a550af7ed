//! Tool provisioning for Parlor.
//!
//! Two families of tools reach an agent: remote tools served by MCP
//! providers the user configured, and one retrieval tool per known
//! document source. `ToolProvisioner` assembles both.

pub mod mcp;
pub mod provisioner;
pub mod remote;
pub mod retrieval;
pub mod sources;
pub mod vector_index;

pub use mcp::{McpClient, McpToolSource};
pub use provisioner::{CredentialPolicy, ToolProvisioner};
pub use remote::{NamedServer, RemoteToolSource};
pub use retrieval::RetrievalTool;
pub use sources::JsonSourceRegistry;
pub use vector_index::InMemoryVectorIndex;
