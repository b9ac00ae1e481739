//! Tool connections: model, local registry file and lifecycle

mod model;
mod registry;
mod store;

pub use model::{
    ConnectionMethod, ConnectionState, Credential, METADATA_KEYS, RemoteConnection,
    ToolConnection, ToolType, api_tool_name, credential_tool_name,
};
pub use registry::{
    AddConnection, ConnectionPage, ConnectionRegistry, ListQuery, MAX_PAGE_SIZE, SyncReport,
};
pub use store::ConnectionStore;
