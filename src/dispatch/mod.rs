//! Tool invocation
//!
//! A closed catalog maps each tool to its declared methods; the dispatcher
//! resolves a connection, checks the catalog and hands the call to a
//! [`Connector`].

pub mod catalog;
mod connector;
mod dispatcher;

pub use catalog::{Availability, MethodSpec};
pub use connector::{Connector, GatewayConnector};
pub use dispatcher::{InvocationDispatcher, InvocationOutcome, InvocationRequest, OutputFormat};
