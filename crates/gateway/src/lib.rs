//! Tool dispatch and the transport-facing request loop.
//!
//! The dispatcher is the contract: it publishes descriptors, validates
//! arguments, routes calls, and shapes every failure into a structured
//! error payload. The stdio server in [`server`] is a deliberately thin
//! line-JSON framing around it; real MCP framing belongs to the host.

pub mod dispatcher;
pub mod server;

pub use dispatcher::Dispatcher;
pub use server::serve;
