//! A guest-agent RPC client: length-prefixed JSON frames over a Unix
//! socket or an already-connected vsock fd.

mod client;
mod error;
mod protocol;
mod transport;
pub mod types;

pub use client::AgentClient;
pub use error::AgentError;
