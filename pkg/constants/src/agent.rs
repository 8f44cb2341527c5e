//! Guest-agent RPC transport constants.

/// Default vsock port the in-guest supervisor listens on.
pub const DEFAULT_AGENT_VSOCK_PORT: u32 = 1024;

/// Maximum inbound message size accepted from the agent (64 MiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Number of connection attempts before giving up on the initial handshake.
pub const CONNECT_RETRIES: u32 = 5;

/// Delay between connection retry attempts.
pub const CONNECT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(200);
