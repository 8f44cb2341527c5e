//! Networking constants.

/// Default CIDR block guest addresses are allocated from.
pub const DEFAULT_GUEST_CIDR: &str = "192.168.64.0/24";

/// First vsock port handed out for container stdio relays.
pub const STDIO_PORT_RANGE_START: u32 = 10000;

/// Number of vsock ports reserved for stdio relays.
pub const STDIO_PORT_RANGE_SIZE: u32 = 8192;
