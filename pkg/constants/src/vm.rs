//! Guest VM constants.

/// Default hostname assigned to a container's guest when none is requested.
pub const DEFAULT_HOSTNAME: &str = "hypercell";

/// Default number of vCPUs for a container's microVM.
pub const DEFAULT_CPU_COUNT: u32 = 1;

/// Default guest memory size in MiB.
pub const DEFAULT_MEMORY_MB: u64 = 256;
