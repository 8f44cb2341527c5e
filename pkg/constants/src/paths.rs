//! Filesystem path constants.

// ─── Container runtime ────────────────────────────────────────────────────

/// Default container runtime data directory (rootfs, logs, state).
pub const DEFAULT_RUNTIME_DATA_DIR: &str = "/tmp/hypercell/containers";

/// Directory where agent-channel UNIX sockets are created when a container
/// is not addressed via an already-connected vsock fd.
pub const AGENT_SOCKET_DIR: &str = "/tmp/hypercell/agent";

// ─── Kernel / VM ──────────────────────────────────────────────────────────

/// Directory that holds guest kernel and initial-filesystem images.
pub const KERNEL_DIR: &str = "/var/lib/hypercell";

/// Filename of the guest kernel image inside `KERNEL_DIR`.
pub const KERNEL_FILENAME: &str = "vmlinux";

/// Filename of the guest initial filesystem image inside `KERNEL_DIR`.
pub const INITIAL_FILESYSTEM_FILENAME: &str = "initfs.img";

/// Directory where per-VM boot logs are written.
pub const BOOTLOG_DIR: &str = "/tmp/hypercell/bootlogs";
