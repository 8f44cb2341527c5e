//! Container lifecycle data model (spec §3).

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Started,
    Exited,
    Deleted,
}

/// A mount request, tagged by how the guest agent should satisfy it.
/// Options are ordered; duplicates are allowed and passed through
/// verbatim — the agent, not this crate, interprets them.
#[derive(Debug, Clone)]
pub enum Mount {
    Block { format: String, source: PathBuf, destination: PathBuf, options: Vec<String> },
    Share { source: PathBuf, destination: PathBuf, options: Vec<String> },
    Virtiofs { tag: String, destination: PathBuf },
}

/// A process specification, shared between the container's init process
/// and every `exec`'d process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub cwd: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Allocate a single merged stdio port and ask the agent for a pty.
    pub terminal: bool,
    /// With `terminal` false, fold stderr onto the stdout port instead of
    /// reserving a third one.
    pub merge_stderr: bool,
}

/// Host-side interface programming for a container's network namespace,
/// applied via the agent's `up`/`addressAdd`/`routeAddDefault`/`configureDNS`
/// calls (create, §4.4).
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub iface: String,
    pub cidr: String,
    pub gateway: String,
    pub nameservers: Vec<String>,
    pub domain: Option<String>,
    pub search: Vec<String>,
    pub dns_options: Vec<String>,
    pub resolv_conf_path: String,
}

/// Everything needed to create a container's init process (spec §3):
/// rootfs, identity, hostname, mounts, stdio sinks, and whether this
/// container nests virtualization.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub id: String,
    pub rootfs: PathBuf,
    pub initial_filesystem: PathBuf,
    pub init: ProcessSpec,
    pub uid: u32,
    pub gid: u32,
    pub supplementary_gids: Vec<u32>,
    pub hostname: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub mounts: Vec<Mount>,
    pub network: Option<NetworkConfig>,
    pub sysctls: HashMap<String, String>,
    pub nested_virtualization: bool,
}

/// vsock ports reserved for one process's stdio. A tty-enabled process
/// merges stdout+stderr onto a single port and omits the separate stderr
/// port; a non-tty process with no stdin omits that port too.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioPorts {
    pub stdin: Option<u32>,
    pub stdout: Option<u32>,
    pub stderr: Option<u32>,
}

/// An in-flight or finished process (init or exec'd), identified by
/// `(containerID, processID)` (spec §3).
#[derive(Debug, Clone)]
pub struct Process {
    pub container_id: String,
    pub process_id: String,
    pub spec: ProcessSpec,
    pub stdio: StdioPorts,
    pub state: ProcessState,
    pub guest_pid: Option<i32>,
    pub exit_code: Option<i32>,
}

/// A handle to an exec'd (non-init) process, returned to the caller so it
/// can `wait`/`signal`/`resize`/`delete` it independently of the
/// container's own lifecycle.
pub struct ProcessHandle {
    pub container_id: String,
    pub process_id: String,
}
