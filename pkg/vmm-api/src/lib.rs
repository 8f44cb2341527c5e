//! The capability boundary between the container lifecycle and whatever
//! actually boots guest kernels.
//!
//! The hypervisor backend itself — the Virtualization.framework / KVM /
//! Firecracker integration that owns a real guest's lifetime — is out of
//! scope here (see `DESIGN.md`); this crate only defines the trait the
//! container lifecycle programs against, plus an in-memory test double.

mod error;
mod fake;

pub use error::VmmError;
pub use fake::FakeVmm;

use std::os::fd::OwnedFd;

use async_trait::async_trait;

/// A block device attached to a booted VM: either the read-only initial
/// filesystem or a container's rootfs.
#[derive(Debug, Clone)]
pub struct BlockDevice {
    pub path: std::path::PathBuf,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct BootSpec {
    pub hostname: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub initial_filesystem: BlockDevice,
    pub rootfs: BlockDevice,
    pub vsock_cid: u32,
}

/// The capability to boot guest kernels and hand back vsock connections to
/// the guest agent running inside them.
#[async_trait]
pub trait VirtualMachineManager: Send + Sync {
    async fn boot(&self, spec: BootSpec) -> error::Result<Box<dyn VmHandle>>;
}

/// A running VM. Every connection obtained through `connect_vsock` is
/// independent; closing one does not affect others or the VM itself.
#[async_trait]
pub trait VmHandle: Send + Sync {
    async fn connect_vsock(&self, port: u32) -> error::Result<OwnedFd>;
    async fn shutdown(&self) -> error::Result<()>;
}
