//! An in-memory `VirtualMachineManager` test double.
//!
//! Boots nothing: `connect_vsock` opens a local socketpair instead of a
//! real vsock connection, hands the host end back to the caller, and
//! invokes `on_guest_connect` with the other end so a test harness can run
//! a fake agent loop against it.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tracing::debug;

use crate::error::{Result, VmmError};
use crate::{BootSpec, VirtualMachineManager, VmHandle};

type GuestConnectHook = Arc<dyn Fn(u32, OwnedFd) + Send + Sync>;

pub struct FakeVmm {
    on_guest_connect: GuestConnectHook,
    boots: Mutex<Vec<Arc<FakeVmHandle>>>,
}

impl FakeVmm {
    pub fn new(on_guest_connect: impl Fn(u32, OwnedFd) + Send + Sync + 'static) -> Self {
        Self { on_guest_connect: Arc::new(on_guest_connect), boots: Mutex::new(Vec::new()) }
    }

    /// Every `FakeVmHandle` booted so far, in boot order.
    pub fn handles(&self) -> Vec<Arc<FakeVmHandle>> {
        self.boots.lock().unwrap().clone()
    }
}

#[async_trait]
impl VirtualMachineManager for FakeVmm {
    async fn boot(&self, spec: BootSpec) -> Result<Box<dyn VmHandle>> {
        debug!(hostname = %spec.hostname, cid = spec.vsock_cid, "fake VM booted");
        let handle = Arc::new(FakeVmHandle {
            spec,
            on_guest_connect: Arc::clone(&self.on_guest_connect),
            running: AtomicBool::new(true),
        });
        self.boots.lock().unwrap().push(Arc::clone(&handle));
        Ok(Box::new(FakeVmHandleRef(handle)))
    }
}

pub struct FakeVmHandle {
    pub spec: BootSpec,
    on_guest_connect: GuestConnectHook,
    running: AtomicBool,
}

impl FakeVmHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// `VmHandle` needs `Send + Sync` object-safety through `Box<dyn _>`;
/// this thin wrapper lets multiple trait-object handles share one
/// `FakeVmHandle` (the one tests hold via `FakeVmm::handles`).
struct FakeVmHandleRef(Arc<FakeVmHandle>);

#[async_trait]
impl VmHandle for FakeVmHandleRef {
    async fn connect_vsock(&self, port: u32) -> Result<OwnedFd> {
        if !self.0.is_running() {
            return Err(VmmError::NotRunning);
        }
        let (host, guest) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())?;
        (self.0.on_guest_connect)(port, guest);
        Ok(host)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!(cid = self.0.spec.vsock_cid, "fake VM shut down");
        self.0.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
