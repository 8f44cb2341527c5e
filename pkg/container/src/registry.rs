//! In-memory container registry (spec §3, §4.4 Create).
//!
//! Generalizes the OCI backend's `ContainerStore` (`state.rs`): still a
//! `DashMap`-backed concurrent store, but creation here is a multi-step
//! async sequence (boot a VM, dial the agent, mount, spawn init) rather
//! than one synchronous `track()` call, so uniqueness has to be claimed
//! up front and either committed or released once that sequence finishes.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OnceCell};

use hypercell_agent::AgentClient;
use hypercell_vmm_api::VmHandle;

use crate::error::{ContainerError, Result};
use crate::model::{ContainerSpec, ContainerState, Process};
use crate::stdio::StdioRelay;

/// Everything the lifecycle needs to operate on one container after
/// `create` has finished booting it.
pub struct ContainerEntry {
    pub spec: ContainerSpec,
    pub state: ContainerState,
    pub vm: Arc<dyn VmHandle>,
    pub agent: Arc<AgentClient>,
    pub init: Process,
    pub execs: HashMap<String, Process>,
    pub reserved_ports: Vec<u32>,
    pub reserved_cid: Option<u32>,
    pub init_exit: Arc<OnceCell<i32>>,
    pub relays: Vec<StdioRelay>,
}

/// Thread-safe registry of every container tracked by this runtime
/// instance.
#[derive(Clone)]
pub struct ContainerRegistry {
    containers: Arc<DashMap<String, Arc<Mutex<ContainerEntry>>>>,
    reserved_ids: Arc<DashSet<String>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self { containers: Arc::new(DashMap::new()), reserved_ids: Arc::new(DashSet::new()) }
    }

    /// Claim `id` for an in-flight `create`, failing if it is already
    /// tracked or claimed by a concurrent `create`.
    pub fn claim(&self, id: &str) -> Result<()> {
        if self.containers.contains_key(id) {
            return Err(ContainerError::Exists(id.to_string()));
        }
        if !self.reserved_ids.insert(id.to_string()) {
            return Err(ContainerError::Exists(id.to_string()));
        }
        Ok(())
    }

    /// A claimed `create` finished successfully: install the entry.
    pub fn commit(&self, id: &str, entry: ContainerEntry) {
        self.reserved_ids.remove(id);
        self.containers.insert(id.to_string(), Arc::new(Mutex::new(entry)));
    }

    /// A claimed `create` failed: release the claim without tracking
    /// anything.
    pub fn abandon(&self, id: &str) {
        self.reserved_ids.remove(id);
    }

    pub fn get(&self, id: &str) -> Result<Arc<Mutex<ContainerEntry>>> {
        self.containers.get(id).map(|e| Arc::clone(e.value())).ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Mutex<ContainerEntry>>> {
        self.containers.remove(id).map(|(_, e)| e)
    }

    pub fn list(&self) -> Vec<String> {
        self.containers.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_spec(id: &str) -> ContainerSpec {
        ContainerSpec {
            id: id.to_string(),
            rootfs: "/tmp/rootfs".into(),
            initial_filesystem: "/tmp/initfs".into(),
            init: crate::model::ProcessSpec {
                argv: vec!["/init".into()],
                env: vec![],
                cwd: None,
                uid: None,
                gid: None,
                terminal: false,
                merge_stderr: false,
            },
            uid: 0,
            gid: 0,
            supplementary_gids: vec![],
            hostname: "test".into(),
            cpu_count: 1,
            memory_mb: 128,
            mounts: vec![],
            network: None,
            sysctls: HashMap::new(),
            nested_virtualization: false,
        }
    }

    #[test]
    fn claim_twice_is_exists_error() {
        let registry = ContainerRegistry::new();
        registry.claim("c1").unwrap();
        assert!(matches!(registry.claim("c1"), Err(ContainerError::Exists(_))));
    }

    #[test]
    fn abandon_releases_claim_for_retry() {
        let registry = ContainerRegistry::new();
        registry.claim("c1").unwrap();
        registry.abandon("c1");
        registry.claim("c1").unwrap();
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = ContainerRegistry::new();
        assert!(matches!(registry.get("nope"), Err(ContainerError::NotFound(_))));
    }

    #[test]
    fn dummy_spec_id_matches() {
        assert_eq!(dummy_spec("c1").id, "c1");
    }
}
