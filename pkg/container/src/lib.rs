//! The container lifecycle: create, start, wait, exec, stop, kill (spec
//! §4.4), built on a guest agent connection, a vsock port allocator, and a
//! `VirtualMachineManager` boot backend.

mod error;
mod lifecycle;
mod model;
mod registry;
mod stdio;

pub use error::ContainerError;
pub use lifecycle::{relay_socket, stop_socket_relay, ContainerLifecycle};
pub use model::{
    ContainerSpec, ContainerState, Mount, NetworkConfig, Process, ProcessHandle, ProcessSpec, ProcessState,
    StdioPorts,
};
pub use registry::ContainerRegistry;
pub use stdio::StdioSinks;
