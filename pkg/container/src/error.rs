//! Container lifecycle error taxonomy (spec §7), layered over the typed
//! errors the lower substrates raise.

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("container or process not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Exists(String),
    #[error(transparent)]
    Io(#[from] hypercell_io::IoError),
    #[error(transparent)]
    Agent(#[from] hypercell_agent::AgentError),
    #[error(transparent)]
    Vmm(#[from] hypercell_vmm_api::VmmError),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
