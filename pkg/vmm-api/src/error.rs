#[derive(Debug, thiserror::Error)]
pub enum VmmError {
    #[error("failed to boot virtual machine: {0}")]
    BootFailed(String),
    #[error("virtual machine is not running")]
    NotRunning,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, VmmError>;
