//! Error taxonomy for the IO substrate (spec §7).

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid CIDR")]
    InvalidCidr,
    #[error("invalid string address")]
    InvalidStringAddress,
    #[error("address already allocated")]
    AlreadyAllocated,
    #[error("address not allocated")]
    NotAllocated,
    #[error("allocator is full")]
    AllocatorFull,
    #[error("address range exceeded")]
    RangeExceeded,
    #[error("socket is closed")]
    SocketClosed,
    #[error("operation not valid for current socket state")]
    InvalidOperationOnSocket,
    #[error("an accept stream is already active for this listener")]
    AcceptStreamExists,
    #[error(transparent)]
    Posix(#[from] std::io::Error),
}
