//! IO substrate: non-blocking stream sockets, an edge-triggered readiness
//! loop, a CIDR/IP allocator, and a thread-safe property cell.

pub mod allocator;
pub mod cell;
pub mod cidr;
pub mod error;
pub mod readiness;
pub mod socket;

pub use allocator::{AddressAllocator, AllocatorKind};
pub use cell::Cell;
pub use cidr::Cidr;
pub use error::IoError;
pub use readiness::Readiness;
pub use socket::{Address, Socket};
