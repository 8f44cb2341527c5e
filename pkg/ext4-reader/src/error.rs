//! ext4 reader error taxonomy (spec §7).

#[derive(Debug, thiserror::Error)]
pub enum Ext4Error {
    #[error("superblock could not be read")]
    UnreadableSuperblock,
    #[error("bad superblock magic: {0:#06x}")]
    BadMagic(u16),
    #[error("group descriptor {0} could not be read")]
    UnreadableGroupDescriptor(u32),
    #[error("inode {0} could not be read")]
    UnreadableInode(u32),
    #[error("block {0} could not be read")]
    UnreadableBlock(u64),
    #[error("extent tree depth {0} is not supported")]
    DeepExtentsUnimplemented(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Ext4Error>;
