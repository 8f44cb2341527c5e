//! On-disk ext4 structures: superblock, group descriptor, inode.
//!
//! Wire structs are `#[repr(C)]` + `zerocopy::FromBytes` so they can be
//! parsed directly out of a read buffer without manual byte-swapping
//! (ext4 is little-endian on disk, matching every host this reads on).

use std::io::{Read, Seek, SeekFrom};

use zerocopy::FromBytes;

use crate::error::{Ext4Error, Result};

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const EXT4_MAGIC: u16 = 0xEF53;
pub const ROOT_INODE: u32 = 2;

const INCOMPAT_64BIT: u32 = 0x0080;
const GROUP_DESC_MIN_SIZE: u16 = 32;

#[derive(Debug, Clone, Copy, FromBytes)]
#[repr(C, packed)]
pub struct RawSuperblock {
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub r_blocks_count_lo: u32,
    pub free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    // -- ext4 dynamic rev superblock fields --
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [u8; 64],
    pub algorithm_usage_bitmap: u32,
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    pub reserved_gdt_blocks: u16,
    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    pub jnl_backup_type: u8,
    pub desc_size: u16,
    pub default_mount_opts: u32,
    pub first_meta_bg: u32,
    pub mkfs_time: u32,
    pub jnl_blocks: [u32; 17],
    pub blocks_count_hi: u32,
    pub r_blocks_count_hi: u32,
    pub free_blocks_count_hi: u32,
    // remainder of the 1024-byte block is padding/reserved we don't read.
    pub _reserved: [u8; 1024 - 348],
}

/// The parser's friendly view of the fields this reader actually uses.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub feature_incompat: u32,
    pub desc_size: u16,
    pub first_data_block: u32,
}

impl Superblock {
    pub fn from_raw(raw: &RawSuperblock) -> Self {
        Self {
            inodes_count: raw.inodes_count,
            blocks_count: (u64::from(raw.blocks_count_hi) << 32) | u64::from(raw.blocks_count_lo),
            log_block_size: raw.log_block_size,
            blocks_per_group: raw.blocks_per_group,
            inodes_per_group: raw.inodes_per_group,
            inode_size: if raw.inode_size == 0 { 128 } else { raw.inode_size },
            feature_incompat: raw.feature_incompat,
            desc_size: raw.desc_size,
            first_data_block: raw.first_data_block,
        }
    }

    pub fn block_size(&self) -> u64 {
        1024u64 << self.log_block_size
    }

    pub fn is_64bit(&self) -> bool {
        self.feature_incompat & INCOMPAT_64BIT != 0
    }

    pub fn group_descriptor_size(&self) -> u16 {
        if self.is_64bit() && self.desc_size >= GROUP_DESC_MIN_SIZE { self.desc_size } else { GROUP_DESC_MIN_SIZE }
    }
}

#[derive(Debug, Clone, Copy, FromBytes)]
#[repr(C, packed)]
struct RawGroupDescriptor32 {
    block_bitmap_lo: u32,
    inode_bitmap_lo: u32,
    inode_table_lo: u32,
    free_blocks_count_lo: u16,
    free_inodes_count_lo: u16,
    used_dirs_count_lo: u16,
    flags: u16,
    _reserved: [u8; 12],
}

#[derive(Debug, Clone, Copy)]
pub struct GroupDescriptor {
    pub inode_table: u64,
}

pub fn read_group_descriptor<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    group: u32,
) -> Result<GroupDescriptor> {
    let gdt_offset = if sb.block_size() == 1024 { 2 } else { 1 } as u64 * sb.block_size();
    let desc_size = sb.group_descriptor_size() as u64;
    let offset = gdt_offset + u64::from(group) * desc_size;

    reader.seek(SeekFrom::Start(offset)).map_err(Ext4Error::Io)?;
    let mut buf = vec![0u8; desc_size as usize];
    reader.read_exact(&mut buf).map_err(|_| Ext4Error::UnreadableGroupDescriptor(group))?;

    let raw = RawGroupDescriptor32::read_from_prefix(&buf)
        .map_err(|_| Ext4Error::UnreadableGroupDescriptor(group))?
        .0;

    let inode_table_hi = if sb.is_64bit() && buf.len() >= 44 {
        u32::from_le_bytes(buf[40..44].try_into().unwrap())
    } else {
        0
    };

    Ok(GroupDescriptor { inode_table: (u64::from(inode_table_hi) << 32) | u64::from(raw.inode_table_lo) })
}

const S_IFMT: u16 = 0xF000;
const S_IFDIR: u16 = 0x4000;

/// The on-disk inode base fields through `i_block`, followed by the
/// extra-isize region this reader reads xattrs from. Large inodes
/// (`inode_size > 128`) carry additional fields after `i_extra_isize`
/// that are read separately since their offset depends on `i_extra_isize`.
#[derive(Debug, Clone, Copy, FromBytes)]
#[repr(C, packed)]
struct RawInode128 {
    i_mode: u16,
    i_uid: u16,
    i_size_lo: u32,
    i_atime: u32,
    i_ctime: u32,
    i_mtime: u32,
    i_dtime: u32,
    i_gid: u16,
    i_links_count: u16,
    i_blocks_lo: u32,
    i_flags: u32,
    _osd1: u32,
    i_block: [u8; 60],
    i_generation: u32,
    i_file_acl_lo: u32,
    i_size_high: u32,
    i_faddr: u32,
    _osd2: [u8; 12],
}

#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub mode: u16,
    pub links_count: u16,
    pub size: u64,
    pub block: [u8; 60],
    pub file_acl: u64,
    pub extra_isize: u16,
    pub offset: u64,
    pub inode_size: u16,
}

impl Inode {
    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

pub fn read_inode<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    gd: &GroupDescriptor,
    inode_num: u32,
) -> Result<Inode> {
    let index_in_group = (inode_num - 1) % sb.inodes_per_group;
    let offset = gd.inode_table * sb.block_size() + u64::from(index_in_group) * u64::from(sb.inode_size);

    reader.seek(SeekFrom::Start(offset)).map_err(Ext4Error::Io)?;
    let mut buf = vec![0u8; sb.inode_size as usize];
    reader.read_exact(&mut buf).map_err(|_| Ext4Error::UnreadableInode(inode_num))?;

    let raw = RawInode128::read_from_prefix(&buf).map_err(|_| Ext4Error::UnreadableInode(inode_num))?.0;

    let extra_isize =
        if sb.inode_size > 128 && buf.len() >= 130 { u16::from_le_bytes(buf[128..130].try_into().unwrap()) } else { 0 };

    Ok(Inode {
        mode: raw.i_mode,
        links_count: raw.i_links_count,
        size: (u64::from(raw.i_size_high) << 32) | u64::from(raw.i_size_lo),
        block: raw.i_block,
        file_acl: u64::from(raw.i_file_acl_lo),
        extra_isize,
        offset,
        inode_size: sb.inode_size,
    })
}
