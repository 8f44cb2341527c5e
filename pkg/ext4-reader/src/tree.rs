//! The in-memory file tree built by a single depth-first walk at open time
//! (spec §3, §4.3).

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Ext4Error, Result};
use crate::extent::Extent;
use crate::format::Superblock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
    Other,
}

/// One node of the walked tree: an inode plus its children, sorted by name.
/// Hardlinks are not represented as children a second time — they live in
/// `Ext4View::hardlinks` instead.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub inode: u32,
    pub name: String,
    pub file_type: FileType,
    pub extents: Vec<Extent>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub(crate) fn new(inode: u32, name: String, is_dir: bool, extents: Vec<Extent>) -> Self {
        Self {
            inode,
            name,
            file_type: if is_dir { FileType::Directory } else { FileType::RegularFile },
            extents,
            children: Vec::new(),
        }
    }

    pub(crate) fn root() -> Self {
        Self {
            inode: crate::format::ROOT_INODE,
            name: String::new(),
            file_type: FileType::Directory,
            extents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

pub(crate) struct DirEntry {
    pub inode: u32,
    pub name: String,
}

/// Parse `{inode:u32, rec_len:u16, name_len:u8, file_type:u8, name[name_len]}`
/// records out of every block the directory's extents cover, skipping
/// zero-inode (deleted) entries.
pub(crate) fn read_directory_entries<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    extents: &[Extent],
) -> Result<Vec<DirEntry>> {
    let block_size = sb.block_size();
    let mut out = Vec::new();

    for extent in extents {
        for block_index in 0..extent.length {
            let block = extent.start + block_index;
            reader.seek(SeekFrom::Start(block * block_size)).map_err(Ext4Error::Io)?;
            let mut buf = vec![0u8; block_size as usize];
            reader.read_exact(&mut buf).map_err(|_| Ext4Error::UnreadableBlock(block))?;
            parse_block(&buf, &mut out);
        }
    }

    out.sort_by(|a: &DirEntry, b: &DirEntry| a.name.cmp(&b.name));
    Ok(out)
}

fn parse_block(buf: &[u8], out: &mut Vec<DirEntry>) {
    let mut offset = 0usize;
    while offset + 8 <= buf.len() {
        let inode = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        let rec_len = u16::from_le_bytes(buf[offset + 4..offset + 6].try_into().unwrap());
        let name_len = buf[offset + 6] as usize;
        if rec_len < 8 {
            break;
        }
        if inode != 0 {
            let name_start = offset + 8;
            let name_end = (name_start + name_len).min(buf.len());
            let name = String::from_utf8_lossy(&buf[name_start..name_end]).into_owned();
            out.push(DirEntry { inode, name });
        }
        offset += rec_len as usize;
    }
}
