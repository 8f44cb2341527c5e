//! A read-only ext4 image reader: superblock, extents, xattrs, and a
//! directory tree walked once at open time.

mod error;
mod extent;
mod format;
mod tree;
mod xattr;

pub use error::Ext4Error;
pub use format::Superblock;
pub use tree::{FileType, TreeNode};

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use tracing::{debug, warn};
use zerocopy::FromBytes;

use error::Result;
use format::{GroupDescriptor, Inode, SUPERBLOCK_OFFSET};

/// An opened ext4 image: superblock, group descriptors, a fully-walked
/// directory tree, and the hardlink map recorded during that walk.
///
/// Opening is the only operation that touches the backing image's
/// directory structure; everything afterwards reads from the in-memory
/// tree and caches built during `open`.
pub struct Ext4View<R> {
    reader: R,
    superblock: Superblock,
    group_descriptors: HashMap<u32, GroupDescriptor>,
    inode_cache: HashMap<u32, Inode>,
    root: TreeNode,
    hardlinks: HashMap<PathBuf, u32>,
}

impl<R: Read + Seek> Ext4View<R> {
    /// Read the superblock, then walk the tree depth-first from the root
    /// inode (2), recording a hardlink each time an inode number repeats.
    pub fn open(mut reader: R) -> Result<Self> {
        let superblock = Self::read_superblock(&mut reader)?;

        let mut view = Self {
            reader,
            superblock,
            group_descriptors: HashMap::new(),
            inode_cache: HashMap::new(),
            root: TreeNode::root(),
            hardlinks: HashMap::new(),
        };

        let mut visited = HashMap::new();
        let root_inode_num = format::ROOT_INODE;
        let root_node = view.walk(root_inode_num, "".to_string(), &mut visited, PathBuf::from("/"))?;
        view.root = root_node;
        debug!(hardlinks = view.hardlinks.len(), "ext4 image opened");
        Ok(view)
    }

    fn read_superblock(reader: &mut R) -> Result<Superblock> {
        reader.seek(SeekFrom::Start(SUPERBLOCK_OFFSET))?;
        let mut buf = [0u8; format::SUPERBLOCK_SIZE];
        reader.read_exact(&mut buf)?;
        let raw = format::RawSuperblock::read_from_bytes(&buf).map_err(|_| Ext4Error::UnreadableSuperblock)?;
        if raw.magic != format::EXT4_MAGIC {
            warn!(magic = raw.magic, "superblock magic mismatch");
            return Err(Ext4Error::BadMagic(raw.magic));
        }
        Ok(Superblock::from_raw(&raw))
    }

    fn group_descriptor(&mut self, group: u32) -> Result<GroupDescriptor> {
        if let Some(gd) = self.group_descriptors.get(&group) {
            return Ok(*gd);
        }
        let gd = format::read_group_descriptor(&mut self.reader, &self.superblock, group)?;
        self.group_descriptors.insert(group, gd);
        Ok(gd)
    }

    fn inode(&mut self, inode_num: u32) -> Result<Inode> {
        if let Some(inode) = self.inode_cache.get(&inode_num) {
            return Ok(*inode);
        }
        let group = (inode_num - 1) / self.superblock.inodes_per_group;
        let gd = self.group_descriptor(group)?;
        let inode = format::read_inode(&mut self.reader, &self.superblock, &gd, inode_num)?;
        self.inode_cache.insert(inode_num, inode);
        Ok(inode)
    }

    fn walk(
        &mut self,
        inode_num: u32,
        name: String,
        visited: &mut HashMap<u32, PathBuf>,
        this_path: PathBuf,
    ) -> Result<TreeNode> {
        let inode = self.inode(inode_num)?;
        let extents = extent::decode(&mut self.reader, &inode)?;
        let is_dir = inode.is_directory();

        let mut node = TreeNode::new(inode_num, name, is_dir, extents.clone());

        if is_dir {
            let entries = tree::read_directory_entries(&mut self.reader, &self.superblock, &extents)?;
            for entry in entries {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child_path = this_path.join(&entry.name);
                if let Some(_existing) = visited.get(&entry.inode) {
                    self.hardlinks.insert(child_path, entry.inode);
                    continue;
                }
                visited.insert(entry.inode, child_path.clone());
                let child = self.walk(entry.inode, entry.name.clone(), visited, child_path)?;
                node.children.push(child);
            }
            node.children.sort_by(|a, b| a.name.cmp(&b.name));
        }

        Ok(node)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn hardlinks(&self) -> &HashMap<PathBuf, u32> {
        &self.hardlinks
    }

    /// Look up a node by its slash-separated path from the root, returning
    /// `None` if any path component is missing.
    pub fn lookup(&self, path: &str) -> Option<&TreeNode> {
        let mut node = &self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = node.children.iter().find(|c| c.name == component)?;
        }
        Some(node)
    }

    /// Read the extended attributes attached to `inode_num`, unioning the
    /// inline and block-resident sets by full name.
    pub fn xattrs(&mut self, inode_num: u32) -> Result<HashMap<String, Vec<u8>>> {
        let inode = self.inode(inode_num)?;
        xattr::read(&mut self.reader, &self.superblock, &inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bad_magic_fails_open() {
        let buf = vec![0u8; 4096];
        let result = Ext4View::open(Cursor::new(buf));
        assert!(matches!(result, Err(Ext4Error::BadMagic(_))));
    }
}
