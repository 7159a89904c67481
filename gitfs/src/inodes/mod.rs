//! This module contains the data structures keeping track of inodes, which
//! present repository objects in a filesystem.
mod inode_cache;
mod ino_store;

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{nodes::Node, Error};

pub use self::inode_cache::InodeCache;
pub use self::ino_store::InoStore;

/// The inode of the filesystem root.
pub const ROOT_INO: u64 = 1;

/// The externally visible identity of a node. Clients compare both numbers
/// to decide whether a cached entry still refers to the same object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StableAttr {
    pub ino: u64,
    pub gen: u64,
}

impl StableAttr {
    /// The allocator key of a child with the given name. The parent's
    /// generation is part of it, so a rebuilt parent hands out fresh
    /// identities to its children. Names are escaped, so distinct byte
    /// strings never share a key.
    pub fn child_key(&self, name: &[u8]) -> String {
        format!("{}:{}/{}", self.ino, self.gen, name.escape_ascii())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    Regular,
    Symlink,
}

impl NodeKind {
    /// The file type bits of `st_mode`.
    #[allow(clippy::unnecessary_cast)] // libc::S_IFDIR is u32 on Linux and u16 on MacOS
    pub fn file_type(&self) -> u32 {
        match self {
            NodeKind::Directory => libc::S_IFDIR as u32,
            NodeKind::Regular => libc::S_IFREG as u32,
            NodeKind::Symlink => libc::S_IFLNK as u32,
        }
    }
}

/// A materialized node registered under a stable identity.
pub struct Inode {
    attr: StableAttr,
    node: Arc<dyn Node>,
}

impl Inode {
    pub fn ino(&self) -> u64 {
        self.attr.ino
    }

    pub fn gen(&self) -> u64 {
        self.attr.gen
    }

    pub fn stable_attr(&self) -> StableAttr {
        self.attr
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn child_key(&self, name: &[u8]) -> String {
        self.attr.child_key(name)
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.attr.ino)
            .field("gen", &self.attr.gen)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Maps inode numbers to the most recently registered node, which is what
/// kernel requests are dispatched to.
#[derive(Default)]
pub struct InodeTable {
    inodes: RwLock<HashMap<u64, Arc<Inode>>>,
}

impl InodeTable {
    pub fn get(&self, ino: u64) -> Option<Arc<Inode>> {
        self.inodes.read().get(&ino).cloned()
    }

    /// Registers `node` under `attr`, replacing whatever was registered
    /// under the same inode number before.
    pub fn insert(&self, attr: StableAttr, node: Arc<dyn Node>) -> Arc<Inode> {
        let inode = Arc::new(Inode { attr, node });
        self.inodes.write().insert(attr.ino, inode.clone());
        inode
    }

    /// Returns the node registered under exactly `attr`, or builds and
    /// registers one. `builder` runs without holding the table lock.
    pub fn get_or_insert_with<F>(&self, attr: StableAttr, builder: F) -> Result<Arc<Inode>, Error>
    where
        F: FnOnce() -> Result<Arc<dyn Node>, Error>,
    {
        if let Some(inode) = self.get(attr.ino).filter(|i| i.attr == attr) {
            return Ok(inode);
        }

        let node = builder()?;

        // Someone else might have beaten us to it while building.
        let mut inodes = self.inodes.write();
        match inodes.get(&attr.ino) {
            Some(inode) if inode.attr == attr => Ok(inode.clone()),
            _ => {
                let inode = Arc::new(Inode { attr, node });
                inodes.insert(attr.ino, inode.clone());
                Ok(inode)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
