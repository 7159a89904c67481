//! The files of a commit.
//!
//! Trees carry no timestamps, so everything in here uses the timestamp of
//! the commit the tree was reached from.
use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use git2::Oid;
use tracing::debug;

use super::{leaf::MemSymlink, FileAttr, Lister, Node, Reader, Resolver, TREE_ENTRY_VALID};
use crate::{
    dir_stream::{DirEntry, DirStream, VecDirStream},
    environment::Environment,
    inodes::{Inode, NodeKind},
    repo::{EntryKind, TreeEntryInfo},
    Error,
};

pub struct TreeDirNode {
    tree: Oid,
    time: i64,
}

impl TreeDirNode {
    pub fn new(tree: Oid, time: i64) -> Self {
        Self { tree, time }
    }

    /// Builds the node presenting `entry`, one of the entries of this tree.
    fn build_child(
        &self,
        env: &Environment,
        entry: &TreeEntryInfo,
    ) -> Result<Arc<dyn Node>, Error> {
        let node: Arc<dyn Node> = match entry.kind()? {
            EntryKind::Directory => Arc::new(TreeDirNode::new(entry.id, self.time)),
            EntryKind::Regular { executable } => Arc::new(TreeFileNode {
                blob: entry.id,
                size: env.repo().blob_size(entry.id)?,
                executable,
                time: self.time,
            }),
            EntryKind::Symlink => Arc::new(
                MemSymlink::new(env.repo().blob(entry.id)?, FileAttr::symlink(0, self.time))
                    .with_timeout(TREE_ENTRY_VALID),
            ),
        };
        Ok(node)
    }
}

impl Node for TreeDirNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr::directory(self.time))
    }

    fn timeout(&self) -> Duration {
        TREE_ENTRY_VALID
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        Some(self)
    }
}

impl Lister for TreeDirNode {
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        let entries = env
            .repo()
            .tree_entries(self.tree)?
            .into_iter()
            .filter_map(|entry| {
                let kind = match entry.kind() {
                    Ok(EntryKind::Directory) => NodeKind::Directory,
                    Ok(EntryKind::Regular { .. }) => NodeKind::Regular,
                    Ok(EntryKind::Symlink) => NodeKind::Symlink,
                    Err(e) => {
                        debug!(err = %e, "hiding tree entry");
                        return None;
                    }
                };
                let ino = env.child_ino(this.stable_attr(), &entry.name[..]);
                Some(DirEntry::new(entry.name, ino, kind))
            })
            .collect();

        Ok(Box::new(VecDirStream::new(entries)))
    }
}

impl Resolver for TreeDirNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        let entry = env.repo().tree_entry(self.tree, name)?;
        env.child(this, name, || self.build_child(env, &entry))
    }
}

/// A regular file, read from its blob on open.
pub struct TreeFileNode {
    blob: Oid,
    size: u64,
    executable: bool,
    time: i64,
}

impl Node for TreeFileNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Regular
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(if self.executable {
            FileAttr::executable(self.size, self.time)
        } else {
            FileAttr::file(self.size, self.time)
        })
    }

    fn timeout(&self) -> Duration {
        TREE_ENTRY_VALID
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        Some(self)
    }
}

impl Reader for TreeFileNode {
    fn contents(&self, env: &Environment) -> Result<Bytes, Error> {
        env.repo().blob(self.blob)
    }
}
