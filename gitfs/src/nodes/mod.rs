//! The nodes presenting a repository as a filesystem.
//!
//! ```text
//! /
//! ├── branches/
//! │   └── <branch>/          log of the branch, commits as directories
//! │       ├── HEAD -> <hash>
//! │       └── <hash>/        same node as commits/<hash>
//! └── commits/
//!     ├── HEAD -> <hash>
//!     └── <hash>/
//!         ├── hash
//!         ├── message
//!         ├── parent -> ../<hash>
//!         ├── parents/<hash> -> ../../<hash>
//!         ├── log/<hash> -> ../../<hash>
//!         └── tree/          the commit's files
//! ```
//!
//! Every node implements [Node], which describes its attributes, and the
//! subset of [Lister], [Resolver], [SymlinkTarget] and [Reader] matching
//! what it is.
use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{
    dir_stream::DirStream,
    environment::Environment,
    inodes::{Inode, NodeKind},
    repo::CommitInfo,
    Error,
};

mod all_commits;
mod branch_list;
mod commit;
mod commit_log;
pub mod leaf;
mod root;
mod tree;

pub use self::all_commits::{AllCommitsNode, HeadLinkNode};
pub use self::branch_list::BranchListNode;
pub use self::commit::CommitNode;
pub use self::commit_log::{CommitLogNode, LogOptions};
pub use self::root::RootNode;
pub use self::tree::{TreeDirNode, TreeFileNode};

/// Attribute validity of everything derived from commits alone, which
/// never change.
pub const COMMIT_VALID: Duration = Duration::from_secs(6 * 60 * 60);
/// Attribute validity of branch nodes, as branches move.
pub const BRANCH_VALID: Duration = Duration::from_secs(30);
/// Attribute validity of nodes following HEAD.
pub const HEAD_VALID: Duration = Duration::from_secs(30);
/// Attribute validity of files and directories inside a commit's tree.
pub const TREE_ENTRY_VALID: Duration = Duration::from_secs(10 * 60);

/// The part of a node's attributes that depends on the node. The file type
/// comes from [Node::kind], the identity from the [Inode].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    /// Permission bits.
    pub perm: u32,
    /// Used as atime, mtime and ctime.
    pub time: i64,
}

impl FileAttr {
    pub fn directory(time: i64) -> Self {
        Self {
            size: 0,
            perm: 0o555,
            time,
        }
    }

    pub fn file(size: u64, time: i64) -> Self {
        Self {
            size,
            perm: 0o444,
            time,
        }
    }

    pub fn executable(size: u64, time: i64) -> Self {
        Self {
            size,
            perm: 0o555,
            time,
        }
    }

    pub fn symlink(size: u64, time: i64) -> Self {
        Self {
            size,
            perm: 0o555,
            time,
        }
    }

    /// A directory carrying the commit's timestamp.
    pub fn commit(commit: &CommitInfo) -> Self {
        Self::directory(commit.time)
    }
}

/// A node in the filesystem.
pub trait Node: Send + Sync {
    fn kind(&self) -> NodeKind;

    fn getattr(&self, env: &Environment) -> Result<FileAttr, Error>;

    /// For how long the kernel may cache the node's attributes and the
    /// directory entry pointing to it.
    fn timeout(&self) -> Duration {
        COMMIT_VALID
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        None
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        None
    }

    fn as_symlink(&self) -> Option<&dyn SymlinkTarget> {
        None
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        None
    }
}

/// Directories that can be listed.
pub trait Lister {
    /// Opens a listing of `this`, the inode the node is registered under.
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error>;
}

/// Directories whose children can be looked up by name.
pub trait Resolver {
    /// `name` is a single path component, exactly as the kernel sent it.
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error>;
}

pub trait SymlinkTarget {
    fn readlink(&self, env: &Environment) -> Result<Bytes, Error>;
}

/// Regular files.
pub trait Reader {
    /// The whole file contents.
    fn contents(&self, env: &Environment) -> Result<Bytes, Error>;
}

/// The target of a symlink pointing `levels` directories up, and from there
/// into the commit `id`.
fn relative_commit_link(levels: usize, id: git2::Oid) -> String {
    let mut target = "../".repeat(levels);
    target.push_str(&id.to_string());
    target
}

/// A symlink to `commit`, going up `levels` directories first.
pub(crate) fn commit_link(levels: usize, commit: &CommitInfo) -> Arc<dyn Node> {
    let target = relative_commit_link(levels, commit.id);
    Arc::new(leaf::MemSymlink::new(
        target.into(),
        FileAttr::symlink(0, commit.time),
    ))
}

/// Names generated by the filesystem itself are UTF-8. Anything else can't
/// exist outside of trees.
fn utf8_name(name: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(name).map_err(|_| Error::NotFound(name.escape_ascii().to_string()))
}

/// The timestamp of the HEAD commit, or the epoch in a repository without
/// any commits.
fn head_time(env: &Environment) -> Result<i64, Error> {
    match env.repo().head_commit() {
        Ok(commit) => Ok(commit.time),
        Err(Error::NotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests;
