use std::sync::Arc;

use super::{
    head_time, utf8_name, AllCommitsNode, BranchListNode, FileAttr, Lister, Node, Resolver, HEAD_VALID,
};
use crate::{
    dir_stream::{DirEntry, DirStream, VecDirStream},
    environment::Environment,
    inodes::{Inode, NodeKind},
    Error,
};

const BRANCHES: &str = "branches";
const COMMITS: &str = "commits";

/// The root directory, containing `branches/` and `commits/`.
pub struct RootNode;

impl Node for RootNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn getattr(&self, env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr::directory(head_time(env)?))
    }

    fn timeout(&self) -> std::time::Duration {
        HEAD_VALID
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        Some(self)
    }
}

impl Lister for RootNode {
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        Ok(Box::new(VecDirStream::new(
            [BRANCHES, COMMITS]
                .into_iter()
                .map(|name| {
                    DirEntry::new(
                        name,
                        env.child_ino(this.stable_attr(), name),
                        NodeKind::Directory,
                    )
                })
                .collect(),
        )))
    }
}

impl Resolver for RootNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        match utf8_name(name)? {
            BRANCHES => env.child(this, name, || Ok(Arc::new(BranchListNode) as Arc<dyn Node>)),
            COMMITS => env.child(this, name, || Ok(Arc::new(AllCommitsNode) as Arc<dyn Node>)),
            other => Err(Error::NotFound(other.to_owned())),
        }
    }
}
