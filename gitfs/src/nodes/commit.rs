use std::sync::Arc;

use super::{
    commit_link, leaf::MemFile, utf8_name, CommitLogNode, FileAttr, Lister, LogOptions, Node,
    Resolver, TreeDirNode,
};
use crate::{
    dir_stream::{DirEntry, DirStream, VecDirStream},
    environment::Environment,
    inodes::{Inode, NodeKind},
    repo::CommitInfo,
    Error,
};

const HASH: &str = "hash";
const MESSAGE: &str = "message";
const PARENT: &str = "parent";
const PARENTS: &str = "parents";
const LOG: &str = "log";
const TREE: &str = "tree";

/// The directory presenting a single commit.
///
/// Commits are immutable, so everything below here is built at most once,
/// and keeps its identity for the lifetime of the filesystem.
pub struct CommitNode {
    commit: CommitInfo,
}

impl CommitNode {
    pub fn new(commit: CommitInfo) -> Self {
        Self { commit }
    }

    /// Names and kinds of the children.
    fn children(&self) -> impl Iterator<Item = (&'static str, NodeKind)> {
        let parent = (!self.commit.parents.is_empty()).then_some((PARENT, NodeKind::Symlink));

        [(HASH, NodeKind::Regular), (MESSAGE, NodeKind::Regular)]
            .into_iter()
            .chain(parent)
            .chain([
                (PARENTS, NodeKind::Directory),
                (LOG, NodeKind::Directory),
                (TREE, NodeKind::Directory),
            ])
    }

    fn build_child(&self, env: &Environment, name: &str) -> Result<Arc<dyn Node>, Error> {
        let commit = &self.commit;
        let attr = FileAttr::file(0, commit.time);

        let node: Arc<dyn Node> = match name {
            HASH => Arc::new(MemFile::new(commit.id.to_string().into(), attr)),
            MESSAGE => Arc::new(MemFile::new(commit.message.clone(), attr)),
            PARENT => {
                let first = commit
                    .parents
                    .first()
                    .ok_or_else(|| Error::NotFound(format!("parent of {}", commit.id)))?;
                // The symlink carries the parent's timestamp.
                commit_link(1, &env.repo().commit(*first)?)
            }
            PARENTS => Arc::new(CommitLogNode::parents(commit, 2)),
            LOG => Arc::new(CommitLogNode::new(
                commit,
                LogOptions {
                    link_levels: 2,
                    include_head: true,
                    symlink_head: false,
                },
            )),
            TREE => Arc::new(TreeDirNode::new(commit.tree, commit.time)),
            _ => return Err(Error::NotFound(name.to_owned())),
        };
        Ok(node)
    }
}

impl Node for CommitNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr::commit(&self.commit))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        Some(self)
    }
}

impl Lister for CommitNode {
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        Ok(Box::new(VecDirStream::new(
            self.children()
                .map(|(name, kind)| DirEntry::new(name, env.child_ino(this.stable_attr(), name), kind))
                .collect(),
        )))
    }
}

impl Resolver for CommitNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        let name = utf8_name(name)?;
        if !self.children().any(|(child, _)| child == name) {
            return Err(Error::NotFound(name.to_owned()));
        }
        env.child(this, name, || self.build_child(env, name))
    }
}
