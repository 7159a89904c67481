use std::sync::Arc;

use tracing::{debug, warn};

use super::{head_time, utf8_name, FileAttr, Lister, Node, Resolver, BRANCH_VALID};
use crate::{
    dir_stream::{ChannelDirStream, DirEntry, DirStream},
    environment::Environment,
    inodes::{Inode, NodeKind},
    repo, Error,
};

/// `branches/`, with one directory per local branch. Both listing and lookup
/// reflect the current state of the repository.
pub struct BranchListNode;

impl Node for BranchListNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn getattr(&self, env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr::directory(head_time(env)?))
    }

    fn timeout(&self) -> std::time::Duration {
        BRANCH_VALID
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        Some(self)
    }
}

impl Lister for BranchListNode {
    fn readdir(&self, env: &Arc<Environment>, _this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        let tokio_handle = env.tokio_handle().clone();
        let env = env.clone();
        Ok(Box::new(ChannelDirStream::spawn(
            &tokio_handle,
            None,
            move |sink| {
                let repo = env.repo().reopen()?;
                for branch in repo::local_branches(&repo)? {
                    let branch = match branch {
                        Ok(branch) => branch,
                        Err(e) => {
                            warn!(err = %e, "skipping unreadable branch");
                            continue;
                        }
                    };
                    let name = branch.short_name();
                    // Can't be a single path component.
                    if name.contains('/') {
                        debug!(branch = name, "skipping nested branch name");
                        continue;
                    }

                    debug!(branch = name, "read branch");
                    let entry =
                        DirEntry::new(name.to_owned(), env.branch_ino(name), NodeKind::Directory);
                    if !sink.send(entry) {
                        break;
                    }
                }
                Ok(())
            },
        )))
    }
}

impl Resolver for BranchListNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        _this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        let branch = env.repo().branch(utf8_name(name)?)?;
        let (_, node) = env.branch_node(&branch)?;
        Ok(node)
    }
}
