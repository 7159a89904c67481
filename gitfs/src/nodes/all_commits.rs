use std::sync::Arc;

use bytes::Bytes;

use super::{head_time, utf8_name, FileAttr, Lister, Node, Resolver, SymlinkTarget, HEAD_VALID};
use crate::{
    dir_stream::{ChannelDirStream, DirEntry, DirStream},
    environment::Environment,
    inodes::{Inode, NodeKind},
    repo::{self, parse_oid},
    Error,
};

const HEAD: &str = "HEAD";

/// `commits/`, with a directory for every commit in the repository, and a
/// `HEAD` symlink to the one currently checked out. With an unborn HEAD,
/// there's no symlink.
///
/// Listings walk all commits reachable from any reference, newest first.
/// Lookups accept any commit in the object store.
pub struct AllCommitsNode;

impl Node for AllCommitsNode {
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

impl Lister for AllCommitsNode {
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        let head = match env.repo().head_id() {
            Ok(_) => Some(DirEntry::new(
                HEAD,
                env.child_ino(this.stable_attr(), HEAD),
                NodeKind::Symlink,
            )),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let tokio_handle = env.tokio_handle().clone();
        let env = env.clone();
        Ok(Box::new(ChannelDirStream::spawn(
            &tokio_handle,
            head,
            move |sink| {
                let repo = env.repo().reopen()?;
                for id in repo::walk_all(&repo)? {
                    let id = id?;
                    let entry =
                        DirEntry::new(id.to_string(), env.commit_ino(id), NodeKind::Directory);
                    if !sink.send(entry) {
                        break;
                    }
                }
                Ok(())
            },
        )))
    }
}

impl Resolver for AllCommitsNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        let name = utf8_name(name)?;
        if name == HEAD {
            // unborn HEAD
            env.repo().head_id()?;
            return env.child(this, HEAD, || Ok(Arc::new(HeadLinkNode) as Arc<dyn Node>));
        }

        let id = parse_oid(name).ok_or_else(|| Error::NotFound(format!("commit {}", name)))?;
        env.commit_node(id)
    }
}

/// A symlink to the commit HEAD currently resolves to. Unlike most nodes,
/// it's not a snapshot: every request looks at the repository again.
pub struct HeadLinkNode;

impl Node for HeadLinkNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Symlink
    }

    fn getattr(&self, env: &Environment) -> Result<FileAttr, Error> {
        let head = env.repo().head_commit()?;
        // a hex commit id
        Ok(FileAttr::symlink(40, head.time))
    }

    fn timeout(&self) -> std::time::Duration {
        HEAD_VALID
    }

    fn as_symlink(&self) -> Option<&dyn SymlinkTarget> {
        Some(self)
    }
}

impl SymlinkTarget for HeadLinkNode {
    fn readlink(&self, env: &Environment) -> Result<Bytes, Error> {
        Ok(env.repo().head_id()?.to_string().into())
    }
}
