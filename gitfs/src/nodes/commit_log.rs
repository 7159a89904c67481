use std::{sync::Arc, time::Duration};

use git2::Oid;

use super::{leaf::MemSymlink, utf8_name, FileAttr, Lister, Node, Resolver, COMMIT_VALID};
use crate::{
    dir_stream::{ChannelDirStream, DirEntry, DirStream, VecDirStream},
    environment::Environment,
    inodes::{Inode, NodeKind, StableAttr},
    repo::{self, parse_oid, CommitInfo},
    Error,
};

const HEAD: &str = "HEAD";

/// How a [CommitLogNode] is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// With 0, commits are presented as directories, sharing their node
    /// with every other place the commit shows up. Otherwise, commits are
    /// symlinks going up this many directories, and from there into a
    /// directory named after the commit.
    pub link_levels: usize,
    /// Whether the commit the log starts from is part of it.
    pub include_head: bool,
    /// Whether to add a `HEAD` symlink pointing to the commit the log
    /// starts from.
    pub symlink_head: bool,
}

/// The commits a [CommitLogNode] contains.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogRange {
    /// `from` and its ancestors, `from` itself only if `include_head`.
    Ancestors { from: Oid, include_head: bool },
    /// A fixed list of commits.
    Commits(Vec<Oid>),
}

/// A directory containing a range of commits, named by their hash.
pub struct CommitLogNode {
    from: Oid,
    range: LogRange,
    link_levels: usize,
    symlink_head: bool,
    attr: FileAttr,
    timeout: Duration,
}

impl CommitLogNode {
    /// The log starting at `from`, in the order of `git log`.
    pub fn new(from: &CommitInfo, opts: LogOptions) -> Self {
        Self {
            from: from.id,
            range: LogRange::Ancestors {
                from: from.id,
                include_head: opts.include_head,
            },
            link_levels: opts.link_levels,
            symlink_head: opts.symlink_head,
            attr: FileAttr::commit(from),
            timeout: COMMIT_VALID,
        }
    }

    /// The direct parents of `commit`.
    pub fn parents(commit: &CommitInfo, link_levels: usize) -> Self {
        Self {
            from: commit.id,
            range: LogRange::Commits(commit.parents.clone()),
            link_levels,
            symlink_head: false,
            attr: FileAttr::commit(commit),
            timeout: COMMIT_VALID,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn contains(&self, env: &Environment, id: Oid) -> Result<bool, Error> {
        match &self.range {
            LogRange::Ancestors { from, include_head } => {
                if id == *from {
                    Ok(*include_head)
                } else {
                    env.repo().is_ancestor(*from, id)
                }
            }
            LogRange::Commits(ids) => Ok(ids.contains(&id)),
        }
    }

    fn head_entry(&self, env: &Environment, this: StableAttr) -> Option<DirEntry> {
        self.symlink_head
            .then(|| DirEntry::new(HEAD, env.child_ino(this, HEAD), NodeKind::Symlink))
    }
}

/// The directory entry presenting commit `id` in a log with the given link
/// levels.
fn commit_entry(env: &Environment, link_levels: usize, id: Oid) -> DirEntry {
    let name = id.to_string();
    if link_levels == 0 {
        DirEntry::new(name, env.commit_ino(id), NodeKind::Directory)
    } else {
        let ino = env.commit_link_ino(link_levels, id);
        DirEntry::new(name, ino, NodeKind::Symlink)
    }
}

impl Node for CommitLogNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(self.attr)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_resolver(&self) -> Option<&dyn Resolver> {
        Some(self)
    }
}

impl Lister for CommitLogNode {
    fn readdir(&self, env: &Arc<Environment>, this: &Inode) -> Result<Box<dyn DirStream>, Error> {
        let this = this.stable_attr();
        let head = self.head_entry(env, this);
        let link_levels = self.link_levels;

        match &self.range {
            LogRange::Commits(ids) => Ok(Box::new(VecDirStream::new(
                head.into_iter()
                    .chain(
                        ids.iter()
                            .map(|id| commit_entry(env, link_levels, *id)),
                    )
                    .collect(),
            ))),
            LogRange::Ancestors { from, include_head } => {
                let (from, include_head) = (*from, *include_head);
                let tokio_handle = env.tokio_handle().clone();
                let env = env.clone();

                Ok(Box::new(ChannelDirStream::spawn(
                    &tokio_handle,
                    head,
                    move |sink| {
                        let repo = env.repo().reopen()?;
                        for id in repo::walk_from(&repo, from)? {
                            let id = id?;
                            if id == from && !include_head {
                                continue;
                            }
                            if !sink.send(commit_entry(&env, link_levels, id)) {
                                break;
                            }
                        }
                        Ok(())
                    },
                )))
            }
        }
    }
}

impl Resolver for CommitLogNode {
    fn lookup(
        &self,
        env: &Arc<Environment>,
        this: &Inode,
        name: &[u8],
    ) -> Result<Arc<Inode>, Error> {
        let name = utf8_name(name)?;
        if self.symlink_head && name == HEAD {
            let from = self.from;
            let time = self.attr.time;
            return env.child(this, HEAD, || {
                let target = from.to_string();
                Ok(Arc::new(
                    MemSymlink::new(target.into(), FileAttr::symlink(0, time))
                        .with_timeout(self.timeout),
                ) as Arc<dyn Node>)
            });
        }

        let not_found = || Error::NotFound(format!("commit {} in log of {}", name, self.from));
        let id = parse_oid(name).ok_or_else(not_found)?;
        if !self.contains(env, id)? {
            return Err(not_found());
        }

        if self.link_levels == 0 {
            env.commit_node(id)
        } else {
            env.commit_link(self.link_levels, id)
        }
    }
}
