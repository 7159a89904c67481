use std::{collections::HashMap, sync::Arc};

use git2::Oid;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    inodes::{Inode, InodeCache, InodeTable},
    nodes::{CommitLogNode, LogOptions, Node, BRANCH_VALID},
    repo::{BranchRef, CommitInfo, Repo},
    Error,
};

/// BranchCache keeps one node per branch, and rebuilds it whenever the
/// branch moved since the node was built.
///
/// Unlike commits, branches are mutable. A cached branch node stays valid
/// only as long as the branch points to the commit it was built from.
///
/// `last_commit` is held for the whole of [BranchCache::get_or_insert], so
/// checking and rebuilding a branch is one step. Under it, the repository
/// handle is taken and released first, then the [InodeCache] locks in their
/// own order. Nothing takes `last_commit` while holding any of those.
pub struct BranchCache {
    cache: InodeCache,
    /// The commit each branch pointed to when its node was last built.
    last_commit: Mutex<HashMap<String, Oid>>,
}

impl BranchCache {
    pub fn new(initial_ino: u64) -> Self {
        Self {
            cache: InodeCache::new(initial_ino),
            last_commit: Mutex::new(HashMap::new()),
        }
    }

    /// The inode a branch is (or will be) presented with.
    pub fn ino(&self, short_name: &str) -> u64 {
        self.cache.ino_store().get_or_insert(short_name, false).ino
    }

    /// Returns the commit `branch` currently points to, and the node
    /// presenting it. The node is rebuilt, with a new generation, if the
    /// branch moved since the last build.
    ///
    /// If the target commit can't be loaded, nothing is updated and a
    /// previously built node stays in place.
    ///
    /// # Panics
    /// If `branch` is not a local branch.
    #[instrument(skip_all, fields(branch.name = %branch.name, branch.target = %branch.target), err)]
    pub fn get_or_insert(
        &self,
        repo: &Repo,
        table: &InodeTable,
        branch: &BranchRef,
    ) -> Result<(CommitInfo, Arc<Inode>), Error> {
        let mut last_commit = self.last_commit.lock();

        if !branch.is_branch() {
            panic!("reference {} does not point to a branch", branch.name);
        }
        let name = branch.short_name();

        let last_hash = last_commit.get(name).copied().unwrap_or_else(Oid::zero);
        let overwrite = last_hash != branch.target;
        debug!(%last_hash, overwrite, "checking branch");

        let commit = repo.commit(branch.target)?;

        let node = self.cache.get_or_build(
            name,
            table,
            || {
                info!(branch = name, commit = %commit.id, "creating node for branch");
                let node = CommitLogNode::new(
                    &commit,
                    LogOptions {
                        link_levels: 0,
                        include_head: true,
                        symlink_head: true,
                    },
                )
                .with_timeout(BRANCH_VALID);
                last_commit.insert(name.to_owned(), commit.id);
                Ok(Arc::new(node) as Arc<dyn Node>)
            },
            overwrite,
        )?;

        Ok((commit, node))
    }
}
