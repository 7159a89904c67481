use std::sync::Arc;

use git2::Oid;
use tokio::runtime::Handle;
use tracing::info;

use crate::{
    branch_cache::BranchCache,
    inodes::{InoStore, Inode, InodeCache, InodeTable, StableAttr, ROOT_INO},
    nodes::{commit_link, CommitNode, Node, RootNode},
    repo::{BranchRef, CommitInfo, Repo},
    Error,
};

/// First inode number of commit nodes.
pub const COMMIT_INO_BASE: u64 = 2 << 60;
/// First inode number of symlinks to commits.
pub const LINK_INO_BASE: u64 = 3 << 59;
/// First inode number of branch nodes.
pub const BRANCH_INO_BASE: u64 = 2 << 59;
/// First inode number of every other node.
const NODE_INO_BASE: u64 = ROOT_INO + 1;

/// Environment holds the state shared by all nodes of one mounted
/// repository: the repository itself, the inode table requests are
/// dispatched through, and the caches handing out node identities.
pub struct Environment {
    repo: Repo,
    inodes: InodeTable,

    /// Identities of nodes that are neither commits nor branches, keyed by
    /// parent identity and name.
    node_ids: InoStore,
    /// Commits never change, so nodes built in here live as long as the
    /// process.
    commits: InodeCache,
    /// Symlinks into commits/, keyed by how far up they point and the
    /// commit. Shared by all logs, so listing histories doesn't allocate
    /// per listing.
    links: InodeCache,
    branches: BranchCache,

    root: Arc<Inode>,

    tokio_handle: Handle,
}

impl Environment {
    /// Sets up an environment for `repo`, with the root node registered at
    /// [ROOT_INO]. Listings are produced on `tokio_handle`'s blocking pool.
    pub fn new(repo: Repo, tokio_handle: Handle) -> Arc<Self> {
        info!(repo.path = %repo.path().display(), "setting up filesystem");

        let inodes = InodeTable::default();
        let root = inodes.insert(
            StableAttr {
                ino: ROOT_INO,
                gen: 0,
            },
            Arc::new(RootNode),
        );

        Arc::new(Self {
            repo,
            inodes,
            node_ids: InoStore::new(NODE_INO_BASE),
            commits: InodeCache::new(COMMIT_INO_BASE),
            links: InodeCache::new(LINK_INO_BASE),
            branches: BranchCache::new(BRANCH_INO_BASE),
            root,
            tokio_handle,
        })
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn root(&self) -> &Arc<Inode> {
        &self.root
    }

    pub fn tokio_handle(&self) -> &Handle {
        &self.tokio_handle
    }

    /// The inode number the child `name` of `parent` is presented with.
    pub fn child_ino(&self, parent: StableAttr, name: impl AsRef<[u8]>) -> u64 {
        self.node_ids
            .get_or_insert(&parent.child_key(name.as_ref()), false)
            .ino
    }

    /// Returns the child `name` of `parent`, building it if it wasn't
    /// looked up before. As long as `parent` isn't rebuilt, its children
    /// keep their identity.
    pub fn child<F>(
        &self,
        parent: &Inode,
        name: impl AsRef<[u8]>,
        builder: F,
    ) -> Result<Arc<Inode>, Error>
    where
        F: FnOnce() -> Result<Arc<dyn Node>, Error>,
    {
        let attr = self
            .node_ids
            .get_or_insert(&parent.child_key(name.as_ref()), false);
        self.inodes.get_or_insert_with(attr, builder)
    }

    /// The inode number the commit `id` is presented with, wherever it
    /// shows up.
    pub fn commit_ino(&self, id: Oid) -> u64 {
        self.commits
            .ino_store()
            .get_or_insert(&id.to_string(), false)
            .ino
    }

    /// Returns the node presenting the commit `id`, loading the commit on
    /// first access.
    pub fn commit_node(&self, id: Oid) -> Result<Arc<Inode>, Error> {
        self.commits.get_or_build(
            &id.to_string(),
            &self.inodes,
            || {
                let commit = self.repo.commit(id)?;
                info!(commit = %id, message = %summary(&commit), "creating node for commit");
                Ok(Arc::new(CommitNode::new(commit)) as Arc<dyn Node>)
            },
            false,
        )
    }

    /// The inode number of the symlink going up `levels` directories and
    /// into the commit `id`.
    pub fn commit_link_ino(&self, levels: usize, id: Oid) -> u64 {
        self.links
            .ino_store()
            .get_or_insert(&link_key(levels, id), false)
            .ino
    }

    /// Returns the symlink going up `levels` directories and into the
    /// commit `id`, which must exist.
    pub fn commit_link(&self, levels: usize, id: Oid) -> Result<Arc<Inode>, Error> {
        self.links.get_or_build(
            &link_key(levels, id),
            &self.inodes,
            || Ok(commit_link(levels, &self.repo.commit(id)?)),
            false,
        )
    }

    /// The inode number the branch `short_name` is presented with.
    pub fn branch_ino(&self, short_name: &str) -> u64 {
        self.branches.ino(short_name)
    }

    /// Returns the node presenting `branch` at its current target, and that
    /// target.
    pub fn branch_node(&self, branch: &BranchRef) -> Result<(CommitInfo, Arc<Inode>), Error> {
        self.branches
            .get_or_insert(&self.repo, &self.inodes, branch)
    }
}

fn link_key(levels: usize, id: Oid) -> String {
    format!("{}/{}", levels, id)
}

/// The first line of the commit message, for logging.
fn summary(commit: &CommitInfo) -> String {
    let message = String::from_utf8_lossy(&commit.message);
    message.lines().next().unwrap_or_default().to_owned()
}
