//! Read-only access to the git object store.
//!
//! git2 objects borrow the [git2::Repository] they were loaded from, so
//! everything handed out of here is an owned snapshot ([CommitInfo],
//! [TreeEntryInfo], [BranchRef]) that nodes can keep for their lifetime.
use std::path::{Path, PathBuf};

use bytes::Bytes;
use git2::{ObjectType, Oid, Sort};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::Error;

const BRANCH_PREFIX: &str = "refs/heads/";

/// Everything the filesystem needs to know about a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: Oid,
    /// Raw message, including a trailing newline if there is one.
    pub message: Bytes,
    /// Author time, in seconds since the epoch.
    pub time: i64,
    pub parents: Vec<Oid>,
    pub tree: Oid,
}

impl From<&git2::Commit<'_>> for CommitInfo {
    fn from(commit: &git2::Commit<'_>) -> Self {
        CommitInfo {
            id: commit.id(),
            message: Bytes::copy_from_slice(commit.message_raw_bytes()),
            time: commit.author().when().seconds(),
            parents: commit.parent_ids().collect(),
            tree: commit.tree_id(),
        }
    }
}

/// A resolved reference: its full name and the object it points to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub target: Oid,
}

impl BranchRef {
    pub fn is_branch(&self) -> bool {
        self.name.starts_with(BRANCH_PREFIX)
    }

    /// The name without the `refs/heads/` prefix.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix(BRANCH_PREFIX).unwrap_or(&self.name)
    }
}

/// How a tree entry is represented in the filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular { executable: bool },
    Symlink,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntryInfo {
    /// Raw name bytes. git doesn't require names to be UTF-8.
    pub name: Bytes,
    pub id: Oid,
    pub mode: i32,
}

impl TreeEntryInfo {
    /// Classifies the entry mode, failing for anything without a
    /// filesystem representation (e.g. gitlinks).
    pub fn kind(&self) -> Result<EntryKind, Error> {
        match self.mode {
            0o040000 => Ok(EntryKind::Directory),
            0o100644 | 0o100664 => Ok(EntryKind::Regular { executable: false }),
            0o100755 => Ok(EntryKind::Regular { executable: true }),
            0o120000 => Ok(EntryKind::Symlink),
            mode => Err(Error::UnsupportedObject {
                name: self.name.escape_ascii().to_string(),
                mode,
            }),
        }
    }
}

impl From<&git2::TreeEntry<'_>> for TreeEntryInfo {
    fn from(entry: &git2::TreeEntry<'_>) -> Self {
        TreeEntryInfo {
            name: Bytes::copy_from_slice(entry.name_bytes()),
            id: entry.id(),
            mode: entry.filemode(),
        }
    }
}

/// Parses a full 40 character hex commit id. git2 also accepts (and zero
/// pads) prefixes, which must not resolve here.
pub fn parse_oid(name: &str) -> Option<Oid> {
    if name.len() != 40 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Oid::from_str(name).ok()
}

/// Walks every commit reachable from any reference or HEAD, newest first.
pub fn walk_all(repo: &git2::Repository) -> Result<git2::Revwalk<'_>, Error> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;
    walk.push_glob("*")?;
    // An unborn or detached HEAD is not an error for the listing.
    if let Err(e) = walk.push_head() {
        debug!(err = %e, "not walking from HEAD");
    }
    Ok(walk)
}

/// Walks `from` and all its ancestors, newest first.
pub fn walk_from(repo: &git2::Repository, from: Oid) -> Result<git2::Revwalk<'_>, Error> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;
    walk.push(from)?;
    Ok(walk)
}

/// Iterates local branches, yielding resolved references.
pub fn local_branches(
    repo: &git2::Repository,
) -> Result<impl Iterator<Item = Result<BranchRef, Error>> + '_, Error> {
    Ok(repo
        .branches(Some(git2::BranchType::Local))?
        .map(|branch| {
            let (branch, _) = branch?;
            branch_ref(branch.get())
        }))
}

/// Fails with [Error::NotFound] for names that aren't UTF-8, as those can't
/// be looked up by name again.
fn branch_ref(reference: &git2::Reference<'_>) -> Result<BranchRef, Error> {
    let name = reference
        .name()
        .ok_or_else(|| {
            Error::NotFound(format!(
                "UTF-8 name of reference {}",
                reference.name_bytes().escape_ascii()
            ))
        })?
        .to_owned();
    let resolved = reference.resolve()?;
    let target = resolved
        .target()
        .ok_or_else(|| Error::NotFound(format!("target of {}", name)))?;
    Ok(BranchRef { name, target })
}

/// HEAD, treating an unborn branch as a missing object.
fn head(repo: &git2::Repository) -> Result<git2::Reference<'_>, Error> {
    repo.head().map_err(|e| match e.code() {
        git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound => {
            Error::NotFound("HEAD".into())
        }
        _ => Error::Repository(e),
    })
}

/// A shared, read-only repository handle.
///
/// Lookups from concurrent kernel requests serialize on the inner handle;
/// long-running walks open their own handle with [Repo::reopen].
pub struct Repo {
    path: PathBuf,
    handle: Mutex<git2::Repository>,
}

impl Repo {
    #[instrument(err)]
    pub fn open(path: &Path) -> Result<Self, Error> {
        let handle = git2::Repository::open(path).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => {
                Error::NotFound(format!("repository at {}", path.display()))
            }
            _ => Error::Repository(e),
        })?;

        Ok(Self {
            path: handle.path().to_path_buf(),
            handle: Mutex::new(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens an independent handle on the same repository.
    pub fn reopen(&self) -> Result<git2::Repository, Error> {
        Ok(git2::Repository::open(&self.path)?)
    }

    pub fn head_commit(&self) -> Result<CommitInfo, Error> {
        let repo = self.handle.lock();
        let commit = head(&repo)?.peel_to_commit()?;
        Ok((&commit).into())
    }

    pub fn head_id(&self) -> Result<Oid, Error> {
        let repo = self.handle.lock();
        let head = head(&repo)?.resolve()?;
        head.target()
            .ok_or_else(|| Error::NotFound("target of HEAD".into()))
    }

    pub fn commit(&self, id: Oid) -> Result<CommitInfo, Error> {
        let repo = self.handle.lock();
        let commit = repo.find_commit(id).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => Error::NotFound(format!("commit {}", id)),
            _ => Error::Repository(e),
        })?;
        Ok((&commit).into())
    }

    /// Resolves the local branch with the given short name.
    pub fn branch(&self, name: &str) -> Result<BranchRef, Error> {
        let full = format!("{}{}", BRANCH_PREFIX, name);
        if !git2::Reference::is_valid_name(&full) {
            return Err(Error::NotFound(format!("branch {}", name)));
        }

        let repo = self.handle.lock();
        let reference = repo.find_reference(&full).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => Error::NotFound(format!("branch {}", name)),
            _ => Error::Repository(e),
        })?;
        branch_ref(&reference)
    }

    /// Whether `ancestor` is reachable from `descendant` through parent
    /// links. A commit is not its own ancestor.
    pub fn is_ancestor(&self, descendant: Oid, ancestor: Oid) -> Result<bool, Error> {
        let repo = self.handle.lock();
        match repo.graph_descendant_of(descendant, ancestor) {
            Ok(found) => Ok(found),
            // ancestor isn't in the object store at all
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(Error::Repository(e)),
        }
    }

    pub fn tree_entries(&self, tree: Oid) -> Result<Vec<TreeEntryInfo>, Error> {
        let repo = self.handle.lock();
        let tree = repo.find_tree(tree)?;
        Ok(tree.iter().map(|entry| (&entry).into()).collect())
    }

    pub fn tree_entry(&self, tree: Oid, name: &[u8]) -> Result<TreeEntryInfo, Error> {
        let repo = self.handle.lock();
        let tree = repo.find_tree(tree)?;
        let entry = tree
            .get_name_bytes(name)
            .ok_or_else(|| Error::NotFound(format!("tree entry {}", name.escape_ascii())))?;
        Ok((&entry).into())
    }

    /// Size of a blob, read from the object header only.
    pub fn blob_size(&self, id: Oid) -> Result<u64, Error> {
        let repo = self.handle.lock();
        let (size, kind) = repo.odb()?.read_header(id)?;
        if kind != ObjectType::Blob {
            return Err(Error::NotFound(format!("blob {}", id)));
        }
        Ok(size as u64)
    }

    pub fn blob(&self, id: Oid) -> Result<Bytes, Error> {
        let repo = self.handle.lock();
        let blob = repo.find_blob(id)?;
        Ok(Bytes::copy_from_slice(blob.content()))
    }
}
