//! Throw-away repositories for tests.
//!
//! History:
//!
//! ```text
//! foo ── bar        (main, HEAD)
//!   └─── baz        (branch)
//! ```
use std::path::Path;

use git2::{Oid, Repository, RepositoryInitOptions, Signature, Time};
use tempfile::TempDir;

pub const FOO_TIME: i64 = 1673354096; // 2023-01-10T12:34:56Z
pub const BAR_TIME: i64 = 1675589532; // 2023-02-05T09:32:12Z
pub const BAZ_TIME: i64 = 1675762330; // 2023-02-07T09:32:10Z

pub const NESTED_CONTENTS: &[u8] = b"nested file\n";
pub const SCRIPT_CONTENTS: &[u8] = b"#!/bin/sh\necho hello\n";
/// A latin-1 encoded file name in baz's tree, which isn't valid UTF-8.
pub const LATIN1_NAME: &[u8] = b"caf\xe9";

pub struct TestRepo {
    dir: TempDir,
    pub foo: Oid,
    pub bar: Oid,
    pub baz: Oid,
}

fn signature(time: i64) -> Signature<'static> {
    Signature::new("Aaa Bbb", "foo@bar.com", &Time::new(time, 0)).expect("valid signature")
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let repo = Repository::init_opts(
            dir.path(),
            RepositoryInitOptions::new().bare(true).initial_head("main"),
        )
        .expect("init");

        // foo: a single file
        let foo_tree = {
            let mut tb = repo.treebuilder(None).unwrap();
            tb.insert("foo", repo.blob(b"foo").unwrap(), 0o100644).unwrap();
            tb.write().unwrap()
        };
        let foo = commit(&repo, "refs/heads/main", "foo\n", FOO_TIME, foo_tree, &[]);

        // bar: a little bit of everything
        let bar_tree = {
            let nested = {
                let mut tb = repo.treebuilder(None).unwrap();
                tb.insert("nested", repo.blob(NESTED_CONTENTS).unwrap(), 0o100644)
                    .unwrap();
                tb.write().unwrap()
            };
            let mut tb = repo.treebuilder(None).unwrap();
            tb.insert("foo", repo.blob(b"foo").unwrap(), 0o100644).unwrap();
            tb.insert("bar", repo.blob(b"bar").unwrap(), 0o100644).unwrap();
            tb.insert("dir", nested, 0o040000).unwrap();
            tb.insert("link", repo.blob(b"foo").unwrap(), 0o120000)
                .unwrap();
            tb.insert("run.sh", repo.blob(SCRIPT_CONTENTS).unwrap(), 0o100755)
                .unwrap();
            // a submodule, pinned to some commit
            tb.insert("vendor", foo, 0o160000).unwrap();
            tb.write().unwrap()
        };
        let bar = commit(&repo, "refs/heads/main", "bar\n", BAR_TIME, bar_tree, &[foo]);

        // baz: on "branch", forked from foo
        let baz_tree = {
            let mut tb = repo.treebuilder(None).unwrap();
            tb.insert("foo", repo.blob(b"foo").unwrap(), 0o100644).unwrap();
            tb.insert("baz", repo.blob(b"baz").unwrap(), 0o100644).unwrap();
            tb.insert(LATIN1_NAME.to_vec(), repo.blob(b"latin-1").unwrap(), 0o100644)
                .unwrap();
            tb.write().unwrap()
        };
        let baz = commit(&repo, "refs/heads/branch", "baz\n", BAZ_TIME, baz_tree, &[foo]);

        Self { dir, foo, bar, baz }
    }

    /// A repository without any commits, so HEAD points to an unborn
    /// branch.
    pub fn empty() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        Repository::init_opts(
            dir.path(),
            RepositoryInitOptions::new().bare(true).initial_head("main"),
        )
        .expect("init");
        dir
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn open(&self) -> Repository {
        Repository::open(self.path()).expect("open")
    }

    /// Adds a commit on top of the given branch, reusing the tip's tree.
    pub fn commit_on(&self, branch: &str, message: &str, time: i64) -> Oid {
        let repo = self.open();
        let refname = format!("refs/heads/{}", branch);
        let parent = repo
            .find_reference(&refname)
            .and_then(|r| r.peel_to_commit())
            .expect("branch tip");
        commit(&repo, &refname, message, time, parent.tree_id(), &[parent.id()])
    }

    /// Points a (possibly new) branch at the given commit.
    pub fn set_branch(&self, branch: &str, target: Oid) {
        self.open()
            .reference(&format!("refs/heads/{}", branch), target, true, "test")
            .expect("set reference");
    }
}

fn commit(
    repo: &Repository,
    refname: &str,
    message: &str,
    time: i64,
    tree: Oid,
    parents: &[Oid],
) -> Oid {
    let sig = signature(time);
    let tree = repo.find_tree(tree).unwrap();
    let parents: Vec<_> = parents
        .iter()
        .map(|id| repo.find_commit(*id).unwrap())
        .collect();
    let parents: Vec<_> = parents.iter().collect();
    repo.commit(Some(refname), &sig, &sig, message, &tree, &parents)
        .expect("commit")
}
