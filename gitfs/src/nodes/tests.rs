use std::sync::Arc;

use bytes::Bytes;
use git2::Oid;
use rstest::rstest;

use super::{CommitLogNode, FileAttr, LogOptions};
use crate::{
    dir_stream::DirEntry,
    environment::Environment,
    fixtures::{
        TestRepo, BAR_TIME, BAZ_TIME, FOO_TIME, LATIN1_NAME, NESTED_CONTENTS, SCRIPT_CONTENTS,
    },
    inodes::{Inode, NodeKind, StableAttr},
    repo::Repo,
    Error,
};

/// A repository and the node graph on top of it.
///
/// Listings block on the producers, so the helpers must be called from
/// outside the runtime.
struct TestFs {
    repo: TestRepo,
    env: Arc<Environment>,
    _rt: tokio::runtime::Runtime,
}

impl TestFs {
    fn new() -> Self {
        let repo = TestRepo::new();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let env = Environment::new(Repo::open(repo.path()).unwrap(), rt.handle().clone());
        Self {
            repo,
            env,
            _rt: rt,
        }
    }

    /// Resolves a path relative to the root, without following symlinks.
    fn lookup(&self, path: &str) -> Result<Arc<Inode>, Error> {
        let mut inode = self.env.root().clone();
        for name in path.split('/').filter(|name| !name.is_empty()) {
            let resolver = inode
                .node()
                .as_resolver()
                .ok_or_else(|| Error::NotFound(format!("{} in a non-directory", name)))?;
            inode = resolver.lookup(&self.env, &inode, name.as_bytes())?;
        }
        Ok(inode)
    }

    fn list_inode(&self, inode: &Inode) -> Vec<DirEntry> {
        let mut stream = inode
            .node()
            .as_lister()
            .expect("must be a directory")
            .readdir(&self.env, inode)
            .expect("must open");

        let mut entries = Vec::new();
        while stream.has_next() {
            entries.push(stream.next().expect("must not fail"));
        }
        stream.close();
        entries
    }

    fn list(&self, path: &str) -> Vec<DirEntry> {
        self.list_inode(&self.lookup(path).expect("must exist"))
    }

    fn names(&self, path: &str) -> Vec<String> {
        self.list(path)
            .into_iter()
            .map(|e| String::from_utf8_lossy(&e.name).into_owned())
            .collect()
    }

    fn read(&self, path: &str) -> Bytes {
        let inode = self.lookup(path).expect("must exist");
        let reader = inode.node().as_reader().expect("must be a file");
        reader.contents(&self.env).expect("must read")
    }

    fn readlink(&self, path: &str) -> String {
        let inode = self.lookup(path).expect("must exist");
        let target = inode
            .node()
            .as_symlink()
            .expect("must be a symlink")
            .readlink(&self.env)
            .expect("must read");
        String::from_utf8(target.to_vec()).unwrap()
    }

    fn attr(&self, path: &str) -> FileAttr {
        let inode = self.lookup(path).expect("must exist");
        inode.node().getattr(&self.env).expect("must stat")
    }
}

fn hex(id: Oid) -> String {
    id.to_string()
}

#[test]
fn root() {
    let fs = TestFs::new();

    assert_eq!(vec!["branches", "commits"], fs.names(""));
    for dir in ["", "branches", "commits"] {
        assert_eq!(FileAttr::directory(BAR_TIME), fs.attr(dir), "{}", dir);
    }
    assert!(matches!(fs.lookup("nope"), Err(Error::NotFound(_))));
}

/// Listed inode numbers must be the ones lookups return.
#[rstest]
#[case::root("")]
#[case::commits("commits")]
#[case::branches("branches")]
#[case::branch("branches/main")]
#[case::tree("commits/bar/tree")]
#[case::log("commits/bar/log")]
#[case::parents("commits/bar/parents")]
#[case::latin1_tree("commits/baz/tree")]
fn listing_matches_lookup(#[case] path: &str) {
    let fs = TestFs::new();
    let path = path
        .replace("bar", &hex(fs.repo.bar))
        .replace("baz", &hex(fs.repo.baz));
    let dir = fs.lookup(&path).expect("must exist");
    let resolver = dir.node().as_resolver().expect("must be a directory");

    for entry in fs.list_inode(&dir) {
        let child = resolver
            .lookup(&fs.env, &dir, &entry.name)
            .expect("listed entries must resolve");
        assert_eq!(entry.ino, child.ino(), "{}", entry.name.escape_ascii());
        assert_eq!(entry.kind, child.kind(), "{}", entry.name.escape_ascii());
    }
}

/// The commit listing of a repository without commits is empty, and has no
/// HEAD either.
#[test]
fn unborn_head() {
    let dir = TestRepo::empty();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let env = Environment::new(Repo::open(dir.path()).unwrap(), rt.handle().clone());
    let root = env.root().clone();

    assert_eq!(FileAttr::directory(0), root.node().getattr(&env).unwrap());

    let commits = root
        .node()
        .as_resolver()
        .unwrap()
        .lookup(&env, &root, b"commits")
        .unwrap();
    let mut stream = commits
        .node()
        .as_lister()
        .unwrap()
        .readdir(&env, &commits)
        .expect("must open");
    assert!(!stream.has_next());
    stream.close();

    assert!(matches!(
        commits
            .node()
            .as_resolver()
            .unwrap()
            .lookup(&env, &commits, b"HEAD"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn commit_listing() {
    let fs = TestFs::new();

    // HEAD first, then newest first
    assert_eq!(
        vec![
            "HEAD".to_string(),
            hex(fs.repo.baz),
            hex(fs.repo.bar),
            hex(fs.repo.foo)
        ],
        fs.names("commits")
    );
    assert_eq!(hex(fs.repo.bar), fs.readlink("commits/HEAD"));
}

#[rstest]
#[case::short("commits/abc")]
#[case::unknown("commits/0123456789abcdef0123456789abcdef01234567")]
#[case::not_hex("commits/zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz")]
#[case::branch("branches/nope")]
#[case::invalid_branch("branches/..")]
fn unknown_names(#[case] path: &str) {
    let fs = TestFs::new();
    assert!(matches!(fs.lookup(path), Err(Error::NotFound(_))));
}

#[test]
fn branches() {
    let fs = TestFs::new();

    let mut names = fs.names("branches");
    names.sort();
    assert_eq!(vec!["branch", "main"], names);

    assert_eq!(
        vec!["HEAD".to_string(), hex(fs.repo.bar), hex(fs.repo.foo)],
        fs.names("branches/main")
    );
    assert_eq!(hex(fs.repo.bar), fs.readlink("branches/main/HEAD"));
    assert_eq!(hex(fs.repo.baz), fs.readlink("branches/branch/HEAD"));
    assert_eq!(FileAttr::directory(BAZ_TIME), fs.attr("branches/branch"));

    // commits show up as directories on branches
    let bar = fs.lookup(&format!("branches/main/{}", hex(fs.repo.bar))).unwrap();
    assert_eq!(NodeKind::Directory, bar.kind());
}

/// Branches with a slash in their name can't be presented as a single
/// directory, and are left out of listings.
#[test]
fn nested_branch_names() {
    let fs = TestFs::new();
    fs.repo.set_branch("feature/x", fs.repo.foo);

    let mut names = fs.names("branches");
    names.sort();
    assert_eq!(vec!["branch", "main"], names);
}

#[test]
fn commit_contents() {
    let fs = TestFs::new();
    let bar = format!("commits/{}", hex(fs.repo.bar));
    let foo = format!("commits/{}", hex(fs.repo.foo));

    assert_eq!(
        vec!["hash", "message", "parent", "parents", "log", "tree"],
        fs.names(&bar)
    );
    // the root commit has no parent
    assert_eq!(
        vec!["hash", "message", "parents", "log", "tree"],
        fs.names(&foo)
    );
    assert!(matches!(
        fs.lookup(&format!("{}/parent", foo)),
        Err(Error::NotFound(_))
    ));

    assert_eq!(&b"bar\n"[..], &fs.read(&format!("{}/message", bar))[..]);
    assert_eq!(hex(fs.repo.bar).as_bytes(), &fs.read(&format!("{}/hash", bar))[..]);
    assert_eq!(
        FileAttr::file(40, BAR_TIME),
        fs.attr(&format!("{}/hash", bar))
    );

    assert_eq!(
        format!("../{}", hex(fs.repo.foo)),
        fs.readlink(&format!("{}/parent", bar))
    );
    // the parent symlink carries the parent's time
    assert_eq!(FOO_TIME, fs.attr(&format!("{}/parent", bar)).time);
    assert_eq!(FileAttr::directory(BAR_TIME), fs.attr(&bar));
}

#[test]
fn commit_ranges() {
    let fs = TestFs::new();
    let bar = format!("commits/{}", hex(fs.repo.bar));

    // parents are the direct parents, as symlinks to siblings of bar
    let parents = fs.list(&format!("{}/parents", bar));
    assert_eq!(1, parents.len());
    assert_eq!(hex(fs.repo.foo).as_bytes(), &parents[0].name[..]);
    assert_eq!(NodeKind::Symlink, parents[0].kind);
    assert_eq!(
        format!("../../{}", hex(fs.repo.foo)),
        fs.readlink(&format!("{}/parents/{}", bar, hex(fs.repo.foo)))
    );

    // log includes bar itself
    assert_eq!(
        vec![hex(fs.repo.bar), hex(fs.repo.foo)],
        fs.names(&format!("{}/log", bar))
    );
    assert_eq!(
        format!("../../{}", hex(fs.repo.bar)),
        fs.readlink(&format!("{}/log/{}", bar, hex(fs.repo.bar)))
    );

    // commits outside the range don't resolve
    for path in [
        format!("{}/log/{}", bar, hex(fs.repo.baz)),
        format!("{}/parents/{}", bar, hex(fs.repo.bar)),
        format!("{}/log/HEAD", bar),
    ] {
        assert!(matches!(fs.lookup(&path), Err(Error::NotFound(_))), "{}", path);
    }
}

struct LogExpectation {
    commits: &'static [&'static str],
    head_link: bool,
    symlink_prefix: Option<&'static str>,
}

#[rstest]
#[case::from_bar("bar", LogOptions { link_levels: 0, include_head: true, symlink_head: false },
    LogExpectation { commits: &["bar", "foo"], head_link: false, symlink_prefix: None })]
#[case::from_baz("baz", LogOptions { link_levels: 0, include_head: true, symlink_head: false },
    LogExpectation { commits: &["baz", "foo"], head_link: false, symlink_prefix: None })]
#[case::no_head("bar", LogOptions { link_levels: 0, include_head: false, symlink_head: false },
    LogExpectation { commits: &["foo"], head_link: false, symlink_prefix: None })]
#[case::head_symlink("bar", LogOptions { link_levels: 0, include_head: true, symlink_head: true },
    LogExpectation { commits: &["bar", "foo"], head_link: true, symlink_prefix: None })]
#[case::symlinks("bar", LogOptions { link_levels: 2, include_head: true, symlink_head: false },
    LogExpectation { commits: &["bar", "foo"], head_link: false, symlink_prefix: Some("../../") })]
fn commit_log(#[case] from: &str, #[case] opts: LogOptions, #[case] expected: LogExpectation) {
    let fs = TestFs::new();
    let id = |name: &str| match name {
        "foo" => fs.repo.foo,
        "bar" => fs.repo.bar,
        "baz" => fs.repo.baz,
        _ => unreachable!(),
    };

    let commit = fs.env.repo().commit(id(from)).unwrap();
    let inode = fs.env.inodes().insert(
        StableAttr { ino: 1000, gen: 0 },
        Arc::new(CommitLogNode::new(&commit, opts)),
    );
    let resolver = inode.node().as_resolver().unwrap();

    let mut expected_names: Vec<String> = expected.commits.iter().map(|c| hex(id(c))).collect();
    if expected.head_link {
        expected_names.insert(0, "HEAD".into());
    }
    let names: Vec<String> = fs
        .list_inode(&inode)
        .into_iter()
        .map(|e| String::from_utf8(e.name.to_vec()).unwrap())
        .collect();
    assert_eq!(expected_names, names);

    if expected.head_link {
        let head = resolver.lookup(&fs.env, &inode, b"HEAD").unwrap();
        let target = head.node().as_symlink().unwrap().readlink(&fs.env).unwrap();
        assert_eq!(hex(id(from)).as_bytes(), &target[..]);
    } else {
        assert!(resolver.lookup(&fs.env, &inode, b"HEAD").is_err());
    }

    let first = hex(id(expected.commits[0]));
    let child = resolver.lookup(&fs.env, &inode, first.as_bytes()).unwrap();
    match expected.symlink_prefix {
        Some(prefix) => {
            assert_eq!(NodeKind::Symlink, child.kind());
            let target = child.node().as_symlink().unwrap().readlink(&fs.env).unwrap();
            assert_eq!(format!("{}{}", prefix, first).as_bytes(), &target[..]);
        }
        None => assert_eq!(NodeKind::Directory, child.kind()),
    }
}

/// A commit reached through different ranges is the same node.
#[test]
fn commits_are_shared() {
    let fs = TestFs::new();
    let foo = hex(fs.repo.foo);

    let via_commits = fs.lookup(&format!("commits/{}", foo)).unwrap();
    let via_main = fs.lookup(&format!("branches/main/{}", foo)).unwrap();
    let via_branch = fs.lookup(&format!("branches/branch/{}", foo)).unwrap();

    assert!(Arc::ptr_eq(&via_commits, &via_main));
    assert!(Arc::ptr_eq(&via_commits, &via_branch));
    assert_eq!(via_commits.ino(), fs.env.commit_ino(fs.repo.foo));

    // and so is everything below
    let log_a = fs.lookup(&format!("commits/{}/log", foo)).unwrap();
    let log_b = fs.lookup(&format!("branches/branch/{}/log", foo)).unwrap();
    assert!(Arc::ptr_eq(&log_a, &log_b));
}

/// A commit showing up in several logs is presented by one symlink, no
/// matter how often the logs are listed.
#[test]
fn logs_share_commit_links() {
    let fs = TestFs::new();
    let foo = hex(fs.repo.foo);

    let foo_in = |dir: String| {
        let entry = fs
            .list(&dir)
            .into_iter()
            .find(|e| &e.name[..] == foo.as_bytes())
            .expect("foo must be listed");
        let link = fs.lookup(&format!("{}/{}", dir, foo)).unwrap();
        assert_eq!(entry.ino, link.ino());
        link
    };

    let bar_log = foo_in(format!("commits/{}/log", hex(fs.repo.bar)));
    let baz_log = foo_in(format!("commits/{}/log", hex(fs.repo.baz)));
    let bar_parents = foo_in(format!("commits/{}/parents", hex(fs.repo.bar)));
    assert!(Arc::ptr_eq(&bar_log, &baz_log));
    assert!(Arc::ptr_eq(&bar_log, &bar_parents));

    let inodes = fs.env.inodes().len();
    for _ in 0..3 {
        let again = foo_in(format!("branches/main/{}/log", hex(fs.repo.bar)));
        assert!(Arc::ptr_eq(&bar_log, &again));
    }
    assert_eq!(inodes, fs.env.inodes().len());
}

/// Tree entry names are bytes, and don't need to be UTF-8.
#[test]
fn non_utf8_names() {
    let fs = TestFs::new();
    let tree = fs
        .lookup(&format!("commits/{}/tree", hex(fs.repo.baz)))
        .unwrap();
    let resolver = tree.node().as_resolver().unwrap();

    let entry = fs
        .list_inode(&tree)
        .into_iter()
        .find(|e| &e.name[..] == LATIN1_NAME)
        .expect("must be listed with its raw name");
    let file = resolver.lookup(&fs.env, &tree, LATIN1_NAME).unwrap();
    assert_eq!(entry.ino, file.ino());
    assert_eq!(
        &b"latin-1"[..],
        &file.node().as_reader().unwrap().contents(&fs.env).unwrap()[..]
    );

    // the lossy spelling is another name
    assert!(matches!(
        resolver.lookup(&fs.env, &tree, "caf\u{fffd}".as_bytes()),
        Err(Error::NotFound(_))
    ));

    // names the filesystem generates itself are never like that
    let commits = fs.lookup("commits").unwrap();
    assert!(matches!(
        commits
            .node()
            .as_resolver()
            .unwrap()
            .lookup(&fs.env, &commits, LATIN1_NAME),
        Err(Error::NotFound(_))
    ));
}

/// A new commit on main shows up everywhere, rebuilding the branch.
#[test]
fn branch_moves() {
    let fs = TestFs::new();
    let bar = fs.lookup(&format!("commits/{}", hex(fs.repo.bar))).unwrap();
    let main = fs.lookup("branches/main").unwrap();
    let head = fs.lookup("branches/main/HEAD").unwrap();

    let qux = fs.repo.commit_on("main", "qux\n", BAZ_TIME + 60);

    assert_eq!(hex(qux), fs.names("commits")[1]);
    assert_eq!(hex(qux), fs.readlink("commits/HEAD"));

    let moved = fs.lookup("branches/main").unwrap();
    assert_eq!(main.ino(), moved.ino());
    assert_eq!(main.gen() + 1, moved.gen());
    assert_eq!(hex(qux), fs.readlink("branches/main/HEAD"));
    assert_eq!(hex(qux), fs.names("branches/main")[1]);

    // children of the rebuilt branch are new
    let moved_head = fs.lookup("branches/main/HEAD").unwrap();
    assert_ne!(head.ino(), moved_head.ino());

    // old commits are untouched
    let bar_again = fs.lookup(&format!("commits/{}", hex(fs.repo.bar))).unwrap();
    assert!(Arc::ptr_eq(&bar, &bar_again));
    let bar_on_main = fs.lookup(&format!("branches/main/{}", hex(fs.repo.bar))).unwrap();
    assert!(Arc::ptr_eq(&bar, &bar_on_main));

    // an unchanged branch is not rebuilt
    let again = fs.lookup("branches/main").unwrap();
    assert!(Arc::ptr_eq(&moved, &again));
}

#[test]
fn tree() {
    let fs = TestFs::new();
    let tree = format!("commits/{}/tree", hex(fs.repo.bar));

    // the submodule is hidden
    assert_eq!(
        vec!["bar", "dir", "foo", "link", "run.sh"],
        fs.names(&tree)
    );
    assert_eq!(vec!["nested"], fs.names(&format!("{}/dir", tree)));

    assert_eq!(&b"foo"[..], &fs.read(&format!("{}/foo", tree))[..]);
    assert_eq!(NESTED_CONTENTS, &fs.read(&format!("{}/dir/nested", tree))[..]);
    assert_eq!("foo", fs.readlink(&format!("{}/link", tree)));

    assert_eq!(
        FileAttr::file(3, BAR_TIME),
        fs.attr(&format!("{}/foo", tree))
    );
    assert_eq!(
        FileAttr::executable(SCRIPT_CONTENTS.len() as u64, BAR_TIME),
        fs.attr(&format!("{}/run.sh", tree))
    );
    assert_eq!(
        FileAttr::directory(BAR_TIME),
        fs.attr(&format!("{}/dir", tree))
    );

    assert!(matches!(
        fs.lookup(&format!("{}/vendor", tree)),
        Err(Error::UnsupportedObject { .. })
    ));
    assert!(matches!(
        fs.lookup(&format!("{}/nope", tree)),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn children_keep_identity() {
    let fs = TestFs::new();
    let path = format!("commits/{}/tree/dir/nested", hex(fs.repo.bar));

    let a = fs.lookup(&path).unwrap();
    let b = fs.lookup(&path).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}
