use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use super::{InoStore, Inode, InodeTable};
use crate::{nodes::Node, Error};

/// InodeCache combines an [InoStore] with a map from key to the node last
/// built for that key.
///
/// Lock order is cache, then the [InoStore], then the [InodeTable]. Builders
/// run while the cache lock is held, so they must not call back into the
/// same cache.
pub struct InodeCache {
    ino_store: Arc<InoStore>,
    inodes: Mutex<HashMap<String, Arc<Inode>>>,
}

impl InodeCache {
    /// `initial_ino` is the first inode number handed out by this cache.
    /// Caches sharing a [InodeTable] must use disjoint ranges.
    pub fn new(initial_ino: u64) -> Self {
        Self {
            ino_store: Arc::new(InoStore::new(initial_ino)),
            inodes: Mutex::new(HashMap::new()),
        }
    }

    /// The allocator behind this cache. Directory listings use it to report
    /// inode numbers for entries that haven't been looked up yet.
    pub fn ino_store(&self) -> &Arc<InoStore> {
        &self.ino_store
    }

    pub fn get(&self, key: &str) -> Option<Arc<Inode>> {
        self.inodes.lock().get(key).cloned()
    }

    /// Returns the node cached under `key`.
    ///
    /// If the key is absent, or `overwrite` is set, `builder` constructs a
    /// new node, which gets registered in `table` under the key's identity
    /// (with a bumped generation if `overwrite` is set) and replaces the
    /// cached one. Otherwise `builder` is not called at all.
    ///
    /// If `builder` fails, neither the cache nor the identity are touched.
    pub fn get_or_build<F>(
        &self,
        key: &str,
        table: &InodeTable,
        builder: F,
        overwrite: bool,
    ) -> Result<Arc<Inode>, Error>
    where
        F: FnOnce() -> Result<Arc<dyn Node>, Error>,
    {
        let mut inodes = self.inodes.lock();

        if !overwrite {
            if let Some(inode) = inodes.get(key) {
                return Ok(inode.clone());
            }
        }

        let node = builder()?;
        let attr = self.ino_store.get_or_insert(key, overwrite);
        debug!(key, ino = attr.ino, gen = attr.gen, "registering node");

        let inode = table.insert(attr, node);
        inodes.insert(key.to_owned(), inode.clone());
        Ok(inode)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use rstest::rstest;

    use super::InodeCache;
    use crate::inodes::{InodeTable, NodeKind, StableAttr};
    use crate::nodes::{
        leaf::{MemFile, MemSymlink},
        FileAttr, Node,
    };
    use crate::Error;

    fn file() -> Result<Arc<dyn Node>, Error> {
        Ok(Arc::new(MemFile::new(
            b"x".as_slice().into(),
            FileAttr::default(),
        )))
    }

    fn symlink() -> Result<Arc<dyn Node>, Error> {
        Ok(Arc::new(MemSymlink::new("x".into(), FileAttr::default())))
    }

    #[test]
    fn sequence() {
        let cache = InodeCache::new(16);
        let table = InodeTable::default();

        // (name, key, overwrite, built kind, should build, expected attr, expected kind)
        let cases = [
            ("insert first", "a", false, NodeKind::Regular, true, (16, 0), NodeKind::Regular),
            ("repeat first", "a", false, NodeKind::Symlink, false, (16, 0), NodeKind::Regular),
            ("overwrite", "a", true, NodeKind::Symlink, true, (16, 1), NodeKind::Symlink),
            ("after overwrite", "a", false, NodeKind::Regular, false, (16, 1), NodeKind::Symlink),
            ("insert another", "b", false, NodeKind::Regular, true, (17, 0), NodeKind::Regular),
            ("new key with overwrite", "c", true, NodeKind::Regular, true, (18, 0), NodeKind::Regular),
        ];

        for (name, key, overwrite, build_kind, should_build, (ino, gen), kind) in cases {
            let mut built = false;
            let inode = cache
                .get_or_build(
                    key,
                    &table,
                    || {
                        built = true;
                        match build_kind {
                            NodeKind::Symlink => symlink(),
                            _ => file(),
                        }
                    },
                    overwrite,
                )
                .expect("builder never fails here");

            assert_eq!(should_build, built, "{}", name);
            assert_eq!(StableAttr { ino, gen }, inode.stable_attr(), "{}", name);
            assert_eq!(kind, inode.kind(), "{}", name);
            assert!(
                Arc::ptr_eq(&inode, &table.get(ino).expect("registered")),
                "{}",
                name
            );
        }
    }

    #[rstest]
    #[case::absent(false)]
    #[case::overwrite(true)]
    fn builder_error_leaves_cache(#[case] seed_first: bool) {
        let cache = InodeCache::new(2);
        let table = InodeTable::default();

        let seeded = seed_first.then(|| cache.get_or_build("k", &table, file, false).unwrap());

        let res = cache.get_or_build(
            "k",
            &table,
            || Err(Error::NotFound("foo".into())),
            true,
        );
        assert!(matches!(res, Err(Error::NotFound(msg)) if msg == "foo"));

        match seeded {
            None => {
                assert!(cache.get("k").is_none());
                assert!(cache.ino_store().get("k").is_none());
                assert!(table.is_empty());
            }
            Some(seeded) => {
                let cached = cache.get("k").expect("still cached");
                assert!(Arc::ptr_eq(&seeded, &cached));
                assert_eq!(0, cache.ino_store().get("k").unwrap().gen);
                assert!(Arc::ptr_eq(&seeded, &table.get(seeded.ino()).unwrap()));
            }
        }
    }

    #[test]
    fn concurrent_single_build() {
        const THREADS: usize = 8;
        let cache = InodeCache::new(2);
        let table = InodeTable::default();
        let builds = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let inodes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_build(
                                "shared",
                                &table,
                                || {
                                    builds.fetch_add(1, Ordering::SeqCst);
                                    file()
                                },
                                false,
                            )
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(1, builds.load(Ordering::SeqCst));
        assert!(inodes.iter().all(|i| Arc::ptr_eq(i, &inodes[0])));
    }
}
