use std::collections::HashMap;

use parking_lot::Mutex;

use super::StableAttr;

/// InoStore hands out inode and generation numbers per string key.
///
/// Each new key gets the next inode number, starting at the number the
/// store was created with, and generation 0. The inode number of a key
/// never changes, only its generation does, and only when asked to.
pub struct InoStore {
    inner: Mutex<InoStoreInner>,
}

struct InoStoreInner {
    // the next inode to allocate
    next_ino: u64,
    attrs: HashMap<String, StableAttr>,
}

impl InoStore {
    pub fn new(initial_ino: u64) -> Self {
        Self {
            inner: Mutex::new(InoStoreInner {
                next_ino: initial_ino,
                attrs: HashMap::new(),
            }),
        }
    }

    /// Returns the identity for `key`, allocating one if it's unknown.
    /// With `update_gen`, the generation of an already known key is bumped
    /// before returning it; new keys always start at generation 0.
    pub fn get_or_insert(&self, key: &str, update_gen: bool) -> StableAttr {
        let mut inner = self.inner.lock();

        if let Some(attr) = inner.attrs.get_mut(key) {
            if update_gen {
                attr.gen += 1;
            }
            return *attr;
        }

        let attr = StableAttr {
            ino: inner.next_ino,
            gen: 0,
        };
        inner.next_ino += 1;
        inner.attrs.insert(key.to_owned(), attr);
        attr
    }

    /// Peeks at the identity of `key` without allocating.
    pub fn get(&self, key: &str) -> Option<StableAttr> {
        self.inner.lock().attrs.get(key).copied()
    }
}
