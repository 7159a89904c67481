mod file_attr;

pub mod fuse;


use std::{
    collections::HashMap,
    ffi::CStr,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::{
    Context, DirEntry as FuseDirEntry, Entry, FileSystem, FsOptions, OpenOptions, ZeroCopyWriter,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use self::file_attr::gen_file_attr;
use crate::{
    dir_stream::{DirEntry, DirStream},
    environment::Environment,
    inodes::Inode,
    Error,
};

/// An open directory. Listings are streamed, so the kernel's offsets are
/// only accepted where the previous call stopped.
struct OpenDir {
    stream: Box<dyn DirStream>,
    /// The entry that didn't fit into the previous reply.
    pending: Option<DirEntry>,
    /// Offset of the next entry handed out.
    offset: u64,
}

/// This implements a read-only FUSE filesystem presenting a git repository.
///
/// Requests are dispatched by inode number through the [Environment]'s
/// inode table to the node registered there, which only needs to support
/// the operations making sense for it. Everything else is answered with
/// the matching errno.
pub struct GitFs {
    env: Arc<Environment>,

    /// Owner reported for every file.
    uid: u32,
    gid: u32,

    dir_handles: RwLock<HashMap<u64, Arc<Mutex<OpenDir>>>>,
    file_handles: RwLock<HashMap<u64, Bytes>>,

    next_handle: AtomicU64,
}

impl GitFs {
    pub fn new(env: Arc<Environment>, uid: u32, gid: u32) -> Self {
        Self {
            env,
            uid,
            gid,
            dir_handles: RwLock::new(HashMap::default()),
            file_handles: RwLock::new(HashMap::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn inode(&self, ino: u64) -> io::Result<Arc<Inode>> {
        self.env.inodes().get(ino).ok_or_else(|| {
            warn!(ino, "unknown inode");
            io::Error::from_raw_os_error(libc::ENOENT)
        })
    }

    fn stat(&self, inode: &Inode) -> io::Result<(stat64, Duration)> {
        let attr = inode.node().getattr(&self.env).map_err(errno)?;
        Ok((
            gen_file_attr(&attr, inode.kind(), inode.ino(), self.uid, self.gid).into(),
            inode.node().timeout(),
        ))
    }

    fn open_stream(&self, inode: &Inode) -> io::Result<Box<dyn DirStream>> {
        let lister = inode
            .node()
            .as_lister()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTDIR))?;
        lister.readdir(&self.env, inode).map_err(errno)
    }
}

/// Logs a failed request, and turns the error into what's returned to the
/// kernel.
fn errno(err: Error) -> io::Error {
    match err {
        Error::NotFound(ref what) => debug!(%what, "not found"),
        ref err => warn!(%err, "request failed"),
    }
    err.into()
}

impl FileSystem for GitFs {
    type Handle = u64;
    type Inode = u64;

    fn init(&self, _capable: FsOptions) -> io::Result<FsOptions> {
        Ok(FsOptions::empty())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn getattr(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Option<Self::Handle>,
    ) -> io::Result<(stat64, Duration)> {
        let inode = self.inode(inode)?;
        debug!(inode = ?inode, "found node");
        self.stat(&inode)
    }

    #[tracing::instrument(skip_all, fields(rq.parent_inode = parent, rq.name = ?name))]
    fn lookup(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<Entry> {
        debug!("lookup");

        let parent = self.inode(parent)?;
        let resolver = parent
            .node()
            .as_resolver()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTDIR))?;

        let child = resolver
            .lookup(&self.env, &parent, name.to_bytes())
            .map_err(errno)?;
        let (attr, timeout) = self.stat(&child)?;

        Ok(Entry {
            inode: child.ino(),
            generation: child.gen(),
            attr,
            attr_timeout: timeout,
            entry_timeout: timeout,
            ..Default::default()
        })
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn readlink(&self, _ctx: &Context, inode: Self::Inode) -> io::Result<Vec<u8>> {
        let inode = self.inode(inode)?;
        let symlink = inode
            .node()
            .as_symlink()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;

        Ok(symlink.readlink(&self.env).map_err(errno)?.to_vec())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn opendir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions)> {
        let inode = self.inode(inode)?;
        let stream = self.open_stream(&inode)?;

        let fh = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!("add directory handle {}", fh);
        self.dir_handles.write().insert(
            fh,
            Arc::new(Mutex::new(OpenDir {
                stream,
                pending: None,
                offset: 0,
            })),
        );

        Ok((Some(fh), OpenOptions::empty()))
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, rq.offset = offset))]
    fn readdir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        handle: Self::Handle,
        _size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(FuseDirEntry) -> io::Result<usize>,
    ) -> io::Result<()> {
        debug!("readdir");

        let open_dir = match self.dir_handles.read().get(&handle) {
            Some(open_dir) => open_dir.clone(),
            None => {
                warn!("directory handle {} unknown", handle);
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
        };
        let mut open_dir = open_dir.lock();

        if offset != open_dir.offset {
            // Streams can't seek, only start over.
            if offset != 0 {
                warn!(expected = open_dir.offset, "unsupported readdir offset");
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            let dir = self.inode(inode)?;
            let stream = self.open_stream(&dir)?;
            open_dir.stream.close();
            *open_dir = OpenDir {
                stream,
                pending: None,
                offset: 0,
            };
        }

        loop {
            let entry = match open_dir.pending.take() {
                Some(entry) => entry,
                None => {
                    if !open_dir.stream.has_next() {
                        break;
                    }
                    open_dir.stream.next().map_err(errno)?
                }
            };

            // the second parameter will become the "offset" parameter on the next call.
            let written = add_entry(FuseDirEntry {
                ino: entry.ino,
                offset: open_dir.offset + 1,
                type_: entry.kind.file_type(),
                name: &entry.name[..],
            })?;
            // If the buffer is full, add_entry will return `Ok(0)`.
            if written == 0 {
                open_dir.pending = Some(entry);
                break;
            }
            open_dir.offset += 1;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, fh = handle))]
    fn releasedir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
        handle: Self::Handle,
    ) -> io::Result<()> {
        match self.dir_handles.write().remove(&handle) {
            Some(open_dir) => open_dir.lock().stream.close(),
            None => debug!("directory handle {} not found", handle),
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn open(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions, Option<u32>)> {
        if flags as libc::c_int & libc::O_ACCMODE != libc::O_RDONLY {
            warn!("attempt to open for writing");
            return Err(io::Error::from_raw_os_error(libc::EROFS));
        }

        let inode = self.inode(inode)?;
        let reader = inode.node().as_reader().ok_or_else(|| {
            warn!("is not a file");
            io::Error::from_raw_os_error(libc::EISDIR)
        })?;
        let contents = reader.contents(&self.env).map_err(errno)?;

        let fh = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!("add file handle {}", fh);
        self.file_handles.write().insert(fh, contents);

        Ok((Some(fh), OpenOptions::empty(), None))
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, rq.offset = offset, rq.size = size))]
    fn read(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        handle: Self::Handle,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        debug!("read");

        let contents = match self.file_handles.read().get(&handle) {
            Some(contents) => contents.clone(),
            None => {
                warn!("file handle {} unknown", handle);
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
        };

        let len = contents.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(size as u64).min(len) as usize;

        w.write(&contents[start..end])
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, fh = handle))]
    fn release(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
        handle: Self::Handle,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> io::Result<()> {
        if self.file_handles.write().remove(&handle).is_none() {
            debug!("file handle {} not found", handle);
        }
        Ok(())
    }
}
