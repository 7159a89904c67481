//! Serving a [FileSystem] to the kernel through a FUSE session.
use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use fuse_backend_rs::{
    api::{filesystem::FileSystem, server::Server},
    transport::{FuseChannel, FuseSession},
};
use parking_lot::Mutex;
use threadpool::ThreadPool;
use tracing::{debug, info, instrument, warn};

use crate::Error;

/// The name the session is registered with, shown as the mount source.
const FS_NAME: &str = "gitfs";

fn session_error<E: Display>(action: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Session(format!("{}: {}", action, e))
}

/// Whether failing to reply means the kernel side of the session is gone.
fn session_closed(err: &io::Error) -> bool {
    #[cfg(target_os = "linux")]
    let closed = libc::EBADFD;
    #[cfg(target_os = "macos")]
    let closed = libc::EBADF;
    err.raw_os_error() == Some(closed)
}

/// Answers the requests arriving on `channel` until the session ends.
fn serve_channel<FS>(server: &Server<Arc<FS>>, mut channel: FuseChannel) -> Result<(), Error>
where
    FS: FileSystem + Sync + Send,
{
    while let Some((reader, writer)) = channel
        .get_request()
        .map_err(session_error("receive request"))?
    {
        match server.handle_message(reader, writer.into(), None, None) {
            Ok(_) => {}
            Err(fuse_backend_rs::Error::EncodeMessage(e)) if session_closed(&e) => break,
            Err(e) => warn!(err = ?e, "failed to handle request"),
        }
    }
    Ok(())
}

/// Unmounts the filesystem of a [FuseDaemon] from any thread. The daemon's
/// threads return once the session is gone.
#[derive(Clone)]
pub struct Unmounter {
    mountpoint: PathBuf,
    session: Arc<Mutex<FuseSession>>,
}

impl Unmounter {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounting an already unmounted session does nothing.
    #[instrument(skip_all, fields(mountpoint = ?self.mountpoint), err)]
    pub fn unmount(&self) -> Result<(), Error> {
        self.session
            .lock()
            .umount()
            .map_err(session_error("unmount"))
    }
}

/// A mounted session, and the threads serving it, one channel each.
///
/// The daemon is the only owner of the threads. Dropping it unmounts the
/// filesystem and waits for them.
pub struct FuseDaemon {
    unmounter: Unmounter,
    workers: ThreadPool,
}

impl FuseDaemon {
    /// Mounts `fs` read-only at `mountpoint`, served by `threads` threads.
    #[instrument(skip(fs), err)]
    pub fn mount<FS>(
        fs: FS,
        mountpoint: &Path,
        threads: usize,
        allow_other: bool,
    ) -> Result<Self, Error>
    where
        FS: FileSystem + Sync + Send + 'static,
    {
        let mut session = FuseSession::new(mountpoint, FS_NAME, "", true)
            .map_err(session_error("create session"))?;
        #[cfg(target_os = "linux")]
        session.set_allow_other(allow_other);
        #[cfg(not(target_os = "linux"))]
        let _ = allow_other;
        session.mount().map_err(session_error("mount"))?;

        // All channels are opened before any thread starts, so failing here
        // leaves nothing to stop.
        let channels = (0..threads)
            .map(|_| session.new_channel())
            .collect::<Result<Vec<_>, _>>()
            .map_err(session_error("open channel"));
        let channels = match channels {
            Ok(channels) => channels,
            Err(e) => {
                if let Err(umount_err) = session.umount() {
                    warn!(err = %umount_err, "failed to unmount after failed setup");
                }
                return Err(e);
            }
        };

        let server = Arc::new(Server::new(Arc::new(fs)));
        let workers = threadpool::Builder::new()
            .num_threads(threads)
            .thread_name("fuse_server".to_string())
            .build();
        for (worker, channel) in channels.into_iter().enumerate() {
            let server = server.clone();
            workers.execute(move || match serve_channel(&server, channel) {
                Ok(()) => debug!(worker, "session closed"),
                Err(e) => warn!(worker, err = %e, "stopped serving"),
            });
        }

        info!(threads, "filesystem mounted");

        Ok(Self {
            unmounter: Unmounter {
                mountpoint: mountpoint.to_path_buf(),
                session: Arc::new(Mutex::new(session)),
            },
            workers,
        })
    }

    pub fn mountpoint(&self) -> &Path {
        self.unmounter.mountpoint()
    }

    pub fn unmounter(&self) -> Unmounter {
        self.unmounter.clone()
    }

    /// Blocks until the filesystem got unmounted, through an [Unmounter] or
    /// externally, and all threads returned.
    #[instrument(skip_all)]
    pub fn wait(self) {
        self.workers.join();
    }

    /// Unmounts, and waits for all threads to return.
    pub fn unmount(self) -> Result<(), Error> {
        self.unmounter.unmount()
        // dropping joins the threads
    }
}

impl Drop for FuseDaemon {
    fn drop(&mut self) {
        match self.unmounter.unmount() {
            Ok(()) => self.workers.join(),
            // the threads would never return
            Err(e) => warn!(err = %e, "failed to unmount, not waiting for threads"),
        }
    }
}
