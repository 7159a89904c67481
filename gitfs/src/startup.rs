use std::path::Path;

use tokio::runtime::Handle;
use tracing::{info, instrument};

use crate::{
    environment::Environment,
    fs::{
        fuse::{FuseDaemon, Unmounter},
        GitFs,
    },
    repo::Repo,
};

/// How the filesystem is presented to the kernel.
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// Owner reported for every file.
    pub uid: u32,
    pub gid: u32,
    /// Number of threads serving kernel requests.
    pub threads: usize,
    /// Let users other than the one mounting access the filesystem.
    pub allow_other: bool,
}

/// Receives the outcome of [serve] before it starts blocking.
pub trait StartupHandler {
    /// Called when the filesystem can't be brought up. Doesn't return.
    fn report_error(&self, err: &dyn std::error::Error) -> !;

    /// Called once the filesystem is mounted. The unmounter may be cloned
    /// to end [serve] later on.
    fn report_success(&self, unmounter: &Unmounter);
}

/// Opens the repository at `repo_dir`, mounts it at `mount_dir`, and
/// serves it until it gets unmounted.
///
/// Must be called from a thread belonging to a tokio runtime, but outside
/// of an async context, as it blocks.
#[instrument(skip(options, handler))]
pub fn serve(
    repo_dir: &Path,
    mount_dir: &Path,
    options: &MountOptions,
    handler: &dyn StartupHandler,
) {
    let tokio_handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => handler.report_error(&e),
    };

    let repo = match Repo::open(repo_dir) {
        Ok(repo) => repo,
        Err(e) => handler.report_error(&e),
    };
    let env = Environment::new(repo, tokio_handle);
    let fs = GitFs::new(env, options.uid, options.gid);

    let daemon = match FuseDaemon::mount(fs, mount_dir, options.threads, options.allow_other) {
        Ok(daemon) => daemon,
        Err(e) => handler.report_error(&e),
    };

    handler.report_success(&daemon.unmounter());
    daemon.wait();
    info!("filesystem unmounted");
}
