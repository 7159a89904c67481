use std::process::ExitCode;

use clap::Parser;
use gitfs::{fs::fuse::Unmounter, MountOptions, StartupHandler};
use tracing::{error, info};

use crate::{args::Args, mountpoint::validate_mountpoint};

mod args;
mod mountpoint;

/// Reports the outcome of mounting, and unmounts on ctrl-c once mounted.
struct Foreground {
    tokio_handle: tokio::runtime::Handle,
}

impl StartupHandler for Foreground {
    fn report_error(&self, err: &dyn std::error::Error) -> ! {
        error!(err = %err, "unable to start filesystem");
        eprintln!("error: {}", err);
        std::process::exit(1)
    }

    fn report_success(&self, unmounter: &Unmounter) {
        info!(mountpoint = %unmounter.mountpoint().display(), "filesystem ready");

        let unmounter = unmounter.clone();
        self.tokio_handle.spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(err = %e, "unable to listen for ctrl-c");
                return;
            }
            info!("interrupted, unmounting");
            // serve returns once the threads noticed
            let res = tokio::task::spawn_blocking(move || unmounter.unmount()).await;
            if let Ok(Err(e)) = res {
                error!(err = %e, "unable to unmount");
            }
        });
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut builder = gitfs_tracing::TracingBuilder::default().level(args.log_level);
    if let Some(log_path) = &args.log_path {
        builder = builder.log_path(log_path);
    }
    builder.build()?;

    let mount_dir = validate_mountpoint(&args.mount_dir, args.allow_nonempty)?;
    let options = MountOptions {
        uid: args.uid,
        gid: args.gid,
        threads: args.threads as usize,
        allow_other: args.allow_other,
    };

    let handler = Foreground {
        tokio_handle: tokio::runtime::Handle::current(),
    };
    let repo_dir = args.repo_dir;
    tokio::task::spawn_blocking(move || {
        gitfs::serve(&repo_dir, &mount_dir, &options, &handler)
    })
    .await?;

    Ok(())
}
