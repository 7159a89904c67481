use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Mounts a git repository as a read-only filesystem.
///
/// Commits show up below `commits/<hash>/`, branches below
/// `branches/<name>/`. The filesystem stays mounted until it is unmounted
/// externally, or gitfs is interrupted.
#[derive(Parser, Clone, Debug)]
#[command(name = "gitfs", version)]
pub struct Args {
    /// The repository to present.
    #[arg(env = "GITFS_REPO_DIR")]
    pub repo_dir: PathBuf,

    /// Where to mount it.
    #[arg(env = "GITFS_MOUNT_DIR")]
    pub mount_dir: PathBuf,

    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, default_value_t = Level::INFO, env = "GITFS_LOG_LEVEL")]
    pub log_level: Level,

    /// Append logs to this file instead of printing them to stderr.
    #[arg(long, env = "GITFS_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    /// Owner of all files, defaults to the current user.
    #[arg(long, default_value_t = nix::unistd::getuid().as_raw(), env = "GITFS_UID")]
    pub uid: u32,

    /// Group of all files, defaults to the current group.
    #[arg(long, default_value_t = nix::unistd::getgid().as_raw(), env = "GITFS_GID")]
    pub gid: u32,

    /// Mount even if the mountpoint isn't empty.
    #[arg(long, env = "GITFS_ALLOW_NONEMPTY")]
    pub allow_nonempty: bool,

    /// Let users other than the one mounting access the filesystem.
    #[arg(long, env = "GITFS_ALLOW_OTHER")]
    pub allow_other: bool,

    /// Number of threads serving kernel requests.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..), env = "GITFS_THREADS")]
    pub threads: u16,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tracing::Level;

    use super::Args;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["gitfs", "repo", "mnt"]).expect("must parse");
        assert_eq!("repo", args.repo_dir.to_str().unwrap());
        assert_eq!("mnt", args.mount_dir.to_str().unwrap());
        assert_eq!(Level::INFO, args.log_level);
        assert_eq!(4, args.threads);
        assert_eq!(nix::unistd::getuid().as_raw(), args.uid);
        assert!(!args.allow_nonempty);
        assert!(!args.allow_other);
    }

    #[test]
    fn flags() {
        let args = Args::try_parse_from([
            "gitfs",
            "--log-level=debug",
            "--uid=12",
            "--gid=34",
            "--allow-other",
            "--threads=8",
            "repo",
            "mnt",
        ])
        .expect("must parse");
        assert_eq!(Level::DEBUG, args.log_level);
        assert_eq!((12, 34), (args.uid, args.gid));
        assert!(args.allow_other);
        assert_eq!(8, args.threads);
    }

    #[test]
    fn mount_dir_required() {
        assert!(Args::try_parse_from(["gitfs", "repo"]).is_err());
        assert!(Args::try_parse_from(["gitfs", "--threads=0", "repo", "mnt"]).is_err());
    }
}
