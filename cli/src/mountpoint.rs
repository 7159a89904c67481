use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use nix::unistd::{access, AccessFlags};

const STICKY_BIT: u32 = 0o1000;

/// Checks `path` can be mounted over, and returns it as an absolute path.
pub fn validate_mountpoint(path: &Path, allow_nonempty: bool) -> anyhow::Result<PathBuf> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("unable to resolve mountpoint {}", path.display()))?;

    let metadata = std::fs::metadata(&path)
        .with_context(|| format!("unable to stat mountpoint {}", path.display()))?;
    if !metadata.is_dir() {
        bail!("mountpoint {} is not a directory", path.display());
    }

    access(&path, AccessFlags::W_OK)
        .with_context(|| format!("mountpoint {} is not writable", path.display()))?;

    if metadata.permissions().mode() & STICKY_BIT != 0 {
        bail!("mountpoint {} has the sticky bit set", path.display());
    }

    if !allow_nonempty {
        let mut entries = std::fs::read_dir(&path)
            .with_context(|| format!("unable to list mountpoint {}", path.display()))?;
        if entries.next().is_some() {
            bail!(
                "mountpoint {} is not empty, pass --allow-nonempty to mount anyways",
                path.display()
            );
        }
    }

    Ok(path)
}
