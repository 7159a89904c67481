#![allow(clippy::unnecessary_cast)] // libc::S_IFDIR is u32 on Linux and u16 on MacOS

use fuse_backend_rs::abi::fuse_abi::Attr;

use crate::{inodes::NodeKind, nodes::FileAttr};

const BLOCK_SIZE: u32 = 512;

/// Turns the attributes of a node into what's handed to the kernel.
pub fn gen_file_attr(attr: &FileAttr, kind: NodeKind, ino: u64, uid: u32, gid: u32) -> Attr {
    // Pre-epoch commits exist, but can't be represented here.
    let time = attr.time.max(0) as u64;

    Attr {
        ino,
        size: attr.size,
        blksize: BLOCK_SIZE,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        mode: kind.file_type() | attr.perm,
        atime: time,
        mtime: time,
        ctime: time,
        atimensec: 0,
        mtimensec: 0,
        ctimensec: 0,
        nlink: match kind {
            NodeKind::Directory => 2,
            NodeKind::Regular | NodeKind::Symlink => 1,
        },
        uid,
        gid,
        rdev: 0,
        flags: 0,
        #[cfg(target_os = "macos")]
        crtime: time,
        #[cfg(target_os = "macos")]
        crtimensec: 0,
        #[cfg(target_os = "macos")]
        padding: 0,
    }
}
