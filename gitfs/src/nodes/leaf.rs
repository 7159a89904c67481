//! Files and symlinks whose contents are known when they're built.
use std::time::Duration;

use bytes::Bytes;

use super::{FileAttr, Node, Reader, SymlinkTarget, COMMIT_VALID};
use crate::{environment::Environment, inodes::NodeKind, Error};

pub struct MemFile {
    data: Bytes,
    attr: FileAttr,
    timeout: Duration,
}

impl MemFile {
    /// The size in `attr` is ignored, it's always the length of `data`.
    pub fn new(data: Bytes, attr: FileAttr) -> Self {
        Self {
            data,
            attr,
            timeout: COMMIT_VALID,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Node for MemFile {
    fn kind(&self) -> NodeKind {
        NodeKind::Regular
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr {
            size: self.data.len() as u64,
            ..self.attr
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        Some(self)
    }
}

impl Reader for MemFile {
    fn contents(&self, _env: &Environment) -> Result<Bytes, Error> {
        Ok(self.data.clone())
    }
}

pub struct MemSymlink {
    target: Bytes,
    attr: FileAttr,
    timeout: Duration,
}

impl MemSymlink {
    /// The size in `attr` is ignored, it's always the length of `target`.
    pub fn new(target: Bytes, attr: FileAttr) -> Self {
        Self {
            target,
            attr,
            timeout: COMMIT_VALID,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Node for MemSymlink {
    fn kind(&self) -> NodeKind {
        NodeKind::Symlink
    }

    fn getattr(&self, _env: &Environment) -> Result<FileAttr, Error> {
        Ok(FileAttr {
            size: self.target.len() as u64,
            ..self.attr
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn as_symlink(&self) -> Option<&dyn SymlinkTarget> {
        Some(self)
    }
}

impl SymlinkTarget for MemSymlink {
    fn readlink(&self, _env: &Environment) -> Result<Bytes, Error> {
        Ok(self.target.clone())
    }
}
