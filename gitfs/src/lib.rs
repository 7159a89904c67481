//! A read-only filesystem presenting the commits and branches of a git
//! repository.
mod errors;

pub mod branch_cache;
pub mod dir_stream;
pub mod environment;
pub mod inodes;
pub mod nodes;
pub mod repo;

#[cfg(feature = "fuse")]
pub mod fs;
#[cfg(feature = "fuse")]
mod startup;

#[cfg(test)]
mod fixtures;

pub use errors::Error;
#[cfg(feature = "fuse")]
pub use startup::{serve, MountOptions, StartupHandler};
