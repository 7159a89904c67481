use thiserror::Error;

/// Errors raised while materializing nodes from the repository.
#[derive(Debug, Error)]
pub enum Error {
    /// An unknown commit, branch or tree entry.
    #[error("{0} not found")]
    NotFound(String),

    /// A tree entry whose mode has no filesystem representation, such as a
    /// submodule.
    #[error("unsupported tree entry {name}: mode {mode:o}")]
    UnsupportedObject { name: String, mode: i32 },

    #[error("repository error: {0}")]
    Repository(#[source] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Setting up or serving the kernel session failed.
    #[error("fuse session: {0}")]
    Session(String),
}

impl From<git2::Error> for Error {
    fn from(value: git2::Error) -> Self {
        if value.code() == git2::ErrorCode::NotFound {
            Error::NotFound(value.message().to_string())
        } else {
            Error::Repository(value)
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::NotFound(_) => std::io::Error::from_raw_os_error(libc::ENOENT),
            Error::UnsupportedObject { .. }
            | Error::Repository(_)
            | Error::Io(_)
            | Error::Session(_) => std::io::Error::from_raw_os_error(libc::EIO),
        }
    }
}
