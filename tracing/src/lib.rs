use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid RUST_LOG: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),

    #[error("unable to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct TracingBuilder {
    level: Level,
    log_path: Option<PathBuf>,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder {
            level: Level::INFO,
            log_path: None,
        }
    }
}

impl TracingBuilder {
    /// Set the log level. RUST_LOG still has a higher priority over this
    /// value.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Append logs to the file at `path` instead of writing them to stderr.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> TracingBuilder {
        self.log_path = Some(path.into());
        self
    }

    /// This will setup tracing based on the configuration passed in.
    /// It will setup a compact output layer, writing to stderr or the log
    /// file, and an EnvFilter based on the provided log level (RUST_LOG
    /// still has a higher priority over the configured value).
    pub fn build(self) -> Result<(), Error> {
        let writer = match &self.log_path {
            Some(path) => BoxMakeWriter::new(Mutex::new(open_log(path)?)),
            None => BoxMakeWriter::new(std::io::stderr),
        };

        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.level.into())
                    .from_env()?,
            )
            .with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(self.log_path.is_none())
                    .compact(),
            )
            .try_init()?;

        Ok(())
    }
}

fn open_log(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::LogFile {
            path: path.to_path_buf(),
            source,
        })
}
