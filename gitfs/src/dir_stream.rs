//! Incremental directory listings.
//!
//! Small, fixed listings are served from memory by [VecDirStream]. Listings
//! backed by a repository walk of unknown length use [ChannelDirStream],
//! where a blocking task reads the walk and feeds entries through a bounded
//! queue, so the first entries reach the kernel before the walk completes.
use bytes::Bytes;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{inodes::NodeKind, Error};

/// Number of entries a producer may run ahead of the consumer.
const QUEUE_CAPACITY: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw name bytes, as stored in the repository.
    pub name: Bytes,
    pub ino: u64,
    pub kind: NodeKind,
}

impl DirEntry {
    pub fn new(name: impl Into<Bytes>, ino: u64, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            ino,
            kind,
        }
    }
}

/// An open directory listing.
pub trait DirStream: Send {
    /// Whether [DirStream::next] has another entry (or error) to return.
    /// May block until the producer delivered it.
    fn has_next(&mut self) -> bool;

    /// Returns the next entry. Once exhausted, this returns
    /// [Error::NotFound].
    fn next(&mut self) -> Result<DirEntry, Error>;

    /// Releases the listing. Entries not consumed yet are discarded, and
    /// any background producer is told to stop.
    fn close(&mut self);
}

fn exhausted() -> Error {
    Error::NotFound("next directory entry".into())
}

/// A listing of entries known upfront.
pub struct VecDirStream {
    entries: std::vec::IntoIter<DirEntry>,
}

impl VecDirStream {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl DirStream for VecDirStream {
    fn has_next(&mut self) -> bool {
        !self.entries.as_slice().is_empty()
    }

    fn next(&mut self) -> Result<DirEntry, Error> {
        self.entries.next().ok_or_else(exhausted)
    }

    fn close(&mut self) {
        self.entries = Vec::new().into_iter();
    }
}

/// The producer side of a [ChannelDirStream].
pub struct EntrySink {
    tx: mpsc::Sender<Result<DirEntry, Error>>,
    stop: oneshot::Receiver<()>,
}

impl EntrySink {
    /// Hands an entry to the consumer, blocking while the queue is full.
    /// Returns false once the consumer closed the stream, after which the
    /// producer should return.
    pub fn send(&mut self, entry: DirEntry) -> bool {
        self.push(Ok(entry))
    }

    fn push(&mut self, item: Result<DirEntry, Error>) -> bool {
        // A dropped sender counts as a stop signal too.
        if !matches!(
            self.stop.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ) {
            return false;
        }
        self.tx.blocking_send(item).is_ok()
    }
}

/// A listing produced by a blocking background task.
///
/// An optional head entry is always delivered first, the rest in the order
/// the producer sends them. If the producer fails, its error is delivered
/// after the entries it sent before, and ends the listing.
pub struct ChannelDirStream {
    head: Option<DirEntry>,
    next: Option<Result<DirEntry, Error>>,
    rx: Option<mpsc::Receiver<Result<DirEntry, Error>>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelDirStream {
    /// Runs `producer` on the blocking pool of `tokio_handle`.
    pub fn spawn<F>(tokio_handle: &Handle, head: Option<DirEntry>, producer: F) -> Self
    where
        F: FnOnce(&mut EntrySink) -> Result<(), Error> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio_handle.spawn_blocking(move || {
            let mut sink = EntrySink { tx, stop: stop_rx };
            if let Err(e) = producer(&mut sink) {
                warn!(err = %e, "failed to produce directory listing");
                sink.push(Err(e));
            }
            debug!("directory producer done");
        });

        Self {
            head,
            next: None,
            rx: Some(rx),
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

impl DirStream for ChannelDirStream {
    fn has_next(&mut self) -> bool {
        if self.head.is_some() {
            return true;
        }
        if self.next.is_none() {
            self.next = self.rx.as_mut().and_then(|rx| rx.blocking_recv());
        }
        self.next.is_some()
    }

    fn next(&mut self) -> Result<DirEntry, Error> {
        if let Some(head) = self.head.take() {
            return Ok(head);
        }
        if !self.has_next() {
            return Err(exhausted());
        }
        match self.next.take() {
            Some(Err(e)) => {
                // nothing follows an error
                self.close();
                Err(e)
            }
            Some(Ok(entry)) => Ok(entry),
            None => Err(exhausted()),
        }
    }

    fn close(&mut self) {
        self.head = None;
        self.next = None;
        if let Some(stop) = self.stop.take() {
            if let Some(task) = &self.task {
                debug!(producer_done = task.is_finished(), "closing directory stream");
            }
            let _ = stop.send(());
        }
        // Dropping the receiver wakes a producer blocked on a full queue.
        self.rx = None;
    }
}

impl Drop for ChannelDirStream {
    fn drop(&mut self) {
        self.close();
    }
}
