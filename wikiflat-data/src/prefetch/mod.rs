//! Look-ahead fetching of upcoming chunks.
//!
//! Planning is pure: [`plan_prefetch`] picks the chunks after the current one
//! that are not yet complete locally, within a look-ahead limit and a byte
//! budget. [`spawn_prefetch`] runs a plan on a background thread, fetching
//! through a [`SourceCatalog`] and reporting [`PrefetchEvent`]s over a channel.
//! Files are staged and renamed, so the data directory only ever gains
//! complete files. Worker errors are reported as events and never returned to
//! the caller's pipeline.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;
use wikiflat_fs::{StagedFile, file_size, list_files, open_utf8_file};

/// Default byte budget for prefetched chunks (20 GiB).
pub const DEFAULT_BUDGET_BYTES: u64 = 20 * 1024 * 1024 * 1024;

/// Default number of chunks to look ahead.
pub const DEFAULT_MAX_AHEAD: usize = 2;

const SOURCE_SUFFIX: &str = ".parquet";
const CHUNK_PATTERN: &str = r"chunk_(\d+)-";

/// A file offered by a [`SourceCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// File name, e.g. `chunk_3-0.parquet`.
    pub name: String,
    /// Authoritative size in bytes.
    pub size: u64,
}

/// Errors raised by a [`SourceCatalog`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// The catalog does not hold the named file.
    #[error("catalog has no file named {name}")]
    NotFound {
        /// Requested file name.
        name: String,
    },
    /// Listing or transferring failed.
    #[error("catalog I/O error on {name}: {source}")]
    Io {
        /// File or location being accessed.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Remote listing and transfer of source files.
pub trait SourceCatalog: Send + Sync {
    /// Every source file with its size.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the listing cannot be produced.
    fn list(&self) -> Result<Vec<RemoteFile>, CatalogError>;

    /// Copy the named file into `writer`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the file is unknown or the transfer
    /// fails.
    fn fetch(&self, name: &str, writer: &mut dyn Write) -> Result<u64, CatalogError>;
}

/// A catalog backed by a local directory of source files.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: Utf8PathBuf,
}

impl LocalMirror {
    /// Mirror rooted at `root`.
    #[must_use]
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl SourceCatalog for LocalMirror {
    fn list(&self) -> Result<Vec<RemoteFile>, CatalogError> {
        let io_err = |source| CatalogError::Io {
            name: self.root.to_string(),
            source,
        };
        let paths = list_files(&self.root, SOURCE_SUFFIX).map_err(io_err)?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name() else {
                continue;
            };
            files.push(RemoteFile {
                name: name.to_owned(),
                size: file_size(&path).map_err(io_err)?,
            });
        }
        Ok(files)
    }

    fn fetch(&self, name: &str, writer: &mut dyn Write) -> Result<u64, CatalogError> {
        let path = self.root.join(name);
        let mut file = open_utf8_file(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CatalogError::NotFound {
                    name: name.to_owned(),
                }
            } else {
                CatalogError::Io {
                    name: name.to_owned(),
                    source,
                }
            }
        })?;
        io::copy(&mut file, writer).map_err(|source| CatalogError::Io {
            name: name.to_owned(),
            source,
        })
    }
}

/// Limits applied when planning a prefetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchOptions {
    budget_bytes: u64,
    max_ahead: usize,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            max_ahead: DEFAULT_MAX_AHEAD,
        }
    }
}

impl PrefetchOptions {
    /// Cap the bytes held locally, counting files already present.
    #[must_use]
    pub const fn with_budget_bytes(mut self, budget_bytes: u64) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    /// Consider at most `max_ahead` chunks after the current one.
    #[must_use]
    pub const fn with_max_ahead(mut self, max_ahead: usize) -> Self {
        self.max_ahead = max_ahead;
        self
    }

    /// Configured byte budget.
    #[must_use]
    pub const fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Configured look-ahead.
    #[must_use]
    pub const fn max_ahead(&self) -> usize {
        self.max_ahead
    }
}

/// Files of one chunk and their combined size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFiles {
    /// Chunk index.
    pub chunk: u64,
    /// Files of the chunk, ordered by name.
    pub files: Vec<RemoteFile>,
    /// Sum of the file sizes.
    pub bytes: u64,
}

/// Sizes of the source files already in the data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInventory {
    sizes: HashMap<String, u64>,
}

impl LocalInventory {
    /// Scan `data_dir` for source files.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] when the directory or a file cannot be read. A
    /// missing directory yields an empty inventory.
    pub fn scan(data_dir: &Utf8Path) -> io::Result<Self> {
        let mut sizes = HashMap::new();
        for path in list_files(data_dir, SOURCE_SUFFIX)? {
            if let Some(name) = path.file_name() {
                sizes.insert(name.to_owned(), file_size(&path)?);
            }
        }
        Ok(Self { sizes })
    }

    /// Inventory from known `(name, size)` pairs.
    #[must_use]
    pub fn from_sizes<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            sizes: entries
                .into_iter()
                .map(|(name, size)| (name.into(), size))
                .collect(),
        }
    }

    /// Whether `file` is present with exactly its expected size.
    #[must_use]
    pub fn holds(&self, file: &RemoteFile) -> bool {
        self.sizes.get(&file.name) == Some(&file.size)
    }

    /// Whether every file of `chunk` is present.
    #[must_use]
    pub fn is_complete(&self, chunk: &ChunkFiles) -> bool {
        chunk.files.iter().all(|file| self.holds(file))
    }

    /// Bytes held across all files.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.sizes.values().sum()
    }
}

/// Group `listing` by chunk index; files without a chunk index are ignored.
///
/// # Errors
///
/// Returns [`regex::Error`] if the chunk pattern fails to compile.
pub fn group_by_chunk(listing: &[RemoteFile]) -> Result<BTreeMap<u64, ChunkFiles>, regex::Error> {
    let pattern = Regex::new(CHUNK_PATTERN)?;
    let mut chunks: BTreeMap<u64, ChunkFiles> = BTreeMap::new();
    for file in listing {
        let Some(chunk) = pattern
            .captures(&file.name)
            .and_then(|caps| caps.get(1))
            .and_then(|found| found.as_str().parse::<u64>().ok())
        else {
            continue;
        };
        let entry = chunks.entry(chunk).or_insert_with(|| ChunkFiles {
            chunk,
            ..ChunkFiles::default()
        });
        entry.files.push(file.clone());
        entry.bytes = entry.bytes.saturating_add(file.size);
    }
    for entry in chunks.values_mut() {
        entry.files.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(chunks)
}

/// Chunks to fetch ahead of `current`.
///
/// Considers the `max_ahead` chunks following `current`, drops those already
/// complete locally, and keeps the leading run whose cumulative size fits in
/// the budget left after the bytes already on disk.
#[must_use]
pub fn plan_prefetch(
    current: u64,
    chunks: &BTreeMap<u64, ChunkFiles>,
    inventory: &LocalInventory,
    options: PrefetchOptions,
) -> Vec<ChunkFiles> {
    let remaining = options
        .budget_bytes()
        .saturating_sub(inventory.total_bytes());
    if remaining == 0 {
        debug!("Prefetch budget exhausted: held={}", inventory.total_bytes());
        return Vec::new();
    }
    let mut spent: u64 = 0;
    chunks
        .range(current.saturating_add(1)..)
        .take(options.max_ahead())
        .map(|(_, chunk)| chunk)
        .filter(|chunk| !inventory.is_complete(chunk))
        .take_while(|chunk| {
            spent = spent.saturating_add(chunk.bytes);
            spent <= remaining
        })
        .cloned()
        .collect()
}

/// Errors raised while fetching a file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrefetchError {
    /// The catalog failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Staging or committing the local copy failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Local target.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The transferred size differs from the listed size.
    #[error("{name}: fetched {found} bytes, expected {expected}")]
    SizeMismatch {
        /// File name.
        name: String,
        /// Listed size.
        expected: u64,
        /// Bytes received.
        found: u64,
    },
    /// The chunk pattern failed to compile.
    #[error("invalid chunk pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// The worker thread could not be started or panicked.
    #[error("prefetch worker failed: {message}")]
    Worker {
        /// Description of the failure.
        message: String,
    },
}

/// Fetch `file` into `data_dir`, verifying its size before it becomes
/// visible.
///
/// # Errors
///
/// Returns [`PrefetchError`] when the transfer fails or the size differs; the
/// target is left untouched in that case.
pub fn fetch_file(
    catalog: &dyn SourceCatalog,
    data_dir: &Utf8Path,
    file: &RemoteFile,
) -> Result<u64, PrefetchError> {
    let target = data_dir.join(&file.name);
    let io_err = |source| PrefetchError::Io {
        path: target.clone(),
        source,
    };
    let mut staged = StagedFile::create(&target).map_err(io_err)?;
    let received = catalog.fetch(&file.name, &mut staged)?;
    if received != file.size {
        return Err(PrefetchError::SizeMismatch {
            name: file.name.clone(),
            expected: file.size,
            found: received,
        });
    }
    staged.commit().map_err(io_err)?;
    debug!("Fetched file: path={target}, bytes={received}");
    Ok(received)
}

/// Progress reported by the prefetch worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    /// Chunks selected for fetching.
    Planned {
        /// Chunk indices in fetch order.
        chunks: Vec<u64>,
    },
    /// A file landed in the data directory.
    Fetched {
        /// File name.
        name: String,
        /// Bytes written.
        bytes: u64,
    },
    /// A step failed; the worker stops.
    Failed {
        /// File being fetched, if any.
        name: Option<String>,
        /// Error description.
        message: String,
    },
    /// The worker stopped on request.
    Cancelled,
    /// The worker finished its plan.
    Finished {
        /// Files fetched.
        files: usize,
        /// Bytes fetched.
        bytes: u64,
    },
}

/// Handle on a running prefetch worker.
#[derive(Debug)]
pub struct PrefetchHandle {
    events: Receiver<PrefetchEvent>,
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

impl PrefetchHandle {
    /// Events emitted by the worker.
    #[must_use]
    pub const fn events(&self) -> &Receiver<PrefetchEvent> {
        &self.events
    }

    /// Ask the worker to stop before its next file.
    pub fn cancel(&self) {
        if self.cancel.send(()).is_err() {
            debug!("Prefetch worker already stopped");
        }
    }

    /// Wait for the worker and collect any events not yet received.
    ///
    /// # Errors
    ///
    /// Returns [`PrefetchError::Worker`] if the worker panicked.
    pub fn join(self) -> Result<Vec<PrefetchEvent>, PrefetchError> {
        let Self { events, thread, .. } = self;
        thread.join().map_err(|_| PrefetchError::Worker {
            message: "worker thread panicked".to_owned(),
        })?;
        Ok(events.try_iter().collect())
    }
}

struct Worker {
    catalog: Arc<dyn SourceCatalog>,
    data_dir: Utf8PathBuf,
    current: u64,
    options: PrefetchOptions,
    events: Sender<PrefetchEvent>,
    cancel: Receiver<()>,
}

impl Worker {
    fn emit(&self, event: PrefetchEvent) {
        if self.events.send(event).is_err() {
            debug!("Prefetch events dropped: receiver closed");
        }
    }

    fn fail(&self, name: Option<&str>, err: &dyn std::fmt::Display) {
        warn!(
            "Prefetch aborted: file={}, error={err}",
            name.unwrap_or("-")
        );
        self.emit(PrefetchEvent::Failed {
            name: name.map(str::to_owned),
            message: err.to_string(),
        });
    }

    fn cancelled(&self) -> bool {
        match self.cancel.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    fn plan(&self) -> Result<(Vec<ChunkFiles>, LocalInventory), PrefetchError> {
        let listing = self.catalog.list()?;
        let chunks = group_by_chunk(&listing)?;
        let inventory = LocalInventory::scan(&self.data_dir).map_err(|source| {
            PrefetchError::Io {
                path: self.data_dir.clone(),
                source,
            }
        })?;
        let plan = plan_prefetch(self.current, &chunks, &inventory, self.options);
        Ok((plan, inventory))
    }

    fn run(&self) {
        let (plan, inventory) = match self.plan() {
            Ok(planned) => planned,
            Err(err) => {
                self.fail(None, &err);
                return;
            }
        };
        self.emit(PrefetchEvent::Planned {
            chunks: plan.iter().map(|chunk| chunk.chunk).collect(),
        });
        let mut files = 0;
        let mut bytes: u64 = 0;
        for file in plan
            .iter()
            .flat_map(|chunk| chunk.files.iter())
            .filter(|file| !inventory.holds(file))
        {
            if self.cancelled() {
                info!("Prefetch cancelled: fetched={files}");
                self.emit(PrefetchEvent::Cancelled);
                return;
            }
            match fetch_file(self.catalog.as_ref(), &self.data_dir, file) {
                Ok(received) => {
                    files += 1;
                    bytes = bytes.saturating_add(received);
                    self.emit(PrefetchEvent::Fetched {
                        name: file.name.clone(),
                        bytes: received,
                    });
                }
                Err(err) => {
                    self.fail(Some(&file.name), &err);
                    return;
                }
            }
        }
        info!("Prefetch finished: files={files}, bytes={bytes}");
        self.emit(PrefetchEvent::Finished { files, bytes });
    }
}

/// Start a background worker fetching the chunks after `current` into
/// `data_dir`.
///
/// # Errors
///
/// Returns [`PrefetchError::Worker`] if the thread cannot be spawned.
pub fn spawn_prefetch(
    catalog: Arc<dyn SourceCatalog>,
    data_dir: &Utf8Path,
    current: u64,
    options: PrefetchOptions,
) -> Result<PrefetchHandle, PrefetchError> {
    let (event_tx, event_rx) = mpsc::channel();
    let (cancel_tx, cancel_rx) = mpsc::channel();
    let worker = Worker {
        catalog,
        data_dir: data_dir.to_path_buf(),
        current,
        options,
        events: event_tx,
        cancel: cancel_rx,
    };
    let thread = thread::Builder::new()
        .name("wikiflat-prefetch".to_owned())
        .spawn(move || worker.run())
        .map_err(|err| PrefetchError::Worker {
            message: err.to_string(),
        })?;
    Ok(PrefetchHandle {
        events: event_rx,
        cancel: cancel_tx,
        thread,
    })
}
