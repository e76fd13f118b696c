//! Per-file pipeline state persisted on disk.
//!
//! Each source file has one record, `<state dir>/<stem>.jsonl`, holding
//! `{"step": n}` for its current [`Stage`]. Records only move forwards and a
//! file at [`Stage::Complete`] stays there. Chunk and part indices are parsed
//! from the record's file name (`chunk_<chunk>-<part>`).

use std::fmt;
use std::ops::RangeInclusive;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wikiflat_fs::{list_files, open_utf8_file, write_atomically};

const RECORD_SUFFIX: &str = ".jsonl";
const CHUNK_PATTERN: &str = r"chunk_(\d+)-";
const PART_PATTERN: &str = r"chunk_\d+-(\d+)";

/// Processing stage of one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Discovered but not yet fetched.
    Init,
    /// Present in the data directory.
    Pull,
    /// Tables written to the output directory.
    Process,
    /// Tables partitioned by key.
    Partition,
    /// Partitions published.
    Push,
    /// Publication verified.
    PostCheck,
    /// Nothing left to do.
    Complete,
}

impl Stage {
    /// Every stage in order.
    pub const ALL: [Self; 7] = [
        Self::Init,
        Self::Pull,
        Self::Process,
        Self::Partition,
        Self::Push,
        Self::PostCheck,
        Self::Complete,
    ];

    /// Ordinal persisted in state records.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Pull => 1,
            Self::Process => 2,
            Self::Partition => 3,
            Self::Push => 4,
            Self::PostCheck => 5,
            Self::Complete => 6,
        }
    }

    /// Stage for a persisted ordinal.
    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Init),
            1 => Some(Self::Pull),
            2 => Some(Self::Process),
            3 => Some(Self::Partition),
            4 => Some(Self::Push),
            5 => Some(Self::PostCheck),
            6 => Some(Self::Complete),
            _ => None,
        }
    }

    /// Upper-case stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Pull => "PULL",
            Self::Process => "PROCESS",
            Self::Partition => "PARTITION",
            Self::Push => "PUSH",
            Self::PostCheck => "POST_CHECK",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    step: u8,
}

/// Recorded state of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Source file stem, e.g. `chunk_3-7`.
    pub stem: String,
    /// Chunk index parsed from the stem.
    pub chunk: Option<u64>,
    /// Part index parsed from the stem.
    pub part: Option<u64>,
    /// Current stage.
    pub stage: Stage,
}

/// Outcome of [`StateStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved to the requested stage.
    Advanced {
        /// Previous stage, if any record existed.
        from: Option<Stage>,
        /// Stage now recorded.
        to: Stage,
    },
    /// The file was already at the requested stage.
    Unchanged,
}

/// Errors raised by the state store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// A state record could not be read or written.
    #[error("I/O error on state record {path}: {source}")]
    Io {
        /// Record path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A state record holds invalid JSON.
    #[error("state record {path} is not valid JSON: {source}")]
    Parse {
        /// Record path.
        path: Utf8PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// A state record holds an ordinal outside 0–6.
    #[error("state record {path} holds unknown step {step}")]
    UnknownStep {
        /// Record path.
        path: Utf8PathBuf,
        /// The stored ordinal.
        step: u8,
    },
    /// The source path has no file stem.
    #[error("source path {path} has no file name")]
    NoStem {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A transition would move a file backwards.
    #[error("{stem} cannot move back from {from} to {to}")]
    Backwards {
        /// Source file stem.
        stem: String,
        /// Current stage.
        from: Stage,
        /// Requested stage.
        to: Stage,
    },
    /// A transition would leave the terminal stage.
    #[error("{stem} is complete and cannot move to {to}")]
    Terminal {
        /// Source file stem.
        stem: String,
        /// Requested stage.
        to: Stage,
    },
    /// A filename pattern failed to compile.
    #[error("invalid filename pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Directory of per-file state records.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: Utf8PathBuf,
    chunk_re: Regex,
    part_re: Regex,
}

impl StateStore {
    /// Open the store rooted at `dir`; the directory is created on first write.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Pattern`] if the filename patterns fail to
    /// compile.
    pub fn new(dir: &Utf8Path) -> Result<Self, StateError> {
        Ok(Self {
            dir: dir.to_path_buf(),
            chunk_re: Regex::new(CHUNK_PATTERN)?,
            part_re: Regex::new(PART_PATTERN)?,
        })
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn stem_of(source: &Utf8Path) -> Result<&str, StateError> {
        source.file_stem().ok_or_else(|| StateError::NoStem {
            path: source.to_path_buf(),
        })
    }

    fn record_path(&self, stem: &str) -> Utf8PathBuf {
        self.dir.join(format!("{stem}{RECORD_SUFFIX}"))
    }

    fn capture(re: &Regex, stem: &str) -> Option<u64> {
        re.captures(stem)
            .and_then(|caps| caps.get(1))
            .and_then(|found| found.as_str().parse().ok())
    }

    fn read_record(path: &Utf8Path) -> Result<Stage, StateError> {
        let file = open_utf8_file(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let record = serde_json::Deserializer::from_reader(file)
            .into_iter::<StateRecord>()
            .next()
            .unwrap_or_else(|| Ok(StateRecord { step: 0 }))
            .map_err(|source| StateError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Stage::from_ordinal(record.step).ok_or_else(|| StateError::UnknownStep {
            path: path.to_path_buf(),
            step: record.step,
        })
    }

    /// Current stage of `source`, if recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the record exists but cannot be read.
    pub fn stage_of(&self, source: &Utf8Path) -> Result<Option<Stage>, StateError> {
        let path = self.record_path(Self::stem_of(source)?);
        let exists = wikiflat_fs::is_file(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        if !exists {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    /// Move `source` to `stage`.
    ///
    /// Re-recording the current stage is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backwards`] for a stage before the current one,
    /// [`StateError::Terminal`] when the file is already complete, and
    /// [`StateError::Io`] when the record cannot be written.
    pub fn record(&self, source: &Utf8Path, stage: Stage) -> Result<Transition, StateError> {
        let stem = Self::stem_of(source)?;
        let current = self.stage_of(source)?;
        match current {
            Some(now) if now == stage => return Ok(Transition::Unchanged),
            Some(Stage::Complete) => {
                return Err(StateError::Terminal {
                    stem: stem.to_owned(),
                    to: stage,
                });
            }
            Some(now) if stage < now => {
                return Err(StateError::Backwards {
                    stem: stem.to_owned(),
                    from: now,
                    to: stage,
                });
            }
            _ => {}
        }
        self.write_record(stem, stage)?;
        info!("Recorded stage: file={stem}, stage={stage}");
        Ok(Transition::Advanced {
            from: current,
            to: stage,
        })
    }

    fn write_record(&self, stem: &str, stage: Stage) -> Result<(), StateError> {
        let path = self.record_path(stem);
        let record = StateRecord {
            step: stage.ordinal(),
        };
        let mut line = serde_json::to_vec(&record).map_err(|source| StateError::Parse {
            path: path.clone(),
            source,
        })?;
        line.push(b'\n');
        write_atomically(&path, &line).map_err(|source| StateError::Io { path, source })
    }

    /// Every record, sorted by chunk then part.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the directory or a record cannot be read.
    pub fn all(&self) -> Result<Vec<FileState>, StateError> {
        let paths = list_files(&self.dir, RECORD_SUFFIX).map_err(|source| StateError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut states = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(stem) = path.file_stem() else {
                continue;
            };
            states.push(FileState {
                stem: stem.to_owned(),
                chunk: Self::capture(&self.chunk_re, stem),
                part: Self::capture(&self.part_re, stem),
                stage: Self::read_record(&path)?,
            });
        }
        states.sort_by(|a, b| (a.chunk, a.part, &a.stem).cmp(&(b.chunk, b.part, &b.stem)));
        Ok(states)
    }

    /// Records of `chunk` whose stage lies within `stages`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the records cannot be read.
    pub fn files_in(
        &self,
        chunk: u64,
        stages: RangeInclusive<Stage>,
    ) -> Result<Vec<FileState>, StateError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|state| state.chunk == Some(chunk) && stages.contains(&state.stage))
            .collect())
    }

    /// Lowest chunk with any file short of [`Stage::Complete`].
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the records cannot be read.
    pub fn next_chunk(&self) -> Result<Option<u64>, StateError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|state| state.stage < Stage::Complete)
            .filter_map(|state| state.chunk)
            .min())
    }

    /// Register `files` at [`Stage::Init`], leaving existing records alone.
    /// Returns the number of newly registered files.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when a record cannot be read or written.
    pub fn init_files<P: AsRef<Utf8Path>>(&self, files: &[P]) -> Result<usize, StateError> {
        let mut added = 0;
        for file in files {
            let source = file.as_ref();
            if self.stage_of(source)?.is_some() {
                debug!("Kept existing state: file={source}");
                continue;
            }
            self.write_record(Self::stem_of(source)?, Stage::Init)?;
            added += 1;
        }
        if added > 0 {
            info!("Registered files: dir={}, added={added}", self.dir);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests;
