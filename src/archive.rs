//! Persisted baselines: the fingerprint and timestamp of every file as of its
//! last successful reconciliation.
//!
//! The sync core only needs the `BaselineStore` contract. `MemoryBaseline`
//! keeps everything in memory, `Archive` persists to a single versioned file.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SyncError;
use crate::state::BaselineEntry;
use crate::util::FnvHashMap;

const ARCHIVE_VERSION: u32 = 3;

/// Key-value access to baselines, keyed by sanitized file name.
pub trait BaselineStore {
    fn get_all(&self) -> Result<FnvHashMap<String, BaselineEntry>, SyncError>;

    fn get(&self, file_name: &str) -> Result<Option<BaselineEntry>, SyncError> {
        Ok(self.get_all()?.remove(file_name))
    }

    fn set(&mut self, file_name: &str, entry: BaselineEntry) -> Result<(), SyncError>;

    fn remove(&mut self, file_name: &str) -> Result<(), SyncError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBaseline {
    entries: FnvHashMap<String, BaselineEntry>,
}

impl MemoryBaseline {
    pub fn new() -> Self {
        Default::default()
    }
}

impl BaselineStore for MemoryBaseline {
    fn get_all(&self) -> Result<FnvHashMap<String, BaselineEntry>, SyncError> {
        Ok(self.entries.clone())
    }

    fn get(&self, file_name: &str) -> Result<Option<BaselineEntry>, SyncError> {
        Ok(self.entries.get(file_name).cloned())
    }

    fn set(&mut self, file_name: &str, entry: BaselineEntry) -> Result<(), SyncError> {
        self.entries.insert(file_name.to_owned(), entry);
        Ok(())
    }

    fn remove(&mut self, file_name: &str) -> Result<(), SyncError> {
        self.entries.remove(file_name);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveEntry {
    file_name: String,
    baseline: BaselineEntry,
}

/// A baseline store backed by one file on disk.
///
/// The file is a little-endian `u32` version followed by the bincode encoded
/// entries. A file written by another version reads as empty, which makes
/// every divergent file a conflict again rather than trusting stale data.
#[derive(Debug)]
pub struct Archive {
    pub file: PathBuf,
}

impl Archive {
    /// Opens the archive at `file`, creating its directory if needed.
    pub fn new(file: PathBuf) -> Result<Self, io::Error> {
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Archive { file })
    }

    fn read(&self) -> Result<FnvHashMap<String, BaselineEntry>, ReadError> {
        if !self.file.exists() {
            return Ok(Default::default());
        }
        let file = File::open(&self.file)?;
        FileExt::lock_shared(&file)?;
        let result = read_entries(&mut BufReader::new(&file));
        FileExt::unlock(&file)?;

        match result {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|entry| (entry.file_name, entry.baseline))
                .collect()),
            Err(ReadError::InvalidVersion(version)) => {
                info!("Archive file {} using outdated version ({})", self, version);
                Ok(Default::default())
            }
            Err(e) => Err(e),
        }
    }

    fn write(&self, entries: &FnvHashMap<String, BaselineEntry>) -> Result<(), WriteError> {
        let mut entries: Vec<ArchiveEntry> = entries
            .iter()
            .map(|(file_name, baseline)| ArchiveEntry {
                file_name: file_name.clone(),
                baseline: baseline.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        let file = OpenOptions::new().write(true).create(true).truncate(false).open(&self.file)?;
        FileExt::lock_exclusive(&file)?;
        file.set_len(0)?;
        debug!("Writing {} entries to {}", entries.len(), self);
        let result = {
            let mut out = BufWriter::new(&file);
            write_entries(&mut out, &entries).and_then(|_| out.flush().map_err(WriteError::from))
        };
        FileExt::unlock(&file)?;
        result
    }
}

impl BaselineStore for Archive {
    fn get_all(&self) -> Result<FnvHashMap<String, BaselineEntry>, SyncError> {
        Ok(self.read()?)
    }

    fn set(&mut self, file_name: &str, entry: BaselineEntry) -> Result<(), SyncError> {
        let mut entries = self.read()?;
        entries.insert(file_name.to_owned(), entry);
        self.write(&entries)?;
        Ok(())
    }

    fn remove(&mut self, file_name: &str) -> Result<(), SyncError> {
        let mut entries = self.read()?;
        if entries.remove(file_name).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.file.display())
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unsupported archive version {0}")]
    InvalidVersion(u32),
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("{0}")]
    DeserializeError(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("{0}")]
    SerializeError(#[from] bincode::Error),
}

/// reads a set of entries from a binary stream
fn read_entries<R: io::Read>(read: &mut R) -> Result<Vec<ArchiveEntry>, ReadError> {
    let version = read.read_u32::<LittleEndian>()?;
    if version != ARCHIVE_VERSION {
        return Err(ReadError::InvalidVersion(version));
    }
    Ok(bincode::deserialize_from(read)?)
}

// writes a set of entries to a binary stream
fn write_entries<W: io::Write>(out: &mut W, entries: &[ArchiveEntry]) -> Result<(), WriteError> {
    out.write_u32::<LittleEndian>(ARCHIVE_VERSION)?;
    bincode::serialize_into(out, entries)?;
    Ok(())
}

/// Convenience for callers that keep the archive next to the synced files.
pub fn default_archive_path(root: &Path) -> PathBuf {
    root.join(".canvas-sync").join("baseline")
}
