//! Single-slot documents shared by the phases of one experiment run.
//!
//! A stop performed by one invocation is undone by a later one (possibly in another process), so
//! every undo descriptor and probe result is written to a per-run directory under a fixed key.
//!
//! # Contract
//!
//! * Each [Key] holds at most one JSON document. A write replaces the whole document (last write
//!   wins); there is no merge or append.
//! * A missing document (`None`) is distinct from a present but empty one.
//! * Writes go to a temporary file that is renamed over the key, so a reader never observes a
//!   partially written document.
//! * There is no locking: a run has a single writer and a single reader at a time. Two runs must
//!   use different run identifiers.

use crate::Error;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Names of the documents kept for a run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    StoppedPrimary,
    StoppedNodes,
    DemotedNodes,
    BlockNodePortRandom,
    NodesRandom,
    Primaries,
    Mode,
    /// Raw snapshot last collected from a node.
    ValidatorInfo(String),
}

impl Key {
    pub fn file_name(&self) -> String {
        match self {
            Key::StoppedPrimary => "stopped_primary".to_string(),
            Key::StoppedNodes => "stopped_nodes".to_string(),
            Key::DemotedNodes => "demoted-nodes".to_string(),
            Key::BlockNodePortRandom => "block_node_port_random".to_string(),
            Key::NodesRandom => "nodes_random".to_string(),
            Key::Primaries => "primaries".to_string(),
            Key::Mode => "mode".to_string(),
            Key::ValidatorInfo(alias) => format!("{alias}-validator-info"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Ensure `run` can be used as a single path component.
pub fn validate_run(run: &str) -> Result<(), Error> {
    if run.is_empty()
        || !run
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidRun(run.to_string()));
    }
    Ok(())
}

/// State of one experiment run.
#[derive(Clone, Debug)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open (creating if needed) the state of `run` under `base`.
    pub fn open(base: &Path, run: &str) -> Result<Self, Error> {
        validate_run(run)?;
        let dir = base.join(run);
        fs::create_dir_all(&dir)?;
        debug!(dir = ?dir, "opened state store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &Key) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the raw document stored under `key`.
    pub fn get_raw(&self, key: &Key) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the document stored under `key`.
    pub fn put_raw(&self, key: &Key, value: &str) -> Result<(), Error> {
        let path = self.path(key);
        let tmp = self.dir.join(format!(".{}.tmp", key.file_name()));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!(%key, bytes = value.len(), "stored document");
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<T>, Error> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn put<T: Serialize>(&self, key: &Key, value: &T) -> Result<(), Error> {
        self.put_raw(key, &serde_json::to_string(value)?)
    }

    /// Delete the document stored under `key`, returning whether it existed.
    pub fn remove(&self, key: &Key) -> Result<bool, Error> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every document of the run (and its directory).
    pub fn destroy(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
