//! On-disk record of live handles, so that a later invocation can find and
//! stop children started by an earlier one.
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::RegistryError;

/// Opaque reference to a running managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Handle {
    /// A child process, identified by PID and its kernel start time so that a
    /// recycled PID is not mistaken for the original child.
    Process {
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
    },
    /// A unit managed by the init system.
    Unit { name: String },
}

impl Handle {
    pub fn pid(&self) -> Option<u32> {
        match self {
            Handle::Process { pid, .. } => Some(*pid),
            Handle::Unit { .. } => None,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Process { pid, .. } => write!(f, "PID {pid}"),
            Handle::Unit { name } => write!(f, "unit {name}"),
        }
    }
}

/// Map of logical names to handles, persisted as JSON.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ProcessRegistry {
    processes: BTreeMap<String, Handle>,
}

impl ProcessRegistry {
    /// Loads the registry, treating a missing or empty file as empty.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes the registry through a sibling temp file and a rename, so a
    /// crash mid-write never leaves truncated JSON behind.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = staging_path(path);
        let mut file = File::create(&staging)?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Handle> {
        self.processes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.processes.keys()
    }

    /// Records `handle` for `name` on disk.
    pub fn record(path: &Path, name: &str, handle: &Handle) -> Result<(), RegistryError> {
        let mut registry = Self::load(path)?;
        registry.processes.insert(name.to_string(), handle.clone());
        registry.save(path)
    }

    /// Drops `name` from the on-disk registry. Missing entries are ignored.
    pub fn forget(path: &Path, name: &str) -> Result<(), RegistryError> {
        let mut registry = Self::load(path)?;
        if registry.processes.remove(name).is_some() {
            registry.save(path)?;
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Exclusive advisory lock serialising registry updates across invocations.
/// Released on drop.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
}

impl RegistryLock {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
