//! Runtime paths.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

/// Default location for generated systemd units.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Directories tunnelg reads and writes during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    state_dir: PathBuf,
    log_dir: PathBuf,
    unit_dir: PathBuf,
}

impl RuntimePaths {
    /// Builds paths rooted at `state_dir`, with logs in `state_dir/logs`.
    pub fn new(state_dir: impl Into<PathBuf>, unit_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let log_dir = state_dir.join("logs");
        Self {
            state_dir,
            log_dir,
            unit_dir: unit_dir.into(),
        }
    }

    /// Resolves paths from explicit overrides, falling back to the user's home
    /// (`~/.local/share/tunnelg`) and `/etc/systemd/system`.
    pub fn resolve(state_dir: Option<PathBuf>, unit_dir: Option<PathBuf>) -> Self {
        let state_dir = state_dir.unwrap_or_else(default_state_dir);
        let unit_dir = unit_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_UNIT_DIR));
        Self::new(state_dir, unit_dir)
    }

    /// State dir (registry, lock, license, credentials).
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Log directory for background children.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Directory where unit files are installed.
    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    pub fn registry_file(&self) -> PathBuf {
        self.state_dir.join("processes.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("processes.lock")
    }

    pub fn license_file(&self) -> PathBuf {
        self.state_dir.join("inlets").join("license")
    }

    /// IDE server settings and credentials, readable only by the owner.
    pub fn server_config(&self) -> PathBuf {
        self.state_dir.join("server").join("config.yaml")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    pub fn unit_file(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(format!("{unit}.service"))
    }

    /// Creates the state and log directories.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        fs::create_dir_all(&self.log_dir)
    }
}

fn default_state_dir() -> PathBuf {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    home.join(".local/share/tunnelg")
}
