//! Error handling for tunnelg.
use thiserror::Error;

/// Defines all possible errors raised by the process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The command handed to `start` had no program to execute.
    #[error("Refusing to start '{0}': command is empty")]
    EmptyCommand(String),

    /// Error spawning a managed process.
    #[error("Failed to start '{name}' (`{command}`): {source}")]
    SpawnFailure {
        /// Logical name of the managed process.
        name: String,
        /// The command line, with secrets redacted.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error signalling or reaping a managed process.
    #[error("Failed to stop '{name}': {source}")]
    StopFailure {
        /// Logical name of the managed process.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Service mode was requested for a name with no registered unit.
    #[error("No service unit registered for '{0}'")]
    UnknownService(String),

    /// Configuration problem detected before spawning.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Error from the init-system service path.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Error reading or writing the handle registry.
    #[error("Process registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Generic I/O failure (log files, lock files, output streams).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoison(String),
}

impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::MutexPoison(err.to_string())
    }
}

/// Errors raised while resolving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An override named a field the section does not have.
    #[error("Unknown {section} option '{key}'")]
    UnknownKey {
        /// Section the override targeted (`inlet` or `server`).
        section: &'static str,
        /// The rejected key.
        key: String,
    },

    /// A value could not be parsed or is unsafe to pass along.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Why the value was rejected. Never contains secret material.
        reason: String,
    },

    /// A required value is absent.
    #[error("Missing configuration: {0}")]
    Missing(String),

    /// Error reading a configuration or env file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that could not be read.
        path: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error writing a configuration artifact.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File that could not be written.
        path: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML.
    #[error("Invalid YAML format: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error parsing JSON.
    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the service installer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `systemctl` ran but reported failure.
    #[error("`systemctl {verb} {unit}` exited with status {code:?}")]
    CommandFailed {
        /// The systemctl verb.
        verb: String,
        /// Unit the verb was scoped to.
        unit: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// The unit generator command failed or printed nothing.
    #[error("Failed to generate unit '{unit}': {reason}")]
    GenerateFailed {
        /// Unit being generated.
        unit: String,
        /// Short description of the failure.
        reason: String,
    },

    /// Error launching systemctl/sudo or touching the unit file.
    #[error("Service I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for the persisted handle registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error reading or writing the registry file.
    #[error("Failed to access registry file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the registry file.
    #[error("Failed to parse registry file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error type for log display.
#[derive(Debug, Error)]
pub enum LogsError {
    /// No log file has been written for the name.
    #[error("No log file for '{0}'")]
    NotFound(String),

    /// Error reading the log file.
    #[error("Log read failed: {0}")]
    Io(#[from] std::io::Error),
}
