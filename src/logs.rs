use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::LogsError;
use crate::runtime::RuntimePaths;

/// Log file for a background process.
pub fn log_path(paths: &RuntimePaths, name: &str) -> PathBuf {
    paths.log_dir().join(format!("{name}.log"))
}

/// Opens the log file for appending, creating the log directory if needed.
pub fn open_log(paths: &RuntimePaths, name: &str) -> io::Result<File> {
    fs::create_dir_all(paths.log_dir())?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(paths, name))
}

/// Writes the last `lines` lines of a process's log file to `out`.
///
/// # Arguments
/// * `name` - The logical process name.
/// * `lines` - The number of log lines to display.
pub fn show_log(
    paths: &RuntimePaths,
    name: &str,
    lines: usize,
    out: &mut dyn Write,
) -> Result<(), LogsError> {
    let path = log_path(paths, name);
    if !path.exists() {
        return Err(LogsError::NotFound(name.to_string()));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut tail = VecDeque::with_capacity(lines);
    for line in reader.lines().map_while(Result::ok) {
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }
    for line in tail {
        writeln!(out, "{line}")?;
    }

    Ok(())
}
