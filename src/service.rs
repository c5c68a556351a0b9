//! Persistent service lifecycle through the host init system.
//!
//! A [`ServiceInstaller`] owns one unit file. Installing never clobbers an
//! existing file unless asked to, and the file is never removed: `Absent` is
//! only reachable by deleting it by hand. Every lifecycle verb is a no-op while
//! the unit file is absent.
use serde::Serialize;
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::{command::CommandSpec, error::ServiceError, runtime::RuntimePaths};

/// `systemctl` verbs used by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum UnitVerb {
    Enable,
    Disable,
    Start,
    Stop,
    Restart,
    Reload,
    DaemonReload,
    IsEnabled,
    IsActive,
}

/// Seam between the installer and the init system.
pub trait ServiceControl: Send + Sync + fmt::Debug {
    /// Runs `verb`, scoped to `unit` when given, and returns the exit code.
    /// `None` means the command was terminated by a signal.
    fn run(&self, verb: UnitVerb, unit: Option<&str>) -> Result<Option<i32>, ServiceError>;
}

/// [`ServiceControl`] backed by `systemctl`.
#[derive(Debug, Clone, Default)]
pub struct Systemctl {
    use_sudo: bool,
}

impl Systemctl {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }
}

impl ServiceControl for Systemctl {
    fn run(&self, verb: UnitVerb, unit: Option<&str>) -> Result<Option<i32>, ServiceError> {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("systemctl");
            cmd
        } else {
            Command::new("systemctl")
        };
        cmd.arg(verb.as_ref());
        if matches!(verb, UnitVerb::IsActive | UnitVerb::IsEnabled) {
            cmd.arg("--quiet");
        }
        if let Some(unit) = unit {
            cmd.arg(unit);
        }

        debug!("Running systemctl {verb} {}", unit.unwrap_or_default());
        let output = cmd.stdin(Stdio::null()).output()?;
        if !output.status.success() && !output.stderr.is_empty() {
            debug!(
                "systemctl {verb} reported: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.status.code())
    }
}

/// How the unit file body is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStyle {
    /// Run the command with these extra arguments and use its stdout.
    Generate(Vec<String>),
    /// Render a simple long-running unit for the command.
    Native { description: String },
}

/// Init-system state of a unit, from least to most alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Absent,
    Installed,
    Enabled,
    Active,
}

/// Result of [`ServiceInstaller::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Written,
    /// The unit file existed and overwrite was not requested.
    Skipped,
}

/// Manages a single unit file and its lifecycle.
#[derive(Debug, Clone)]
pub struct ServiceInstaller {
    unit: String,
    path: PathBuf,
    style: UnitStyle,
    escalate: bool,
    control: Arc<dyn ServiceControl>,
}

impl ServiceInstaller {
    pub fn new(
        unit: impl Into<String>,
        paths: &RuntimePaths,
        style: UnitStyle,
        control: Arc<dyn ServiceControl>,
    ) -> Self {
        let unit = unit.into();
        let path = paths.unit_file(&unit);
        Self {
            unit,
            path,
            style,
            escalate: false,
            control,
        }
    }

    /// Write through `sudo tee` when the unit directory is not writable.
    pub fn with_escalation(mut self, escalate: bool) -> Self {
        self.escalate = escalate;
        self
    }

    pub fn unit_name(&self) -> &str {
        &self.unit
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the unit file for `command`, then reloads the init system.
    pub fn install(
        &self,
        command: &CommandSpec,
        overwrite: bool,
    ) -> Result<InstallOutcome, ServiceError> {
        if self.exists() && !overwrite {
            info!(
                "Unit file {} already exists; leaving it untouched",
                self.path.display()
            );
            return Ok(InstallOutcome::Skipped);
        }

        let contents = self.render(command)?;
        self.write_unit(&contents)?;
        info!("Wrote unit file {}", self.path.display());

        match self.control.run(UnitVerb::DaemonReload, None)? {
            Some(0) => {}
            code => warn!("systemctl daemon-reload exited with status {code:?}"),
        }
        Ok(InstallOutcome::Written)
    }

    /// Produces the unit file body for `command`.
    pub fn render(&self, command: &CommandSpec) -> Result<String, ServiceError> {
        match &self.style {
            UnitStyle::Generate(extra) => self.generate(command, extra),
            UnitStyle::Native { description } => Ok(native_unit(description, command)),
        }
    }

    fn generate(&self, command: &CommandSpec, extra: &[String]) -> Result<String, ServiceError> {
        debug!("Generating unit '{}' with: {command}", self.unit);
        let failed = |reason: String| ServiceError::GenerateFailed {
            unit: self.unit.clone(),
            reason,
        };

        let output = command
            .to_command()
            .args(extra)
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| failed(format!("could not run {}: {err}", command.program())))?;

        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with status {:?}",
                command.program(),
                output.status.code()
            )));
        }
        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if body.trim().is_empty() {
            return Err(failed(format!("{} printed nothing", command.program())));
        }
        Ok(body)
    }

    fn write_unit(&self, contents: &str) -> Result<(), ServiceError> {
        let direct = self
            .path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o600)
                    .open(&self.path)
            })
            .and_then(|mut file| file.write_all(contents.as_bytes()));

        match direct {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied && self.escalate => {
                debug!(
                    "Writing {} denied; retrying through sudo tee",
                    self.path.display()
                );
                self.write_unit_with_sudo(contents)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write_unit_with_sudo(&self, contents: &str) -> Result<(), ServiceError> {
        let mut child = Command::new("sudo")
            .arg("tee")
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents.as_bytes())?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("sudo tee {} exited with {status}", self.path.display()),
            )
            .into())
        }
    }

    pub fn enable(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Enable)
    }

    pub fn disable(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Disable)
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Start)
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Stop)
    }

    pub fn restart(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Restart)
    }

    pub fn reload(&self) -> Result<(), ServiceError> {
        self.pass_through(UnitVerb::Reload)
    }

    fn pass_through(&self, verb: UnitVerb) -> Result<(), ServiceError> {
        if !self.exists() {
            debug!(
                "Unit file {} is absent; skipping systemctl {verb}",
                self.path.display()
            );
            return Ok(());
        }
        match self.control.run(verb, Some(&self.unit))? {
            Some(0) => {
                debug!("systemctl {verb} {} succeeded", self.unit);
                Ok(())
            }
            code => Err(ServiceError::CommandFailed {
                verb: verb.to_string(),
                unit: self.unit.clone(),
                code,
            }),
        }
    }

    /// Queries the init system; nothing is cached.
    pub fn state(&self) -> Result<ServiceState, ServiceError> {
        if !self.exists() {
            return Ok(ServiceState::Absent);
        }
        if self.control.run(UnitVerb::IsActive, Some(&self.unit))? == Some(0) {
            return Ok(ServiceState::Active);
        }
        if self.control.run(UnitVerb::IsEnabled, Some(&self.unit))? == Some(0) {
            return Ok(ServiceState::Enabled);
        }
        Ok(ServiceState::Installed)
    }
}

fn native_unit(description: &str, command: &CommandSpec) -> String {
    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description={description}\n"));
    unit.push_str("After=network-online.target\n");
    unit.push_str("Wants=network-online.target\n\n");
    unit.push_str("[Service]\n");
    unit.push_str("Type=simple\n");
    for (key, value) in command.env_vars() {
        unit.push_str(&format!(
            "Environment={}\n",
            systemd_quote(&format!("{key}={}", value.value()))
        ));
    }
    let exec: Vec<String> = command.argv().into_iter().map(systemd_quote).collect();
    unit.push_str(&format!("ExecStart={}\n", exec.join(" ")));
    unit.push_str("Restart=always\n");
    unit.push_str("RestartSec=5\n\n");
    unit.push_str("[Install]\n");
    unit.push_str("WantedBy=multi-user.target\n");
    unit
}

/// Quotes a word for `ExecStart=`/`Environment=`, escaping specifier and
/// variable expansion.
fn systemd_quote(word: &str) -> String {
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if needs_quotes {
        format!(
            "\"{}\"",
            escaped.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        escaped
    }
}
