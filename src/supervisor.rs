//! Process supervisor.
//!
//! Owns the start/stop lifecycle of named children. At most one live handle
//! exists per name: starting a running name returns the existing handle, and
//! stopping a stopped name does nothing. Handles are also recorded on disk so
//! that a later invocation can stop what an earlier one started.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    io::{self, BufRead, BufReader, Write},
    os::unix::process::CommandExt,
    process::{Child, ChildStdout, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};
use strum_macros::Display;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::{
    command::CommandSpec,
    error::SupervisorError,
    logs,
    ports,
    registry::{Handle, ProcessRegistry, RegistryLock},
    runtime::RuntimePaths,
    service::{ServiceInstaller, ServiceState},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(1);

/// How a managed process is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Block the caller and stream the child's stdout line by line.
    Foreground,
    /// Return once spawned; output goes to the process's log file.
    Background,
    /// Install, enable and start the registered unit.
    Service { overwrite: bool },
}

/// Derived run state of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Stopped,
}

/// What [`Supervisor::start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new child (or unit) was started.
    Started(Handle),
    /// The name already had a live handle; nothing was spawned.
    AlreadyRunning(Handle),
    /// A foreground child ran to completion or was stopped.
    Exited { handle: Handle, code: Option<i32> },
}

impl StartOutcome {
    pub fn handle(&self) -> &Handle {
        match self {
            StartOutcome::Started(handle)
            | StartOutcome::AlreadyRunning(handle)
            | StartOutcome::Exited { handle, .. } => handle,
        }
    }
}

enum ProcessState {
    NotRunning,
    /// `child` is only held for background children spawned by this
    /// supervisor; adopted and foreground handles are tracked by PID.
    Running {
        handle: Handle,
        child: Option<Child>,
    },
}

struct ManagedProcess {
    command: Option<CommandSpec>,
    mode: Option<Mode>,
    state: ProcessState,
}

impl ManagedProcess {
    fn new() -> Self {
        Self {
            command: None,
            mode: None,
            state: ProcessState::NotRunning,
        }
    }
}

/// Tuning for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub stop_grace: Duration,
    /// Kill stray holders of a command's listen port before spawning it.
    pub free_ports: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(1),
            free_ports: true,
        }
    }
}

/// Supervises named child processes and service units.
pub struct Supervisor {
    paths: RuntimePaths,
    options: SupervisorOptions,
    processes: Mutex<HashMap<String, Arc<Mutex<ManagedProcess>>>>,
    services: Mutex<HashMap<String, Arc<ServiceInstaller>>>,
}

impl Supervisor {
    pub fn new(paths: RuntimePaths, options: SupervisorOptions) -> Self {
        Self {
            paths,
            options,
            processes: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Registers the unit used when `name` is started in [`Mode::Service`].
    pub fn register_service(
        &self,
        name: &str,
        installer: ServiceInstaller,
    ) -> Result<(), SupervisorError> {
        self.services
            .lock()?
            .insert(name.to_string(), Arc::new(installer));
        Ok(())
    }

    fn installer(&self, name: &str) -> Result<Option<Arc<ServiceInstaller>>, SupervisorError> {
        Ok(self.services.lock()?.get(name).cloned())
    }

    fn slot(&self, name: &str) -> Result<Arc<Mutex<ManagedProcess>>, SupervisorError> {
        let mut processes = self.processes.lock()?;
        Ok(Arc::clone(
            processes
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ManagedProcess::new()))),
        ))
    }

    fn lock_registry(&self) -> Result<RegistryLock, SupervisorError> {
        Ok(RegistryLock::acquire(&self.paths.lock_file())?)
    }

    /// Starts `name`, streaming foreground output to stdout.
    pub fn start(
        &self,
        name: &str,
        command: &CommandSpec,
        mode: Mode,
    ) -> Result<StartOutcome, SupervisorError> {
        // Unlocked: stdout is locked per line, not for the child's lifetime.
        self.start_with_output(name, command, mode, &mut io::stdout())
    }

    /// Starts `name` unless it already has a live handle.
    ///
    /// In [`Mode::Foreground`] this blocks until the child exits, writing each
    /// line of its stdout to `out`.
    pub fn start_with_output(
        &self,
        name: &str,
        command: &CommandSpec,
        mode: Mode,
        out: &mut dyn Write,
    ) -> Result<StartOutcome, SupervisorError> {
        self.start_prepared(name, command, mode, out, || Ok(()))
    }

    /// Like [`Supervisor::start_with_output`], running `prepare` right before
    /// the spawn. `prepare` runs under the name's lock and the registry lock,
    /// and only when nothing is running yet, so files it writes are never
    /// replaced under a live child.
    pub fn start_prepared(
        &self,
        name: &str,
        command: &CommandSpec,
        mode: Mode,
        out: &mut dyn Write,
        prepare: impl FnOnce() -> Result<(), SupervisorError>,
    ) -> Result<StartOutcome, SupervisorError> {
        if command.is_empty() {
            return Err(SupervisorError::EmptyCommand(name.to_string()));
        }

        let slot = self.slot(name)?;
        let mut process = slot.lock()?;
        let registry_lock = self.lock_registry()?;
        self.refresh(name, &mut process)?;

        if let ProcessState::Running { handle, .. } = &process.state {
            info!("'{name}' is already running ({handle})");
            return Ok(StartOutcome::AlreadyRunning(handle.clone()));
        }

        prepare()?;
        process.command = Some(command.clone());
        process.mode = Some(mode);

        if let Some(port) = command.listen_port()
            && self.options.free_ports
        {
            match ports::free_tcp_port(port) {
                Ok(killed) if !killed.is_empty() => {
                    info!("Freed TCP port {port} for '{name}' (killed {killed:?})")
                }
                Ok(_) => {}
                Err(err) => warn!("Could not free TCP port {port} for '{name}': {err}"),
            }
        }

        let registry_file = self.paths.registry_file();
        match mode {
            Mode::Service { overwrite } => {
                let handle = self.start_unit(name, command, overwrite)?;
                ProcessRegistry::record(&registry_file, name, &handle)?;
                info!("Started '{name}' as {handle}");
                process.state = ProcessState::Running {
                    handle: handle.clone(),
                    child: None,
                };
                Ok(StartOutcome::Started(handle))
            }
            Mode::Background => {
                let log = logs::open_log(&self.paths, name)?;
                let mut cmd = command.to_command();
                cmd.stdout(log.try_clone()?).stderr(log).process_group(0);
                debug!("Spawning '{name}' in background: {command}");
                let child = cmd
                    .spawn()
                    .map_err(|source| spawn_failure(name, command, source))?;
                let handle = process_handle(child.id());
                ProcessRegistry::record(&registry_file, name, &handle)?;
                info!(
                    "Started '{name}' ({handle}); logging to {}",
                    logs::log_path(&self.paths, name).display()
                );
                process.state = ProcessState::Running {
                    handle: handle.clone(),
                    child: Some(child),
                };
                Ok(StartOutcome::Started(handle))
            }
            Mode::Foreground => {
                let mut cmd = command.to_command();
                cmd.stdout(Stdio::piped()).process_group(0);
                debug!("Spawning '{name}' in foreground: {command}");
                let mut child = cmd
                    .spawn()
                    .map_err(|source| spawn_failure(name, command, source))?;
                let handle = process_handle(child.id());
                ProcessRegistry::record(&registry_file, name, &handle)?;
                info!("Started '{name}' ({handle})");
                process.state = ProcessState::Running {
                    handle: handle.clone(),
                    child: None,
                };

                // Other callers may stop or query the name while this one
                // streams output.
                drop(registry_lock);
                drop(process);

                let stdout = child.stdout.take();
                if let Some(stdout) = stdout
                    && let Err(err) = stream_lines(stdout, out)
                {
                    warn!("Lost output stream of '{name}': {err}; stopping it");
                    let pid = child.id();
                    terminate(name, pid, Some(&mut child), self.options.stop_grace)?;
                }

                let status = child.wait().map_err(|source| SupervisorError::StopFailure {
                    name: name.to_string(),
                    source,
                })?;
                debug!("'{name}' exited with {status}");

                let mut process = slot.lock()?;
                let _registry_lock = self.lock_registry()?;
                if matches!(&process.state, ProcessState::Running { handle: current, .. } if *current == handle)
                {
                    process.state = ProcessState::NotRunning;
                    ProcessRegistry::forget(&registry_file, name)?;
                }

                Ok(StartOutcome::Exited {
                    handle,
                    code: status.code(),
                })
            }
        }
    }

    fn start_unit(
        &self,
        name: &str,
        command: &CommandSpec,
        overwrite: bool,
    ) -> Result<Handle, SupervisorError> {
        let installer = self
            .installer(name)?
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
        installer.install(command, overwrite)?;
        installer.enable()?;
        installer.start()?;
        Ok(Handle::Unit {
            name: installer.unit_name().to_string(),
        })
    }

    /// Stops `name`. Does nothing when it has no live handle.
    pub fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(name)?;
        let mut process = slot.lock()?;
        let _registry_lock = self.lock_registry()?;
        self.refresh(name, &mut process)?;

        let state = std::mem::replace(&mut process.state, ProcessState::NotRunning);
        let (handle, mut child) = match state {
            ProcessState::NotRunning => {
                if let Some(installer) = self.installer(name)?
                    && installer.state()? >= ServiceState::Enabled
                {
                    installer.stop()?;
                    installer.disable()?;
                    info!("Disabled unit {} for '{name}'", installer.unit_name());
                } else {
                    debug!("'{name}' is not running; nothing to stop");
                }
                return Ok(());
            }
            ProcessState::Running { handle, child } => (handle, child),
        };

        if let (Some(command), Some(mode)) = (&process.command, &process.mode) {
            debug!("Stopping '{name}' started {mode:?}: {command}");
        }

        let result = match &handle {
            Handle::Process { pid, .. } => {
                terminate(name, *pid, child.as_mut(), self.options.stop_grace)
            }
            Handle::Unit { .. } => self.stop_unit(name),
        };

        if let Err(err) = result {
            process.state = ProcessState::Running { handle, child };
            return Err(err);
        }

        ProcessRegistry::forget(&self.paths.registry_file(), name)?;
        info!("Stopped '{name}'");
        Ok(())
    }

    fn stop_unit(&self, name: &str) -> Result<(), SupervisorError> {
        let installer = self
            .installer(name)?
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
        installer.stop()?;
        installer.disable()?;
        Ok(())
    }

    /// Stops every name known in memory or on disk. Failures are logged and
    /// do not prevent the remaining names from being stopped.
    pub fn stop_all(&self) -> Result<(), SupervisorError> {
        let mut names: BTreeSet<String> = self.processes.lock()?.keys().cloned().collect();
        {
            let _registry_lock = self.lock_registry()?;
            let registry = ProcessRegistry::load(&self.paths.registry_file())?;
            names.extend(registry.names().cloned());
        }

        for name in names {
            if let Err(err) = self.stop(&name) {
                error!("Failed to stop '{name}': {err}");
            }
        }
        Ok(())
    }

    /// Reports whether `name` is running. Never fails: anything that cannot be
    /// determined counts as stopped.
    pub fn status(&self, name: &str) -> Status {
        match self.handle(name) {
            Ok(Some(_)) => Status::Running,
            Ok(None) => Status::Stopped,
            Err(err) => {
                warn!("Could not determine status of '{name}': {err}");
                Status::Stopped
            }
        }
    }

    /// The live handle for `name`, if any.
    pub fn handle(&self, name: &str) -> Result<Option<Handle>, SupervisorError> {
        let slot = self.slot(name)?;
        let mut process = slot.lock()?;
        let _registry_lock = self.lock_registry()?;
        self.refresh(name, &mut process)?;
        Ok(match &process.state {
            ProcessState::Running { handle, .. } => Some(handle.clone()),
            ProcessState::NotRunning => None,
        })
    }

    /// Reconciles the in-memory state of `name` with the registry and the OS.
    /// Callers hold both the name's mutex and the registry lock.
    fn refresh(&self, name: &str, process: &mut ManagedProcess) -> Result<(), SupervisorError> {
        let registry_file = self.paths.registry_file();

        if matches!(process.state, ProcessState::NotRunning)
            && let Some(handle) = ProcessRegistry::load(&registry_file)?.get(name)
        {
            debug!("Adopting recorded {handle} for '{name}'");
            process.state = ProcessState::Running {
                handle: handle.clone(),
                child: None,
            };
        }

        let alive = match &mut process.state {
            ProcessState::NotRunning => return Ok(()),
            ProcessState::Running {
                child: Some(child), ..
            } => match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("'{name}' exited with {status}");
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    warn!("Failed to poll '{name}': {err}");
                    true
                }
            },
            ProcessState::Running {
                handle: Handle::Process { pid, start_time },
                child: None,
            } => pid_alive(*pid, *start_time),
            ProcessState::Running {
                handle: Handle::Unit { name: unit },
                child: None,
            } => match self.installer(name)? {
                Some(installer) => match installer.state() {
                    Ok(state) => state == ServiceState::Active,
                    Err(err) => {
                        warn!("Failed to query unit {unit}: {err}");
                        true
                    }
                },
                None => true,
            },
        };

        if !alive {
            debug!("'{name}' is no longer running; clearing its handle");
            process.state = ProcessState::NotRunning;
            ProcessRegistry::forget(&registry_file, name)?;
        }
        Ok(())
    }
}

fn spawn_failure(name: &str, command: &CommandSpec, source: io::Error) -> SupervisorError {
    error!("Failed to start '{name}' with `{command}`: {source}");
    SupervisorError::SpawnFailure {
        name: name.to_string(),
        command: command.to_string(),
        source,
    }
}

fn process_handle(pid: u32) -> Handle {
    Handle::Process {
        pid,
        start_time: process_start_time(pid),
    }
}

fn stream_lines(stdout: ChildStdout, out: &mut dyn Write) -> io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        out.write_all(&line)?;
        out.flush()?;
    }
}

fn process_info(pid: u32) -> Option<(ProcessStatus, u64)> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::everything(),
    );
    system
        .process(pid)
        .map(|process| (process.status(), process.start_time()))
}

fn process_start_time(pid: u32) -> Option<u64> {
    process_info(pid).map(|(_, start_time)| start_time)
}

/// Whether `pid` is a live process. Zombies count as dead, and when
/// `start_time` is known a recycled PID does not count as the original.
fn pid_alive(pid: u32, start_time: Option<u64>) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) | Err(Errno::EPERM) => {}
        Err(_) => return false,
    }
    match process_info(pid) {
        Some((ProcessStatus::Zombie, _)) => false,
        Some((_, started)) => start_time.is_none_or(|expected| expected == started),
        None => true,
    }
}

fn exited(pid: u32, child: Option<&mut Child>) -> bool {
    match child {
        Some(child) => match child.try_wait() {
            Ok(status) => status.is_some(),
            Err(_) => !pid_alive(pid, None),
        },
        None => !pid_alive(pid, None),
    }
}

fn wait_for_exit(pid: u32, mut child: Option<&mut Child>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if exited(pid, child.as_deref_mut()) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Process group of `target`, unless it shares the supervisor's own group.
fn child_group(target: Pid) -> Option<Pid> {
    let own = unistd::getpgid(None).ok();
    unistd::getpgid(Some(target))
        .ok()
        .filter(|group| Some(*group) != own)
}

fn nix_error_to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// Sends SIGTERM to the child's group and the child itself, waits up to
/// `grace`, then escalates to SIGKILL. A process that is already gone counts
/// as stopped.
fn terminate(
    name: &str,
    pid: u32,
    mut child: Option<&mut Child>,
    grace: Duration,
) -> Result<(), SupervisorError> {
    let stop_error = |err: Errno| SupervisorError::StopFailure {
        name: name.to_string(),
        source: nix_error_to_io(err),
    };
    let target = Pid::from_raw(pid as i32);

    match signal::kill(target, None) {
        Ok(()) => debug!("Stopping '{name}' (PID {pid})"),
        Err(Errno::ESRCH) => {
            debug!("'{name}' no longer has a live process");
            return Ok(());
        }
        Err(err) => return Err(stop_error(err)),
    }

    let group = child_group(target);
    if let Some(group) = group {
        match signal::killpg(group, Signal::SIGTERM) {
            Ok(()) => debug!("Sent SIGTERM to process group {group} for '{name}'"),
            Err(Errno::ESRCH) => {
                debug!("Process group for '{name}' missing; falling back to direct signal")
            }
            Err(Errno::EPERM) => warn!(
                "Insufficient permissions to signal process group {group} for '{name}'. Falling back to direct signal"
            ),
            Err(err) => return Err(stop_error(err)),
        }
    }

    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            debug!("'{name}' exited before SIGTERM could be delivered");
            return Ok(());
        }
        Err(err) => return Err(stop_error(err)),
    }

    if wait_for_exit(pid, child.as_deref_mut(), grace) {
        return Ok(());
    }

    warn!("'{name}' did not exit after SIGTERM; sending SIGKILL");
    if let Some(group) = group {
        let _ = signal::killpg(group, Signal::SIGKILL);
    }
    match signal::kill(target, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => return Err(stop_error(err)),
    }

    if !wait_for_exit(pid, child, KILL_WAIT) {
        warn!("'{name}' (PID {pid}) is still present after SIGKILL");
    }
    Ok(())
}
