#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tunnelg::{
    error::ServiceError,
    runtime::RuntimePaths,
    service::{ServiceControl, UnitVerb},
    supervisor::{Supervisor, SupervisorOptions},
};

pub fn paths_in(dir: &Path) -> RuntimePaths {
    RuntimePaths::new(dir.join("state"), dir.join("units"))
}

pub fn supervisor_in(dir: &Path) -> Supervisor {
    Supervisor::new(
        paths_in(dir),
        SupervisorOptions {
            stop_grace: Duration::from_millis(500),
            free_ports: false,
        },
    )
}

/// Live and not a zombie.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {pid} to exit");
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            let lines: Vec<_> = content.lines().map(|line| line.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} lines in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

/// Fake init system: records every call and answers from a mutable state.
#[derive(Debug, Default)]
pub struct RecordingControl {
    pub calls: Mutex<Vec<(UnitVerb, Option<String>)>>,
    pub enabled: Mutex<bool>,
    pub active: Mutex<bool>,
    /// Exit code returned for `start`.
    pub start_code: Mutex<i32>,
}

impl RecordingControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn verbs(&self) -> Vec<UnitVerb> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(verb, _)| *verb)
            .collect()
    }
}

impl ServiceControl for RecordingControl {
    fn run(&self, verb: UnitVerb, unit: Option<&str>) -> Result<Option<i32>, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((verb, unit.map(str::to_string)));
        let flag = |on: bool| Some(if on { 0 } else { 3 });
        Ok(match verb {
            UnitVerb::Enable => {
                *self.enabled.lock().unwrap() = true;
                Some(0)
            }
            UnitVerb::Disable => {
                *self.enabled.lock().unwrap() = false;
                Some(0)
            }
            UnitVerb::Start | UnitVerb::Restart => {
                let code = *self.start_code.lock().unwrap();
                if code == 0 {
                    *self.active.lock().unwrap() = true;
                }
                Some(code)
            }
            UnitVerb::Stop => {
                *self.active.lock().unwrap() = false;
                Some(0)
            }
            UnitVerb::Reload | UnitVerb::DaemonReload => Some(0),
            UnitVerb::IsEnabled => flag(*self.enabled.lock().unwrap()),
            UnitVerb::IsActive => flag(*self.active.lock().unwrap()),
        })
    }
}
