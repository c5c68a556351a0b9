#[path = "common/mod.rs"]
mod common;

use std::{fs, sync::Arc};

use common::{RecordingControl, supervisor_in, wait_for_process_exit};
use tempfile::tempdir;
use tunnelg::{
    command::CommandSpec,
    config::{Config, ConfigBuilder},
    error::{ServiceError, SupervisorError},
    session::{IDE_SERVER, Session, StartOptions, TUNNEL},
    supervisor::{Mode, StartOutcome, Status},
};

fn config() -> Config {
    ConfigBuilder::new(Config::default())
        .tunnel("server_host", "tun.example.com")
        .unwrap()
        .tunnel("use_sudo", "false")
        .unwrap()
        .tunnel("license", "LICENSE-MATERIAL")
        .unwrap()
        .tunnel("token", "tok3n-value")
        .unwrap()
        .build()
        .unwrap()
}

fn session_in(dir: &std::path::Path, control: &Arc<RecordingControl>) -> Session {
    let supervisor = Arc::new(supervisor_in(dir));
    Session::new(config(), supervisor, control.clone()).expect("session")
}

#[test]
fn missing_tunnel_binary_fails_without_leaking_token() {
    let temp = tempdir().expect("failed to create tempdir");
    let control = RecordingControl::new();
    let session = session_in(temp.path(), &control);

    let mut out = Vec::new();
    let err = session
        .start(&StartOptions::default(), &mut out)
        .expect_err("inlets-pro is not installed in the test environment");

    match &err {
        SupervisorError::SpawnFailure { name, command, .. } => {
            assert_eq!(name, TUNNEL);
            assert!(command.starts_with("inlets-pro tcp client"));
            assert!(command.contains("********"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.to_string().contains("tok3n-value"));

    // The license is written before the spawn is attempted.
    let license = session.supervisor().paths().license_file();
    assert_eq!(fs::read_to_string(license).unwrap(), "LICENSE-MATERIAL");
    assert!(session.status().iter().all(|r| r.status == Status::Stopped));
}

#[test]
fn service_mode_reports_generation_failure() {
    let temp = tempdir().expect("failed to create tempdir");
    let control = RecordingControl::new();
    let session = session_in(temp.path(), &control);

    let options = StartOptions {
        tunnel_service: true,
        ..StartOptions::default()
    };
    let err = session
        .start_tunnel(&options)
        .expect_err("unit generation needs inlets-pro");
    assert!(matches!(
        err,
        SupervisorError::Service(ServiceError::GenerateFailed { .. })
    ));
    assert!(!temp.path().join("units/inlets.service").exists());
    assert!(control.verbs().is_empty());
}

#[test]
fn running_server_keeps_its_settings() {
    let temp = tempdir().expect("failed to create tempdir");
    let control = RecordingControl::new();
    let session = session_in(temp.path(), &control);

    let started = session
        .supervisor()
        .start(
            IDE_SERVER,
            &CommandSpec::from_argv(["sleep", "30"]),
            Mode::Background,
        )
        .expect("start stand-in server");

    let mut out = Vec::new();
    let outcome = session
        .start_server(true, &mut out)
        .expect("start server");
    assert_eq!(outcome, StartOutcome::AlreadyRunning(started.handle().clone()));
    assert!(!session.supervisor().paths().server_config().exists());

    session.stop().expect("stop");
    wait_for_process_exit(started.handle().pid().unwrap());
}

#[test]
fn stop_and_status_cover_both_processes() {
    let temp = tempdir().expect("failed to create tempdir");
    let control = RecordingControl::new();
    let session = session_in(temp.path(), &control);
    let supervisor = session.supervisor();

    let tunnel = supervisor
        .start(TUNNEL, &CommandSpec::from_argv(["sleep", "30"]), Mode::Background)
        .expect("start stand-in tunnel");
    let report = session.status();
    assert_eq!(report[0].name, TUNNEL);
    assert_eq!(report[0].status, Status::Running);
    assert_eq!(report[0].handle.as_ref(), Some(tunnel.handle()));
    assert_eq!(report[1].name, IDE_SERVER);
    assert_eq!(report[1].status, Status::Stopped);

    session.stop().expect("stop");
    session.stop().expect("repeated stop");
    wait_for_process_exit(tunnel.handle().pid().unwrap());
    assert!(session.status().iter().all(|r| r.status == Status::Stopped));
}
