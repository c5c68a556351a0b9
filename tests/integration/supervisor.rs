#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    net::TcpListener,
    os::{fd::OwnedFd, unix::process::ExitStatusExt},
    process::{Command, Stdio},
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use common::{is_process_alive, paths_in, supervisor_in, wait_for_lines, wait_for_process_exit};
use tempfile::tempdir;
use tunnelg::{
    command::CommandSpec,
    error::SupervisorError,
    logs,
    registry::Handle,
    supervisor::{Mode, StartOutcome, Status, Supervisor, SupervisorOptions},
};

fn sleeper() -> CommandSpec {
    CommandSpec::from_argv(["sleep", "30"])
}

fn pid_of(outcome: &StartOutcome) -> u32 {
    outcome.handle().pid().expect("process handle")
}

#[test]
fn second_start_returns_existing_handle() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());

    let first = supervisor
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("first start");
    let second = supervisor
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("second start");

    assert!(matches!(first, StartOutcome::Started(_)));
    assert!(matches!(second, StartOutcome::AlreadyRunning(_)));
    assert_eq!(pid_of(&first), pid_of(&second));
    assert!(is_process_alive(pid_of(&first)));

    supervisor.stop("tunnel").expect("stop");
    wait_for_process_exit(pid_of(&first));
}

#[test]
fn stop_without_process_is_a_no_op() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());

    supervisor.stop("never-started").expect("first stop");
    supervisor.stop("never-started").expect("second stop");
    assert_eq!(supervisor.status("never-started"), Status::Stopped);
}

#[test]
fn stop_is_idempotent_and_restart_spawns_new_process() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());

    let first = supervisor
        .start("ide-server", &sleeper(), Mode::Background)
        .expect("start");
    assert_eq!(supervisor.status("ide-server"), Status::Running);

    supervisor.stop("ide-server").expect("stop");
    supervisor.stop("ide-server").expect("repeated stop");
    assert_eq!(supervisor.status("ide-server"), Status::Stopped);
    assert!(!is_process_alive(pid_of(&first)));

    let second = supervisor
        .start("ide-server", &sleeper(), Mode::Background)
        .expect("restart");
    assert!(matches!(second, StartOutcome::Started(_)));
    assert_ne!(pid_of(&first), pid_of(&second));
    assert!(is_process_alive(pid_of(&second)));

    supervisor.stop("ide-server").expect("final stop");
}

#[test]
fn foreground_streams_stdout_line_by_line() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let command = CommandSpec::from_argv(["sh", "-c", "echo one; echo two; exit 3"]);

    let mut out = Vec::new();
    let outcome = supervisor
        .start_with_output("ide-server", &command, Mode::Foreground, &mut out)
        .expect("foreground start");

    assert_eq!(String::from_utf8(out).unwrap(), "one\ntwo\n");
    assert!(matches!(outcome, StartOutcome::Exited { code: Some(3), .. }));
    assert_eq!(supervisor.status("ide-server"), Status::Stopped);
}

#[test]
fn foreground_child_can_be_stopped_from_another_thread() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = Arc::new(supervisor_in(temp.path()));

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || {
            let mut out = Vec::new();
            supervisor.start_with_output("ide-server", &sleeper(), Mode::Foreground, &mut out)
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.status("ide-server") != Status::Running {
        assert!(Instant::now() < deadline, "foreground child never started");
        thread::sleep(Duration::from_millis(50));
    }

    // A second caller sees the running child instead of spawning another.
    let again = supervisor
        .start("ide-server", &sleeper(), Mode::Background)
        .expect("second start");
    assert!(matches!(again, StartOutcome::AlreadyRunning(_)));

    supervisor.stop("ide-server").expect("stop");
    let outcome = runner
        .join()
        .expect("runner thread panicked")
        .expect("foreground start");
    assert!(matches!(outcome, StartOutcome::Exited { code: None, .. }));
    assert_eq!(supervisor.status("ide-server"), Status::Stopped);
}

#[test]
fn missing_executable_is_a_spawn_failure_without_secrets() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let command = CommandSpec::new("tunnelg-test-no-such-binary")
        .arg("client")
        .secret_arg("--token=topsecret");

    let err = supervisor
        .start("tunnel", &command, Mode::Background)
        .expect_err("spawn should fail");
    match &err {
        SupervisorError::SpawnFailure { name, command, .. } => {
            assert_eq!(name, "tunnel");
            assert!(command.contains("tunnelg-test-no-such-binary client ********"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.to_string().contains("topsecret"));
    assert_eq!(supervisor.status("tunnel"), Status::Stopped);
}

#[test]
fn empty_command_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let err = supervisor
        .start("tunnel", &CommandSpec::new(""), Mode::Background)
        .expect_err("empty command");
    assert!(matches!(err, SupervisorError::EmptyCommand(name) if name == "tunnel"));
}

#[test]
fn later_supervisor_adopts_and_stops_recorded_process() {
    let temp = tempdir().expect("failed to create tempdir");
    let first = supervisor_in(temp.path());
    let started = first
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("start");
    let pid = pid_of(&started);

    let second = supervisor_in(temp.path());
    assert_eq!(second.status("tunnel"), Status::Running);
    match second.handle("tunnel").expect("handle") {
        Some(Handle::Process { pid: adopted, .. }) => assert_eq!(adopted, pid),
        other => panic!("unexpected handle: {other:?}"),
    }
    let again = second
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("start from second supervisor");
    assert!(matches!(again, StartOutcome::AlreadyRunning(_)));

    second.stop("tunnel").expect("stop from second supervisor");
    wait_for_process_exit(pid);
    assert_eq!(first.status("tunnel"), Status::Stopped);
}

#[test]
fn stubborn_child_is_killed_after_grace_period() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let command = CommandSpec::from_argv([
        "sh",
        "-c",
        "trap '' TERM; while true; do sleep 0.1; done",
    ]);

    let started = supervisor
        .start("stubborn", &command, Mode::Background)
        .expect("start");
    thread::sleep(Duration::from_millis(200));

    let begun = Instant::now();
    supervisor.stop("stubborn").expect("stop");
    assert!(begun.elapsed() < Duration::from_secs(5));
    wait_for_process_exit(pid_of(&started));
}

#[test]
fn background_output_goes_to_log_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let command = CommandSpec::from_argv(["sh", "-c", "echo hello; echo oops >&2; sleep 30"]);

    supervisor
        .start("tunnel", &command, Mode::Background)
        .expect("start");
    let log = logs::log_path(supervisor.paths(), "tunnel");
    let lines = wait_for_lines(&log, 2);
    assert!(lines.contains(&"hello".to_string()));
    assert!(lines.contains(&"oops".to_string()));

    supervisor.stop("tunnel").expect("stop");
}

#[test]
fn exited_background_child_reports_stopped() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    supervisor
        .start("short", &CommandSpec::from_argv(["true"]), Mode::Background)
        .expect("start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.status("short") != Status::Stopped {
        assert!(Instant::now() < deadline, "child never reported as exited");
        thread::sleep(Duration::from_millis(50));
    }
    supervisor.stop("short").expect("stop after exit");
}

#[test]
fn concurrent_starts_spawn_exactly_one_child() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = Arc::new(supervisor_in(temp.path()));
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = Arc::clone(&supervisor);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                supervisor
                    .start_with_output("tunnel", &sleeper(), Mode::Background, &mut Vec::new())
                    .expect("start")
            })
        })
        .collect();

    let outcomes: Vec<StartOutcome> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .collect();

    let started = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, StartOutcome::Started(_)))
        .count();
    assert_eq!(started, 1);
    let pid = pid_of(&outcomes[0]);
    assert!(outcomes.iter().all(|outcome| pid_of(outcome) == pid));

    supervisor.stop("tunnel").expect("stop");
    wait_for_process_exit(pid);
}

#[test]
fn stop_all_stops_every_recorded_name() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let a = supervisor
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("start tunnel");
    let b = supervisor
        .start("ide-server", &sleeper(), Mode::Background)
        .expect("start server");

    let other = supervisor_in(temp.path());
    other.stop_all().expect("stop all");

    wait_for_process_exit(pid_of(&a));
    wait_for_process_exit(pid_of(&b));
    assert_eq!(supervisor.status("tunnel"), Status::Stopped);
    assert_eq!(supervisor.status("ide-server"), Status::Stopped);
}

#[test]
fn foreground_child_does_not_block_other_names() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = Arc::new(supervisor_in(temp.path()));

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || {
            supervisor.start(
                "ide-server",
                &CommandSpec::from_argv(["sleep", "3"]),
                Mode::Foreground,
            )
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.status("ide-server") != Status::Running {
        assert!(Instant::now() < deadline, "foreground child never started");
        thread::sleep(Duration::from_millis(50));
    }

    let begun = Instant::now();
    let tunnel = supervisor
        .start("tunnel", &sleeper(), Mode::Background)
        .expect("background start");
    assert!(
        begun.elapsed() < Duration::from_secs(1),
        "background start waited {:?} on the foreground child",
        begun.elapsed()
    );

    supervisor.stop("ide-server").expect("stop server");
    supervisor.stop("tunnel").expect("stop tunnel");
    runner
        .join()
        .expect("runner thread panicked")
        .expect("foreground start");
    wait_for_process_exit(pid_of(&tunnel));
}

#[test]
fn preparation_runs_only_for_the_start_that_spawns() {
    let temp = tempdir().expect("failed to create tempdir");
    let settings = temp.path().join("settings");
    let barrier = Arc::new(Barrier::new(6));

    // Separate supervisors stand in for separate invocations sharing state.
    let workers: Vec<_> = (0..6)
        .map(|id| {
            let dir = temp.path().to_path_buf();
            let settings = settings.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let supervisor = supervisor_in(&dir);
                barrier.wait();
                let outcome = supervisor
                    .start_prepared(
                        "ide-server",
                        &sleeper(),
                        Mode::Background,
                        &mut Vec::new(),
                        || {
                            fs::write(&settings, format!("worker {id}"))?;
                            Ok(())
                        },
                    )
                    .expect("start");
                (id, outcome)
            })
        })
        .collect();

    let outcomes: Vec<(usize, StartOutcome)> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .collect();

    let winners: Vec<usize> = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, StartOutcome::Started(_)))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(
        fs::read_to_string(&settings).unwrap(),
        format!("worker {}", winners[0])
    );

    supervisor_in(temp.path()).stop_all().expect("stop all");
    wait_for_process_exit(pid_of(&outcomes[0].1));
}

#[test]
fn failed_preparation_spawns_nothing() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = supervisor_in(temp.path());
    let err = supervisor
        .start_prepared(
            "ide-server",
            &sleeper(),
            Mode::Background,
            &mut Vec::new(),
            || Err(std::io::Error::other("settings unwritable").into()),
        )
        .expect_err("preparation should fail");
    assert!(matches!(err, SupervisorError::Io(_)));
    assert_eq!(supervisor.status("ide-server"), Status::Stopped);
}

#[cfg(target_os = "linux")]
#[test]
fn stale_port_holder_is_killed_before_spawn() {
    let temp = tempdir().expect("failed to create tempdir");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().unwrap().port();

    // The stale holder owns the listening socket as its stdin; our copy is
    // closed once the child is spawned.
    let mut holder = Command::new("sleep")
        .arg("30")
        .stdin(Stdio::from(OwnedFd::from(listener)))
        .spawn()
        .expect("spawn stale holder");

    let supervisor = Supervisor::new(
        paths_in(temp.path()),
        SupervisorOptions {
            stop_grace: Duration::from_millis(500),
            free_ports: true,
        },
    );
    let started = supervisor
        .start(
            "ide-server",
            &CommandSpec::from_argv(["sleep", "30"]).listens_on(port),
            Mode::Background,
        )
        .expect("start");

    let status = holder.wait().expect("wait for stale holder");
    assert_eq!(status.signal(), Some(9));
    assert!(is_process_alive(pid_of(&started)));

    supervisor.stop("ide-server").expect("stop");
}
