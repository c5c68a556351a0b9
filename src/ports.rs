//! Forcible release of TCP ports ahead of spawning a listener.
//!
//! A server that died without cleanup often leaves a stray process holding the
//! port. Before the supervisor spawns a TCP child it kills whatever else holds
//! the port, mirroring `fuser -k -n tcp <port>`.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{io, thread, time::Duration};
use tracing::{debug, info, warn};

/// Kills every process other than the current one that holds `port`.
/// Returns the PIDs that were signalled.
pub fn free_tcp_port(port: u16) -> io::Result<Vec<u32>> {
    let me = std::process::id();
    let holders: Vec<u32> = holders_of(port)?
        .into_iter()
        .filter(|&pid| pid != me)
        .collect();

    if holders.is_empty() {
        debug!("Port {port} is free");
        return Ok(holders);
    }

    for &pid in &holders {
        info!("Killing PID {pid} holding TCP port {port}");
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(Errno::EPERM) => {
                warn!("Insufficient permissions to kill PID {pid} holding port {port}");
            }
            Err(err) => return Err(io::Error::from_raw_os_error(err as i32)),
        }
    }

    const CHECKS: usize = 10;
    const INTERVAL: Duration = Duration::from_millis(100);
    for _ in 0..CHECKS {
        if holders_of(port)?.into_iter().all(|pid| pid == me) {
            break;
        }
        thread::sleep(INTERVAL);
    }

    Ok(holders)
}

/// Lists PIDs with a socket bound to local TCP `port`.
#[cfg(target_os = "linux")]
pub fn holders_of(port: u16) -> io::Result<Vec<u32>> {
    use std::{collections::HashSet, fs};

    let mut inodes = HashSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match fs::read_to_string(table) {
            Ok(content) => inodes.extend(socket_inodes(&content, port)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut pids = Vec::new();
    for entry in fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        // Processes come and go, and other users' fds are unreadable.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds_port = fds.flatten().any(|fd| {
            fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        });
        if holds_port {
            pids.push(pid);
        }
    }
    Ok(pids)
}

/// Lists PIDs with a socket bound to local TCP `port`, via `lsof`.
#[cfg(not(target_os = "linux"))]
pub fn holders_of(port: u16) -> io::Result<Vec<u32>> {
    let output = std::process::Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{port}"))
        .output();
    match output {
        Ok(output) => Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("lsof not found; cannot free port {port}");
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

/// Extracts socket inodes bound to `port` from a `/proc/net/tcp` style table.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn socket_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (_, port_hex) = fields.get(1)?.rsplit_once(':')?;
            if u16::from_str_radix(port_hex, 16).ok()? != port {
                return None;
            }
            let inode = fields.get(9)?.parse::<u64>().ok()?;
            (inode != 0).then_some(inode)
        })
        .collect()
}

/// Parses `socket:[12345]` fd link targets.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}
