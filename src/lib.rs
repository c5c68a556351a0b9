//! tunnelg exposes a remote IDE server (code-server or jupyter-lab) through an
//! inlets tunnel. It builds the tunnel and server command lines from
//! environment-driven configuration, supervises both processes with
//! idempotent start and stop, and can install the tunnel as a systemd unit.

/// Structured command builders for the tunnel client and the IDE server.
pub mod builder;

/// CLI interface.
pub mod cli;

/// Structured command lines with secret-aware rendering.
pub mod command;

/// Configuration management.
pub mod config;

/// Error handling.
pub mod error;

/// Log files of background processes.
pub mod logs;

/// TCP port release ahead of spawning listeners.
pub mod ports;

/// Persisted handles of running processes.
pub mod registry;

/// Runtime directories.
pub mod runtime;

/// systemd unit installation and lifecycle.
pub mod service;

/// Tunnel + IDE server workflow.
pub mod session;

/// Process supervisor.
pub mod supervisor;
