//! The tunnel + IDE server workflow driven by `tunnelg start` and `tunnelg stop`.
use serde::Serialize;
use std::{
    env,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::{
    builder::{self, CodeServerSettings, Credentials, TUNNEL_UNIT_ARGS},
    config::{self, Config, IdeKind},
    error::{ConfigError, SupervisorError},
    registry::Handle,
    runtime::RuntimePaths,
    service::{ServiceControl, ServiceInstaller, UnitStyle},
    supervisor::{Mode, StartOutcome, Status, Supervisor},
};

/// Logical name of the tunnel client.
pub const TUNNEL: &str = "tunnel";
/// Logical name of the IDE server.
pub const IDE_SERVER: &str = "ide-server";
/// Unit name used when the tunnel runs as a service.
pub const TUNNEL_UNIT: &str = "inlets";

/// Flags for [`Session::start`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Replace an existing license file with the configured license.
    pub overwrite_license: bool,
    /// Run the tunnel as a systemd unit instead of a background child.
    pub tunnel_service: bool,
    /// Regenerate the unit file even if it exists.
    pub overwrite_service: bool,
    /// Run the IDE server in the background instead of streaming its output.
    pub server_background: bool,
}

/// Outcomes of both halves of a start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub tunnel: StartOutcome,
    pub server: StartOutcome,
}

/// One line of `tunnelg status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,
}

/// IDE settings recorded for jupyter-lab, so the credentials can be shown later.
#[derive(Debug, Serialize)]
struct LabSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    token: String,
}

/// Starts and stops the tunnel client and the IDE server behind it.
pub struct Session {
    config: Config,
    supervisor: Arc<Supervisor>,
    credentials: Credentials,
}

impl Session {
    /// Registers the tunnel unit with `supervisor` so that both service-mode
    /// starts and later stops can reach it.
    pub fn new(
        config: Config,
        supervisor: Arc<Supervisor>,
        control: Arc<dyn ServiceControl>,
    ) -> Result<Self, SupervisorError> {
        let installer = ServiceInstaller::new(
            TUNNEL_UNIT,
            supervisor.paths(),
            UnitStyle::Generate(TUNNEL_UNIT_ARGS.iter().map(|arg| arg.to_string()).collect()),
            control,
        )
        .with_escalation(config.tunnel.use_sudo);
        supervisor.register_service(TUNNEL, installer)?;

        Ok(Self {
            config,
            supervisor,
            credentials: Credentials::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Ensures a license file exists and returns its path.
    ///
    /// The configured license is written unless a file is already present and
    /// `overwrite` is false. Without a configured license an existing file is
    /// reused; with neither this is a configuration error.
    pub fn resolve_license(&self, overwrite: bool) -> Result<PathBuf, SupervisorError> {
        let path = self.supervisor.paths().license_file();
        match &self.config.tunnel.license {
            Some(license) if overwrite || !path.exists() => {
                config::write_private(&path, license.as_bytes())?;
                info!("Wrote inlets license to {}", path.display());
                Ok(path)
            }
            Some(_) => {
                debug!("Keeping existing license file {}", path.display());
                Ok(path)
            }
            None if path.exists() => Ok(path),
            None => Err(ConfigError::Missing(
                "an inlets license is required; pass --license or set INLETS_LICENSE".into(),
            )
            .into()),
        }
    }

    /// Starts the tunnel client in the background, or as a unit.
    pub fn start_tunnel(&self, options: &StartOptions) -> Result<StartOutcome, SupervisorError> {
        let license = self.resolve_license(options.overwrite_license)?;
        let command = builder::tunnel_command(&self.config.tunnel, Some(&license));
        let mode = if options.tunnel_service {
            Mode::Service {
                overwrite: options.overwrite_service,
            }
        } else {
            Mode::Background
        };

        let outcome = self.supervisor.start(TUNNEL, &command, mode)?;
        let tunnel = &self.config.tunnel;
        let exposed = if tunnel.cluster {
            &tunnel.server_host
        } else {
            &tunnel.domain_name
        };
        info!(
            "Inlets client is running at {exposed}. Listening to {}",
            tunnel.local_url()
        );
        warn!("Setup is not complete until the IDE server is running");
        Ok(outcome)
    }

    /// Starts the IDE server. In the foreground this blocks, streaming the
    /// server's output to `out`, until it exits or is stopped.
    pub fn start_server(
        &self,
        background: bool,
        out: &mut dyn Write,
    ) -> Result<StartOutcome, SupervisorError> {
        let settings = self.supervisor.paths().server_config();
        let command = builder::server_command(&self.config, &self.credentials, &settings);
        let mode = if background {
            Mode::Background
        } else {
            Mode::Foreground
        };

        // Settings are only written when this call spawns the server; a
        // running server keeps the credentials it was started with.
        self.supervisor
            .start_prepared(IDE_SERVER, &command, mode, out, || {
                self.write_server_settings(&settings)?;
                self.announce_server();
                Ok(())
            })
    }

    fn write_server_settings(&self, path: &Path) -> Result<(), SupervisorError> {
        let yaml = match self.config.server.ide {
            IdeKind::CodeServer => {
                serde_yaml::to_string(&CodeServerSettings::from_config(&self.config, &self.credentials))
            }
            IdeKind::JupyterLab => serde_yaml::to_string(&LabSettings {
                password: self.credentials.password(&self.config.server),
                token: self.credentials.lab_token(&self.config.server),
            }),
        }
        .map_err(ConfigError::from)?;
        config::write_private(path, yaml.as_bytes())?;
        debug!("Wrote IDE server settings to {}", path.display());
        Ok(())
    }

    fn announce_server(&self) {
        let tunnel = &self.config.tunnel;
        let server = &self.config.server;
        match server.ide {
            IdeKind::CodeServer => {
                info!(
                    "Running code-server v{} @ {}:{}",
                    server.version, tunnel.client_host, tunnel.client_port
                );
                info!(
                    "Your code-server is available at {}/?folder=/content",
                    tunnel.public_url()
                );
            }
            IdeKind::JupyterLab => {
                info!(
                    "Running Jupyter Lab @ {}:{}",
                    tunnel.client_host, tunnel.client_port
                );
                info!("Run `tunnelg server token` to show the access token");
            }
        }
        if self.credentials.password(server).is_some() {
            info!("Run `tunnelg server password` to show the server password");
        }
    }

    /// Starts the tunnel, then the IDE server.
    pub fn start(
        &self,
        options: &StartOptions,
        out: &mut dyn Write,
    ) -> Result<SessionOutcome, SupervisorError> {
        let tunnel = self.start_tunnel(options)?;
        let server = self.start_server(options.server_background, out)?;
        Ok(SessionOutcome { tunnel, server })
    }

    /// Stops the IDE server, then the tunnel. Both are attempted; the first
    /// failure is returned.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let server = self.supervisor.stop(IDE_SERVER);
        let tunnel = self.supervisor.stop(TUNNEL);
        server.and(tunnel)
    }

    pub fn status(&self) -> Vec<ProcessReport> {
        [TUNNEL, IDE_SERVER]
            .into_iter()
            .map(|name| {
                let handle = self.supervisor.handle(name).unwrap_or_else(|err| {
                    warn!("Could not determine status of '{name}': {err}");
                    None
                });
                ProcessReport {
                    name: name.to_string(),
                    status: if handle.is_some() {
                        Status::Running
                    } else {
                        Status::Stopped
                    },
                    handle,
                }
            })
            .collect()
    }
}

/// The IDE server password recorded by the last start, falling back to the
/// user's own code-server config.
pub fn stored_password(paths: &RuntimePaths) -> Result<Option<String>, ConfigError> {
    if let Some(password) = config::read_server_secret(&paths.server_config(), "password")? {
        return Ok(Some(password));
    }
    match env::var_os("HOME") {
        Some(home) => config::read_server_secret(
            &PathBuf::from(home).join(".config/code-server/config.yaml"),
            "password",
        ),
        None => Ok(None),
    }
}

/// The jupyter-lab token recorded by the last start.
pub fn stored_token(paths: &RuntimePaths) -> Result<Option<String>, ConfigError> {
    config::read_server_secret(&paths.server_config(), "token")
}
