//! Renders configuration into tunnel and IDE server invocations.
//!
//! Rendering is deterministic for a given [`Config`]. The only generated values
//! are credentials, which live in [`Credentials`] and are created at most once
//! per run.
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::OnceLock};
use uuid::Uuid;

use crate::{
    command::CommandSpec,
    config::{Config, IdeKind, ServerConfig, TunnelConfig},
};

/// Tunnel client executable.
pub const TUNNEL_PROGRAM: &str = "inlets-pro";
pub const CODE_SERVER_PROGRAM: &str = "code-server";
pub const JUPYTER_LAB_PROGRAM: &str = "jupyter-lab";

/// Arguments that make the tunnel client print a systemd unit instead of running.
pub const TUNNEL_UNIT_ARGS: &[&str] = &["--generate", "systemd"];

/// Per-run credential store.
#[derive(Debug, Default)]
pub struct Credentials {
    generated_password: OnceLock<String>,
    generated_lab_token: OnceLock<String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Password for the IDE server. A configured password wins; otherwise one
    /// is generated on first use when `generate_auth` is set, and reused.
    pub fn password(&self, server: &ServerConfig) -> Option<String> {
        match &server.password {
            Some(password) => Some(password.clone()),
            None if server.generate_auth => {
                Some(self.generated_password.get_or_init(generate_secret).clone())
            }
            None => None,
        }
    }

    /// Jupyter token: the configured auth token, or one generated once.
    pub fn lab_token(&self, server: &ServerConfig) -> String {
        match &server.auth_token {
            Some(token) => token.clone(),
            None => self.generated_lab_token.get_or_init(generate_secret).clone(),
        }
    }
}

fn generate_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Renders the inlets client invocation.
///
/// Cluster topology dials the shared tunnel host and names the upstream host
/// and port separately; standalone topology routes `domain=http://host:port`.
pub fn tunnel_command(tunnel: &TunnelConfig, license_file: Option<&Path>) -> CommandSpec {
    let mut cmd = CommandSpec::new(TUNNEL_PROGRAM)
        .arg(tunnel.client_type.to_string())
        .arg("client")
        .arg(format!("--url={}", tunnel.tunnel_url()));

    if tunnel.cluster {
        cmd = cmd
            .arg(format!("--upstream={}", tunnel.client_host))
            .arg(format!("--port={}", tunnel.client_port))
            .arg("--auto-tls=false");
    } else {
        cmd = cmd.arg(format!("--upstream={}", tunnel.upstream_url()));
    }

    if let Some(token) = &tunnel.token {
        cmd = cmd.secret_arg(format!("--token={token}"));
    }
    if let Some(path) = license_file {
        cmd = cmd.arg(format!("--license-file={}", path.display()));
    }

    if tunnel.use_sudo {
        cmd.wrapped_in("sudo")
    } else {
        cmd
    }
}

/// Contents of the code-server config file handed over with `--config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeServerSettings {
    #[serde(rename = "bind-addr")]
    pub bind_addr: String,
    pub auth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub cert: bool,
}

impl CodeServerSettings {
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let password = credentials.password(&config.server);
        Self {
            bind_addr: bind_addr(&config.tunnel),
            auth: if password.is_some() { "password" } else { "none" }.to_string(),
            password,
            cert: false,
        }
    }
}

fn bind_addr(tunnel: &TunnelConfig) -> String {
    format!("{}:{}", tunnel.client_host, tunnel.client_port)
}

/// Renders the IDE server invocation. The server listens on the tunnel's
/// client host and port.
pub fn server_command(
    config: &Config,
    credentials: &Credentials,
    code_server_config: &Path,
) -> CommandSpec {
    let tunnel = &config.tunnel;
    let cmd = match config.server.ide {
        IdeKind::CodeServer => CommandSpec::new(CODE_SERVER_PROGRAM)
            .arg(format!("--config={}", code_server_config.display()))
            .arg(format!("--bind-addr={}", bind_addr(tunnel)))
            .arg("--disable-telemetry"),
        IdeKind::JupyterLab => {
            let token = credentials.lab_token(&config.server);
            let password = credentials.password(&config.server).unwrap_or_default();
            CommandSpec::new(JUPYTER_LAB_PROGRAM)
                .arg(format!("--ip={}", tunnel.client_host))
                .arg("--allow-root")
                .arg("--ServerApp.allow_remote_access=True")
                .arg("--no-browser")
                .secret_arg(format!("--ServerApp.token={token}"))
                .secret_arg(format!("--ServerApp.password={password}"))
                .arg(format!("--port={}", tunnel.client_port))
        }
    };
    cmd.listens_on(tunnel.client_port)
}
