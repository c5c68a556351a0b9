//! Configuration management for tunnelg.
//!
//! A [`Config`] is built once per run from an environment lookup and then only
//! read. Reloading produces a new value; overrides go through
//! [`ConfigBuilder`], which knows every field and rejects anything else.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    io::Write,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::Path,
    sync::OnceLock,
};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Default code-server extensions installed by the notebook bootstrap.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "ms-python.python",
    "ms-toolsai.jupyter",
    "mechatroner.rainbow-csv",
    "vscode-icons-team.vscode-icons",
    "tabnine.tabnine-vscode",
    "almenon.arepl",
    "kevinrose.vsc-python-indent",
    "ms-vscode-remote.remote-ssh",
    "mutantdino.resourcemonitor",
    "ms-python.vscode-pylance",
];

/// Default code-server release.
pub const DEFAULT_CODE_SERVER_VERSION: &str = "3.12.0";

/// Environment keys understood by [`Config::reload`].
pub mod keys {
    pub const INLETS_LICENSE: &str = "INLETS_LICENSE";
    pub const INLETS_TOKEN: &str = "INLETS_TOKEN";
    pub const INLETS_TUNNEL_HOST: &str = "INLETS_TUNNEL_HOST";
    pub const INLETS_SERVER_HOST: &str = "INLETS_SERVER_HOST";
    pub const INLETS_SERVER_PORT: &str = "INLETS_SERVER_PORT";
    pub const INLETS_CLIENT_HOST: &str = "INLETS_CLIENT_HOST";
    pub const INLETS_CLIENT_PORT: &str = "INLETS_CLIENT_PORT";
    pub const INLETS_DOMAIN: &str = "INLETS_DOMAIN";
    pub const INLETS_CLUSTER: &str = "INLETS_CLUSTER";
    pub const INLETS_CLIENT_TYPE: &str = "INLETS_CLIENT_TYPE";
    pub const INLETS_USE_SUDO: &str = "INLETS_USE_SUDO";
    pub const CODESERVER_EXTENSIONS: &str = "CODESERVER_EXTENSIONS";
    pub const CODESERVER_VERSION: &str = "CODESERVER_VERSION";
    pub const SERVER_AUTHTOKEN: &str = "SERVER_AUTHTOKEN";
    pub const SERVER_PASSWORD: &str = "SERVER_PASSWORD";
    pub const RUN_CODE: &str = "RUN_CODE";
    pub const RUN_LAB: &str = "RUN_LAB";
    pub const GENERATE_AUTH: &str = "GENERATE_AUTH";

    /// Every key, in export order.
    pub const ALL: &[&str] = &[
        INLETS_LICENSE,
        INLETS_TOKEN,
        INLETS_TUNNEL_HOST,
        INLETS_SERVER_HOST,
        INLETS_SERVER_PORT,
        INLETS_CLIENT_HOST,
        INLETS_CLIENT_PORT,
        INLETS_DOMAIN,
        INLETS_CLUSTER,
        INLETS_CLIENT_TYPE,
        INLETS_USE_SUDO,
        CODESERVER_EXTENSIONS,
        CODESERVER_VERSION,
        SERVER_AUTHTOKEN,
        SERVER_PASSWORD,
        RUN_CODE,
        RUN_LAB,
        GENERATE_AUTH,
    ];
}

/// Protocol the inlets client tunnels.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Tcp,
    Http,
}

/// Which IDE server to run behind the tunnel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum IdeKind {
    #[default]
    CodeServer,
    JupyterLab,
}

/// Settings for the inlets tunnel client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// License material for inlets-pro.
    pub license: Option<String>,
    /// Auth token shared with the tunnel server.
    pub token: Option<String>,
    /// Cluster ingress host (cluster topology).
    pub tunnel_host: String,
    /// Public tunnel server host.
    pub server_host: String,
    /// Control port of a standalone tunnel server.
    pub server_port: u16,
    /// Local host the tunnel forwards to.
    pub client_host: String,
    /// Local port the tunnel forwards to; the IDE server listens here.
    pub client_port: u16,
    /// Domain routed to the local upstream (standalone topology).
    pub domain_name: String,
    /// Cluster vs standalone topology.
    pub cluster: bool,
    pub client_type: ClientType,
    /// Prefix tunnel and systemctl invocations with `sudo`.
    pub use_sudo: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            license: None,
            token: None,
            tunnel_host: String::new(),
            server_host: String::new(),
            server_port: 8123,
            client_host: "127.0.0.1".to_string(),
            client_port: 7070,
            domain_name: "localhost".to_string(),
            cluster: true,
            client_type: ClientType::Tcp,
            use_sudo: true,
        }
    }
}

impl TunnelConfig {
    /// Host the client dials in cluster topology. The dedicated tunnel host wins;
    /// the public server host is used when no tunnel host is configured.
    pub fn cluster_host(&self) -> &str {
        if self.tunnel_host.is_empty() {
            &self.server_host
        } else {
            &self.tunnel_host
        }
    }

    /// Websocket URL of the tunnel server.
    pub fn tunnel_url(&self) -> String {
        if self.cluster {
            format!("wss://{}", self.cluster_host())
        } else {
            format!("wss://{}:{}/connect", self.server_host, self.server_port)
        }
    }

    /// URL the exposed service is reachable at.
    pub fn public_url(&self) -> String {
        if self.cluster {
            format!("https://{}", self.server_host)
        } else if !self.domain_name.is_empty() {
            format!("https://{}", self.domain_name)
        } else {
            self.local_url()
        }
    }

    /// Local address the tunnel forwards to.
    pub fn local_url(&self) -> String {
        format!("http://{}:{}", self.client_host, self.client_port)
    }

    /// Upstream routing argument for standalone topology.
    pub fn upstream_url(&self) -> String {
        if self.domain_name.is_empty() {
            self.local_url()
        } else {
            format!("{}={}", self.domain_name, self.local_url())
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "license" => self.license = non_empty(value),
            "token" => self.token = non_empty(value),
            "tunnel_host" => self.tunnel_host = value.trim().to_string(),
            "server_host" => self.server_host = value.trim().to_string(),
            "server_port" => self.server_port = parse_port(key, value)?,
            "client_host" => self.client_host = value.trim().to_string(),
            "client_port" => self.client_port = parse_port(key, value)?,
            "domain_name" | "domain" => self.domain_name = value.trim().to_string(),
            "cluster" | "is_cluster" => self.cluster = parse_bool(key, value)?,
            "client_type" => {
                self.client_type =
                    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("expected tcp or http, got '{}'", value.trim()),
                    })?
            }
            "use_sudo" => self.use_sudo = parse_bool(key, value)?,
            _ => {
                return Err(ConfigError::UnknownKey {
                    section: "inlet",
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Settings for the IDE server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub ide: IdeKind,
    pub extensions: Vec<String>,
    pub version: String,
    pub auth_token: Option<String>,
    /// Explicit password; generated per run when absent and `generate_auth` is set.
    pub password: Option<String>,
    pub generate_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ide: IdeKind::CodeServer,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            version: DEFAULT_CODE_SERVER_VERSION.to_string(),
            auth_token: None,
            password: None,
            generate_auth: true,
        }
    }
}

impl ServerConfig {
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "ide" => {
                self.ide = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!(
                        "expected code-server or jupyter-lab, got '{}'",
                        value.trim()
                    ),
                })?
            }
            "code" => {
                if parse_bool(key, value)? {
                    self.ide = IdeKind::CodeServer;
                } else {
                    self.ide = IdeKind::JupyterLab;
                }
            }
            "lab" => {
                if parse_bool(key, value)? {
                    self.ide = IdeKind::JupyterLab;
                }
            }
            "extensions" => self.extensions = parse_list(value),
            "version" => self.version = value.trim().to_string(),
            "auth_token" | "authtoken" => self.auth_token = non_empty(value),
            "password" => self.password = non_empty(value),
            "generate_auth" => self.generate_auth = parse_bool(key, value)?,
            _ => {
                return Err(ConfigError::UnknownKey {
                    section: "server",
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub tunnel: TunnelConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Builds a configuration from defaults plus every key `lookup` knows.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::default().reload(lookup)
    }

    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Returns a new configuration where every key present in `lookup` replaces
    /// the corresponding value of `self`.
    pub fn reload(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        let mut code_explicit = None;
        let mut lab_requested = false;

        for &key in keys::ALL {
            let Some(value) = lookup(key) else {
                continue;
            };
            debug!("Loading {key} from environment");
            let t = &mut next.tunnel;
            let s = &mut next.server;
            match key {
                keys::INLETS_LICENSE => t.set("license", &value)?,
                keys::INLETS_TOKEN => t.set("token", &value)?,
                keys::INLETS_TUNNEL_HOST => t.set("tunnel_host", &value)?,
                keys::INLETS_SERVER_HOST => t.set("server_host", &value)?,
                keys::INLETS_SERVER_PORT => t.server_port = parse_port(key, &value)?,
                keys::INLETS_CLIENT_HOST => t.set("client_host", &value)?,
                keys::INLETS_CLIENT_PORT => t.client_port = parse_port(key, &value)?,
                keys::INLETS_DOMAIN => t.set("domain_name", &value)?,
                keys::INLETS_CLUSTER => t.cluster = parse_bool(key, &value)?,
                keys::INLETS_CLIENT_TYPE => t.set("client_type", &value)?,
                keys::INLETS_USE_SUDO => t.use_sudo = parse_bool(key, &value)?,
                keys::CODESERVER_EXTENSIONS => s.extensions = parse_list(&value),
                keys::CODESERVER_VERSION => s.set("version", &value)?,
                keys::SERVER_AUTHTOKEN => s.set("auth_token", &value)?,
                keys::SERVER_PASSWORD => s.set("password", &value)?,
                keys::RUN_CODE => code_explicit = Some(parse_bool(key, &value)?),
                keys::RUN_LAB => lab_requested = parse_bool(key, &value)?,
                keys::GENERATE_AUTH => s.generate_auth = parse_bool(key, &value)?,
                _ => {}
            }
        }

        match (code_explicit, lab_requested) {
            (Some(true), _) => next.server.ide = IdeKind::CodeServer,
            (Some(false), _) | (None, true) => next.server.ide = IdeKind::JupyterLab,
            (None, false) => {}
        }

        Ok(next)
    }

    /// Checks every value that ends up on a command line or in a unit file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tunnel;
        for (key, value) in [
            ("tunnel_host", &t.tunnel_host),
            ("server_host", &t.server_host),
            ("client_host", &t.client_host),
            ("domain_name", &t.domain_name),
        ] {
            check_host(key, value)?;
        }

        if t.client_host.is_empty() {
            return Err(ConfigError::Missing("client_host must be set".into()));
        }
        if t.cluster && t.cluster_host().is_empty() {
            return Err(ConfigError::Missing(
                "cluster mode needs INLETS_TUNNEL_HOST or INLETS_SERVER_HOST".into(),
            ));
        }
        if !t.cluster && t.server_host.is_empty() {
            return Err(ConfigError::Missing(
                "standalone mode needs INLETS_SERVER_HOST".into(),
            ));
        }
        for (key, port) in [("server_port", t.server_port), ("client_port", t.client_port)] {
            if port == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    reason: "port must be between 1 and 65535".into(),
                });
            }
        }

        check_token("token", t.token.as_deref())?;
        check_token("license", t.license.as_deref())?;
        check_token("auth_token", self.server.auth_token.as_deref())?;
        if let Some(password) = &self.server.password
            && password.chars().any(char::is_control)
        {
            return Err(ConfigError::InvalidValue {
                key: "password".into(),
                reason: "must not contain control characters".into(),
            });
        }

        for extension in &self.server.extensions {
            if !extension_pattern().is_match(extension) {
                return Err(ConfigError::InvalidValue {
                    key: "extensions".into(),
                    reason: format!("'{extension}' is not an extension identifier"),
                });
            }
        }

        Ok(())
    }

    /// Exports the configuration as environment keys, suitable for an env file.
    pub fn export(&self) -> BTreeMap<String, String> {
        let t = &self.tunnel;
        let s = &self.server;
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            out.insert(key.to_string(), value);
        };
        put(keys::INLETS_LICENSE, t.license.clone().unwrap_or_default());
        put(keys::INLETS_TOKEN, t.token.clone().unwrap_or_default());
        put(keys::INLETS_TUNNEL_HOST, t.tunnel_host.clone());
        put(keys::INLETS_SERVER_HOST, t.server_host.clone());
        put(keys::INLETS_SERVER_PORT, t.server_port.to_string());
        put(keys::INLETS_CLIENT_HOST, t.client_host.clone());
        put(keys::INLETS_CLIENT_PORT, t.client_port.to_string());
        put(keys::INLETS_DOMAIN, t.domain_name.clone());
        put(keys::INLETS_CLUSTER, t.cluster.to_string());
        put(keys::INLETS_CLIENT_TYPE, t.client_type.to_string());
        put(keys::INLETS_USE_SUDO, t.use_sudo.to_string());
        put(keys::CODESERVER_EXTENSIONS, s.extensions.join(","));
        put(keys::CODESERVER_VERSION, s.version.clone());
        put(keys::SERVER_AUTHTOKEN, s.auth_token.clone().unwrap_or_default());
        put(keys::SERVER_PASSWORD, s.password.clone().unwrap_or_default());
        put(keys::RUN_CODE, (s.ide == IdeKind::CodeServer).to_string());
        put(keys::RUN_LAB, (s.ide == IdeKind::JupyterLab).to_string());
        put(keys::GENERATE_AUTH, s.generate_auth.to_string());
        out
    }

    /// Writes [`Config::export`] as YAML, readable only by the owner.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(&self.export())?;
        write_private(path, yaml.as_bytes())
    }
}

/// Typed override layer on top of a base configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(base: Config) -> Self {
        Self { config: base }
    }

    /// Sets a tunnel field, e.g. `client_port` or `cluster`.
    pub fn tunnel(mut self, key: &str, value: &str) -> Result<Self, ConfigError> {
        self.config.tunnel.set(key.trim(), value)?;
        Ok(self)
    }

    /// Sets an IDE server field, e.g. `ide` or `password`.
    pub fn server(mut self, key: &str, value: &str) -> Result<Self, ConfigError> {
        self.config.server.set(key.trim(), value)?;
        Ok(self)
    }

    pub fn tunnel_overrides(
        self,
        pairs: &[(String, String)],
    ) -> Result<Self, ConfigError> {
        pairs.iter().try_fold(self, |b, (k, v)| b.tunnel(k, v))
    }

    pub fn server_overrides(
        self,
        pairs: &[(String, String)],
    ) -> Result<Self, ConfigError> {
        pairs.iter().try_fold(self, |b, (k, v)| b.server(k, v))
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Environment lookup with an overlay (env files, `--env` pairs) layered over
/// the process environment.
#[derive(Debug, Clone, Default)]
pub struct LayeredEnv {
    overlay: BTreeMap<String, String>,
    overlay_wins: bool,
}

impl LayeredEnv {
    /// `overlay_wins` decides whether overlay values replace variables that are
    /// already set in the process environment.
    pub fn new(overlay_wins: bool) -> Self {
        Self {
            overlay: BTreeMap::new(),
            overlay_wins,
        }
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = (String, String)>) {
        self.overlay.extend(values);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let from_env = env::var(key).ok();
        let from_overlay = self.overlay.get(key).cloned();
        if self.overlay_wins {
            from_overlay.or(from_env)
        } else {
            from_env.or(from_overlay)
        }
    }
}

/// Splits `key=value` pairs. Whitespace around both halves is trimmed.
///
/// Errors name only the leading word of a malformed item, never what follows
/// a mistyped separator (`SERVER_PASSWORD:hunter2`).
pub fn parse_assignments(raw: &[String]) -> Result<Vec<(String, String)>, ConfigError> {
    raw.iter()
        .map(|item| {
            let (key, value) =
                item.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                    key: item
                        .split(|c: char| c == ':' || c.is_whitespace())
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    reason: "expected key=value".into(),
                })?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Loads an env file: YAML (`.yaml`/`.yml`), JSON (`.json`) or dotenv lines.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let values: BTreeMap<String, serde_yaml::Value> = match extension.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        Some("json") => serde_json::from_str::<BTreeMap<String, serde_json::Value>>(
            &content,
        )?
        .into_iter()
        .map(|(k, v)| Ok::<_, ConfigError>((k, serde_yaml::to_value(v)?)))
        .collect::<Result<_, ConfigError>>()?,
        _ => return Ok(parse_dotenv(&content)),
    };

    Ok(values
        .into_iter()
        .filter_map(|(key, value)| scalar_to_string(&value).map(|v| (key, v)))
        .collect())
}

fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            values.insert(key.trim().to_string(), value.to_string());
        } else {
            warn!("Ignoring malformed env file line: {line}");
        }
    }
    values
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

/// Reads a string entry (`password`, `token`) from the IDE server settings file.
pub fn read_server_secret(path: &Path, key: &str) -> Result<Option<String>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content)?;
    Ok(value
        .get(key)
        .and_then(|p| p.as_str())
        .map(str::to_string))
}

/// Writes `contents` to `path` with 0600 permissions, creating parent dirs.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    let to_err = |source: std::io::Error| ConfigError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_err)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(to_err)?;
    // `mode` only applies on creation; an existing file keeps its old bits.
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(to_err)?;
    file.write_all(contents).map_err(to_err)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{}' is not a port", value.trim()),
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._:\[\]-]*$").expect("host pattern is valid")
    })
}

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(@[A-Za-z0-9._-]+)?$")
            .expect("extension pattern is valid")
    })
}

fn check_host(key: &str, value: &str) -> Result<(), ConfigError> {
    if host_pattern().is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{value}' is not a host name or address"),
        })
    }
}

/// Secrets are checked without echoing them back.
fn check_token(key: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    let unsafe_char = |c: char| {
        c.is_whitespace() || c.is_control() || matches!(c, '\'' | '"' | '`' | '$' | '\\' | ';')
    };
    if value.chars().any(unsafe_char) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "contains whitespace, quotes or shell metacharacters".into(),
        });
    }
    Ok(())
}
