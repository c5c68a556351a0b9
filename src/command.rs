//! Structured command lines.
//!
//! Commands are kept as argv sequences and spawned without a shell, so
//! configuration values are never re-tokenised. Arguments and environment
//! values can be flagged secret; the [`fmt::Display`] rendering used for logs
//! and error messages masks them.
use std::{
    fmt,
    process::{Command, Stdio},
};

/// Placeholder printed in place of secret values.
pub const REDACTED: &str = "********";

/// A single argument or environment value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    value: String,
    secret: bool,
}

impl Arg {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    fn display(&self) -> &str {
        if self.secret { REDACTED } else { &self.value }
    }
}

/// An executable invocation: program, arguments, extra environment and,
/// for servers, the TCP port the child will listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<Arg>,
    env: Vec<(String, Arg)>,
    listen_port: Option<u16>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            listen_port: None,
        }
    }

    /// Builds a command from a whitespace-free argv, as typed by a user.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::into);
        let mut spec = Self::new(iter.next().unwrap_or_default());
        for arg in iter {
            spec.args.push(Arg::plain(arg));
        }
        spec
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::plain(value));
        self
    }

    /// Adds an argument that must not appear in logs.
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::secret(value));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), Arg::plain(value)));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), Arg::secret(value)));
        self
    }

    /// Marks the command as a TCP server on `port`. The supervisor frees the
    /// port before spawning it.
    pub fn listens_on(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Prepends `wrapper` (e.g. `sudo`) to the invocation.
    pub fn wrapped_in(self, wrapper: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(Arg::plain(self.program));
        args.extend(self.args);
        Self {
            program: wrapper.to_string(),
            args,
            env: self.env,
            listen_port: self.listen_port,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn env_vars(&self) -> &[(String, Arg)] {
        &self.env
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn is_empty(&self) -> bool {
        self.program.trim().is_empty()
    }

    /// Full argv including the program, with real values.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(Arg::value))
            .collect()
    }

    /// Whether an argument equal to `value` is present.
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a.value == value)
    }

    /// Builds a [`Command`] with stdin closed.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(Arg::value));
        for (key, value) in &self.env {
            cmd.env(key, value.value());
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.env {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={}", quote(value.display()))?;
            first = false;
        }
        if !first {
            f.write_str(" ")?;
        }
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg.display()))?;
        }
        Ok(())
    }
}

/// Single-quotes a word for display when it contains anything a POSIX shell
/// would treat specially.
fn quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./:=@,+%*[]".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
