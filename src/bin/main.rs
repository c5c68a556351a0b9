use std::{error::Error, io, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tunnelg::{
    cli::{Cli, Commands, ConfigCommands, EnvArgs, ServerCommands, parse_args},
    config::{Config, ConfigBuilder, LayeredEnv, load_env_file, parse_assignments},
    logs,
    runtime::RuntimePaths,
    service::Systemctl,
    session::{self, IDE_SERVER, Session, StartOptions},
    supervisor::{StartOutcome, Supervisor, SupervisorOptions},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);
    let paths = RuntimePaths::resolve(args.state_dir.clone(), args.unit_dir.clone());

    match args.command {
        Commands::Start {
            license,
            overwrite_license,
            service,
            overwrite_service,
            background,
            env,
            inlet,
            server,
        } => {
            let mut builder = ConfigBuilder::new(resolve_config(&env)?);
            if let Some(license) = license {
                builder = builder.tunnel("license", &license)?;
            }
            let config = builder
                .tunnel_overrides(&parse_assignments(&inlet)?)?
                .server_overrides(&parse_assignments(&server)?)?
                .build()?;

            paths.ensure()?;
            let supervisor = Arc::new(Supervisor::new(paths, SupervisorOptions::default()));
            let session = build_session(config, Arc::clone(&supervisor))?;
            if !background {
                register_signal_handler(Arc::clone(&supervisor))?;
            }

            let options = StartOptions {
                overwrite_license,
                tunnel_service: service,
                overwrite_service,
                server_background: background,
            };
            let outcome = session.start(&options, &mut io::stdout())?;
            if let StartOutcome::Exited { code, .. } = outcome.server {
                info!("IDE server exited with status {code:?}");
            }
        }
        Commands::Stop => {
            let supervisor = Arc::new(Supervisor::new(paths, SupervisorOptions::default()));
            let session = build_session(Config::from_env()?, supervisor)?;
            session.stop()?;
        }
        Commands::Status { json } => {
            let supervisor = Arc::new(Supervisor::new(paths, SupervisorOptions::default()));
            let session = build_session(Config::from_env()?, supervisor)?;
            let reports = session.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in reports {
                    match report.handle {
                        Some(handle) => {
                            println!("{:<12} {} ({handle})", report.name, report.status)
                        }
                        None => println!("{:<12} {}", report.name, report.status),
                    }
                }
            }
        }
        Commands::Logs { name, lines } => {
            let stdout = io::stdout();
            logs::show_log(&paths, &name, lines, &mut stdout.lock())?;
        }
        Commands::Config(ConfigCommands::Save { path, env }) => {
            let config = resolve_config(&env)?;
            let path = path.unwrap_or_else(|| paths.snapshot_file());
            config.save_snapshot(&path)?;
            info!("Saved configuration to {}", path.display());
        }
        Commands::Server(ServerCommands::Password) => match session::stored_password(&paths)? {
            Some(password) => println!("Server Password: {password}"),
            None => warn!("No server password has been recorded"),
        },
        Commands::Server(ServerCommands::Token) => match session::stored_token(&paths)? {
            Some(token) => println!("Server Token: {token}"),
            None => warn!("No server token has been recorded"),
        },
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Stdout carries command output and the foreground server's stream.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Resolves configuration from the process environment overlaid with the
/// env file and `--env` entries.
fn resolve_config(env: &EnvArgs) -> Result<Config, Box<dyn Error>> {
    let mut layered = LayeredEnv::new(env.override_env);
    if let Some(path) = &env.envfile {
        if path.exists() {
            layered.extend(load_env_file(path)?);
        } else {
            warn!("Env file {} does not exist; ignoring it", path.display());
        }
    }
    layered.extend(parse_assignments(&env.env)?);
    Ok(Config::from_lookup(|key| layered.get(key))?)
}

fn build_session(
    config: Config,
    supervisor: Arc<Supervisor>,
) -> Result<Session, Box<dyn Error>> {
    let control = Arc::new(Systemctl::new(config.tunnel.use_sudo));
    Ok(Session::new(config, supervisor, control)?)
}

fn register_signal_handler(supervisor: Arc<Supervisor>) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("Interrupted; stopping the IDE server");
        if let Err(err) = supervisor.stop(IDE_SERVER) {
            error!("Failed to stop '{IDE_SERVER}': {err}");
        }
    })?;

    Ok(())
}
