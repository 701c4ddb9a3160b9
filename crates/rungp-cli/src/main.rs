//! # rungp-cli
//!
//! Binary entry point for rungp.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Loading of the run configuration and the workspace's `.gitpod.yml`
//! - The container runtime driving `docker` or `nerdctl`
//! - An HTTP client for the in-workspace supervisor's task feeds
//! - Wiring of the session, observer and renderer for `rungp run`

mod gitpod_config;
mod run;
mod runtime;
mod supervisor_client;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use run::RunRequest;
use rungp_core::{RunConfig, RuntimeKind};
use rungp_proto::Outcome;
use std::path::{Path, PathBuf};
use tracing::debug;
use ui::UiMode;

/// Set to write logs to `.rungp/rungp.log` while the full-screen view runs.
const DEBUG_LOG_ENV: &str = "RUNGP_DEBUG_LOG";

/// Installs a panic hook that restores terminal state before printing panic info.
///
/// A panic while the full-screen view is up would otherwise leave the
/// terminal in raw mode on the alternate screen, hiding the message.
fn install_panic_hook() {
    use ratatui::crossterm::{cursor, execute, terminal};

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(
            std::io::stdout(),
            terminal::LeaveAlternateScreen,
            cursor::Show
        );
        default_hook(panic_info);
    }));
}

/// Container runtime selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeArg {
    Auto,
    Docker,
    Nerdctl,
}

impl From<RuntimeArg> for RuntimeKind {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::Auto => RuntimeKind::Auto,
            RuntimeArg::Docker => RuntimeKind::Docker,
            RuntimeArg::Nerdctl => RuntimeKind::Nerdctl,
        }
    }
}

/// rungp - run a development workspace image locally
#[derive(Parser, Debug)]
#[command(name = "rungp", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Working directory (defaults to the current directory)
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,

    /// Workspace config file, relative to the working directory
    #[arg(short = 'f', long, default_value = ".gitpod.yml", global = true)]
    gitpod_yaml: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Container runtime (overrides the config file)
    #[arg(long, value_enum, global = true)]
    runtime: Option<RuntimeArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a workspace (default if no subcommand given)
    Run(RunArgs),

    /// Build the workspace image
    Build(BuildArgs),

    /// Inspect or change the rungp configuration
    Config(ConfigArgs),

    /// Print version information
    Version,
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Host port the IDE is published on
    #[arg(long)]
    ide_port: Option<u16>,

    /// Host port SSH is published on (0 disables SSH)
    #[arg(long)]
    ssh_port: Option<u16>,

    /// Shift every published port by this number
    #[arg(long, default_value_t = 0)]
    port_offset: u16,

    /// Do not publish the ports declared in .gitpod.yml
    #[arg(long)]
    no_port_forwarding: bool,

    /// Public key authorized for SSH into the workspace
    #[arg(long, value_name = "PATH")]
    ssh_public_key_path: Option<String>,

    /// Do not watch the workspace tasks
    #[arg(long)]
    no_tasks: bool,

    /// How to display the session (--verbose implies daemon)
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,

    /// Directory with `ide/` and `supervisor/` to mount into the workspace
    #[arg(long, value_name = "DIR")]
    assets_dir: Option<PathBuf>,
}

/// Arguments for the build subcommand.
#[derive(Parser, Debug)]
struct BuildArgs {
    /// Image reference to tag the build with
    #[arg(value_name = "TARGET-REFERENCE")]
    target: String,
}

/// Arguments for the config subcommand.
#[derive(Parser, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the location of the config file
    Path,

    /// Set a config value and write the file
    Set {
        /// Key, e.g. autoUpdate.enabled
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();

    let cli = Cli::parse();
    let workdir = resolve_workdir(cli.workdir.as_deref())?;

    // The full-screen view owns the terminal, so logs must not go to stdout.
    let interactive = match &cli.command {
        Some(Commands::Run(args)) => args.ui.resolve(cli.verbose).is_interactive(),
        None => UiMode::Auto.resolve(cli.verbose).is_interactive(),
        _ => false,
    };
    init_tracing(cli.verbose, interactive, &workdir);

    let mut config = RunConfig::load().context("failed to load configuration")?;
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime.into();
    }
    debug!(
        auto_update = config.auto_update.enabled,
        telemetry = config.telemetry.enabled,
        "Loaded configuration"
    );

    match cli.command {
        Some(Commands::Run(args)) => {
            run_command(config, workdir, cli.gitpod_yaml, cli.verbose, args).await
        }
        None => {
            run_command(
                config,
                workdir,
                cli.gitpod_yaml,
                cli.verbose,
                RunArgs::default(),
            )
            .await
        }
        Some(Commands::Build(args)) => {
            let outcome =
                run::build_command(&config, &workdir, &cli.gitpod_yaml, &args.target).await?;
            exit_on_failure(&outcome);
            Ok(())
        }
        Some(Commands::Config(args)) => config_command(config, args),
        Some(Commands::Version) => {
            println!("{}", version_line());
            Ok(())
        }
    }
}

async fn run_command(
    config: RunConfig,
    workdir: PathBuf,
    gitpod_yaml: PathBuf,
    verbose: bool,
    args: RunArgs,
) -> Result<()> {
    let req = RunRequest {
        workdir,
        gitpod_yaml,
        verbose,
        ide_port: args.ide_port,
        ssh_port: args.ssh_port,
        port_offset: args.port_offset,
        no_port_forwarding: args.no_port_forwarding,
        ssh_public_key_path: args.ssh_public_key_path,
        no_tasks: args.no_tasks,
        ui: args.ui,
        assets_dir: args.assets_dir,
    };
    let end = run::run_command(config, req).await?;

    for phase in end.phases.iter().filter(|p| p.is_open()) {
        debug!(phase = %phase.title(), "Phase still open at exit");
    }
    exit_on_failure(&end.outcome);
    Ok(())
}

fn config_command(mut config: RunConfig, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            let path = config
                .filename
                .as_ref()
                .context("no config file location available")?;
            println!("{}", path.display());
        }
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value)?;
            let path = config.write()?;
            debug!(path = %path.display(), %key, "Config updated");
        }
    }
    Ok(())
}

fn exit_on_failure(outcome: &Outcome) {
    if let Outcome::Failure(reason) = outcome {
        eprintln!("{reason}");
        std::process::exit(1);
    }
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    let workdir = match workdir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    std::fs::canonicalize(&workdir)
        .with_context(|| format!("invalid working directory {}", workdir.display()))
}

fn version_line() -> String {
    format!(
        "{} (commit: {}, built-on: {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("RUNGP_COMMIT").unwrap_or("unknown"),
        option_env!("RUNGP_BUILD_DATE").unwrap_or("unknown"),
    )
}

fn init_tracing(verbose: bool, interactive: bool, workdir: &Path) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if interactive {
        // Logs would corrupt the display. Set RUNGP_DEBUG_LOG=1 to write
        // them to .rungp/rungp.log instead.
        if std::env::var(DEBUG_LOG_ENV).is_ok() {
            let dir = workdir.join(".rungp");
            if std::fs::create_dir_all(&dir).is_ok()
                && let Ok(file) = std::fs::File::create(dir.join("rungp.log"))
            {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_parses() {
        let cli = Cli::try_parse_from(["rungp"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.gitpod_yaml, PathBuf::from(".gitpod.yml"));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "rungp",
            "run",
            "--ide-port",
            "9000",
            "--port-offset",
            "100",
            "--no-tasks",
            "--ui",
            "daemon",
            "-w",
            "/tmp",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.ide_port, Some(9000));
        assert_eq!(args.ssh_port, None);
        assert_eq!(args.port_offset, 100);
        assert!(args.no_tasks);
        assert_eq!(args.ui, UiMode::Daemon);
        assert_eq!(cli.workdir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["rungp", "build", "img:dev", "--runtime", "nerdctl", "-v"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.runtime, Some(RuntimeArg::Nerdctl));
        let Some(Commands::Build(args)) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.target, "img:dev");
    }

    #[test]
    fn test_config_set_parses() {
        let cli =
            Cli::try_parse_from(["rungp", "config", "set", "autoUpdate.enabled", "true"]).unwrap();
        let Some(Commands::Config(ConfigArgs {
            command: ConfigCommands::Set { key, value },
        })) = cli.command
        else {
            panic!("expected config set");
        };
        assert_eq!(key, "autoUpdate.enabled");
        assert_eq!(value, "true");
    }

    #[test]
    fn test_build_requires_target() {
        assert!(Cli::try_parse_from(["rungp", "build"]).is_err());
    }

    #[test]
    fn test_version_line() {
        assert!(version_line().starts_with(env!("CARGO_PKG_VERSION")));
        assert!(version_line().contains("commit: "));
    }

    #[test]
    fn test_config_path_requires_location() {
        let config = RunConfig::default();
        let err = config_command(
            config,
            ConfigArgs {
                command: ConfigCommands::Path,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("no config file location"));
    }
}
