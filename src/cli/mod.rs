pub mod daemon_path;
pub mod process;
pub mod report;

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_previous_servers, restart_server};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{Config, DEFAULT_CONFIG_PATH},
    daemon::start_daemon,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

const DIR_HELP: &str =
    "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state";

#[derive(Parser, Debug)]
#[command(name = "onloq", version, long_about = None)]
#[command(about = "Local logger of application usage and code changes", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Writes the configuration and starts a daemon for the application")]
    Init {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH, help = "Path to the configuration file")]
        config: PathBuf,
        #[arg(
            long,
            value_delimiter = ',',
            help = "Directories to watch for code changes, separated by commas"
        )]
        watch: Option<Vec<PathBuf>>,
    },
    #[command(
        about = "Run a daemon directly in current console. Used for debugging and for running under a service manager"
    )]
    Serve {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH, help = "Path to the configuration file")]
        config: PathBuf,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Show statistics for today")]
    Status {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
    },
    #[command(about = "List recorded events")]
    Events {
        #[arg(long, default_value_t = 1, help = "Number of days to look back")]
        days: u32,
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
    },
}

impl Commands {
    fn dir(&self) -> Option<&Path> {
        match self {
            Commands::Init { dir, .. }
            | Commands::Serve { dir, .. }
            | Commands::Status { dir }
            | Commands::Events { dir, .. } => dir.as_deref(),
            Commands::Stop {} => None,
        }
    }
}

/// Binaries a running daemon might have been started from.
fn daemon_executables() -> Result<Vec<PathBuf>> {
    let current = env::current_exe()?;
    Ok(vec![to_daemon_path(current.clone()), current])
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_create(path)?;
    Ok(config.with_absolute_watch_directories(&env::current_dir()?))
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args
        .commands
        .dir()
        .map(Path::to_path_buf)
        .map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    match args.commands {
        Commands::Init { dir, config, watch } => {
            let mut loaded = Config::load_or_create(&config)?;
            if let Some(watch) = watch {
                let watch = watch
                    .iter()
                    .map(std::path::absolute)
                    .collect::<Result<Vec<_>, _>>()?;
                loaded.set_watch_directories(watch);
                loaded.save(&config)?;
            }
            println!("Configuration saved to {}", config.display());

            let config = std::path::absolute(&config)?;
            let current = env::current_exe()?;
            restart_server(
                &to_daemon_path(current),
                &daemon_executables()?,
                dir.as_deref(),
                &config,
            )
        }
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&daemon_executables()?)?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve { config, .. } => start_daemon(app_dir, load_config(&config)?).await,
        Commands::Status { .. } => report::print_status(&app_dir).await,
        Commands::Events { days, .. } => report::print_events(&app_dir, days).await,
    }
}
