use clap::Parser;
use env_logger::{Builder, Env, Target};
use log::{info, warn};
use server::game::Game;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "server.log";
const DEFAULT_CONFIG_NAME: &str = "server.json";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file [default: $HOME/server.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to write server.log into
    #[arg(long)]
    log: Option<PathBuf>,

    /// Log file path; overrides --log
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Game port used when the config has no Bind address
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Query port used when the config has no BindQuery address
    #[arg(long = "queryport", default_value = "8001")]
    query_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args);

    let config = args.config.clone().unwrap_or_else(default_config_path);
    info!("Starting server with config {}", config.display());

    let mut game = Game::new(config, args.port, args.query_port);
    game.start().await?;

    wait_for_shutdown().await;
    info!("Received shutdown signal, stopping...");
    game.stop().await;

    Ok(())
}

/// Logs to stderr unless a log file is requested and can be opened.
fn init_logging(args: &Args) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let path = args
        .log_file
        .clone()
        .or_else(|| args.log.as_ref().map(|dir| dir.join(LOG_FILE_NAME)));

    let mut open_error = None;
    if let Some(path) = &path {
        match open_log_file(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => open_error = Some(e),
        }
    }

    builder.init();

    if let (Some(path), Some(e)) = (path, open_error) {
        warn!("could not open log file {}: {}; logging to stderr", path.display(), e);
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn default_config_path() -> PathBuf {
    home::home_dir()
        .unwrap_or_default()
        .join(DEFAULT_CONFIG_NAME)
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("could not listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
