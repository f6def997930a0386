#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use keywarden::{
    cipher::Cipher,
    config::ConfigStore,
    doctor,
    flows::FlowController,
    paths::WardenPaths,
    store::{FileUserStore, UserStore},
    transport::{Event, StdioTransport, Transport},
    vault::Vault,
};
use std::{io::Write as _, sync::Arc};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "keywarden", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent over stdio: one JSON event per line in, one JSON
    /// frame per delivery out.
    Run,

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Generate a fresh base64 master secret for `KEYWARDEN_MASTER_SECRET`.
    GenKey,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &WardenPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keywarden.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Read events from stdin until EOF or ctrl-c. Malformed lines are logged
/// and skipped; a handler failure for one user never takes the loop down.
async fn run_agent(paths: &WardenPaths) -> eyre::Result<()> {
    paths.ensure_private_dirs()?;

    let config_store = ConfigStore::new(paths);
    let mut config = config_store.load_or_init_default()?;
    let secret = config.master_secret()?;
    let salt = config_store.ensure_master_salt(&mut config)?;
    let cipher = Cipher::global(&secret, &salt)?;

    let store: Arc<dyn UserStore> = Arc::new(FileUserStore::new(paths));
    let vault = Arc::new(Vault::new(Arc::clone(&store), cipher, config.max_wallets));
    let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new());
    let controller = FlowController::new(vault, store, transport, config);

    info!("keywarden agent listening on stdio");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    info!("stdin closed; shutting down");
                    return Ok(());
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event: Event = match serde_json::from_str(trimmed) {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(error = %err, "skipping malformed event line");
                        continue;
                    }
                };
                if let Err(err) = controller.handle_event(&event) {
                    warn!(user = %event.user_id, error = %err, "event handling failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = WardenPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Run => run_agent(&paths).await.context("agent failed"),
        Command::Paths => {
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::GenKey => {
            writeln!(
                std::io::stdout().lock(),
                "{}",
                keywarden::cipher::generate_master_secret()
            )
            .context("write generated key")?;
            Ok(())
        }
        Command::Doctor { json } => doctor::run(&paths, json).context("doctor failed"),
    }
}
