#![deny(unsafe_code)]

//! clamrest CLI: run the HTTP service or talk to clamd directly.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clamrest_clamd::{ClamdClient, ClamdError, RawResponse, ScanResult, ScanStatus};
use clamrest_config::AppConfig;
use clamrest_server::AppState;
use clamrest_server::build_info::LONG_VERSION;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Scan reported no virus, or a status command succeeded.
const EXIT_CLEAN: u8 = 0;
/// Scan found a virus.
const EXIT_FOUND: u8 = 1;
/// clamd reported an error, the reply was unparseable, or the call failed.
const EXIT_ERROR: u8 = 2;

/// clamrest: a REST front end and command-line client for clamd.
#[derive(Parser)]
#[command(name = "clamrest", version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "clamrest.toml", global = true)]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print daemon replies as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service.
    Serve,

    /// Check that clamd answers PONG.
    Ping,

    /// Show the clamd and signature database versions.
    Version,

    /// Show clamd statistics.
    Stats,

    /// Scan a file or directory on clamd's filesystem.
    Scan {
        /// Path to scan. Relative paths are resolved against the current
        /// directory before being sent.
        path: PathBuf,
    },

    /// Upload content to clamd and scan it.
    Instream {
        /// File to upload; `-` or nothing reads standard input.
        file: Option<PathBuf>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(&cli.config).await?;
    init_tracing(cli.verbose, &config.logging.level);
    debug!(path = %cli.config.display(), clamd = %config.clamd.endpoint(), "configuration loaded");

    match cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Ping => {
            let pong = call(&config, ClamdClient::ping).await?;
            print_reply(&pong, cli.json)?;
            Ok(if pong.message == "PONG" {
                EXIT_CLEAN
            } else {
                EXIT_ERROR
            })
        }
        Commands::Version => {
            let version = call(&config, ClamdClient::version).await?;
            print_reply(&version, cli.json)?;
            Ok(EXIT_CLEAN)
        }
        Commands::Stats => {
            let stats = call(&config, ClamdClient::stats).await?;
            print_reply(&stats, cli.json)?;
            Ok(EXIT_CLEAN)
        }
        Commands::Scan { path } => {
            let path = std::path::absolute(&path)
                .with_context(|| format!("cannot resolve {}", path.display()))?;
            let result = call(&config, move |client| client.scan_path(&path)).await?;
            print_scan(&result, cli.json)
        }
        Commands::Instream { file } => {
            let source = open_source(file.as_deref())?;
            let result = call(&config, move |client| client.scan_stream(source)).await?;
            print_scan(&result, cli.json)
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show),
    }
}

/// `RUST_LOG` wins, then `-v`, then `logging.level`.
fn log_filter(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(verbose: u8, configured: &str) {
    let filter = log_filter(verbose, configured);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    let config = if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("invalid configuration at {}", path.display()))?
    } else {
        AppConfig::default()
    };
    Ok(config.with_process_env()?)
}

/// Run one client call on the blocking pool.
async fn call<T, F>(config: &AppConfig, f: F) -> Result<T>
where
    F: FnOnce(&ClamdClient) -> Result<T, ClamdError> + Send + 'static,
    T: Send + 'static,
{
    let client = ClamdClient::from_config(&config.clamd)?;
    Ok(tokio::task::spawn_blocking(move || f(&client)).await??)
}

fn open_source(file: Option<&Path>) -> Result<Box<dyn Read + Send>> {
    match file {
        None => Ok(Box::new(io::stdin())),
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdin())),
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(file))
        }
    }
}

fn print_reply(reply: &RawResponse, json: bool) -> Result<()> {
    if json {
        return print_json(reply);
    }
    println!("{}", reply.message);
    for line in &reply.details {
        println!("{line}");
    }
    Ok(())
}

fn print_scan(result: &ScanResult, json: bool) -> Result<u8> {
    if json {
        print_json(result)?;
    } else {
        println!("{}", result.message());
        for line in result.details() {
            println!("{line}");
        }
        if result.status == ScanStatus::ClientParseError
            && let Some(message) = &result.error_message
        {
            eprintln!("{message}");
        }
    }
    Ok(scan_exit_code(result.status))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn scan_exit_code(status: ScanStatus) -> u8 {
    match status {
        ScanStatus::Ok => EXIT_CLEAN,
        ScanStatus::Found => EXIT_FOUND,
        ScanStatus::Error | ScanStatus::ClientParseError => EXIT_ERROR,
    }
}

async fn cmd_serve(config: AppConfig) -> Result<u8> {
    let state = Arc::new(AppState::from_config(&config)?);
    let listener = clamrest_server::bind(&config).await.with_context(|| {
        format!(
            "cannot listen on {}:{}",
            config.server.listen_addr, config.server.listen_port
        )
    })?;
    info!(version = LONG_VERSION, "starting clamrest");
    clamrest_server::serve(listener, state, shutdown_signal()).await?;
    Ok(EXIT_CLEAN)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

fn cmd_config(path: &Path, config: &AppConfig, show: bool) -> Result<u8> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("cannot render configuration")?;
        println!("{toml_str}");
    } else if path.exists() {
        println!("Configuration at '{}' is valid.", path.display());
    } else {
        println!(
            "No configuration at '{}'; defaults and environment are valid.",
            path.display()
        );
    }
    Ok(EXIT_CLEAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clamrest_test_utils::config::TestConfigFile;
    use clamrest_test_utils::{EICAR, FakeClamd};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_instream_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["clamrest", "instream"]).unwrap();
        assert!(matches!(cli.command, Commands::Instream { file: None }));

        let cli = Cli::try_parse_from(["clamrest", "--json", "instream", "-"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Instream { file: Some(ref p) } if p == Path::new("-")));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["clamrest", "scan", "/tmp/x", "-vv", "-c", "a.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("a.toml"));
        assert!(matches!(cli.command, Commands::Scan { ref path } if path == Path::new("/tmp/x")));
    }

    #[test]
    fn test_log_filter_precedence() {
        assert_eq!(log_filter(0, "warn"), "warn");
        assert_eq!(log_filter(1, "warn"), "debug");
        assert_eq!(log_filter(3, "warn"), "trace");
    }

    #[test]
    fn test_scan_exit_codes() {
        assert_eq!(scan_exit_code(ScanStatus::Ok), EXIT_CLEAN);
        assert_eq!(scan_exit_code(ScanStatus::Found), EXIT_FOUND);
        assert_eq!(scan_exit_code(ScanStatus::Error), EXIT_ERROR);
        assert_eq!(scan_exit_code(ScanStatus::ClientParseError), EXIT_ERROR);
    }

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.server.listen_port, 8080);
    }

    #[tokio::test]
    async fn test_load_config_reports_invalid_file() {
        let file = TestConfigFile::with_toml("[clamd]\nport = 3310\n").await;
        let err = load_config(&file.path).await.unwrap_err();
        assert!(format!("{err:#}").contains("clamd.host is required"));
    }

    #[tokio::test]
    async fn test_call_against_fake_daemon() {
        let fake = FakeClamd::unix();
        let mut config = AppConfig::default();
        config.clamd = fake.clamd_config();

        let pong = call(&config, ClamdClient::ping).await.unwrap();
        assert_eq!(pong.message, "PONG");

        let result = call(&config, |client| client.scan_stream(EICAR)).await.unwrap();
        assert_eq!(scan_exit_code(result.status), EXIT_FOUND);
    }
}
