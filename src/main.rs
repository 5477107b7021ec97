// src/main.rs

//! The main entry point for the Latticed controller daemon.

use anyhow::Result;
use latticed::config::Config;
use latticed::server;
use std::env;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code for startup failures (bad config, unusable state
/// directory, unreadable credential key).
const EXIT_STARTUP: u8 = 1;
/// Exit code for fatal runtime errors.
const EXIT_RUNTIME: u8 = 2;

struct CliArgs {
    config_path: Option<String>,
    stderr_level: u8,
    logfile_level: u8,
    syslog_level: u8,
}

fn usage() {
    eprintln!(
        "Usage: latticed [-f config] [-e level] [-l level] [-s level] [-h]\n\
         \x20 -f <file>   configuration file (default /etc/latticed.conf,\n\
         \x20             overridden by LATTICED_CONF)\n\
         \x20 -e <0-7>    stderr log level\n\
         \x20 -l <0-7>    logfile log level\n\
         \x20 -s <0-7>    syslog log level\n\
         \x20 -h          show this help"
    );
}

fn parse_level(flag: &str, value: Option<&String>) -> Result<u8, String> {
    let Some(value) = value else {
        return Err(format!("{flag} requires a value"));
    };
    match value.parse::<u8>() {
        Ok(level) if level <= 7 => Ok(level),
        _ => Err(format!("{flag} level must be 0-7, got '{value}'")),
    }
}

fn parse_args(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut cli = CliArgs {
        config_path: None,
        stderr_level: 3,
        logfile_level: 3,
        syslog_level: 3,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-f" => {
                cli.config_path = Some(
                    args.get(i + 1)
                        .ok_or_else(|| "-f requires a value".to_string())?
                        .clone(),
                );
                i += 2;
            }
            "-e" => {
                cli.stderr_level = parse_level("-e", args.get(i + 1))?;
                i += 2;
            }
            "-l" => {
                cli.logfile_level = parse_level("-l", args.get(i + 1))?;
                i += 2;
            }
            "-s" => {
                cli.syslog_level = parse_level("-s", args.get(i + 1))?;
                i += 2;
            }
            "-h" | "--help" => return Ok(None),
            "--version" => {
                println!("latticed version {VERSION}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(Some(cli))
}

/// Maps the numeric 0-7 levels (quiet through debug3) onto a tracing
/// filter directive.
fn level_filter(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            usage();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{message}");
            usage();
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    // The effective level is the most verbose of the three sinks; the
    // subscriber writes to stderr, which syslog/logfile supervision
    // redirects as deployed.
    let effective = cli
        .stderr_level
        .max(cli.logfile_level)
        .max(cli.syslog_level);
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| level_filter(effective).to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();

    // LATTICED_CONF overrides the default; -f overrides both.
    let config_path = cli
        .config_path
        .or_else(|| env::var("LATTICED_CONF").ok())
        .unwrap_or_else(|| "/etc/latticed.conf".to_string());

    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match runtime.block_on(server::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Controller runtime error: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}
