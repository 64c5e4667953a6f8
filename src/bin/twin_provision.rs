//! Provisioning CLI
//!
//! Creates (or deletes) the device groups and devices described in YAML and
//! CSV files on the IoT Agent and Context Broker.
//!
//! Usage:
//!   twin_provision --url-keystone https://auth:5001 --url-cb https://cb:1026 \
//!     --url-iotagent https://iota:4041 --service smartcity --subservice /waste \
//!     --username admin descriptors/
//!
//! Every connection setting can also come from the environment (`SMART_*`
//! variables), a `.env` file in the working directory, or the file named by
//! `--env-file`.
//!
//!   # Print the resolved catalog without touching the platform
//!   twin_provision --markdown descriptors/
//!
//!   # Remove everything the descriptors define
//!   twin_provision --delete descriptors/

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use twin_provision::config::{DEFAULT_PROTOCOL, DEFAULT_TIMEOUT_SECS};
use twin_provision::pool::{DEFAULT_CHUNK_SIZE, DEFAULT_POOL_SIZE};
use twin_provision::{
    execute, Credentials, Endpoints, HttpOptions, PoolConfig, ProvisionConfig, RunMode, RunReport,
};

/// Bulk provisioning of device groups and devices
#[derive(Parser, Debug)]
#[command(name = "twin_provision")]
#[command(about = "Provision device groups and devices from YAML and CSV descriptors")]
struct Args {
    /// Descriptor files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Keystone base URL
    #[arg(long, env = "SMART_URL_KEYSTONE")]
    url_keystone: String,

    /// Context Broker base URL
    #[arg(long, env = "SMART_URL_CB")]
    url_cb: String,

    /// IoT Agent base URL
    #[arg(long, env = "SMART_URL_IOTAGENT")]
    url_iotagent: String,

    /// Tenant (Fiware-Service)
    #[arg(long, env = "SMART_SERVICE")]
    service: String,

    /// Service path (Fiware-ServicePath), e.g. /waste
    #[arg(long, env = "SMART_SUBSERVICE")]
    subservice: String,

    #[arg(long, env = "SMART_USERNAME")]
    username: String,

    #[arg(long, env = "SMART_PASSWORD", hide_env_values = true)]
    password: String,

    /// Delete the described objects instead of creating them
    #[arg(long, short = 'd', conflicts_with = "markdown")]
    delete: bool,

    /// Print the resolved descriptors as markdown and exit
    #[arg(long)]
    markdown: bool,

    /// Protocol for CSV rows without a protocol column
    #[arg(long, env = "SMART_PROTOCOL", default_value = DEFAULT_PROTOCOL)]
    protocol: String,

    /// Maximum concurrent requests
    #[arg(long, env = "SMART_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Maximum objects per request
    #[arg(long, env = "SMART_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Request timeout in seconds
    #[arg(long, env = "SMART_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Accept invalid TLS certificates
    #[arg(long, env = "SMART_INSECURE")]
    insecure: bool,

    /// Read settings from this file instead of `.env`
    #[arg(long, short = 'c', value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ProvisionConfig> {
        let mode = if self.markdown {
            RunMode::Markdown
        } else if self.delete {
            RunMode::Delete
        } else {
            RunMode::Create
        };
        Ok(ProvisionConfig {
            paths: self.paths,
            endpoints: Endpoints::parse(&self.url_keystone, &self.url_cb, &self.url_iotagent)?,
            credentials: Credentials {
                service: self.service,
                subservice: self.subservice,
                username: self.username,
                password: self.password,
            },
            http: HttpOptions {
                timeout: Duration::from_secs(self.timeout),
                insecure: self.insecure,
            },
            pool: PoolConfig {
                pool_size: self.pool_size,
                chunk_size: self.chunk_size,
            },
            default_protocol: self.protocol,
            mode,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // The env file feeds the SMART_* fallbacks, so it is read before clap
    if let Err(e) = load_env(env_file_arg(std::env::args()).as_deref()) {
        eprintln!("{} {:#}", "ERROR:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "ERROR:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match execute(&config).await {
        Ok(report) => summarize(&report),
        Err(e) => {
            eprintln!("{} {:#}", "ERROR:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn summarize(report: &RunReport) -> ExitCode {
    if let Some(markdown) = &report.markdown {
        println!("{}", markdown);
    }
    for failure in &report.unresolved {
        eprintln!(
            "{} {}: {}",
            "SKIPPED:".yellow().bold(),
            failure.origin,
            failure.error
        );
    }
    if let Some(err) = &report.dispatch {
        eprintln!("{} {}", "ERROR:".red().bold(), err);
    }

    let status = if report.is_success() {
        "OK".green().bold()
    } else {
        "FAILED".red().bold()
    };
    eprintln!(
        "{} {} groups, {} entities, {} unresolved",
        status,
        report.groups,
        report.entities,
        report.unresolved.len()
    );
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Value of `--env-file` (or `-c`) in the raw arguments
fn env_file_arg<I: IntoIterator<Item = String>>(args: I) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--env-file" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--env-file=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// An explicit env file must be readable; the default `.env` is optional.
fn load_env(env_file: Option<&Path>) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to read env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}
