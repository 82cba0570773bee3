use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::collaborators::{Route, RouteTable};
use crate::config::{hardening, AppConfig};
use crate::dispatcher::DispatcherPool;
use crate::failsafe::{derive_outcome, StderrSink, INTERNAL_SERVER_ERROR};
use crate::logging::{init_logging, LogConfig};
use crate::params::BodyFormat;
use crate::server::HttpServer;
use crate::static_files::{StaticFiles, StaticFilesController};

/// Command-line interface for railyard
#[derive(Parser)]
#[command(name = "railyard")]
#[command(about = "Railyard dispatcher CLI", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Load a config file, finalize the hardening toggles and print the result
    CheckConfig {
        /// Path to the application config (.yaml, .yml or .toml)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the failsafe response for a status line
    Failsafe {
        /// Status line, e.g. "500 Internal Server Error"
        #[arg(short, long, default_value = INTERNAL_SERVER_ERROR)]
        status: String,

        /// Content type of the request that failed
        #[arg(long)]
        content_type: Option<String>,

        /// Directory holding static error pages such as 500.html
        #[arg(long)]
        error_dir: Option<PathBuf>,
    },
    /// Serve a public directory through the dispatcher
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "RAILYARD_ADDR")]
        addr: String,

        /// Path to the application config (.yaml, .yml or .toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory served for every path; also the error page directory
        /// unless the config names one
        #[arg(short, long)]
        public: Option<PathBuf>,

        /// Number of HTTP worker threads
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
    },
}

/// Parse the process arguments and run the selected command.
pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_command(&cli.command)
}

pub fn run_command(command: &Commands) -> anyhow::Result<()> {
    match command {
        Commands::CheckConfig { config } => {
            print!("{}", check_config(config)?);
            Ok(())
        }
        Commands::Failsafe {
            status,
            content_type,
            error_dir,
        } => {
            print!(
                "{}",
                failsafe_report(status, content_type.as_deref(), error_dir.as_deref())?
            );
            Ok(())
        }
        Commands::Serve {
            addr,
            config,
            public,
            workers,
        } => serve(addr, config.as_deref(), public.as_deref(), *workers),
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}

pub(crate) fn check_config(path: &Path) -> anyhow::Result<String> {
    let config = AppConfig::load(path)?;
    let toggles = config.hardening(&StderrSink)?;
    let settings = toggles.finalize();

    let mut report = String::new();
    writeln!(report, "config: {}", path.display())?;
    writeln!(report, "dispatcher.allow_concurrency = {}", config.dispatcher.allow_concurrency)?;
    writeln!(report, "dispatcher.cache_classes = {}", config.dispatcher.cache_classes)?;
    writeln!(
        report,
        "dispatcher.error_file_path = {}",
        config
            .dispatcher
            .error_file_path
            .as_deref()
            .map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
    )?;
    writeln!(report, "hardening.disable_json_parsing = {}", toggles.disable_json_parsing)?;
    writeln!(report, "hardening.disable_xml_parsing = {}", toggles.disable_xml_parsing)?;
    writeln!(
        report,
        "hardening.escape_html_entities_in_json = {}",
        toggles.escape_html_entities_in_json
    )?;
    for (name, format) in [
        ("json", BodyFormat::Json),
        ("xml", BodyFormat::Xml),
        ("yaml", BodyFormat::Yaml),
    ] {
        writeln!(
            report,
            "params.{name} = {}",
            enabled(settings.param_parsers().contains(format))
        )?;
    }
    Ok(report)
}

pub(crate) fn failsafe_report(
    status: &str,
    content_type: Option<&str>,
    error_dir: Option<&Path>,
) -> anyhow::Result<String> {
    let outcome = derive_outcome(status, content_type, error_dir)
        .with_context(|| format!("failed to derive the failsafe response for `{status}`"))?;
    let mut report = String::new();
    writeln!(report, "Status: {}", outcome.status_line)?;
    writeln!(report, "Content-Type: {}", outcome.content_type)?;
    writeln!(report)?;
    report.push_str(&String::from_utf8_lossy(&outcome.body));
    if !report.ends_with('\n') {
        report.push('\n');
    }
    Ok(report)
}

fn serve(addr: &str, config: Option<&Path>, public: Option<&Path>, workers: usize) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let log = init_logging(&LogConfig::from_env().with_section(&config.logging))?;
    let toggles = config.hardening(&StderrSink)?;
    hardening::install(toggles.finalize())?;

    let mut routes = Vec::new();
    if let Some(public) = public {
        let controller = StaticFilesController::new(StaticFiles::new(public));
        routes.push(Route::prefix(None, "/", Arc::new(controller)));
    }

    let mut builder = DispatcherPool::builder(Arc::new(RouteTable::new(routes))).config(&config.dispatcher);
    if config.dispatcher.error_file_path.is_none() {
        if let Some(public) = public {
            builder = builder.error_file_path(public);
        }
    }
    if let Some(log) = log {
        builder = builder.flushable_logger(Arc::new(log));
    }
    let pool = builder.build();

    let handle = HttpServer::new(pool).workers(workers).start(addr)?;
    handle.wait_ready()?;
    info!(addr = %handle.addr(), "railyard ready");
    println!("railyard listening on http://{}", handle.addr());
    handle.join().map_err(|_| anyhow!("HTTP worker thread panicked"))
}
