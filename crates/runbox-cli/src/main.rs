//! Runbox CLI
//!
//! A command-line tool for running source files through the runbox agent pool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runbox::config::{Isolation, Language};
use runbox::{
    CodeRunner, Config, Controller, EXAMPLE_CONFIG, ExecutionStatus, LanguageList, RunResponse,
    RunnerProps,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

/// Exit status used when a program hits its deadline, as timeout(1) does
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser)]
#[command(name = "runbox")]
#[command(about = "Run small programs under restricted identities")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: runbox.toml)
        #[arg(short, long, default_value = "runbox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python3, shell); inferred from the file extension if omitted
        #[arg(short, long)]
        language: Option<String>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the result as a JSON response instead of raw output
        #[arg(long)]
        json: bool,
    },

    /// List runnable languages
    Languages {
        /// Print the language list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout carries only program output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            timeout,
            json,
        } => run_source(&config, &source, language.as_deref(), timeout, json).await,
        Commands::Languages { json } => list_languages(&config, json),
        Commands::ShowConfig => show_config(&config),
    }
}

fn resolve_language(config: &Config, source: &Path, language: Option<&str>) -> Result<Language> {
    if let Some(id) = language {
        return id.parse().context("unknown language");
    }

    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .context("cannot infer language: source file has no extension, use --language")?;
    config
        .registry()?
        .language_for_extension(extension)
        .with_context(|| format!("no language registered for extension '.{extension}'"))
}

async fn run_source(
    config: &Config,
    source: &Path,
    language: Option<&str>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let language = resolve_language(config, source, language)?;
    let source_text = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read source file '{}'", source.display()))?;

    let controller = Arc::new(Controller::from_config(config));
    let runner = CodeRunner::new(config, controller).context("invalid language configuration")?;

    let props = RunnerProps {
        language,
        source: source_text,
        timeout,
    };

    info!(%language, "running program");
    let result = runner.run(&props).await;

    if json {
        let response = match result {
            Ok(output) => RunResponse::from(output),
            Err(e) => RunResponse::from(e),
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let output = result.context("run failed")?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    // process::exit skips the buffered stdout flush
    std::io::stdout().flush().context("failed to flush stdout")?;

    info!(
        status = ?output.status,
        wall_time = format_args!("{:.3}s", output.wall_time),
        exit_code = output.exit_code,
        signal = output.signal,
        "execution result"
    );

    match output.status {
        ExecutionStatus::Success => Ok(()),
        ExecutionStatus::Timeout => std::process::exit(TIMEOUT_EXIT_CODE),
        ExecutionStatus::ProcessFailure => std::process::exit(output.exit_code.unwrap_or(1)),
    }
}

fn list_languages(config: &Config, json: bool) -> Result<()> {
    let registry = config.registry()?;

    if json {
        let list = LanguageList::from(&registry);
        println!("{}", serde_json::to_string(&list)?);
        return Ok(());
    }

    println!("Available languages:\n");
    for language in registry.languages() {
        let Some(lang) = registry.get(language) else {
            continue;
        };
        let status = if lang.run.is_some() {
            "runnable"
        } else {
            "not runnable"
        };
        println!(
            "  {:<10} {:<15} .{:<5} ({})",
            language.id(),
            lang.name,
            lang.extension.as_str(),
            status
        );
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("Pool:");
    println!("  Agents: {}", config.pool_size);
    println!(
        "  Identities: {}..={}",
        config.identity_for(1).uid,
        config.identity_for(config.pool_size).uid
    );
    println!("  Backpressure: {:?}", config.backpressure);
    if let Some(max_wait) = config.max_wait() {
        println!("  Max wait: {max_wait:?}");
    }
    println!();
    println!("Execution:");
    println!("  Default timeout: {}s", config.default_timeout);
    println!("  Kill grace: {:?}", config.kill_grace());
    println!("  Max output: {} bytes per stream", config.max_output);
    println!("  Workspace root: {}", config.workspace_root().display());
    println!();
    match config.isolation {
        Isolation::Process => {
            let limits = config.effective_limits(None);
            println!("Isolation: process");
            println!("  prlimit binary: {}", config.prlimit_binary().display());
            println!("  Max processes: {:?}", limits.max_processes);
            println!("  Max file size: {:?} bytes", limits.max_file_size);
            println!("  CPU time: {:?}", limits.cpu_time);
        }
        Isolation::Unrestricted => println!("Isolation: unrestricted"),
    }
    println!();
    println!("Languages configured: {}", config.registry()?.languages().len());
    Ok(())
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
