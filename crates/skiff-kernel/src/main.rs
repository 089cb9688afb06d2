//! SkiffScript notebook kernel.
//!
//! Loads the Skiff toolchain library at runtime, connects a session against
//! the configured remote instance, and serves blank-line-delimited snippets
//! from stdin one at a time. Results go to stdout, diagnostics and logs to
//! stderr.

mod config;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use skiff_bridge::{BridgeContext, DlToolchain, FailureCategory, SUPPORTED_ABI, ToolchainApi};

use config::KernelConfig;

#[derive(Parser)]
#[command(name = "skiff-kernel")]
#[command(about = "SkiffScript notebook kernel")]
#[command(version)]
struct Cli {
    /// Path to the toolchain library (overrides SKIFF_LIBRARY)
    #[arg(long)]
    library: Option<PathBuf>,

    /// Force ANSI colour in rendered diagnostics
    #[arg(long)]
    force_colour: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "initializing SkiffScript kernel"
    );

    // Missing configuration is fatal: nothing can be served without it.
    let mut config = KernelConfig::from_env().context("incomplete kernel configuration")?;
    if let Some(library) = cli.library {
        config.library_path = library;
    }
    if cli.force_colour {
        config.force_colour = true;
    }

    // A failed bridge bring-up is not fatal: the kernel stays alive and
    // answers every request with an init failure, so the notebook client
    // sees what went wrong instead of a dead connection.
    let context = match init_bridge(&config) {
        Ok(context) => Some(context),
        Err(error) => {
            tracing::error!(error = format!("{error:#}"), "kernel initialization failed");
            None
        }
    };

    serve(context.as_ref())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Load the toolchain, check its version, and connect the session.
fn init_bridge(config: &KernelConfig) -> anyhow::Result<BridgeContext> {
    let toolchain = DlToolchain::open(&config.library_path).with_context(|| {
        format!(
            "failed to load toolchain library {}",
            config.library_path.display()
        )
    })?;
    tracing::info!(
        toolchain = %toolchain.abi_version(),
        supported = %SUPPORTED_ABI,
        "toolchain loaded"
    );

    let api: Arc<dyn ToolchainApi> = Arc::new(toolchain);
    api.set_force_colour(config.force_colour);

    let context = BridgeContext::connect(api, &config.session_config())
        .context("failed to connect session")?;
    tracing::debug!("initialization done");
    Ok(context)
}

/// Read blank-line-delimited snippets from stdin and run each through the
/// pipeline, strictly one at a time in arrival order.
fn serve(context: Option<&BridgeContext>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut snippet = String::new();
    let mut counter: usize = 0;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            if !snippet.trim().is_empty() {
                counter += 1;
                handle_request(context, counter, &snippet);
            }
            snippet.clear();
        } else {
            snippet.push_str(&line);
            snippet.push('\n');
        }
    }
    if !snippet.trim().is_empty() {
        counter += 1;
        handle_request(context, counter, &snippet);
    }

    tracing::info!(requests = counter, "shutting down SkiffScript kernel");
    Ok(())
}

/// Handle one request. Request failures are reported, never propagated: a
/// broken snippet must not take the kernel down.
fn handle_request(context: Option<&BridgeContext>, counter: usize, source: &str) {
    tracing::info!(counter, "handling execute request");

    let Some(context) = context else {
        eprintln!(
            "[{}] Failed to initialize kernel; check the log",
            FailureCategory::InitFailure
        );
        return;
    };

    let label = format!("<cell {counter}>");
    match context.execute(&label, source) {
        Ok(output) => {
            if let Some(warnings) = &output.warnings {
                eprintln!("{warnings}");
            }
            if let Some(assembly) = &output.assembly {
                println!("{assembly}");
            }
            if let Some(prints) = &output.prints {
                println!("{prints}");
            }
            println!("{}", output.value);
        }
        Err(failure) => {
            eprintln!("{failure}");
        }
    }
}
