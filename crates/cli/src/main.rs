//! Stdio entry point: a long-running process that reads one JSON tool call
//! per line from stdin and writes one JSON result per line to stdout. The
//! wire protocol itself is deliberately thin -- the interesting behavior
//! lives in `code-intel-core`'s dispatcher; this binary only wires it to a
//! transport and installs the process-level logging/config ambient stack.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use code_intel_core::ServiceRegistry;

#[derive(Parser)]
#[command(name = "code-intel", about = "Phase-gated session engine for an LLM coding agent", version)]
struct Cli {
    /// Repository root to serve. Defaults to the current directory.
    #[arg(short, long)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stdio tool-call loop (the default when no subcommand is given).
    Serve,
    /// Print the JSON schema for every registered tool and exit.
    Tools,
    /// Dispatch a single tool call given as a JSON object and print its result.
    Call {
        /// Tool name, e.g. `start_session`.
        tool: String,
        /// JSON-encoded arguments object.
        args: String,
    },
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CODE_INTEL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let repo_root = cli.repo.unwrap_or_else(|| PathBuf::from("."));
    let api_key = std::env::var("CODE_INTEL_EMBEDDING_API_KEY").ok();

    let services = Arc::new(ServiceRegistry::new());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(services, repo_root, api_key).await,
        Commands::Tools => print_tools(services, repo_root, api_key).await,
        Commands::Call { tool, args } => call_once(services, repo_root, api_key, tool, args).await,
    }
}

async fn serve(services: Arc<ServiceRegistry>, repo_root: PathBuf, api_key: Option<String>) -> Result<()> {
    let project = services
        .get_or_open(&repo_root, api_key)
        .await
        .with_context(|| format!("opening project services for {}", repo_root.display()))?;

    tracing::info!(repo = %project.repo_root.display(), "code-intel listening on stdio");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout = std::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => handle_request(&project, request).await,
            Err(e) => serde_json::json!({"error": "invalid_request", "message": e.to_string()}),
        };
        let mut out = stdout.lock();
        writeln!(out, "{response}")?;
        out.flush()?;
    }
    Ok(())
}

async fn handle_request(project: &code_intel_core::ProjectServices, request: Value) -> Value {
    let Some(tool) = request.get("tool").and_then(|v| v.as_str()) else {
        return serde_json::json!({"error": "invalid_request", "message": "missing 'tool' field"});
    };
    let args = request.get("args").cloned().unwrap_or(serde_json::json!({}));
    match project.dispatch(tool, args).await {
        Ok(result) => result,
        Err(e) => serde_json::json!({"error": "internal_error", "message": e.to_string()}),
    }
}

async fn print_tools(services: Arc<ServiceRegistry>, repo_root: PathBuf, api_key: Option<String>) -> Result<()> {
    let project = services.get_or_open(&repo_root, api_key).await?;
    let defs = project.registry.definitions();
    println!("{}", serde_json::to_string_pretty(&defs)?);
    Ok(())
}

async fn call_once(
    services: Arc<ServiceRegistry>,
    repo_root: PathBuf,
    api_key: Option<String>,
    tool: String,
    args: String,
) -> Result<()> {
    let project = services.get_or_open(&repo_root, api_key).await?;
    let args: Value = serde_json::from_str(&args).context("parsing --args as JSON")?;
    let result = project.dispatch(&tool, args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
