//! steward - autonomous reasoning/acting agent CLI

mod config;
mod prompt;
mod tools;
mod utils;

use anyhow::Context as _;
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use steward_agent::{
    Agent, AgentConfig, AgentEvent, FileBlobStore, ProviderTransport, SharedBlobStore, Termination,
};
use steward_ai::{Provider, models::resolve_model};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::Config;
use crate::tools::{ProviderSettings, Sandbox, StdinPrompter};

/// steward - autonomous agent
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The task to work on
    #[arg(trailing_var_arg = true)]
    task: Vec<String>,

    /// Model to use (default: gpt-4o)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (openai, groq, cerebras, xai, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Override the provider's API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum number of acting steps
    #[arg(long)]
    max_steps: Option<u32>,

    /// Workspace directory for session files and the blob store
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Run capability requests of one response concurrently
    #[arg(long)]
    parallel: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Debug log kept next to the session directories
const LOG_FILE_NAME: &str = "steward.log";
/// Size at which the file log is rotated to `steward.log.1` on startup
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Open `<dir>/steward.log` for appending, rotating it first if it grew too large
fn open_log_file(dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let oversized = std::fs::metadata(&path)
        .map(|meta| meta.len() >= LOG_ROTATE_BYTES)
        .unwrap_or(false);
    if oversized {
        std::fs::rename(&path, dir.join(format!("{}.1", LOG_FILE_NAME)))?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Human-readable logs on stderr, plus a debug-level file log when one is open
fn init_tracing(verbose: bool, log_file: Option<File>) {
    let default = if verbose { "steward=debug" } else { "steward=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(EnvFilter::new("steward=debug"))
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize config and exit
    if args.init_config {
        init_tracing(args.verbose, None);
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let task = args.task.join(" ");
    if task.trim().is_empty() {
        eprintln!("Usage: steward <task>");
        eprintln!("Example: steward 'Summarize the latest Rust release notes'");
        std::process::exit(2);
    }

    let (cfg, config_error) = match Config::load() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let workspace = args.workspace.clone().unwrap_or_else(|| cfg.workspace_dir());

    let (log_file, log_error) = match open_log_file(&workspace) {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };
    init_tracing(args.verbose, log_file);
    if let Some(e) = config_error {
        tracing::warn!("{}, using defaults", e);
    }
    if let Some(e) = log_error {
        tracing::warn!(dir = %workspace.display(), "file logging disabled: {}", e);
    }

    // CLI flags take precedence over env vars and the config file
    let provider = args.provider.clone().unwrap_or_else(|| cfg.provider());
    let model_id = args.model.clone().unwrap_or_else(|| cfg.model());
    let base_url = args.base_url.clone().or_else(|| cfg.base_url.clone());
    let model = resolve_model(&provider, &model_id, base_url.as_deref());

    let api_key = cfg.get_api_key(&provider);
    if api_key.is_none() {
        if let Some(var) = Provider::parse(&provider).api_key_env_var() {
            eprintln!("Error: No API key found for {}", provider);
            eprintln!();
            eprintln!("Set your API key with: export {}=your-key", var);
            eprintln!("Or add it to config file: steward --init-config");
            std::process::exit(1);
        }
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let sandbox = Arc::new(
        Sandbox::open(&workspace, &session_id)
            .with_context(|| format!("creating session directory in {}", workspace.display()))?,
    );
    let store: SharedBlobStore = Arc::new(
        FileBlobStore::open(workspace.join("tmp"))
            .with_context(|| format!("opening blob store in {}", workspace.display()))?,
    );

    let registry = tools::build_registry(ProviderSettings {
        sandbox: sandbox.clone(),
        store: store.clone(),
        browser_api_url: cfg.browser_api_url(),
        tavily_api_key: cfg.tavily_api_key(),
        rapid_api_key: cfg.rapid_api_key(),
        prompter: Arc::new(StdinPrompter),
    });
    let system_prompt = prompt::build_system_prompt(&registry.names(), chrono::Utc::now());

    let transport = Arc::new(match api_key {
        Some(key) => ProviderTransport::with_api_key(key),
        None => ProviderTransport::new(),
    });

    let agent_config = AgentConfig {
        step_budget: args.max_steps.unwrap_or_else(|| cfg.max_steps()),
        compression: cfg.compression_passes(),
        parallel_tool_calls: args.parallel || cfg.parallel_tool_calls.unwrap_or(false),
        ..AgentConfig::new(system_prompt, model)
    };

    tracing::info!(
        provider = %provider,
        model = %model_id,
        session = %session_id,
        capabilities = registry.len(),
        "starting"
    );

    let mut agent = Agent::new(agent_config, Arc::new(registry), store, transport);

    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(print_events(agent.subscribe()));

    let outcome = agent.run(&task).await;
    drop(agent);
    let _ = printer.await;

    let outcome = outcome.context("agent run failed")?;
    match outcome.termination {
        Termination::Completed => {
            if let Some(answer) = outcome.answer {
                println!("{}", answer.text());
            }
        }
        Termination::StepBudgetExhausted => {
            eprintln!(
                "Stopped after {} steps without a final answer (step budget exhausted).",
                outcome.steps
            );
        }
    }
    eprintln!("Session files: {}", sandbox.root().display());

    Ok(())
}

/// Print progress to stderr until the agent is dropped
async fn print_events(mut receiver: tokio::sync::broadcast::Receiver<AgentEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            AgentEvent::ReasoningStart { step } => {
                eprintln!("[step {}] reasoning...", step);
            }
            AgentEvent::Compressed { target, report } => {
                eprintln!(
                    "[compressed {:?}: ~{} -> ~{} tokens]",
                    target, report.tokens_before, report.tokens_after
                );
            }
            AgentEvent::MessageEnd { message } if !message.tool_calls().is_empty() => {
                let text = message.text();
                if !text.is_empty() {
                    eprintln!("{}", text);
                }
            }
            AgentEvent::ToolExecutionStart {
                tool_name,
                arguments,
                ..
            } => {
                eprintln!(
                    "[running {}] {}",
                    tool_name,
                    utils::one_line(&arguments.to_string(), 120)
                );
            }
            AgentEvent::ToolExecutionEnd {
                tool_name,
                result,
                is_error,
                ..
            } => {
                if is_error {
                    eprintln!("[{} failed: {}]", tool_name, utils::one_line(&result, 200));
                } else {
                    eprintln!("[{}: {}]", tool_name, utils::one_line(&result, 200));
                }
            }
            AgentEvent::Error { message } => {
                eprintln!("Error: {}", message);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_words_are_collected() {
        let args = Args::try_parse_from(["steward", "-m", "gpt-4o-mini", "find", "the", "weather"]).unwrap();
        assert_eq!(args.task.join(" "), "find the weather");
        assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("steward-log-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_log_file_is_created_and_appended() {
        use std::io::Write;

        let dir = temp_dir();
        let mut file = open_log_file(&dir).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);
        let mut file = open_log_file(&dir).unwrap();
        writeln!(file, "second").unwrap();
        drop(file);

        let text = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_oversized_log_is_rotated() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let big = vec![b'x'; LOG_ROTATE_BYTES as usize];
        std::fs::write(dir.join(LOG_FILE_NAME), &big).unwrap();

        open_log_file(&dir).unwrap();
        let rotated = std::fs::metadata(dir.join("steward.log.1")).unwrap();
        assert_eq!(rotated.len(), LOG_ROTATE_BYTES);
        let fresh = std::fs::metadata(dir.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(fresh.len(), 0);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "steward",
            "--max-steps",
            "5",
            "--parallel",
            "--workspace",
            "/tmp/ws",
            "task",
        ])
        .unwrap();
        assert_eq!(args.max_steps, Some(5));
        assert!(args.parallel);
        assert_eq!(args.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(args.task, vec!["task"]);
    }
}
