//! CLI binary for inspecting capability routing and running single turns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use clipmind_llm::{
    BackendFactory, Capability, CapabilityMatrix, CapabilityRouter, ChainEntryStatus,
    CompletionRequest, ConfigFile, LoggingMiddleware, Message, RouterConfig,
};
use clipmind_orchestrator::{ToolCallOrchestrator, TurnOutcome};

#[derive(Parser)]
#[command(name = "clipmind", version, about = "Capability-based routing across AI backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file overlaid on the environment
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which backend a capability routes to, and why
    Route {
        /// Capability tag, e.g. text_completion or vision
        capability: Capability,
    },

    /// List backends with valid credentials
    Backends,

    /// Validate the capability matrix and report backend configuration
    Validate,

    /// Run one turn against the best available backend
    Ask {
        prompt: String,

        #[arg(long, default_value = "text_completion")]
        capability: Capability,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        #[arg(long)]
        max_tokens: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let router = build_router(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Route { capability } => cmd_route(&router, capability),
        Commands::Backends => cmd_backends(&router),
        Commands::Validate => cmd_validate(&router),
        Commands::Ask {
            prompt,
            capability,
            system,
            max_tokens,
        } => cmd_ask(router, prompt, capability, system, max_tokens).await?,
    }

    Ok(())
}

/// Environment settings, overlaid with the config file when one is given.
fn build_router(config_path: Option<&Path>, verbose: bool) -> anyhow::Result<CapabilityRouter> {
    let mut config = RouterConfig::from_env();
    let mut matrix = CapabilityMatrix::default();

    if let Some(path) = config_path {
        let file = ConfigFile::load(path)?;
        config.merge(&file.backends);
        if let Some(overrides) = &file.capabilities {
            matrix.overlay(overrides);
        }
        tracing::debug!(path = %path.display(), "Loaded configuration file");
    }

    let router = CapabilityRouter::new(matrix, BackendFactory::with_builtin_backends(), config)?;
    Ok(if verbose {
        router.with_middleware(LoggingMiddleware)
    } else {
        router
    })
}

fn cmd_route(router: &CapabilityRouter, capability: Capability) {
    match router.resolve(capability) {
        Ok(route) => println!("{capability}: {} ({})", route.backend, route.reason),
        Err(e) => println!("{capability}: {e}"),
    }

    let Ok(entries) = router.explain(capability) else {
        return;
    };
    for entry in entries {
        let status = match entry.status {
            ChainEntryStatus::Selected => "selected",
            ChainEntryStatus::Eligible => "eligible",
            ChainEntryStatus::NotConfigured => "not configured",
            ChainEntryStatus::MissingCredentials => "missing credentials",
            ChainEntryStatus::CapabilityUnsupported => "capability unsupported",
        };
        println!("  {}. {:<10} {}", entry.position + 1, entry.backend, status);
    }
}

fn cmd_backends(router: &CapabilityRouter) {
    let available = router.list_available_backends();
    if available.is_empty() {
        println!("No backends with valid credentials.");
        println!("Set ANTHROPIC_API_KEY, OPENAI_API_KEY, GOOGLE_API_KEY or OLLAMA_HOST.");
        return;
    }
    for backend in available {
        println!("{backend}");
    }
}

fn cmd_validate(router: &CapabilityRouter) {
    println!("Capability matrix is valid");

    println!("\nBackends:");
    for identity in router.matrix().referenced_backends() {
        let state = match router.adapter(identity) {
            None => "not configured".to_string(),
            Some(adapter) if !adapter.has_valid_credentials() => "missing credentials".to_string(),
            Some(adapter) => format!("ready (model {})", adapter.default_model()),
        };
        println!("  {identity:<10} {state}");
    }

    println!("\nCapabilities:");
    let mut capabilities: Vec<_> = router.matrix().capabilities().collect();
    capabilities.sort();
    for capability in capabilities {
        let selected = router
            .select_for_capability(capability)
            .map(|route| route.backend)
            .unwrap_or_else(|| "(none)".to_string());
        println!("  {:<18} {selected}", capability.as_tag());
    }
}

async fn cmd_ask(
    router: CapabilityRouter,
    prompt: String,
    capability: Capability,
    system: Option<String>,
    max_tokens: Option<u32>,
) -> anyhow::Result<()> {
    let mut request = CompletionRequest::new(vec![Message::user(prompt)]);
    if let Some(system) = system {
        request = request.with_system_prompt(system);
    }
    if let Some(max_tokens) = max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling turn");
                cancel.cancel();
            }
        });
    }

    let orchestrator = ToolCallOrchestrator::new(Arc::new(router));
    let mut turn = orchestrator
        .start_turn(request, capability)
        .with_cancellation(cancel);

    match turn.submit().await? {
        TurnOutcome::Completed {
            content,
            reasoning,
            used_provider,
        } => {
            if let Some(reasoning) = reasoning {
                eprintln!("[reasoning]\n{reasoning}\n");
            }
            println!("{content}");
            eprintln!("\n(via {used_provider})");
        }
        TurnOutcome::ToolCallsRequested {
            tool_calls,
            used_provider,
        } => {
            println!("{used_provider} requested {} tool call(s):", tool_calls.len());
            for call in tool_calls {
                println!("  {} {} {}", call.id, call.name, call.arguments);
            }
        }
        TurnOutcome::Failed { error, .. } => anyhow::bail!(error),
    }

    Ok(())
}
