use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use magnat_core::config::AppConfig;
use magnat_core::event::{EventBus, LogTracer};
use magnat_core::traits::Tracer;
use magnat_core::types::{FlowEvent, Message};
use magnat_core::ConversationState;

use magnat_agent::pipeline::{self, Collaborators};
use magnat_agent::{Flow, RunContext};
use magnat_tools::{FilePromptStore, MemoryDocumentStore, SearchDocumentsTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "magnat", version, about = "Tabletop game rules assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "magnat.toml", env = "MAGNAT_CONFIG")]
    config: PathBuf,

    /// Print every step transition as a JSON line on stderr
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL mode
    Repl,
    /// Answer a single message and exit
    Run {
        /// The message to send
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Show the assistant graph
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Some(Commands::Config) = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let flow = build_flow(&config, &cli.config)?;
    info!(flow = flow.name(), start = %flow.start(), "Assistant graph ready");

    let bus = Arc::new(EventBus::default());
    spawn_event_printer(&bus, cli.trace);

    match cli.command {
        Some(Commands::Graph) => print_graph(&flow),
        Some(Commands::Run { message }) => {
            let text = message.join(" ");
            let text = if text.trim().is_empty() {
                // Read from stdin
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                text
            };
            let mut state = ConversationState::seeded(text);
            if !run_turn(&flow, &mut state, bus.clone()).await {
                std::process::exit(1);
            }
        }
        Some(Commands::Repl) | None => run_repl(&flow, bus.clone()).await?,
        // Printed before the graph is built
        Some(Commands::Config) => {}
    }

    Ok(())
}

/// Wire collaborators from config and build the assistant graph.
fn build_flow(config: &AppConfig, config_path: &Path) -> anyhow::Result<Flow> {
    let llm = magnat_llm::create_client(&config.model)?;

    let prompts_dir = config.prompts_dir(config_path);
    let prompts = FilePromptStore::new(&prompts_dir);
    let missing = prompts.missing(&pipeline::prompts::ALL);
    if !missing.is_empty() {
        warn!(
            dir = %prompts_dir.display(),
            missing = ?missing,
            "Prompt files missing; runs that reach them will fail"
        );
    }

    let documents = Arc::new(MemoryDocumentStore::new()?);
    let mut tools = ToolRegistry::with_builtins();
    tools.register(SearchDocumentsTool::new(documents.clone()));
    info!(tools = ?tools.list(), "Tools registered");

    let collaborators = Collaborators {
        llm,
        prompts: Arc::new(prompts),
        tools: Arc::new(tools),
        documents,
    };
    Ok(pipeline::main_flow(&collaborators, config)?)
}

/// Mirror bus events into the log, and optionally onto stderr as JSON.
fn spawn_event_printer(bus: &EventBus, trace: bool) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if trace {
                        if let Some(line) = transition_json(&event) {
                            eprintln!("{}", line);
                        }
                    }
                    LogTracer.record(event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn transition_json(event: &FlowEvent) -> Option<String> {
    match event {
        FlowEvent::StepFinished {
            run_id,
            flow,
            step,
            action,
            elapsed_ms,
        } => Some(
            serde_json::json!({
                "run_id": run_id,
                "flow": flow,
                "step": step,
                "action": action,
                "elapsed_ms": elapsed_ms,
            })
            .to_string(),
        ),
        _ => None,
    }
}

fn print_graph(flow: &Flow) {
    println!("{} (start: {})", flow.name(), flow.start());
    for (from, label, to) in flow.edges().iter() {
        println!("  {} --{}--> {}", from, label, to);
    }
}

/// Run one turn over `state`. Ctrl-C cancels the run between steps.
/// Returns whether the run reached a terminal step.
async fn run_turn(flow: &Flow, state: &mut ConversationState, bus: Arc<EventBus>) -> bool {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let ctx = RunContext::new().with_tracer(bus).with_cancel(cancel);
    let result = flow.run(state, &ctx).await;
    ctrl_c.abort();

    match result {
        Ok(outcome) => {
            match state.dialog().last_assistant().map(Message::content) {
                Some(answer) => println!("{}", answer),
                None => println!("(no answer)"),
            }
            info!(
                run_id = %ctx.run_id,
                path = ?outcome.path(),
                elapsed_ms = outcome.elapsed_ms,
                "Turn complete"
            );
            true
        }
        Err(failure) => {
            error!(run_id = %ctx.run_id, step = %failure.step, "Turn failed");
            eprintln!("Error: {}", failure);
            false
        }
    }
}

async fn run_repl(flow: &Flow, bus: Arc<EventBus>) -> anyhow::Result<()> {
    println!("Magnat v{}", env!("CARGO_PKG_VERSION"));
    println!("Ask about any tabletop game. Paste a link to add a rulebook.");
    println!("Type /reset to start over, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut state = ConversationState::new();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let input = input.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                state = ConversationState::new();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        state.dialog_mut().push(Message::user(input));
        run_turn(flow, &mut state, bus.clone()).await;
        println!();
    }

    Ok(())
}
