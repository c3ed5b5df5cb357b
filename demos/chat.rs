//! Interactive coding agent in the terminal.
//!
//! Usage:
//!   OPENROUTER_API_KEY=sk-... cargo run --example chat
//!   cargo run --example chat -- --provider ollama --model qwen3-coder-next
//!   cargo run --example chat -- --provider ollama --base-url http://192.168.1.20:11434
//!
//! Ctrl-C aborts the running turn; "exit" / "quit" leaves.

use std::io::{self, BufRead, Write};

use clap::Parser;
use futures::StreamExt;
use helm_agent::{
    Agent, AgentConfig, AgentEvent, ApprovalChannel, DangerousCommandGuard, HookManager, Message,
    OpenAiProvider, StepModel, TokenUsage, ToolRegistry,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chat", about = "Chat with a coding agent")]
struct Cli {
    /// Provider: "openrouter" or "ollama"
    #[arg(long, env = "PROVIDER", default_value = "openrouter")]
    provider: String,

    /// Model to use (overrides MODEL_ID; defaults per provider)
    #[arg(long)]
    model: Option<String>,

    /// Max output tokens per turn
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Max agent turns per message (overrides MAX_TURNS)
    #[arg(long)]
    max_turns: Option<usize>,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_BASE_URL")]
    base_url: Option<String>,
}

fn build_provider(cli: &Cli) -> (OpenAiProvider, &'static str) {
    match cli.provider.as_str() {
        "openrouter" => {
            let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_else(|_| {
                eprintln!("error: OPENROUTER_API_KEY not set");
                std::process::exit(1);
            });
            (OpenAiProvider::openrouter(api_key), helm_agent::DEFAULT_MODEL)
        }
        "ollama" => (OpenAiProvider::ollama(cli.base_url.clone()), "qwen3-coder-next"),
        other => {
            eprintln!("error: unknown provider '{other}'. Use 'openrouter' or 'ollama'.");
            std::process::exit(1);
        }
    }
}

/// Stdin lines on a channel, so prompts and approvals share one reader.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((at, _)) => format!("{}...", &text[..at]),
        None => text.to_string(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let (provider, default_model) = build_provider(&cli);

    let mut config = AgentConfig::from_env();
    match cli.model.clone() {
        Some(model) => config.model = model,
        None if config.model == helm_agent::DEFAULT_MODEL => config.model = default_model.into(),
        None => {}
    }
    config.max_tokens = cli.max_tokens;
    if let Some(max_turns) = cli.max_turns {
        config.max_turns = max_turns;
    }

    let registry = ToolRegistry::builtin();
    let (approvals, mut approval_rx) = ApprovalChannel::new(1);
    let hooks = HookManager::new()
        .with_hook(DangerousCommandGuard::new(&registry, approvals).into_hook());

    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<helm_agent::ToolOutputChunk>();
    tokio::spawn(async move {
        while let Some(chunk) = output_rx.recv().await {
            if !chunk.is_complete {
                eprint!("\x1b[2m{}\x1b[0m", chunk.chunk);
            }
        }
    });

    eprintln!("helm-agent chat");
    eprintln!("provider: {}", cli.provider);
    eprintln!("model: {}", config.model);
    eprintln!("cwd: {}", config.cwd.display());
    eprintln!("---");

    let model = StepModel::new(provider, config.model.clone(), config.max_tokens);
    let agent = Agent::new(model, config)
        .with_tools(registry)
        .with_pre_tool_use(hooks)
        .with_output(output_tx);

    let mut lines = stdin_lines();
    let mut history: Vec<Message> = Vec::new();
    let mut session_usage = TokenUsage::default();

    loop {
        eprint!("\x1b[1;36myou>\x1b[0m ");
        io::stderr().flush().ok();

        let Some(line) = lines.recv().await else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }

        history.push(Message::user(trimmed));
        let cancel = CancellationToken::new();
        let mut events = Box::pin(agent.run(&mut history, cancel.clone()));
        let mut speaking = false;

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    match event {
                        Ok(AgentEvent::TurnStart { turn, max_turns }) => {
                            if turn > 1 {
                                eprintln!("\x1b[2m  (turn {turn}/{max_turns})\x1b[0m");
                            }
                        }
                        Ok(AgentEvent::TextDelta { text }) => {
                            if !speaking {
                                eprint!("\x1b[1;32magent>\x1b[0m ");
                                speaking = true;
                            }
                            print!("{text}");
                            io::stdout().flush().ok();
                        }
                        Ok(AgentEvent::ToolCall { tool_name, input, .. }) => {
                            if speaking {
                                println!();
                                speaking = false;
                            }
                            eprintln!("\x1b[33m  [tool: {tool_name}]\x1b[0m {input}");
                        }
                        Ok(AgentEvent::ToolResult { tool_name, result, .. }) => {
                            let (tag, body) = if result.success {
                                ("result", result.output)
                            } else {
                                ("error", result.error.unwrap_or_default())
                            };
                            eprintln!("\x1b[33m  [{tag}: {tool_name}]\x1b[0m {}", truncate(&body, 200));
                        }
                        Ok(AgentEvent::Finish { usage }) => {
                            if speaking {
                                println!();
                                speaking = false;
                            }
                            session_usage.accumulate(&usage);
                            eprintln!(
                                "\x1b[2m  [{}in / {}out tokens, {} this session]\x1b[0m",
                                usage.input_tokens, usage.output_tokens, session_usage.total_tokens
                            );
                        }
                        Ok(AgentEvent::Error { error }) => {
                            eprintln!("\x1b[1;31mstream error:\x1b[0m {error}");
                        }
                        Err(e) => {
                            eprintln!("\x1b[1;31merror:\x1b[0m {e}");
                        }
                    }
                }
                Some(request) = approval_rx.recv() => {
                    eprint!(
                        "\x1b[1;35mallow {}?\x1b[0m {} [y/N] ",
                        request.tool_name,
                        truncate(&request.input.to_string(), 200)
                    );
                    io::stderr().flush().ok();
                    let answer = lines.recv().await.unwrap_or_default();
                    let approved = matches!(answer.trim(), "y" | "Y" | "yes");
                    let _ = request.respond.send(approved);
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\n\x1b[2m  (aborted)\x1b[0m");
                    cancel.cancel();
                }
            }
        }
    }

    eprintln!("bye.");
}
