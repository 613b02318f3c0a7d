use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use confidant_backend::persona::PersonaLibrary;
use confidant_backend::{AgentConfig, Companion, CompanionBuilder, CompanionEvent};

const EXIT_COMMANDS: [&str; 3] = ["quit", "exit", "bye"];
const CLEAR_COMMAND: &str = "/clear";
const HELP_COMMAND: &str = "/help";

/// Talk to a personality-driven companion in the terminal.
#[derive(Parser, Debug)]
#[command(name = "confidant", version, about)]
struct Cli {
    /// Persona to talk to, by name or directory path
    #[arg(short, long, env = "CONFIDANT_PERSONA")]
    persona: Option<String>,

    /// Print the available personas and exit
    #[arg(long)]
    list_personas: bool,

    /// Show modifiers, the system prompt, tool events and metrics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confidant=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Confidant starting (config: {:?})", AgentConfig::config_path());

    let mut config = AgentConfig::load();
    if let Some(persona) = args.persona {
        config.persona = persona;
    }

    if args.list_personas {
        let library = PersonaLibrary::new(config.personas_dir());
        let personas = library.list()?;
        if personas.is_empty() {
            println!("No personas found in {:?}", library.root());
        } else {
            println!("Available personas:");
            for name in personas {
                println!("  {}", name);
            }
        }
        return Ok(());
    }

    let (event_tx, event_rx) = flume::unbounded();
    let mut companion = CompanionBuilder::new(config)
        .with_events(event_tx)
        .build()
        .await
        .context("failed to start companion")?;

    if args.debug {
        print_debug_header(&companion).await;
    }

    println!(
        "Talking to {}. Type /help for commands, 'quit' to leave.",
        companion.persona().name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if EXIT_COMMANDS.contains(&input.to_lowercase().as_str()) {
            break;
        }
        if input.eq_ignore_ascii_case(CLEAR_COMMAND) {
            companion.clear_history().await;
            println!("Conversation history cleared.");
            continue;
        }
        if input.eq_ignore_ascii_case(HELP_COMMAND) {
            println!("Commands: /clear (forget this conversation), /help, quit | exit | bye");
            continue;
        }

        let reply = companion.send_message(input).await;
        println!("\n{}: {}", companion.persona().name(), reply);

        if args.debug {
            for event in event_rx.drain() {
                print_event(&event);
            }
            println!("[debug] {}", companion.metrics_summary().await);
        }
    }

    companion.close().await;
    println!("Goodbye.");
    Ok(())
}

async fn print_debug_header(companion: &Companion) {
    println!("[debug] Modifiers ({:?}):", companion.persona().modifiers_path());
    for (modifier, value) in companion.modifiers().await {
        println!("[debug]   {}: {}", modifier, value);
    }
    println!("[debug] System prompt:\n{}", companion.system_prompt().await);
}

fn print_event(event: &CompanionEvent) {
    match event {
        CompanionEvent::ToolCalled { name, success } => {
            println!("[debug] tool {} -> {}", name, if *success { "ok" } else { "failed" });
        }
        CompanionEvent::ModifierChanged {
            modifier,
            old,
            new,
            is_large_change,
        } => {
            let marker = if *is_large_change { " (large)" } else { "" };
            println!("[debug] {}: {} -> {}{}", modifier, old, new, marker);
        }
        CompanionEvent::SidecarWarning(warning) => {
            println!("[debug] sidecar {:?}: {}", warning.severity, warning.note);
        }
        CompanionEvent::Error(message) => println!("[debug] error: {}", message),
    }
}
