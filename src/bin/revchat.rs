//! Interactive REPL for the conversation service.
//!
//! # Usage
//!
//! ```bash
//! # Find config.json in the working directory or ~/.config/revChatGPT/
//! revchat
//!
//! # Explicit configuration and log file
//! revchat --config ./config.json --log-file /tmp/revchat.log
//! ```
//!
//! Questions may span several lines; an empty line submits them.  Lines
//! starting with `!` are commands, see `!help`.  Ctrl+C while an answer is
//! streaming stops it without moving the conversation forward.

use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use futures::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use revchat::commands::{ChatCommand, help_text, parse_command};
use revchat::{AskRequest, Config, ConversationHistory, ConversationListParams, Session};

const DEFAULT_LOG_FILE: &str = "chatbot.log";

#[derive(arrrg_derive::CommandLine, Debug, Default, PartialEq, Eq)]
struct ReplArgs {
    #[arrrg(optional, "Path to config.json (default: search the usual places)", "PATH")]
    config: Option<String>,

    #[arrrg(optional, "File to write logs to (default: chatbot.log)", "PATH")]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (args, _) = ReplArgs::from_command_line_relaxed("revchat [OPTIONS]");
    init_logging(args.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE))?;

    let config = match args.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::discover()?,
    };
    println!("Logging in...");
    let mut session = Session::from_config(&config, None).await?;
    let mut rl = DefaultEditor::new()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("ChatGPT");
    println!("Type !help for commands, press enter twice to submit.\n");

    loop {
        interrupted.store(false, Ordering::Relaxed);

        let input = match read_input(&mut rl) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Input error: {err}");
                break;
            }
        };

        if let Some(command) = parse_command(&input) {
            if command == ChatCommand::Quit {
                println!("Goodbye!");
                break;
            }
            if let Err(err) = run_command(&mut session, &config, command).await {
                eprintln!("Error: {err}");
            }
            continue;
        }

        println!("Chatbot:");
        if let Err(err) = stream_answer(&mut session, input, &interrupted).await {
            eprintln!("\nError: {err}");
        }
    }

    Ok(())
}

fn init_logging(path: &str) -> Result<(), Box<dyn Error>> {
    let file = File::options().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

// Reads lines until an empty one.  A command is taken on its own line.
fn read_input(rl: &mut DefaultEditor) -> Result<String, ReadlineError> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        let prompt = if lines.is_empty() { "You: " } else { "" };
        let line = rl.readline(prompt)?;
        if line.trim().is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        if lines.is_empty() && parse_command(&line).is_some() {
            let _ = rl.add_history_entry(line.as_str());
            return Ok(line);
        }
        lines.push(line);
    }
    let input = lines.join("\n");
    let _ = rl.add_history_entry(input.as_str());
    Ok(input)
}

async fn stream_answer(
    session: &mut Session,
    prompt: String,
    interrupted: &AtomicBool,
) -> revchat::Result<()> {
    let mut answer = session.ask(AskRequest::new(prompt)).await?;
    let mut shown = String::new();
    while let Some(event) = answer.next().await {
        if interrupted.load(Ordering::Relaxed) {
            println!("\n[interrupted]");
            return Ok(());
        }
        let event = event?;
        print!("{}", event.delta_since(&shown));
        io::stdout().flush()?;
        shown = event.message_text;
    }
    println!("\n");
    Ok(())
}

async fn run_command(
    session: &mut Session,
    config: &Config,
    command: ChatCommand,
) -> revchat::Result<()> {
    match command {
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Reset => {
            session.reset_chat()?;
            println!("Chat session successfully reset.");
        }
        ChatCommand::ShowConfig => print_config(config)?,
        ChatCommand::List => {
            let conversations = session
                .get_conversations(ConversationListParams::default())
                .await?;
            for conversation in conversations {
                println!(
                    "[{}] {}",
                    conversation.id,
                    conversation.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        ChatCommand::Rollback(turns) => {
            session.rollback(turns)?;
            println!("Rolled back {turns} messages.");
        }
        ChatCommand::Set(conversation_id) => {
            let history = session.switch_conversation(&conversation_id).await?;
            println!("Conversation has been changed, now showing message history:");
            print_thread(&history);
        }
        ChatCommand::Remove(conversation_id) => {
            session.delete_conversation(&conversation_id).await?;
            println!("Conversation has been deleted.");
        }
        ChatCommand::Title(title) => match session.state().conversation_id().cloned() {
            Some(conversation_id) => {
                session.change_title(&conversation_id, &title).await?;
                println!("Conversation title has been changed.");
            }
            None => eprintln!("No current conversation to rename."),
        },
        ChatCommand::History(conversation_id) => {
            let history = session.get_msg_history(&conversation_id).await?;
            print_thread(&history);
        }
        ChatCommand::Invalid(message) => eprintln!("{message}"),
        ChatCommand::Quit => {}
    }
    Ok(())
}

fn print_config(config: &Config) -> revchat::Result<()> {
    let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>".to_string());
    let shown = Config {
        access_token: redact(&config.access_token),
        session_token: redact(&config.session_token),
        password: redact(&config.password),
        ..config.clone()
    };
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn print_thread(history: &ConversationHistory) {
    if let Some(title) = history.title.as_deref() {
        println!("# {title}\n");
    }
    for message in history.thread() {
        let speaker = if message.is_user() { "You" } else { "Chatbot" };
        println!("{speaker}:\n{}\n", message.text());
    }
}
