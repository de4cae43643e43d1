use anyhow::Result;
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;

use crate::core::error::RelayError;
use crate::core::message::MessageRole;
use crate::core::session::ConversationSession;
use crate::relay::{ConversationRelay, Turn};

pub async fn run(relay: ConversationRelay) -> Result<()> {
    println!("\x1b[1mportfolio\x1b[0m v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: \x1b[36m{}\x1b[0m", relay.model_id());
    println!("Type \x1b[33m/help\x1b[0m for commands, \x1b[33mCtrl-D\x1b[0m to exit.\n");

    let mut session = relay.start_session();
    print_message_history(&session);

    loop {
        eprint!("\x1b[32;1myou>\x1b[0m ");
        io::stderr().flush().ok();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => {
                // EOF (Ctrl-D)
                println!("\nGoodbye!");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        }

        let input = input.trim().to_string();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match handle_command(&input, &relay, &mut session).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("\x1b[31mCommand error: {e}\x1b[0m");
                    continue;
                }
            }
        }

        let turn = relay.submit_user_message(&mut session, &input).await;
        stream_reply(turn).await;
    }

    Ok(())
}

/// Render one reply; Ctrl-C abandons it and keeps the REPL alive.
async fn stream_reply(turn: Result<Turn<'_>, RelayError>) {
    let turn = match turn {
        Ok(turn) => turn,
        Err(e) => {
            report_failure(&e);
            return;
        }
    };

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    if let Err(e) = super::output::render_turn(turn.with_cancellation(cancel), false).await {
        report_failure(&e);
    }
    watcher.abort();
}

fn report_failure(e: &RelayError) {
    match e {
        RelayError::ExternalService(_) => {
            eprintln!("\x1b[31mError connecting to AI:\x1b[0m {e}");
            eprintln!("\x1b[90mType /retry to send your question again.\x1b[0m");
        }
        _ => eprintln!("\x1b[31m{e}\x1b[0m"),
    }
}

fn print_message_history(session: &ConversationSession) {
    for msg in session.messages() {
        let label = match msg.role {
            MessageRole::User => "\x1b[32;1myou\x1b[0m",
            MessageRole::Assistant => "\x1b[36;1massistant\x1b[0m",
            MessageRole::System => "\x1b[90msystem\x1b[0m",
        };
        println!("{label}: {}", msg.content);
    }
}

async fn handle_command(
    input: &str,
    relay: &ConversationRelay,
    session: &mut ConversationSession,
) -> Result<bool> {
    match input {
        "/help" | "/h" => {
            println!("\x1b[1mCommands:\x1b[0m");
            println!("  /help       Show this help");
            println!("  /history    Show the conversation so far");
            println!("  /retry      Re-send the last unanswered question");
            println!("  /clear      Start a new conversation");
            println!("  /model      Show current model");
            println!("  /exit       Exit");
            Ok(true)
        }
        "/exit" | "/quit" | "/q" => {
            println!("Goodbye!");
            Ok(false)
        }
        "/history" => {
            print_message_history(session);
            println!(
                "\x1b[90m{} messages, session {}\x1b[0m",
                session.len(),
                &session.id[..8]
            );
            Ok(true)
        }
        "/retry" => {
            stream_reply(relay.retry_last(session).await).await;
            Ok(true)
        }
        "/clear" => {
            *session = relay.start_session();
            println!("Started a new conversation.");
            print_message_history(session);
            Ok(true)
        }
        "/model" => {
            println!("Model: {}", relay.model_id());
            Ok(true)
        }
        _ => {
            eprintln!("Unknown command: {input}. Type /help for available commands.");
            Ok(true)
        }
    }
}
