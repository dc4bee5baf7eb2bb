//! Interactive REPL against a room.

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crewbot_core::bus::types::{MessageEnvelope, SenderRole};

use crate::helpers::{print_banner, print_response, Runtime};

/// Run the interactive loop until EOF or `/quit`.
pub async fn run(runtime: Runtime, room: &str) -> Result<()> {
    println!();
    print_banner();
    println!("  Room: {}   (/quit to exit, /help for commands)", room.bold());
    println!();

    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline(&format!("{} ", "you ›".cyan().bold())) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" || line == "/exit" {
                    break;
                }
                let _ = editor.add_history_entry(line);

                let mut msg = MessageEnvelope::inbound("cli", "user", "repl", line);
                msg.set_room(room);
                msg.apply_defaults(SenderRole::User);

                match runtime.agent.process_message(&msg).await {
                    Ok(response) => print_response(&response.content),
                    Err(e) => eprintln!("{} {e:#}", "error:".red().bold()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", "readline error:".red());
                break;
            }
        }
    }

    println!("👋 Bye!");
    Ok(())
}
