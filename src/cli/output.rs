use std::io::{self, Write};

use crate::core::error::RelayError;
use crate::relay::Turn;

/// Print a turn's fragments as they arrive. Returns the full reply, or the
/// error after reporting it.
pub async fn render_turn(mut turn: Turn<'_>, quiet: bool) -> Result<String, RelayError> {
    if !quiet {
        eprint!("\x1b[90mThinking...\x1b[0m");
        io::stderr().flush().ok();
    }

    let mut first_content = true;
    while let Some(fragment) = turn.next_fragment().await {
        match fragment {
            Ok(text) => {
                if first_content {
                    // Clear "Thinking..."
                    if !quiet {
                        eprint!("\r\x1b[K");
                    }
                    first_content = false;
                }
                print!("{text}");
                io::stdout().flush().ok();
            }
            Err(e) => {
                if first_content && !quiet {
                    eprint!("\r\x1b[K");
                }
                eprintln!("\n\x1b[31;1m[error]\x1b[0m {e}");
                return Err(e);
            }
        }
    }

    if first_content && !quiet {
        eprint!("\r\x1b[K");
    }
    println!();

    if !quiet {
        if let Some(usage) = turn.usage().filter(|u| u.input_tokens + u.output_tokens > 0) {
            eprintln!(
                "\x1b[90m[tokens] in {} / out {} / total {}\x1b[0m",
                format_tokens(usage.input_tokens),
                format_tokens(usage.output_tokens),
                format_tokens(usage.input_tokens + usage.output_tokens),
            );
        }
    }

    Ok(turn.reply_so_far().to_string())
}

pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{n}")
    }
}

/// Percentage with sign, e.g. `-1.20%`.
pub fn format_percent(value: f64) -> String {
    format!("{:+.2}%", value * 100.0)
}
