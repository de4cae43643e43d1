use anyhow::Result;

use crate::relay::ConversationRelay;

pub async fn run(
    relay: ConversationRelay,
    prompt: String,
    output_format: super::OutputFormat,
    quiet: bool,
) -> Result<()> {
    let mut session = relay.start_session();
    let turn = relay.submit_user_message(&mut session, &prompt).await;

    match output_format {
        super::OutputFormat::Text => match turn {
            // the renderer reports stream errors itself
            Ok(turn) => {
                let _ = super::output::render_turn(turn, quiet).await;
            }
            Err(e) => eprintln!("\x1b[31;1m[error]\x1b[0m {e}"),
        },
        super::OutputFormat::Json => {
            let output = match turn {
                Ok(mut turn) => {
                    let mut failure = None;
                    while let Some(fragment) = turn.next_fragment().await {
                        if let Err(e) = fragment {
                            failure = Some(e);
                        }
                    }
                    match failure {
                        Some(e) => serde_json::json!({ "error": e.to_string() }),
                        None => {
                            let usage = turn.usage().cloned().unwrap_or_default();
                            serde_json::json!({
                                "model": relay.model_id().0,
                                "content": turn.reply_so_far(),
                                "usage": {
                                    "input_tokens": usage.input_tokens,
                                    "output_tokens": usage.output_tokens,
                                },
                            })
                        }
                    }
                }
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
