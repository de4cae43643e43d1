mod analytics;
mod noninteractive;
mod output;
mod repl;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::analysis::Metric;
use crate::core::config::{load_config, AppConfig};
use crate::core::model::ModelId;
use crate::relay::ConversationRelay;

#[derive(Parser, Debug)]
#[command(
    name = "portfolio",
    version,
    about = "Chat with a resume and explore ratio-metric analytics"
)]
struct Cli {
    /// Working directory (where portfolio-assistant.json is looked up)
    #[arg(short = 'c', long = "cwd", global = true)]
    working_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Model endpoint to use (overrides config)
    #[arg(short, long, global = true, env = "PORTFOLIO_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat about the resume
    Chat,

    /// Ask one question and print the streamed answer
    Ask {
        prompt: String,

        /// Output format
        #[arg(short = 'f', long, default_value = "text")]
        output_format: OutputFormat,

        /// Suppress progress indicators
        #[arg(short, long)]
        quiet: bool,
    },

    /// Rate/Mix decomposition of a ratio metric
    Decompose {
        /// RATIO_T0 RATIO_T1 WEIGHT_T0 WEIGHT_T1
        #[arg(
            num_args = 4,
            allow_negative_numbers = true,
            required_unless_present = "segments",
            conflicts_with = "segments"
        )]
        values: Vec<f64>,

        /// JSON file with per-segment counts for both periods
        #[arg(short, long, visible_alias = "file")]
        segments: Option<PathBuf>,

        #[arg(short = 'f', long, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Flag points outside mean ± k standard deviations
    Anomalies {
        /// Series values (alternatively --file)
        #[arg(allow_negative_numbers = true, required_unless_present = "file")]
        values: Vec<f64>,

        /// JSON file: an array of numbers, or of {clicks, cvr, cost} records
        #[arg(long, conflicts_with = "values")]
        file: Option<PathBuf>,

        /// Metric derived from daily records (requires --file with records)
        #[arg(long, value_enum, requires = "file")]
        metric: Option<Metric>,

        /// Band half-width in standard deviations (overrides config)
        #[arg(short)]
        k: Option<f64>,

        #[arg(short = 'f', long, default_value = "text")]
        output_format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.working_dir.clone()).map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(model) = cli.model {
        config.model = ModelId(model);
    }
    config.debug |= cli.debug;

    match cli.command {
        Command::Chat => match build_relay(&config) {
            Some(relay) => repl::run(relay).await,
            None => Ok(()),
        },
        Command::Ask {
            prompt,
            output_format,
            quiet,
        } => match build_relay(&config) {
            Some(relay) => noninteractive::run(relay, prompt, output_format, quiet).await,
            None => Ok(()),
        },
        Command::Decompose {
            values,
            segments,
            output_format,
        } => analytics::decompose(&values, segments.as_deref(), output_format),
        Command::Anomalies {
            values,
            file,
            metric,
            k,
            output_format,
        } => {
            let k = k.unwrap_or(config.analysis.threshold_k);
            analytics::anomalies(values, file.as_deref(), metric, k, output_format)
        }
    }
}

/// The chat relay, or `None` when chat is unavailable. A configuration
/// problem disables chat for this run instead of aborting.
fn build_relay(config: &AppConfig) -> Option<ConversationRelay> {
    match ConversationRelay::from_config(config) {
        Ok(relay) => Some(relay),
        Err(e) => {
            tracing::warn!(error = %e, "chat disabled");
            eprintln!("\x1b[33mChat is disabled:\x1b[0m {e}");
            eprintln!("Set ARK_API_KEY or add \"api_key\" to portfolio-assistant.json to enable it.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_accepts_file_alias() {
        for flag in ["--segments", "--file", "-s"] {
            let cli = Cli::try_parse_from(["portfolio", "decompose", flag, "channels.json"]).unwrap();
            match cli.command {
                Command::Decompose { values, segments, .. } => {
                    assert!(values.is_empty());
                    assert_eq!(segments, Some(PathBuf::from("channels.json")));
                }
                other => panic!("unexpected command: {other:?}"),
            }
        }

        let cli = Cli::try_parse_from(["portfolio", "decompose", "0.05", "0.03", "0.5", "0.5"]).unwrap();
        assert!(matches!(cli.command, Command::Decompose { ref values, .. } if values.len() == 4));
    }

    #[test]
    fn test_anomalies_metric_requires_file() {
        let cli = Cli::try_parse_from([
            "portfolio", "anomalies", "--file", "days.json", "--metric", "roas",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Anomalies { metric: Some(Metric::Roas), .. }
        ));

        assert!(Cli::try_parse_from(["portfolio", "anomalies", "1", "2", "--metric", "revenue"]).is_err());
    }
}
