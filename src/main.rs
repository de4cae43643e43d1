use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    portfolio_assistant::cli::run_cli().await
}
