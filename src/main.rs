use anyhow::Result;
use cambio::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment and config file still apply.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    cambio::telemetry::init(&config.log, cli.verbose);

    cli.run(config).await
}
