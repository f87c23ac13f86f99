mod app;
mod catalog;
mod cli;
mod search;
mod simulate;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{CliArgs, Command};

fn load_config() -> liftlog_core::Config {
    liftlog_core::config::load_dotenv();
    liftlog_core::Config::from_env()
}

async fn dispatch(app: &App, command: &Command) -> Result<()> {
    match command {
        Command::Simulate(args) => {
            let stats = simulate::run(app, args).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search(args) => {
            for report in search::run(app, args).await? {
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&app.config.summary())?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // .env first, so clap's env fallbacks see it.
    let config = load_config();
    let args = CliArgs::parse();
    config.log_summary();

    let app = App::new(config);
    let result = dispatch(&app, &args.command).await;
    app.shutdown();
    result
}
