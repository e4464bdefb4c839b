mod app;
mod cli;
mod error;
mod telemetry;
mod view;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    let log_guard = match telemetry::init(&cli.logging.to_config()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("feed: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = app::run(cli).await {
        eprintln!("feed: {err}");
        drop(log_guard);
        std::process::exit(1);
    }
}
