mod cli;
mod config;
mod error;
mod gateway;
mod history;
mod import;
mod model;
mod orchestrator;
mod text_summary;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli::log_filter(args.verbose)),
    )
    .init();

    match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(cli::failure_code(&e))
        }
    }
}
