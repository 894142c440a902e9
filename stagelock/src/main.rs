use clap::Parser;
use stagelock::cli::{init_tracing, run_command, Cli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.verbose, cli.log_format) {
        eprintln!("error: {err:#}");
        return ExitCode::from(2);
    }

    run_command(cli).await
}
