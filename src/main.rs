// src/main.rs

use buildorch::{RunOutcome, cli, logging, run};

/// Conventional exit status for a run stopped by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Interrupted) => std::process::exit(EXIT_INTERRUPTED),
        Err(err) => {
            eprintln!("buildorch error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<RunOutcome> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
