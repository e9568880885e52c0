// src/main.rs

use std::process::ExitCode;

use progressive::errors::ProgressiveError;
use progressive::{cli, logging, run};

/// Exit status for an unusable experiment file, tree or store.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("progressive error: {err:?}");
            let config_error = err.chain().any(|cause| {
                matches!(
                    cause.downcast_ref::<ProgressiveError>(),
                    Some(ProgressiveError::Configuration(_))
                )
            });
            if config_error {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
