//! kubectl-warp - run a command in a fresh Pod next to your local files
//!
//! Binary name: `kubectl-warp` (invoked as `kubectl warp`)

use std::process;

mod cli;
mod commands;
mod signals;

use commands::run::{run_with_options, RunOptions};
use warp_core::{CancellationSignal, SessionOutcome};

#[tokio::main]
async fn main() {
    // Clap exits on its own for --help, --version and usage errors.
    let matches = cli::build_cli().get_matches();

    let options = match RunOptions::from_matches(&matches) {
        Ok(options) => options,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {e:#}");
            }
            #[allow(clippy::exit)]
            process::exit(1);
        }
    };

    let level = if options.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationSignal::new();
    if let Err(e) = signals::listen(cancel.clone()) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: Failed to setup signal handlers: {e}");
        }
        #[allow(clippy::exit)]
        process::exit(1);
    }

    match run_with_options(&options, cancel).await {
        Ok(SessionOutcome::Attached) => tracing::debug!("session finished"),
        Ok(SessionOutcome::LogsPrinted) => tracing::debug!("pod had already completed"),
        Err(err) => {
            let interrupted = err
                .downcast_ref::<warp_core::Error>()
                .is_some_and(warp_core::Error::is_interrupted);
            if interrupted {
                #[allow(clippy::print_stdout)]
                {
                    println!("Cancelling...");
                }
            } else {
                #[allow(clippy::print_stderr)]
                {
                    eprintln!("Error: {err:#}");
                }
            }
            #[allow(clippy::exit)]
            process::exit(1);
        }
    }
}
