//! Continuar CLI
//!
//! ```bash
//! # Train the whole task sequence
//! continuar train experiment.yaml
//!
//! # Resume from the second task with two in-process workers
//! continuar train experiment.yaml --start-task 1 --world-size 2
//!
//! # Validate a config
//! continuar validate experiment.yaml
//!
//! # Summarize a config
//! continuar info experiment.yaml
//! ```

use std::process::ExitCode;

use clap::Parser;
use continuar::cli::{run_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
