//! CLI front-end for the static screener (C1).
//!
//! Reads Python source from a file argument or, if omitted, from stdin;
//! prints one violation per line; exits 0 if the submission is clean and 1
//! if it was rejected.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sandbox_runner::screener::static_check;

#[derive(Parser)]
#[command(name = "screen")]
#[command(about = "Static pre-screener for submitted program text")]
struct Cli {
    /// Path to a file containing the source to screen. Reads stdin if omitted.
    path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match &cli.path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("failed to read {}: {err}", path.display());
                return ExitCode::from(2);
            }
        },
        None => {
            let mut buf = String::new();
            if let Err(err) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("failed to read stdin: {err}");
                return ExitCode::from(2);
            }
            buf
        }
    };

    let violations = static_check(&code);
    if violations.is_empty() {
        ExitCode::SUCCESS
    } else {
        for violation in &violations {
            println!("{violation}");
        }
        ExitCode::FAILURE
    }
}
