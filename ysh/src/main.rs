use anyhow::Result;
use clap::Parser;
use nix::unistd::{getpgrp, getpid, isatty};
use std::process::ExitCode;
use tracing::debug;

mod input;
mod parser;
mod process;
mod shell;

use shell::{SHELL_TERMINAL, Shell};
use ysh_types::Context;

#[derive(Parser)]
#[command(author, version, about = "a job-control shell", long_about = None)]
struct Cli {
    /// Run the given command line and exit
    #[arg(short = 'c', long)]
    command: Option<String>,
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("ysh: failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    if let Err(err) = process::signal::install_handlers() {
        eprintln!("ysh: failed to install signal handlers: {err}");
        return ExitCode::FAILURE;
    }

    let interactive = isatty(SHELL_TERMINAL).unwrap_or(false);
    debug!(
        "ysh starting: pid {} pgid {} interactive {}",
        getpid(),
        getpgrp(),
        interactive
    );

    let mut ctx = Context::new(getpid(), getpgrp(), interactive);
    let mut shell = Shell::new();

    let result = match cli.command.as_deref() {
        Some(command) => shell.run_command(&mut ctx, command),
        None => shell.run_interactive(&mut ctx),
    };

    match result {
        Ok(code) => {
            debug!("ysh exiting with status {}", code);
            ExitCode::from(code as u8)
        }
        Err(err) => {
            eprintln!("ysh: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics stay out of the shell's own stdout/stderr: logging is off
/// unless YSH_LOG is set, and then it goes to a file next to the cwd.
fn init_tracing() -> Result<()> {
    if let Ok(filter) = std::env::var("YSH_LOG") {
        let log_file = std::sync::Arc::new(std::fs::File::create("./ysh-debug.log")?);
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(log_file)
            .init();
    }
    Ok(())
}
