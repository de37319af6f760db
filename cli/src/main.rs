//! `branchport` entry point.
//!
//! stdout carries only command output (`APP_PORT=...`) so CI scripts can
//! `eval` or append it to an env file. Logs and errors go to stderr.

use branchport_cli::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help / --version go to stdout and succeed; usage errors exit 1
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    init_logging();

    let mut stdout = std::io::stdout().lock();
    if let Err(err) = branchport_cli::run(cli, &mut stdout) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
