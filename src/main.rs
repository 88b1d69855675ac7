// SPDX-License-Identifier: MIT
//
// tvterm: run a program inside an emulated terminal view.
//
//   tvterm [--colors N] [--fps N] [--term NAME] [--truecolor | --no-truecolor]
//          [--] [command [args...]]
//
// Without a command the user's shell runs. The top row shows the child's
// title; the rest of the screen is the child's. tvterm exits when the
// child does.
//
// The tty belongs to the child, so logs only go to a file: set
// TVTERM_LOG=<path>, and optionally TVTERM_LOG_FILTER for the filter.

use std::env;
use std::fs::File;
use std::path::Path;
use std::process;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tv_term::config::Config;
use tv_term::event_loop::Host;

const DEFAULT_LOG_FILTER: &str = "tv_term=debug,tvterm=debug";

fn main() {
    if let Err(e) = run() {
        eprintln!("tvterm: {e}");
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        process::exit(1);
    }
}

fn run() -> tv_term::Result<()> {
    let config = Config::from_env_and_args(|key| env::var(key).ok(), env::args().skip(1))?;

    if let Some(path) = &config.log_path {
        init_logging(path)?;
    }
    tracing::info!(command = ?config.command, "starting");

    let mut host = Host::new(config);
    host.run()
}

/// Send `tracing` output to `path`, filtered by `TVTERM_LOG_FILTER`.
fn init_logging(path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_env("TVTERM_LOG_FILTER").unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
