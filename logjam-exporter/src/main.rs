//! The logjam exporter binary.
//!
//! Aggregates logjam request logs per application environment and exposes them for Prometheus.
//! All options can be set in `config.yml`, on the command line, or via environment variables.
//! Run with `--help` for a list.

mod cli;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            logjam_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
