use clap::Parser;

use tapline::config::CliArgs;
use tapline::{logger, server_runner};

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments; missing arguments or --help print usage and
    // exit before anything is bound
    let cli = CliArgs::parse();

    // Initialize logger
    logger::init_logger(&cli.log_mode);

    // Lua handler state is not Send, and sessions are cooperative tasks:
    // everything runs on a single-threaded runtime inside a LocalSet
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, server_runner::run(cli))
}
