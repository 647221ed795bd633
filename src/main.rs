//! ringcast — looped multicast payload distribution.
//!
//! One sender multicasts a bounded payload to any number of receivers,
//! cycling through its chunks until a deadline passes or the keepalive census
//! empties. Run `ringcast --help` for usage.

use clap::Parser;
use ringcast_proto::AllocError;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod cli;
mod control;
mod recv;
mod send;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::Send(args) => args.verbose,
        Commands::Recv(args) => args.verbose,
    };
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    // Logs go to stderr; stdout is reserved for the received payload.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Send(args) => send::run(args),
        Commands::Recv(args) => recv::run(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = if e.chain().any(|c| c.downcast_ref::<AllocError>().is_some()) {
                255
            } else {
                1
            };
            std::process::exit(code);
        }
    }
}
