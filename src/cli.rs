//! CLI definitions for ringcast.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ringcast_proto::config::DEFAULT_INTERFACE;

#[derive(Parser)]
#[clap(
    name = "ringcast",
    version,
    about = "Looped multicast payload distribution\n\nBroadcast a payload from stdin to any number of receivers over an IP multicast group, cycling until a deadline passes or the keepalive census empties.",
    long_about = None
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Broadcast the payload read from stdin
    Send(SendArgs),

    /// Receive a payload and write it to stdout
    Recv(RecvArgs),
}

#[derive(Args)]
pub struct SendArgs {
    /// Network interface selecting the outgoing multicast route
    #[clap(short, value_name = "iface", default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Multicast group address
    #[clap(short = 'd', value_name = "group", default_value = "239.0.0.1")]
    pub group: String,

    /// Data port; keepalives use port+1
    #[clap(short, value_name = "port")]
    pub port: Option<u16>,

    /// Enable keepalives: stop sending once no receiver has reported within
    /// maxwait seconds
    #[clap(short)]
    pub keepalives: bool,

    /// With -k, seconds without any keepalive before stopping; without -k,
    /// minimum broadcast duration in seconds (0 = loop forever)
    #[clap(short, value_name = "seconds")]
    pub maxwait: Option<u64>,

    /// Wait for this many live receivers before broadcasting (implies -k)
    #[clap(short = 'N', value_name = "count")]
    pub clients: Option<u16>,

    /// Chunk table capacity, in 4 KiB chunks
    #[clap(short = 'n', value_name = "chunks")]
    pub maxchunks: Option<u32>,

    /// Return code stamped into every chunk; receivers exit with it
    /// (implies -k)
    #[clap(short = 'r', value_name = "value")]
    pub value: Option<u8>,

    /// Census dump destination (stderr if omitted)
    #[clap(short, value_name = "file")]
    pub output: Option<PathBuf>,

    /// Bandwidth cap in KiB/s of on-wire bytes (default unlimited)
    #[clap(short = 'w', value_name = "kib_per_s")]
    pub bwlimit: Option<u32>,

    /// Verbose diagnostics
    #[clap(short)]
    pub verbose: bool,
}

#[derive(Args)]
pub struct RecvArgs {
    /// Network interface whose address derives the default client id
    #[clap(short, value_name = "iface", default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Multicast group address
    #[clap(short = 'd', value_name = "group", default_value = "239.0.0.1")]
    pub group: String,

    /// Data port; keepalives use port+1
    #[clap(short, value_name = "port")]
    pub port: Option<u16>,

    /// Enable keepalives: keep asking the sender for more cycles while the
    /// payload is incomplete
    #[clap(short)]
    pub keepalives: bool,

    /// Seconds between keepalive emissions
    #[clap(short, value_name = "seconds")]
    pub maxwait: Option<u64>,

    /// Explicit 16-bit client id; default is the low two bytes of the
    /// interface address (implies -k)
    #[clap(short = 'N', value_name = "id")]
    pub client_id: Option<u16>,

    /// Chunk table capacity, in 4 KiB chunks
    #[clap(short = 'n', value_name = "chunks")]
    pub maxchunks: Option<u32>,

    /// Exit-code byte reported to the sender in keepalives (implies -k)
    #[clap(short = 'r', value_name = "value")]
    pub value: Option<u8>,

    /// Exit as soon as the return code is known: the first accepted chunk's
    /// stamped value becomes the exit code and no payload is written
    #[clap(short = 'R')]
    pub exit_on_value: bool,

    /// Program invoked with the completion percentage at milestones
    #[clap(short = 'x', value_name = "path")]
    pub status_cmd: Option<PathBuf>,

    /// Percent step between status invocations; 0% and 100% always fire
    /// (intermediate steps are reserved)
    #[clap(short = 's', value_name = "pct")]
    pub status_step: Option<u8>,

    /// Verbose diagnostics
    #[clap(short)]
    pub verbose: bool,
}
