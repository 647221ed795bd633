//! `ringcast send` — broadcast the payload read from stdin.

use anyhow::Result;

use ringcast_proto::config::{DEFAULT_GROUP, DEFAULT_MAXCHUNKS, DEFAULT_PORT};
use ringcast_proto::{Sender, SenderConfig};

use crate::cli::SendArgs;
use crate::control;

/// Apply validated flags over the defaults. Out-of-range values are diagnosed
/// and replaced by their defaults; only malformed syntax is a hard CLI error.
fn build_config(args: &SendArgs) -> SenderConfig {
    let mut cfg = SenderConfig { interface: args.interface.clone(), ..Default::default() };

    match args.group.parse() {
        Ok(group) => cfg.group = group,
        Err(_) => {
            tracing::warn!(group = %args.group, default = %DEFAULT_GROUP, "not a valid multicast address, using default");
        }
    }
    if let Some(port) = args.port {
        // port+1 carries keepalives, so the last port is unusable.
        if port >= 1 && port < u16::MAX {
            cfg.port = port;
        } else {
            tracing::warn!(port, default = DEFAULT_PORT, "not a valid port, using default");
        }
    }
    if let Some(n) = args.maxchunks {
        if n >= 1 && n <= u16::MAX as u32 {
            cfg.maxchunks = n;
        } else {
            tracing::warn!(maxchunks = n, default = DEFAULT_MAXCHUNKS, "not a valid chunk count, using default");
        }
    }
    if let Some(m) = args.maxwait {
        if m > 0 {
            cfg.maxwait = m;
        } else {
            tracing::warn!("maxwait of zero ignored");
        }
    }
    if let Some(w) = args.bwlimit {
        if w > 0 {
            cfg.bwlimit = w;
        } else {
            tracing::warn!("bandwidth limit of zero ignored");
        }
    }
    cfg.census_output = args.output.clone();

    if let Some(value) = args.value {
        cfg.value = value;
        cfg.enable_keepalives();
    }
    if let Some(clients) = args.clients {
        if clients < u16::MAX {
            cfg.expected_clients = clients;
            cfg.enable_keepalives();
        } else {
            tracing::warn!(clients, "not a valid client count, ignored");
        }
    }
    if args.keepalives {
        cfg.enable_keepalives();
    }
    cfg
}

pub fn run(args: SendArgs) -> Result<i32> {
    let cfg = build_config(&args);

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    control::install(control_tx);

    let stdin = std::io::stdin();
    let mut sender = Sender::new(cfg, &mut stdin.lock(), control_rx)?;
    sender.run()?;
    Ok(0)
}
