//! `ringcast recv` — receive a payload and write it to stdout.

use anyhow::Result;
use std::path::PathBuf;
use std::process::Command;

use ringcast_proto::config::{DEFAULT_GROUP, DEFAULT_MAXCHUNKS, DEFAULT_PORT};
use ringcast_proto::{Receiver, ReceiverConfig, StatusHook};

use crate::cli::RecvArgs;

/// Apply validated flags over the defaults, as on the send side.
fn build_config(args: &RecvArgs) -> ReceiverConfig {
    let mut cfg = ReceiverConfig { interface: args.interface.clone(), ..Default::default() };

    match args.group.parse() {
        Ok(group) => cfg.group = group,
        Err(_) => {
            tracing::warn!(group = %args.group, default = %DEFAULT_GROUP, "not a valid multicast address, using default");
        }
    }
    if let Some(port) = args.port {
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
    if let Some(id) = args.client_id {
        if id < u16::MAX {
            cfg.client_id = Some(id);
            cfg.enable_keepalives();
        } else {
            tracing::warn!(id, "not a valid client id, ignored");
        }
    }
    if let Some(value) = args.value {
        cfg.value = value;
        cfg.enable_keepalives();
    }
    if args.keepalives {
        cfg.enable_keepalives();
    }
    cfg.exit_on_value = args.exit_on_value;

    if let Some(step) = args.status_step {
        if step >= 1 && step <= 100 {
            tracing::debug!(step, "status step stored; only 0% and 100% are reported");
        } else {
            tracing::warn!(step, "not a valid status step (1..=100), ignored");
        }
    }
    cfg
}

/// Fire-and-forget invocation of the status program with the percentage as
/// its sole argument. The child is reaped off the receive path.
fn status_hook(path: PathBuf) -> StatusHook {
    Box::new(move |percent| match Command::new(&path).arg(percent.to_string()).spawn() {
        Ok(mut child) => {
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "status hook failed to start");
        }
    })
}

pub fn run(args: RecvArgs) -> Result<i32> {
    let status = args.status_cmd.clone().map(status_hook);
    let cfg = build_config(&args);

    let mut receiver = Receiver::new(cfg, status)?;
    let stdout = std::io::stdout();
    let code = receiver.run(&mut stdout.lock())?;
    Ok(code as i32)
}
