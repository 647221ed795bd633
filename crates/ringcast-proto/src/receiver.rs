//! The receiving peer.
//!
//! Blocks on the data socket reassembling chunks into the buffer, emitting a
//! heartbeat every `maxwait` seconds when keepalives are on. Completion is
//! probed every 2 MiB worth of accepted packets — the completion scan walks
//! the whole slot table, so probing per packet would dominate the loop on
//! large payloads.

use anyhow::Result;
use std::io::{ErrorKind, Write};
use std::time::Duration;

use crate::buffer::{Accept, Buffer};
use crate::census::pack_heartbeat;
use crate::codec::{self, Codec, CHUNK_SIZE, MESSAGE_SIZE};
use crate::config::ReceiverConfig;
use crate::net::{client_id_from_addr, resolve_interface_addr, DataSocket, KeepaliveSocket};

/// Accepted packets between completion probes (2 MiB of chunk data).
const PROBE_INTERVAL: u64 = (2 * 1024 * 1024 / CHUNK_SIZE) as u64;

/// Progress callback, invoked with a percentage (0 at first datagram, 100
/// after the payload is flushed). Best-effort; must not block.
pub type StatusHook = Box<dyn FnMut(u8)>;

pub struct Receiver {
    cfg: ReceiverConfig,
    codec: Codec,
    buffer: Buffer,
    data: DataSocket,
    keepalive: Option<KeepaliveSocket>,
    /// Pre-packed heartbeat word for this receiver.
    heartbeat: u32,
    status: Option<StatusHook>,
    received: u64,
    fresh: u64,
    duplicates: u64,
    dropped: u64,
}

impl Receiver {
    pub fn new(cfg: ReceiverConfig, status: Option<StatusHook>) -> Result<Self> {
        let data = DataSocket::receiver(cfg.group, cfg.port)?;

        let mut heartbeat = 0;
        let keepalive = if cfg.keepalives {
            let id = match cfg.client_id {
                Some(id) => id,
                None => {
                    let addr = resolve_interface_addr(&cfg.interface)?;
                    client_id_from_addr(addr)
                }
            };
            heartbeat = pack_heartbeat(id, cfg.value);
            tracing::debug!(client = format_args!("{}.{}", id >> 8, id & 0xFF), "client id");
            Some(KeepaliveSocket::emitter(cfg.group, cfg.port + 1)?)
        } else {
            None
        };

        let buffer = Buffer::new(cfg.maxchunks)?;
        Ok(Self {
            cfg,
            codec: Codec::new(),
            buffer,
            data,
            keepalive,
            heartbeat,
            status,
            received: 0,
            fresh: 0,
            duplicates: 0,
            dropped: 0,
        })
    }

    /// Receive until the payload completes (flushed to `sink`) or, in
    /// exit-on-value mode, until the first accepted chunk. Returns the process
    /// exit code.
    pub fn run(&mut self, sink: &mut dyn Write) -> Result<u8> {
        let ticker = if self.keepalive.is_some() {
            self.send_heartbeat();
            // Bound the blocking receive so the heartbeat timer is serviced
            // even when the group is silent.
            self.data.set_read_timeout(Some(Duration::from_secs(1)))?;
            Some(crossbeam_channel::tick(Duration::from_secs(self.cfg.maxwait)))
        } else {
            None
        };

        let mut raw = [0u8; MESSAGE_SIZE];
        let mut accepted = 0u64;

        loop {
            if let Some(tick) = &ticker {
                if tick.try_recv().is_ok() {
                    self.send_heartbeat();
                }
            }

            let len = match self.data.recv(&mut raw) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "data receive failed");
                    continue;
                }
            };

            if self.received == 0 {
                self.report_status(0);
            }
            self.received += 1;

            if len < MESSAGE_SIZE {
                tracing::debug!(len, "runt datagram dropped");
                self.dropped += 1;
                continue;
            }

            match self.buffer.accept(&self.codec, &mut raw) {
                Accept::Fresh => self.fresh += 1,
                Accept::Duplicate => self.duplicates += 1,
                Accept::Corrupt | Accept::OutOfRange => {
                    self.dropped += 1;
                    continue;
                }
            }

            if self.cfg.exit_on_value {
                let value = codec::peek_value(&raw);
                tracing::debug!(value, "return code known, exiting without payload");
                self.data.shutdown();
                self.buffer.release();
                return Ok(value);
            }

            accepted += 1;
            if accepted % PROBE_INTERVAL == 0 && self.buffer.is_complete() {
                self.buffer.flush(sink)?;
                let value = self.buffer.chunk(0).value;
                tracing::info!(
                    bytes = self.buffer.length(),
                    received = self.received,
                    fresh = self.fresh,
                    duplicates = self.duplicates,
                    dropped = self.dropped,
                    "payload received"
                );
                self.report_status(100);
                self.data.shutdown();
                self.buffer.release();
                return Ok(value);
            }
        }
    }

    fn send_heartbeat(&self) {
        if let Some(sock) = &self.keepalive {
            if let Err(e) = sock.send_word(self.heartbeat) {
                tracing::warn!(error = %e, "keepalive send failed");
            }
        }
    }

    fn report_status(&mut self, percent: u8) {
        if let Some(hook) = &mut self.status {
            hook(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_interval_is_two_mebibytes() {
        assert_eq!(PROBE_INTERVAL * CHUNK_SIZE as u64, 2 * 1024 * 1024);
        assert_eq!(PROBE_INTERVAL, 512);
    }
}
