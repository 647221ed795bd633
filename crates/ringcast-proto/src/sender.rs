//! The broadcasting peer.
//!
//! Loads the payload once, then cycles through its chunks indefinitely,
//! framing and multicasting each one. Between packets it honors the bandwidth
//! pacer and folds pending keepalives into the census; the loop ends when the
//! census empties (keepalives on) or the deadline passes (keepalives off).

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::Read;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::census::Census;
use crate::codec::{Codec, MESSAGE_SIZE};
use crate::config::SenderConfig;
use crate::control::ControlEvent;
use crate::net::{resolve_interface_addr, DataSocket, KeepaliveSocket};

/// Per-packet pacing period for a bandwidth cap of `bwlimit_kib` KiB/s of
/// on-wire bytes. `None` disables pacing, either because no cap is set or
/// because the period rounds to zero microseconds.
pub fn pacer_period(bwlimit_kib: u32) -> Option<Duration> {
    if bwlimit_kib == 0 {
        return None;
    }
    let micros = (MESSAGE_SIZE as u64 * 1_000_000) / (bwlimit_kib as u64 * 1024);
    if micros == 0 {
        tracing::warn!(bwlimit_kib, "per-packet wait rounds to zero, bandwidth cap disabled");
        return None;
    }
    tracing::debug!(bwlimit_kib, micros, "bandwidth pacer armed");
    Some(Duration::from_micros(micros))
}

pub struct Sender {
    cfg: SenderConfig,
    codec: Codec,
    buffer: Buffer,
    data: DataSocket,
    keepalive: Option<KeepaliveSocket>,
    census: Option<Census>,
    control: Receiver<ControlEvent>,
}

impl Sender {
    /// Initialize network state and load the whole payload from `payload`.
    pub fn new(
        cfg: SenderConfig,
        payload: &mut dyn Read,
        control: Receiver<ControlEvent>,
    ) -> Result<Self> {
        let iface = match resolve_interface_addr(&cfg.interface) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(
                    interface = %cfg.interface,
                    error = %e,
                    "interface lookup failed, using the default multicast route"
                );
                std::net::Ipv4Addr::UNSPECIFIED
            }
        };
        let data = DataSocket::sender(cfg.group, cfg.port, iface)?;
        let (keepalive, census) = if cfg.keepalives {
            (
                Some(KeepaliveSocket::collector(cfg.group, cfg.port + 1)?),
                Some(Census::new()?),
            )
        } else {
            (None, None)
        };

        let mut buffer = Buffer::new(cfg.maxchunks)?;
        buffer.fill_from(payload, cfg.value)?;

        Ok(Self { cfg, codec: Codec::new(), buffer, data, keepalive, census, control })
    }

    /// Run to completion: quorum wait, broadcast cycles, teardown.
    pub fn run(&mut self) -> Result<()> {
        if self.cfg.expected_clients > 0 {
            self.await_quorum();
        }
        if self.cfg.census_output.is_some() {
            self.dump_census();
        }

        let pacer = pacer_period(self.cfg.bwlimit).map(crossbeam_channel::tick);
        let maxwait = Duration::from_secs(self.cfg.maxwait);
        let start = Instant::now();
        let mut raw = [0u8; MESSAGE_SIZE];
        let mut cycle = 0u64;

        tracing::info!(
            chunks = self.buffer.nchunks(),
            bytes = self.buffer.length(),
            group = %self.cfg.group,
            port = self.cfg.port,
            "broadcast starting"
        );

        'cycles: loop {
            cycle += 1;
            tracing::debug!(cycle, "cycle starting");
            for i in 0..self.buffer.nchunks() as usize {
                self.poll_control();
                self.codec.frame(&self.buffer, i, &mut raw);
                if let Err(e) = self.data.send(&raw) {
                    tracing::warn!(chunk = i + 1, error = %e, "send failed");
                }
                if let Some(tick) = &pacer {
                    let _ = tick.recv();
                }
                if let Some(0) = self.census_live(start, maxwait) {
                    break;
                }
            }
            tracing::debug!(cycle, "cycle complete");

            match self.census_live(start, maxwait) {
                Some(0) => {
                    tracing::info!(cycle, "no live receivers, stopping");
                    break 'cycles;
                }
                Some(_) => {}
                None => {
                    if self.cfg.maxwait > 0 && start.elapsed() > maxwait {
                        tracing::info!(
                            cycle,
                            elapsed = start.elapsed().as_secs(),
                            "deadline reached, stopping"
                        );
                        break 'cycles;
                    }
                }
            }
        }

        self.data.shutdown();
        self.buffer.release();
        Ok(())
    }

    /// Probe the census once a second until the expected number of receivers
    /// is live or the operator stops the wait.
    fn await_quorum(&mut self) {
        let expected = self.cfg.expected_clients as usize;
        let start = Instant::now();
        let maxwait = Duration::from_secs(self.cfg.maxwait);
        let mut waiting = true;
        tracing::info!(expected, "waiting for receivers");

        loop {
            match self.control.recv_timeout(Duration::from_secs(1)) {
                Ok(ControlEvent::StopWaiting) => waiting = false,
                Ok(ControlEvent::DumpCensus) => self.dump_census(),
                Err(RecvTimeoutError::Timeout) => {}
                // No control source wired up: fall back to plain sleeping.
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(Duration::from_secs(1))
                }
            }
            let live = self.census_live(start, maxwait).unwrap_or(0);
            tracing::debug!(expected, live, "quorum probe");
            if live >= expected {
                break;
            }
            if !waiting {
                tracing::info!(live, expected, "proceeding without full quorum");
                break;
            }
        }
    }

    /// Drain keepalives and count live receivers; `None` when keepalives are
    /// disabled.
    fn census_live(&mut self, start: Instant, maxwait: Duration) -> Option<usize> {
        match (&self.keepalive, &mut self.census) {
            (Some(sock), Some(census)) => Some(census.drain_and_census(sock, start, maxwait)),
            _ => None,
        }
    }

    fn poll_control(&mut self) {
        while let Ok(event) = self.control.try_recv() {
            match event {
                ControlEvent::DumpCensus => self.dump_census(),
                // Only meaningful during the quorum wait.
                ControlEvent::StopWaiting => {}
            }
        }
    }

    /// Write the census to the configured file, or to stderr when no file is
    /// set or it cannot be created. Each dump rewrites the file from scratch.
    fn dump_census(&self) {
        let Some(census) = &self.census else {
            tracing::warn!("keepalives disabled, no census to dump");
            return;
        };
        let result = match &self.cfg.census_output {
            Some(path) => match File::create(path) {
                Ok(mut file) => census.dump(&mut file),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "census file unavailable, dumping to stderr");
                    census.dump(&mut std::io::stderr().lock())
                }
            },
            None => census.dump(&mut std::io::stderr().lock()),
        };
        match result {
            Ok(count) => tracing::debug!(count, "census dumped"),
            Err(e) => tracing::warn!(error = %e, "census dump failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_period_one_mib_per_second() {
        // 4112-byte messages at 1 MiB/s: 1e6 * 4112 / 1048576 µs per packet.
        let period = pacer_period(1024).unwrap();
        assert_eq!(period, Duration::from_micros(3921));
    }

    #[test]
    fn test_pacer_packet_budget() {
        // Over any window W, packets <= ceil(B * 1024 * W / message_size) + 1.
        let bwlimit = 512u32;
        let period = pacer_period(bwlimit).unwrap();
        let window = Duration::from_secs(3);
        let packets = (window.as_micros() / period.as_micros()) as u64 + 1;
        let allowed =
            (bwlimit as u64 * 1024 * window.as_secs()).div_ceil(MESSAGE_SIZE as u64) + 1;
        assert!(packets <= allowed, "{} > {}", packets, allowed);
    }

    #[test]
    fn test_pacer_disabled_when_unlimited() {
        assert!(pacer_period(0).is_none());
    }

    #[test]
    fn test_pacer_disabled_when_period_rounds_to_zero() {
        // Fast enough that a packet takes under a microsecond.
        assert!(pacer_period(5_000_000).is_none());
    }
}
