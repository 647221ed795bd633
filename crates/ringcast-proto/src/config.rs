//! Runtime configuration for the two peer roles.
//!
//! Values arrive pre-parsed from the CLI; out-of-range input is diagnosed and
//! replaced by its default there, so these structs only hold usable settings.

use std::net::Ipv4Addr;
use std::path::PathBuf;

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 1);
pub const DEFAULT_PORT: u16 = 2121;
pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_MAXCHUNKS: u32 = 50_000;
/// Default keepalive cadence: receivers emit every `MAXWAIT` seconds, the
/// sender declares an entry dead after `MAXWAIT + 1` so one heartbeat may be
/// lost to network slack before eviction.
pub const DEFAULT_MAXWAIT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Interface whose address selects the outgoing multicast route.
    pub interface: String,
    pub maxchunks: u32,
    pub keepalives: bool,
    /// With keepalives: census liveness horizon in seconds. Without: minimum
    /// broadcast duration, 0 meaning loop forever.
    pub maxwait: u64,
    /// Receivers required live before broadcasting starts; 0 skips the wait.
    pub expected_clients: u16,
    /// Return code stamped into every chunk.
    pub value: u8,
    /// Bandwidth cap in KiB/s of on-wire message bytes; 0 = unlimited.
    pub bwlimit: u32,
    /// Census dump destination; stderr when unset.
    pub census_output: Option<PathBuf>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: DEFAULT_INTERFACE.into(),
            maxchunks: DEFAULT_MAXCHUNKS,
            keepalives: false,
            maxwait: 0,
            expected_clients: 0,
            value: 0,
            bwlimit: 0,
            census_output: None,
        }
    }
}

impl SenderConfig {
    /// Turn keepalives on, defaulting the census horizon to one second more
    /// than the receivers' emission period.
    pub fn enable_keepalives(&mut self) {
        self.keepalives = true;
        if self.maxwait == 0 {
            self.maxwait = DEFAULT_MAXWAIT_SECS + 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Interface whose address derives the default client id.
    pub interface: String,
    pub maxchunks: u32,
    pub keepalives: bool,
    /// Heartbeat emission period in seconds.
    pub maxwait: u64,
    /// Explicit client id; derived from the interface address when unset.
    pub client_id: Option<u16>,
    /// Exit-code byte reported in heartbeats.
    pub value: u8,
    /// Exit with the first accepted chunk's stamped value, writing no payload.
    pub exit_on_value: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: DEFAULT_INTERFACE.into(),
            maxchunks: DEFAULT_MAXCHUNKS,
            keepalives: false,
            maxwait: 0,
            client_id: None,
            value: 0,
            exit_on_value: false,
        }
    }
}

impl ReceiverConfig {
    pub fn enable_keepalives(&mut self) {
        self.keepalives = true;
        if self.maxwait == 0 {
            self.maxwait = DEFAULT_MAXWAIT_SECS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_defaults_are_staggered() {
        let mut s = SenderConfig::default();
        let mut r = ReceiverConfig::default();
        s.enable_keepalives();
        r.enable_keepalives();
        // One missed heartbeat plus slack before the sender evicts.
        assert_eq!(r.maxwait + 1, s.maxwait);
    }

    #[test]
    fn test_explicit_maxwait_survives_enable() {
        let mut s = SenderConfig { maxwait: 30, ..Default::default() };
        s.enable_keepalives();
        assert_eq!(s.maxwait, 30);
    }
}
