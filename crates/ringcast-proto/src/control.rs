//! Operator control events for the sender loop.
//!
//! The sender consumes these from a channel rather than handling OS signals
//! itself; the binary decides what feeds the channel.

/// A discrete operator request delivered to the sender's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Write the current census to the configured output.
    DumpCensus,
    /// Leave the quorum wait and start broadcasting with whoever is live.
    StopWaiting,
}
