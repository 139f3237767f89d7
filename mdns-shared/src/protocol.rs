//! Sans-I/O protocol trait.
//!
//! A protocol implementation owns all state machine logic but performs no
//! I/O and keeps no timers of its own. The caller runs the event loop:
//!
//! ```text
//! loop {
//!     while let Some(packet) = proto.poll_write() { /* send it */ }
//!     select! {
//!         packet = socket.recv() => proto.handle_read(packet)?,
//!         _ = sleep_until(proto.poll_timeout()) => proto.handle_timeout(now)?,
//!     }
//!     while let Some(event) = proto.poll_event() { /* handle it */ }
//! }
//! ```

/// A sans-I/O protocol endpoint.
///
/// `Rin`, `Win`, and `Ein` are the inbound read, write, and event message
/// types fed into the protocol; the associated types describe what it
/// produces. `handle_*` methods ingest input and may queue output, which is
/// drained with the matching `poll_*` methods until they return `None`.
pub trait Protocol<Rin, Win, Ein> {
    /// Read output message type
    type Rout;
    /// Write output message type
    type Wout;
    /// Event output message type
    type Eout;
    /// Error type
    type Error;
    /// Time instant type used for timeouts
    type Time;

    /// Handles an inbound read message
    fn handle_read(&mut self, msg: Rin) -> Result<(), Self::Error>;

    /// Polls the next read output
    fn poll_read(&mut self) -> Option<Self::Rout>;

    /// Handles an outbound write request
    fn handle_write(&mut self, msg: Win) -> Result<(), Self::Error>;

    /// Polls the next write output (a packet to put on the wire)
    fn poll_write(&mut self) -> Option<Self::Wout>;

    /// Handles an external event
    fn handle_event(&mut self, evt: Ein) -> Result<(), Self::Error>;

    /// Polls the next event output
    fn poll_event(&mut self) -> Option<Self::Eout>;

    /// Handles a timeout; called when the deadline from [`poll_timeout`](Protocol::poll_timeout) is reached
    fn handle_timeout(&mut self, now: Self::Time) -> Result<(), Self::Error>;

    /// Polls the next timeout deadline, if any work is pending
    fn poll_timeout(&mut self) -> Option<Self::Time>;

    /// Closes the protocol endpoint and clears all pending state
    fn close(&mut self) -> Result<(), Self::Error>;
}
