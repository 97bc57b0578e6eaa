use std::io;

use thiserror::Error;

/// Errors surfaced by the TCU engine.
///
/// Protocol-level corruption (`ChecksumFail`) is recovered locally via
///  NACK/retransmit and normally never reaches the caller; liveness failures
///  surface as [`PeerSilent`](TcuError::PeerSilent) /
///  [`AckTimeout`](TcuError::AckTimeout) together with a phase transition to
///  HOLDOFF. File IO problems are reported at the command boundary and leave
///  the connection untouched.
#[derive(Debug, Error)]
pub enum TcuError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("checksum mismatch in fragment {seq}")]
    ChecksumFail { seq: u32 },

    /// operation is not valid in the current phase; the message is
    ///  user-facing ("connection not established", "already active connection")
    #[error("{0}")]
    WrongPhase(&'static str),

    #[error("destination node down")]
    PeerSilent,

    #[error("no window acknowledgment from destination node")]
    AckTimeout,

    #[error("destination node not set")]
    NoPeer,

    #[error("node port not set")]
    NotBound,

    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("error file opening/reading: {0}")]
    FileIo(#[source] io::Error),

    #[error("invalid path")]
    InvalidPath,
}
