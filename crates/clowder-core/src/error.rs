use thiserror::Error;

/// The error kinds the sockets and startup path can produce. `spec.md` §7
/// also names `WireError`, `PolicyDrop`, and `StateError` as conceptual
/// kinds, but this codebase realizes those three structurally instead of
/// as enum variants: a malformed packet is `Packet::parse` returning
/// `None`, a policy drop is the responder returning `None`, and a
/// start/stop-in-wrong-state error is the `dhcp_running` guard's `error!`
/// log with no variant constructed — none of the three ever need to be an
/// `Err` a caller matches on.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket I/O failure; the owning loop exits cleanly after logging this.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecoverable startup failure: bad config, unreadable store, unbindable control port.
    #[error("fatal startup error: {0}")]
    FatalInit(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
