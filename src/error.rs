//! Error taxonomy for the connect protocol engine.
//!
//! See spec.md §7. Transport-level failures are recovered locally by the
//! engine when reconnect is enabled and never reach the embedder as
//! `Err` values — only the caller-facing variants here are ever returned
//! from [`crate::Client`] methods.

use crate::wire::WireType;

/// Errors surfaced by the connect engine and its public handle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No UDP broadcast arrived from a simulator before the discovery
    /// deadline elapsed.
    #[error("discovery timed out waiting for a simulator broadcast")]
    DiscoveryTimeout,

    /// The manifest connection failed, timed out, or produced text that
    /// could not be parsed into a catalog.
    #[error("manifest exchange failed: {0}")]
    ManifestError(String),

    /// A long-lived session's socket failed and reconnect is disabled.
    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    /// A read timeout elapsed on a long-lived session.
    #[error("read timed out")]
    Timeout,

    /// The embedder named a manifest entry that does not exist.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// `set` was called with a value incompatible with the manifest's
    /// declared wire type for that name.
    #[error("type mismatch for {name}: manifest declares {expected:?}")]
    TypeMismatch {
        /// The manifest name the caller tried to set.
        name: String,
        /// The wire type the manifest declares for that name.
        expected: WireType,
    },

    /// `get`/`set`/`run`/poll registration was attempted before `ready`
    /// or after `close`.
    #[error("not connected")]
    NotConnected,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
