//! Client library for the Infinite Flight Connect v2 binary protocol: a
//! length-prefixed, little-endian wire format exposing a simulator's
//! state and commands over two long-lived TCP sessions, with UDP
//! broadcast discovery and a one-shot manifest fetch in front of them.
//!
//! [`Client::init`] drives discovery, the manifest fetch, and both
//! session connects on a dedicated engine thread, then hands back a
//! [`Client`] handle that's safe to call from anywhere. Every decoded
//! value reaches the embedder through exactly one sink — a per-call
//! [`Callback`] or a standing [`Listener`] registered via [`Client::on`]
//! — never both.

mod cache;
mod client;
mod config;
mod demux;
mod discovery;
mod engine;
mod error;
mod event;
mod manifest;
mod poll;
mod queue;
mod session;
mod wire;

pub use client::Client;
pub use config::{Config, COMMAND_PORT, DISCOVERY_PORT};
pub use engine::Phase;
pub use error::{Error, Result};
pub use event::{CallbackData, Callback, Event, EventKind, Listener, Msg};
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use session::SessionTag;
pub use wire::{Value, WireType};
