//! Event/callback surface (spec.md §4.8 step 6, §9).
//!
//! Per the "event or callback, not both" redesign flag, every decoded
//! value is delivered through exactly one sink, chosen by the caller at
//! registration time: a per-name [`Callback`] passed to [`crate::Client::get`]
//! / [`crate::Client::poll_register`], or a [`Listener`] registered once
//! via [`crate::Client::on`] for the lifecycle feed. Both are plain
//! `FnMut` trait objects — there's no separate bus type to keep in sync
//! with the engine's state.

use crate::session::SessionTag;
use crate::wire::Value;

/// The value delivered to a per-name callback or a `data` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackData {
    pub command: String,
    pub data: Value,
}

/// A one-shot or per-poll-cycle sink for a single manifest name's
/// decoded value.
pub type Callback = Box<dyn FnMut(CallbackData) + Send + 'static>;

/// A standing subscriber to the lifecycle feed (`on`).
pub type Listener = Box<dyn FnMut(Event) + Send + 'static>;

/// Which lifecycle feed a listener wants to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Manifest,
    Data,
    Msg,
}

/// Something delivered to an `on`-registered listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The manifest finished loading; always precedes `Ready` and any
    /// `Data` event (spec.md §5).
    Manifest { entry_count: usize },
    /// A decoded value for a name that had no per-name callback
    /// registered.
    Data(CallbackData),
    /// A connection lifecycle notification.
    Msg(Msg),
}

/// Lifecycle notifications: connection state transitions and
/// protocol-level problems that don't terminate the instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Ready,
    Closed,
    Reconnecting { session: SessionTag },
    Reconnected { session: SessionTag },
    Timeout { session: SessionTag },
    Error(String),
}
