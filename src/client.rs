//! Public embedder-facing handle: a thin owner of a channel to the
//! engine thread plus its `JoinHandle`. Every method here is a
//! synchronous round trip for validation only — the actual decoded
//! values always arrive later through a [`Callback`] or a registered
//! [`Listener`].

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::engine::{self, ClientCommand, EngineMsg, Phase};
use crate::error::{Error, Result};
use crate::event::{Callback, EventKind, Listener};
use crate::manifest::Manifest;
use crate::wire::Value;

/// A connected (or connecting) Infinite Flight Connect v2 client.
///
/// Dropping a `Client` does not close its engine thread; call
/// [`Client::close`] explicitly, matching spec.md §5's "no implicit
/// teardown on drop" choice.
pub struct Client {
    tx: Sender<EngineMsg>,
    handle: Option<JoinHandle<()>>,
}

impl Client {
    /// Spawn the engine thread and begin discovery/manifest/connect.
    /// `on_ready` fires exactly once, from the engine thread, with the
    /// outcome of that startup sequence.
    pub fn init(config: Config, on_ready: impl FnOnce(Result<()>) + Send + 'static) -> Client {
        let (tx, handle) = engine::spawn(config, on_ready);
        Client {
            tx,
            handle: Some(handle),
        }
    }

    fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx
            .send(EngineMsg::Command(command))
            .map_err(|_| Error::NotConnected)
    }

    fn round_trip<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> ClientCommand) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(build(reply_tx))?;
        reply_rx.recv().map_err(|_| Error::NotConnected)?
    }

    /// Queue a one-shot read of `name`. The manifest name must exist and
    /// must not be invokable. If `callback` is `None`, the decoded value
    /// is delivered as a `data` event to any registered `Data` listener
    /// instead (spec.md §9's "event or callback, not both").
    pub fn get(&self, name: impl Into<String>, callback: Option<Callback>) -> Result<()> {
        self.round_trip(|reply| ClientCommand::Get {
            name: name.into(),
            callback,
            reply,
        })
    }

    /// Write `value` to `name`. No response is expected on the wire;
    /// this call only reports synchronous validation failures (unknown
    /// name, wrong type, not connected).
    pub fn set(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.round_trip(|reply| ClientCommand::Set {
            name: name.into(),
            value,
            reply,
        })
    }

    /// Invoke `name` with the given string-keyed arguments. `name` must
    /// be an invokable manifest entry.
    pub fn run(&self, name: impl Into<String>, args: Vec<(String, String)>) -> Result<()> {
        self.round_trip(|reply| ClientCommand::Run {
            name: name.into(),
            args,
            reply,
        })
    }

    /// Add `name` to the round-robin poll set. Registration is
    /// idempotent by name (spec.md §8); a repeat call may still replace
    /// the stored callback.
    pub fn poll_register(&self, name: impl Into<String>, callback: Option<Callback>) -> Result<()> {
        self.round_trip(|reply| ClientCommand::PollRegister {
            name: name.into(),
            callback,
            reply,
        })
    }

    /// Remove `name` from the poll set. A no-op if it wasn't registered.
    pub fn poll_deregister(&self, name: impl Into<String>) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .send(ClientCommand::PollDeregister {
                name: name.into(),
                reply: reply_tx,
            })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
    }

    /// Register a standing listener for `kind`'s lifecycle/data feed.
    /// Multiple listeners for the same kind are all invoked, in
    /// registration order.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .send(ClientCommand::RegisterListener {
                kind,
                listener,
                reply: reply_tx,
            })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
    }

    /// The engine's current lifecycle phase. Supplemental surface kept
    /// from the reference implementation's connection-status query.
    pub fn state(&self) -> Phase {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .send(ClientCommand::State { reply: reply_tx })
            .is_err()
        {
            return Phase::Closed;
        }
        reply_rx.recv().unwrap_or(Phase::Closed)
    }

    /// A clone of the currently loaded manifest snapshot, so an
    /// embedder can enumerate the catalog (spec.md §9 supplemental
    /// surface). Empty before `ready` and after `close`.
    pub fn manifest(&self) -> Manifest {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .send(ClientCommand::Manifest { reply: reply_tx })
            .is_err()
        {
            return Manifest::default();
        }
        reply_rx.recv().unwrap_or_default()
    }

    /// Tear down both sessions and stop the engine thread, then join it.
    /// `on_closed` fires once the engine has finished tearing down.
    pub fn close(mut self, on_closed: impl FnOnce() + Send + 'static) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .send(ClientCommand::Close { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        on_closed();
    }
}
