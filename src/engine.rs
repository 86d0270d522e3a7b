//! The single-threaded executor (spec.md §5): one dedicated thread owns
//! every piece of mutable protocol state — the manifest, the state
//! cache, both long-lived sessions, the request queue, the poll set,
//! and the listener registry. Every other thread (a reader thread per
//! session, a ticker) only ever pushes an [`EngineMsg`] onto the one
//! channel this thread drains; nothing outside this module ever touches
//! `Manifest`/`StateCache`/`Session` directly.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::StateCache;
use crate::config::{Config, COMMAND_PORT};
use crate::demux;
use crate::discovery;
use crate::error::{Error, Result};
use crate::event::{CallbackData, Callback, Event, EventKind, Listener, Msg};
use crate::manifest::{self, EntryKind, Manifest, ManifestEntry};
use crate::poll::PollSet;
use crate::queue::RequestQueue;
use crate::session::{Session, SessionIo, SessionTag};
use crate::wire::{self, Value};

/// Fallback window to wait for a discovery broadcast when `Config::host`
/// isn't set. No direct manifest-settable knob in spec.md; chosen to
/// match the manifest loader's own default timeout order of magnitude.
const DISCOVERY_DEADLINE: Duration = Duration::from_secs(5);

/// How often the ticker drives the poll-throttle / round-robin check.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Backoff between reconnect attempts for a dropped long-lived session.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Log through the `log` facade only when `Config::log_enabled` says to
/// bother formatting the message at all.
macro_rules! elog {
    ($enabled:expr, $lvl:ident, $($arg:tt)+) => {
        if $enabled {
            log::$lvl!($($arg)+);
        }
    };
}

/// Coarse lifecycle state, readable via [`crate::Client::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    LoadingManifest,
    Connecting,
    Ready,
    Closed,
}

/// Everything sent from a [`crate::Client`] handle to the engine thread.
pub enum ClientCommand {
    Get {
        name: String,
        callback: Option<Callback>,
        reply: Sender<Result<()>>,
    },
    Set {
        name: String,
        value: Value,
        reply: Sender<Result<()>>,
    },
    Run {
        name: String,
        args: Vec<(String, String)>,
        reply: Sender<Result<()>>,
    },
    PollRegister {
        name: String,
        callback: Option<Callback>,
        reply: Sender<Result<()>>,
    },
    PollDeregister {
        name: String,
        reply: Sender<()>,
    },
    RegisterListener {
        kind: EventKind,
        listener: Listener,
        reply: Sender<()>,
    },
    State {
        reply: Sender<Phase>,
    },
    Manifest {
        reply: Sender<Manifest>,
    },
    Close {
        reply: Sender<()>,
    },
}

/// The one channel every producer thread feeds and only the engine
/// thread drains.
pub enum EngineMsg {
    Io(SessionIo),
    Command(ClientCommand),
    Tick,
    Reconnected(SessionTag, Box<Session>),
}

/// Why a long-lived session is being torn down, so `handle_session_down`
/// can log and (when reconnect is disabled) report the right message.
enum SessionDownReason {
    Closed,
    Error(std::io::Error),
    TimedOut,
}

/// Spawn the engine thread. Discovery, the manifest fetch, and the two
/// session connects all happen on that thread before `on_ready` fires;
/// the caller gets back a live channel immediately so it can already
/// queue commands (they'll simply wait in `RequestQueue` until ready).
pub fn spawn(
    config: Config,
    on_ready: impl FnOnce(Result<()>) + Send + 'static,
) -> (Sender<EngineMsg>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let engine_tx = tx.clone();
    let handle = thread::spawn(move || {
        let mut engine = Engine::new(config, engine_tx);
        let startup = engine.start_up();
        let ok = startup.is_ok();
        on_ready(startup);
        if ok {
            engine.run(rx);
        }
    });
    (tx, handle)
}

fn connect_session(
    tag: SessionTag,
    addr: SocketAddr,
    timeout: Duration,
    keep_alive: bool,
    tx: Sender<EngineMsg>,
) -> std::io::Result<Session> {
    let (raw_tx, raw_rx) = mpsc::channel::<SessionIo>();
    let session = Session::connect(tag, addr, timeout, keep_alive, raw_tx)?;
    thread::spawn(move || {
        while let Ok(event) = raw_rx.recv() {
            if tx.send(EngineMsg::Io(event)).is_err() {
                return;
            }
        }
    });
    Ok(session)
}

struct Engine {
    config: Config,
    tx: Sender<EngineMsg>,
    phase: Phase,
    addr: SocketAddr,
    manifest: Manifest,
    cache: StateCache,
    command_session: Option<Session>,
    poll_session: Option<Session>,
    queue: RequestQueue,
    in_flight_gets: HashMap<i32, VecDeque<Option<Callback>>>,
    poll_set: PollSet,
    listeners: HashMap<EventKind, Vec<Listener>>,
    next_poll_allowed: Instant,
}

impl Engine {
    fn new(config: Config, tx: Sender<EngineMsg>) -> Self {
        Engine {
            config,
            tx,
            phase: Phase::Discovering,
            addr: SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), COMMAND_PORT),
            manifest: Manifest::default(),
            cache: StateCache::new(),
            command_session: None,
            poll_session: None,
            queue: RequestQueue::new(),
            in_flight_gets: HashMap::new(),
            poll_set: PollSet::new(),
            listeners: HashMap::new(),
            next_poll_allowed: Instant::now(),
        }
    }

    /// Discovery -> manifest -> both session connects, in order,
    /// blocking this thread since nothing else depends on it yet.
    fn start_up(&mut self) -> Result<()> {
        self.phase = Phase::Discovering;
        let ip = match &self.config.host {
            Some(host) => host
                .parse()
                .map_err(|_| Error::ManifestError(format!("invalid host {host:?}")))?,
            None => {
                elog!(self.config.log_enabled, info, "engine: waiting for a discovery broadcast");
                discovery::discover(DISCOVERY_DEADLINE)?
            }
        };
        let port = self.config.port.unwrap_or(COMMAND_PORT);
        self.addr = SocketAddr::new(IpAddr::V4(ip), port);
        elog!(self.config.log_enabled, info, "engine: target simulator at {}", self.addr);

        self.phase = Phase::LoadingManifest;
        self.manifest = manifest::load(self.addr, self.config.manifest_timeout)?;
        elog!(self.config.log_enabled, info, "engine: loaded manifest with {} entries", self.manifest.len());

        self.phase = Phase::Connecting;
        self.command_session = Some(connect_session(
            SessionTag::Command,
            self.addr,
            self.config.timeout,
            self.config.keep_alive,
            self.tx.clone(),
        )?);
        self.poll_session = Some(connect_session(
            SessionTag::Poll,
            self.addr,
            self.config.timeout,
            self.config.keep_alive,
            self.tx.clone(),
        )?);

        self.phase = Phase::Ready;
        self.spawn_ticker();
        self.emit(Event::Manifest {
            entry_count: self.manifest.len(),
        });
        self.emit(Event::Msg(Msg::Ready));
        Ok(())
    }

    fn spawn_ticker(&self) {
        let tx = self.tx.clone();
        thread::spawn(move || loop {
            thread::sleep(TICK_INTERVAL);
            if tx.send(EngineMsg::Tick).is_err() {
                return;
            }
        });
    }

    /// Steady-state event loop. Returns once `Close` is handled or a
    /// terminal transport error occurs with reconnect disabled.
    fn run(&mut self, rx: Receiver<EngineMsg>) {
        for msg in rx.iter() {
            match msg {
                EngineMsg::Io(io) => self.handle_io(io),
                EngineMsg::Command(cmd) => {
                    if self.handle_command(cmd) {
                        return;
                    }
                }
                EngineMsg::Tick => self.handle_tick(),
                EngineMsg::Reconnected(tag, session) => self.handle_reconnected(tag, *session),
            }
        }
    }

    fn handle_io(&mut self, io: SessionIo) {
        match io {
            SessionIo::Data(tag, bytes) => {
                let session = match tag {
                    SessionTag::Command => self.command_session.as_mut(),
                    SessionTag::Poll => self.poll_session.as_mut(),
                };
                let mut delivered = Vec::new();
                if let Some(session) = session {
                    demux::feed(session, &bytes, &self.manifest, &mut self.cache, |entry, value| {
                        delivered.push((entry.clone(), value));
                    });
                }
                for (entry, value) in delivered {
                    self.route(tag, &entry, value);
                }
            }
            SessionIo::Timeout(tag) => {
                self.emit(Event::Msg(Msg::Timeout { session: tag }));
                // spec.md §5/§7: a read timeout on a long-lived session
                // reconnects when `reconnect_enabled`. Unlike a socket
                // error or peer close, a bare timeout doesn't retire the
                // instance when reconnect is disabled — the session is
                // still open, it simply hasn't heard back yet.
                if self.config.reconnect_enabled {
                    self.handle_session_down(tag, SessionDownReason::TimedOut);
                }
            }
            SessionIo::Closed(tag) => self.handle_session_down(tag, SessionDownReason::Closed),
            SessionIo::Error(tag, e) => self.handle_session_down(tag, SessionDownReason::Error(e)),
        }
    }

    fn handle_session_down(&mut self, tag: SessionTag, reason: SessionDownReason) {
        match &reason {
            SessionDownReason::Error(e) => {
                elog!(self.config.log_enabled, warn, "engine: {:?} session error: {}", tag, e);
            }
            SessionDownReason::Closed => {
                elog!(self.config.log_enabled, warn, "engine: {:?} session closed by peer", tag);
            }
            SessionDownReason::TimedOut => {
                elog!(self.config.log_enabled, warn, "engine: {:?} session timed out, reconnecting", tag);
            }
        }
        match tag {
            SessionTag::Command => self.command_session = None,
            SessionTag::Poll => self.poll_session = None,
        }
        if !self.config.reconnect_enabled {
            self.phase = Phase::Closed;
            let message = match reason {
                SessionDownReason::Error(e) => e.to_string(),
                SessionDownReason::Closed => "connection closed".to_string(),
                SessionDownReason::TimedOut => "read timed out".to_string(),
            };
            self.emit(Event::Msg(Msg::Error(message)));
            return;
        }
        self.emit(Event::Msg(Msg::Reconnecting { session: tag }));
        let addr = self.addr;
        let timeout = self.config.timeout;
        let keep_alive = self.config.keep_alive;
        let log_enabled = self.config.log_enabled;
        let tx = self.tx.clone();
        thread::spawn(move || loop {
            match connect_session(tag, addr, timeout, keep_alive, tx.clone()) {
                Ok(session) => {
                    let _ = tx.send(EngineMsg::Reconnected(tag, Box::new(session)));
                    return;
                }
                Err(e) => {
                    elog!(log_enabled, warn, "engine: reconnect attempt for {:?} failed: {}", tag, e);
                    thread::sleep(RECONNECT_BACKOFF);
                }
            }
        });
    }

    fn handle_reconnected(&mut self, tag: SessionTag, session: Session) {
        elog!(self.config.log_enabled, info, "engine: {:?} session reconnected", tag);
        match tag {
            SessionTag::Command => {
                self.command_session = Some(session);
                self.in_flight_gets.clear();
                self.dispatch_next_get();
            }
            SessionTag::Poll => {
                self.poll_session = Some(session);
                self.poll_set.set_in_flight(false);
                self.dispatch_next_poll();
            }
        }
        self.emit(Event::Msg(Msg::Reconnected { session: tag }));
    }

    /// Returns `true` if the engine should stop running (a `Close` was
    /// handled).
    fn handle_command(&mut self, cmd: ClientCommand) -> bool {
        match cmd {
            ClientCommand::Get { name, callback, reply } => {
                let result = self.handle_get(name, callback);
                let _ = reply.send(result);
            }
            ClientCommand::Set { name, value, reply } => {
                let result = self.handle_set(&name, value);
                let _ = reply.send(result);
            }
            ClientCommand::Run { name, args, reply } => {
                let result = self.handle_run(&name, args);
                let _ = reply.send(result);
            }
            ClientCommand::PollRegister { name, callback, reply } => {
                let result = self.handle_poll_register(name, callback);
                let _ = reply.send(result);
            }
            ClientCommand::PollDeregister { name, reply } => {
                self.poll_set.deregister(&name);
                let _ = reply.send(());
            }
            ClientCommand::RegisterListener { kind, listener, reply } => {
                self.listeners.entry(kind).or_default().push(listener);
                let _ = reply.send(());
            }
            ClientCommand::State { reply } => {
                let _ = reply.send(self.phase);
            }
            ClientCommand::Manifest { reply } => {
                let _ = reply.send(self.manifest.clone());
            }
            ClientCommand::Close { reply } => {
                self.teardown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.phase == Phase::Ready {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn scalar_entry(&self, name: &str) -> Result<ManifestEntry> {
        let entry = self
            .manifest
            .entry_by_name(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        match entry.kind {
            EntryKind::Scalar(_) => Ok(entry.clone()),
            EntryKind::Invokable => Err(Error::UnknownCommand(format!(
                "{name} is an invokable command, not a readable/writable value"
            ))),
        }
    }

    fn invokable_entry(&self, name: &str) -> Result<ManifestEntry> {
        let entry = self
            .manifest
            .entry_by_name(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        match entry.kind {
            EntryKind::Invokable => Ok(entry.clone()),
            EntryKind::Scalar(_) => Err(Error::UnknownCommand(format!(
                "{name} is a value, not an invokable command"
            ))),
        }
    }

    fn handle_get(&mut self, name: String, callback: Option<Callback>) -> Result<()> {
        self.ensure_ready()?;
        self.scalar_entry(&name)?;
        self.queue.push(name, callback);
        self.dispatch_next_get();
        Ok(())
    }

    fn dispatch_next_get(&mut self) {
        let Some(session) = self.command_session.as_mut() else {
            return;
        };
        if session.has_outstanding() {
            return;
        }
        let Some(pending) = self.queue.pop() else {
            return;
        };
        let Some(entry) = self.manifest.entry_by_name(&pending.name) else {
            elog!(self.config.log_enabled, warn, "engine: queued get for {:?} vanished from manifest", pending.name);
            return;
        };
        let command_id = entry.command_id;
        let request = wire::encode_read_request(command_id);
        if let Err(e) = session.write_request(&request) {
            elog!(self.config.log_enabled, warn, "engine: failed to write get request for {:?}: {}", pending.name, e);
            return;
        }
        session.wait_list.push_back(command_id);
        self.in_flight_gets
            .entry(command_id)
            .or_default()
            .push_back(pending.callback);
    }

    fn handle_set(&mut self, name: &str, value: Value) -> Result<()> {
        self.ensure_ready()?;
        let entry = self.scalar_entry(name)?;
        let EntryKind::Scalar(expected) = entry.kind else {
            unreachable!("scalar_entry only returns Scalar entries")
        };
        if value.wire_type() != expected {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected,
            });
        }
        let session = self.command_session.as_mut().ok_or(Error::NotConnected)?;
        let request = wire::encode_write_request(entry.command_id, &value);
        session.write_request(&request)?;
        Ok(())
    }

    fn handle_run(&mut self, name: &str, args: Vec<(String, String)>) -> Result<()> {
        self.ensure_ready()?;
        let entry = self.invokable_entry(name)?;
        let session = self.command_session.as_mut().ok_or(Error::NotConnected)?;
        let request = wire::encode_invoke_request(entry.command_id, &args);
        session.write_request(&request)?;
        Ok(())
    }

    fn handle_poll_register(&mut self, name: String, callback: Option<Callback>) -> Result<()> {
        self.ensure_ready()?;
        self.scalar_entry(&name)?;
        self.poll_set.register(name, callback);
        self.dispatch_next_poll();
        Ok(())
    }

    /// The 250 ms ticker's only job now: a backstop that catches cases
    /// dispatch_next_poll()'s other callers don't cover directly (the
    /// throttle timer firing late, or a `poll_register` racing a fully
    /// idle poll session). Steady-state cadence comes from
    /// `dispatch_next_poll` being called directly out of `route` (spec.md
    /// §4.6's "dispatches immediately on demultiplex completion" when
    /// `poll_throttle` is zero) and from the throttle timer (non-zero).
    fn handle_tick(&mut self) {
        self.dispatch_next_poll();
    }

    /// Write the next round-robin poll request if one is due: not
    /// already in flight, the throttle window has elapsed, and the poll
    /// session has no outstanding response.
    fn dispatch_next_poll(&mut self) {
        if self.phase != Phase::Ready || self.poll_set.is_empty() || self.poll_set.in_flight() {
            return;
        }
        if Instant::now() < self.next_poll_allowed {
            return;
        }
        let Some(name) = self.poll_set.current().map(str::to_string) else {
            return;
        };
        let Some(entry) = self.manifest.entry_by_name(&name) else {
            elog!(self.config.log_enabled, warn, "engine: polled name {name:?} vanished from manifest, skipping");
            self.poll_set.advance();
            return;
        };
        let command_id = entry.command_id;
        let Some(session) = self.poll_session.as_mut() else {
            return;
        };
        if session.has_outstanding() {
            return;
        }
        let request = wire::encode_read_request(command_id);
        if let Err(e) = session.write_request(&request) {
            elog!(self.config.log_enabled, warn, "engine: failed to write poll request for {name:?}: {}", e);
            return;
        }
        session.wait_list.push_back(command_id);
        self.poll_set.set_in_flight(true);
    }

    /// Schedule the next poll dispatch per spec.md §4.6's throttle:
    /// immediately (on this same call stack) when `poll_throttle` is
    /// zero, or after a dedicated one-shot timer when it's positive,
    /// rather than waiting on the 250 ms ticker either way.
    fn schedule_next_poll(&mut self) {
        if self.config.poll_throttle.is_zero() {
            self.dispatch_next_poll();
            return;
        }
        let tx = self.tx.clone();
        let delay = self.config.poll_throttle;
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = tx.send(EngineMsg::Tick);
        });
    }

    fn route(&mut self, tag: SessionTag, entry: &ManifestEntry, value: Value) {
        let data = CallbackData {
            command: entry.name.clone(),
            data: value,
        };
        match tag {
            SessionTag::Command => {
                let callback = self
                    .in_flight_gets
                    .get_mut(&entry.command_id)
                    .and_then(VecDeque::pop_front);
                match callback {
                    Some(Some(mut cb)) => cb(data),
                    Some(None) | None => self.emit(Event::Data(data)),
                }
                self.dispatch_next_get();
            }
            SessionTag::Poll => {
                self.poll_set.set_in_flight(false);
                let delivered = if let Some(cb) = self.poll_set.callback_for(&entry.name) {
                    cb(data.clone());
                    true
                } else {
                    false
                };
                if !delivered {
                    self.emit(Event::Data(data));
                }
                self.poll_set.advance();
                self.next_poll_allowed = Instant::now() + self.config.poll_throttle;
                self.schedule_next_poll();
            }
        }
    }

    fn emit(&mut self, event: Event) {
        let kind = match &event {
            Event::Manifest { .. } => EventKind::Manifest,
            Event::Data(_) => EventKind::Data,
            Event::Msg(_) => EventKind::Msg,
        };
        if let Some(listeners) = self.listeners.get_mut(&kind) {
            for listener in listeners.iter_mut() {
                listener(event.clone());
            }
        }
    }

    /// Tear down both sessions and reset every piece of protocol state
    /// to empty, per spec.md §8: "After close(), manifest indices, wait
    /// lists, queues, and state cache are empty."
    fn teardown(&mut self) {
        if let Some(mut session) = self.command_session.take() {
            session.reset();
        }
        if let Some(mut session) = self.poll_session.take() {
            session.reset();
        }
        self.manifest = Manifest::default();
        self.cache.clear();
        self.queue.clear();
        self.in_flight_gets.clear();
        self.poll_set.clear();
        self.phase = Phase::Closed;
        self.emit(Event::Msg(Msg::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest_text;

    #[test]
    fn teardown_empties_manifest_queue_cache_and_poll_set() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = Engine::new(Config::default(), tx);
        engine.manifest = parse_manifest_text("1,2,aircraft/0/alt\n");
        engine.cache.update("aircraft/0/alt", Value::Float(1.0));
        engine.queue.push("aircraft/0/alt".to_string(), None);
        engine.poll_set.register("aircraft/0/alt".to_string(), None);
        engine.in_flight_gets.insert(1, VecDeque::from([None]));
        engine.phase = Phase::Ready;

        engine.teardown();

        assert!(engine.manifest.is_empty());
        assert!(engine.cache.is_empty());
        assert!(engine.queue.is_empty());
        assert!(engine.poll_set.is_empty());
        assert!(engine.in_flight_gets.is_empty());
        assert_eq!(engine.phase, Phase::Closed);
    }
}
