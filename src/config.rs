//! Typed configuration, replacing the reference implementation's
//! constructor-argument grab bag (spec.md §6, §9).

use std::time::Duration;

/// Configuration accepted by [`crate::Client::init`].
///
/// All fields are optional in the sense that [`Config::default`]
/// reproduces the reference implementation's defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Skip discovery and connect directly to this host.
    pub host: Option<String>,
    /// Port to use with `host`. Defaults to the protocol's fixed
    /// command/poll/manifest port (10112) when `host` is set and this
    /// is `None`.
    pub port: Option<u16>,
    /// Enable TCP keepalive on both long-lived sessions.
    pub keep_alive: bool,
    /// Reconnect a long-lived session on socket error instead of
    /// terminating the engine.
    pub reconnect_enabled: bool,
    /// Read timeout applied to the command and poll sessions.
    /// `Duration::ZERO` means no timeout, matching spec.md's `0 = none`.
    pub timeout: Duration,
    /// Read timeout applied to the manifest loader's short-lived
    /// connection.
    pub manifest_timeout: Duration,
    /// Minimum delay between dispatching consecutive poll requests.
    pub poll_throttle: Duration,
    /// Whether the crate's internal diagnostics call into the `log`
    /// facade at all. The crate never installs a logger itself; this
    /// only gates whether it bothers formatting log messages.
    pub log_enabled: bool,
    /// Suggested filter level for the embedder's own logger
    /// initialization. Purely advisory — see spec.md §6's note that a
    /// library must not configure global logging on its embedder's
    /// behalf.
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: None,
            port: None,
            keep_alive: false,
            reconnect_enabled: true,
            timeout: Duration::ZERO,
            manifest_timeout: Duration::from_millis(1000),
            poll_throttle: Duration::ZERO,
            log_enabled: true,
            log_level: log::LevelFilter::Info,
        }
    }
}

/// Fixed TCP port the command, poll, and manifest connections share.
pub const COMMAND_PORT: u16 = 10112;

/// Fixed UDP port the discovery broadcast arrives on.
pub const DISCOVERY_PORT: u16 = 15000;
