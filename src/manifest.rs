//! Manifest loader: a short-lived TCP exchange that fetches the typed
//! command catalog once per connection lifecycle (spec.md §4.3).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Error;
use crate::wire::{self, WireType};

/// What kind of thing a manifest entry names: a typed state variable, or
/// a zero-or-more-string-argument invokable command.
///
/// Modeled as a tagged variant rather than the reference implementation's
/// out-of-band sentinel type value (spec.md §9, "Invoke type sentinel").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Scalar(WireType),
    Invokable,
}

/// One row of the manifest: a command id, its kind, and its path-shaped
/// name (e.g. `aircraft/0/name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub command_id: i32,
    pub kind: EntryKind,
    pub name: String,
}

/// The immutable catalog snapshot loaded once per connection lifecycle.
///
/// Invariant: `by_name` and `by_id` are each dense, 1:1 indices into
/// `entries` — every name and every id is unique within a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<i32, usize>,
}

impl Manifest {
    /// Build a manifest from already-parsed entries, dropping (and
    /// logging) any entry whose name or id collides with one already
    /// kept, to preserve the uniqueness invariant.
    fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        let mut manifest = Manifest::default();
        for entry in entries {
            if manifest.by_name.contains_key(&entry.name) {
                log::warn!("manifest: duplicate name {:?}, keeping first", entry.name);
                continue;
            }
            if manifest.by_id.contains_key(&entry.command_id) {
                log::warn!(
                    "manifest: duplicate command id {} ({:?}), keeping first",
                    entry.command_id,
                    entry.name
                );
                continue;
            }
            let idx = manifest.entries.len();
            manifest.by_name.insert(entry.name.clone(), idx);
            manifest.by_id.insert(entry.command_id, idx);
            manifest.entries.push(entry);
        }
        manifest
    }

    /// Look up an entry by its manifest name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ManifestEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Look up an entry by its wire command id.
    pub fn entry_by_id(&self, command_id: i32) -> Option<&ManifestEntry> {
        self.by_id.get(&command_id).map(|&idx| &self.entries[idx])
    }

    /// Iterate over every entry in the catalog.
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Number of entries in the catalog.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries (e.g. a freshly-reset client).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse `command_id,type,name\n`-formatted manifest text into a
/// catalog, splitting each line on at most the first two commas so a
/// name containing a literal comma survives intact (spec.md §9's
/// "Manifest parsing ambiguity" resolution).
pub fn parse_manifest_text(text: &str) -> Manifest {
    let mut entries = Vec::new();
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ',');
        let id_str = match parts.next() {
            Some(s) => s,
            None => continue,
        };
        let command_id: i32 = match id_str.parse() {
            Ok(id) => id,
            Err(_) => {
                log::warn!("manifest: skipping line with non-integer command id: {line:?}");
                continue;
            }
        };
        let type_str = match parts.next() {
            Some(s) => s,
            None => continue,
        };
        let name = match parts.next() {
            Some(s) => s.to_string(),
            None => continue,
        };
        let kind = type_str
            .parse::<i64>()
            .ok()
            .and_then(|t| u8::try_from(t).ok())
            .and_then(|t| WireType::try_from(t).ok())
            .map(EntryKind::Scalar)
            .unwrap_or(EntryKind::Invokable);
        entries.push(ManifestEntry {
            command_id,
            kind,
            name,
        });
    }
    Manifest::from_entries(entries)
}

/// Open a dedicated connection to `addr`, request the manifest, and
/// block until the full catalog text has arrived (or `timeout` elapses).
pub fn load(addr: SocketAddr, timeout: Duration) -> Result<Manifest, Error> {
    let mut stream = TcpStream::connect(addr)
        .map_err(|e| Error::ManifestError(format!("connecting to {addr}: {e}")))?;
    stream
        .set_read_timeout(if timeout.is_zero() { None } else { Some(timeout) })
        .map_err(|e| Error::ManifestError(format!("setting read timeout: {e}")))?;
    stream
        .write_all(&wire::encode_manifest_request())
        .map_err(|e| Error::ManifestError(format!("sending manifest request: {e}")))?;

    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        if buf.len() >= 8 {
            if let Ok(header) = wire::peek_header(&buf) {
                if header.command_id == wire::MANIFEST_COMMAND_ID && wire::is_complete(&buf, &header)
                {
                    let payload = &buf[8..header.frame_len()];
                    let text = wire::decode_string(payload)
                        .map_err(|e| Error::ManifestError(format!("malformed manifest text: {e}")))?;
                    return Ok(parse_manifest_text(&text));
                }
            }
        }
        let n = stream.read(&mut chunk).map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) {
                Error::ManifestError("timed out waiting for manifest".to_string())
            } else {
                Error::ManifestError(e.to_string())
            }
        })?;
        if n == 0 {
            return Err(Error::ManifestError(
                "peer closed connection before full manifest arrived".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
