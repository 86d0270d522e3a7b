//! Poll engine (spec.md §4.6): an insertion-ordered, round-robin
//! subscription set with at most one request outstanding at a time.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::event::Callback;

/// The registered subscription set plus the round-robin cursor.
#[derive(Default)]
pub struct PollSet {
    names: IndexSet<String>,
    callbacks: HashMap<String, Callback>,
    cursor: usize,
    in_flight: bool,
}

impl PollSet {
    pub fn new() -> Self {
        PollSet::default()
    }

    /// Append `name` if absent (idempotent by name, spec.md §8). A
    /// repeat registration may still update the stored callback; it
    /// never changes membership, order, or the cursor.
    pub fn register(&mut self, name: String, callback: Option<Callback>) {
        if !self.names.contains(&name) {
            self.names.insert(name.clone());
        }
        if let Some(cb) = callback {
            self.callbacks.insert(name, cb);
        }
    }

    /// Remove `name`. If it was the current cursor position, the cursor
    /// wraps to stay within bounds.
    pub fn deregister(&mut self, name: &str) {
        if let Some(idx) = self.names.get_index_of(name) {
            self.names.shift_remove_index(idx);
            self.callbacks.remove(name);
            if self.names.is_empty() {
                self.cursor = 0;
            } else {
                self.cursor %= self.names.len();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, value: bool) {
        self.in_flight = value;
    }

    /// The name at the current cursor position, if any subscriptions
    /// exist.
    pub fn current(&self) -> Option<&str> {
        self.names.get_index(self.cursor).map(String::as_str)
    }

    /// Advance the cursor, wrapping at the end of the set.
    pub fn advance(&mut self) {
        if !self.names.is_empty() {
            self.cursor = (self.cursor + 1) % self.names.len();
        }
    }

    pub fn callback_for(&mut self, name: &str) -> Option<&mut Callback> {
        self.callbacks.get_mut(name)
    }

    /// Drop every subscription and reset the cursor, as `close()` requires.
    pub fn clear(&mut self) {
        self.names.clear();
        self.callbacks.clear();
        self.cursor = 0;
        self.in_flight = false;
    }
}
