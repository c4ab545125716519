// Snapshot diffing between two enumeration passes.

use super::events::WatchEvent;
use crate::error::Result;
use crate::model::PipeSnapshot;
use log::trace;
use std::collections::{HashMap, HashSet};

/// Pipes keyed by name, iterated in the order they were first observed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipeSet {
    order: Vec<String>,
    pipes: HashMap<String, PipeSnapshot>,
}

impl PipeSet {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PipeSnapshot> {
        self.pipes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipeSnapshot> {
        self.order.iter().filter_map(move |name| self.pipes.get(name))
    }

    /// Insert or replace; returns true when the name was not present yet.
    fn upsert(&mut self, pipe: PipeSnapshot) -> bool {
        if let Some(slot) = self.pipes.get_mut(pipe.name()) {
            *slot = pipe;
            return false;
        }
        self.order.push(pipe.name().to_string());
        self.pipes.insert(pipe.name().to_string(), pipe);
        true
    }
}

impl FromIterator<PipeSnapshot> for PipeSet {
    fn from_iter<I: IntoIterator<Item = PipeSnapshot>>(iter: I) -> Self {
        let mut set = PipeSet::default();
        for pipe in iter {
            set.upsert(pipe);
        }
        set
    }
}

/// Result of diffing one pass against the retained set.
#[derive(Debug)]
pub struct DiffOutcome {
    /// Replaces the retained set once the tick commits.
    pub next: PipeSet,
    pub events: Vec<WatchEvent>,
}

/// Diff a fresh enumeration pass against `previous`.
///
/// Created and Updated events follow the order names were first observed in
/// the pass; Deleted events follow, in `previous` order. Repeated names in
/// the pass collapse into one entry holding the last value seen, so a name
/// yields at most one event. A retained name is reported as updated when any
/// of its occurrences differed from the value before it, even if the last
/// one matches the retained value again. Any error from the pass aborts the
/// diff and leaves `previous` as the state to keep.
pub fn diff_pass<I>(previous: &PipeSet, pass: I) -> Result<DiffOutcome>
where
    I: IntoIterator<Item = Result<PipeSnapshot>>,
{
    let mut working = PipeSet::default();
    let mut changed: HashSet<String> = HashSet::new();
    let mut duplicates = 0usize;
    for pipe in pass {
        let pipe = pipe?;
        let before = working.get(pipe.name()).or_else(|| previous.get(pipe.name()));
        if before.is_some_and(|old| *old != pipe) {
            changed.insert(pipe.name().to_string());
        }
        if !working.upsert(pipe) {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        trace!("[WATCHER] Collapsed {} duplicate entries", duplicates);
    }

    let mut events = Vec::new();
    for pipe in working.iter() {
        if !previous.contains(pipe.name()) {
            events.push(WatchEvent::Created(pipe.clone()));
        } else if changed.contains(pipe.name()) {
            events.push(WatchEvent::Updated(pipe.clone()));
        }
    }
    for old in previous.iter() {
        if !working.contains(old.name()) {
            events.push(WatchEvent::Deleted(old.clone()));
        }
    }

    Ok(DiffOutcome {
        next: working,
        events,
    })
}
