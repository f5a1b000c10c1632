//! In-memory backlog of entities queued for reindexing outside the event log.
//!
//! The backlog has two exclusive modes. While accepting, producers may add
//! entries, each distinct (type, id, action) at most once. The first
//! `remove_next` switches to draining, during which adds are rejected; the
//! backlog returns to accepting once it has been emptied.
//!
//! All state sits behind one mutex. Nothing is persisted.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use fts_types::{Action, LogRecord};

/// One queued reindex request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BacklogEntry {
    pub entity_type: String,
    pub entity_id: u64,
    pub action: Action,
}

impl BacklogEntry {
    pub fn new(entity_type: impl Into<String>, entity_id: u64, action: Action) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            action,
        }
    }

    /// Synthetic log record for this entry. It has no log position.
    pub fn to_record(&self) -> LogRecord {
        LogRecord::new(0, self.entity_type.clone(), self.entity_id, self.action.clone())
    }
}

#[derive(Default)]
struct BacklogState {
    queue: VecDeque<BacklogEntry>,
    pending: HashSet<BacklogEntry>,
    draining: bool,
}

/// Counters describing backlog traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BacklogStats {
    pub pending: usize,
    pub draining: bool,
    pub accepted: u64,
    pub rejected: u64,
}

/// Deduplicating reindex queue shared between producers and the indexer.
#[derive(Default)]
pub struct Backlog {
    state: Mutex<BacklogState>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BacklogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an entry. Returns false if the backlog is draining or an equal
    /// entry is already pending.
    pub fn add(&self, entry: BacklogEntry) -> bool {
        let mut state = self.lock();

        if state.draining {
            info!(
                entity_type = %entry.entity_type,
                entity_id = entry.entity_id,
                "Backlog is draining, entry rejected"
            );
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if !state.pending.insert(entry.clone()) {
            debug!(
                entity_type = %entry.entity_type,
                entity_id = entry.entity_id,
                action = %entry.action,
                "Duplicate backlog entry rejected"
            );
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        state.queue.push_back(entry);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Take the oldest entry, switching to draining mode. Emptying the
    /// backlog switches back to accepting.
    pub fn remove_next(&self) -> Option<BacklogEntry> {
        let mut state = self.lock();
        state.draining = true;

        let next = state.queue.pop_front();
        if let Some(entry) = &next {
            state.pending.remove(entry);
        }
        if state.queue.is_empty() {
            state.draining = false;
        }
        next
    }

    /// Remove every pending entry in order.
    pub fn drain(&self) -> Vec<BacklogEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.remove_next() {
            entries.push(entry);
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    pub fn stats(&self) -> BacklogStats {
        let state = self.lock();
        BacklogStats {
            pending: state.queue.len(),
            draining: state.draining,
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
