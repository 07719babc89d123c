//! Bounded, newest-first status history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kinds::Timestamped;

/// History depth used when no explicit size is configured.
pub const DEFAULT_MAX_STATUS_LIST_SIZE: usize = 15;

/// How an externally supplied status list is reconciled with the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMethod {
    /// Drop the current history and use the supplied entries.
    ReplaceAll,
    /// Merge; supplied entries win on equal timestamps.
    MergePrepend,
    /// Merge; existing entries win on equal timestamps.
    MergeAppend,
}

/// Emitted when the current value of a schedule changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange<S> {
    pub timestamp: DateTime<Utc>,
    pub old: Timestamped<S>,
    pub new: Timestamped<S>,
}

/// Ordered `(timestamp, value)` history of one status value. Never empty,
/// never longer than `max_len`, head is the current value.
#[derive(Debug, Clone)]
pub struct StatusSchedule<S> {
    entries: VecDeque<Timestamped<S>>,
    max_len: usize,
}

impl<S> StatusSchedule<S>
where
    S: Copy + PartialEq,
{
    pub fn new(max_len: usize, initial: Timestamped<S>) -> Self {
        let max_len = max_len.max(1);
        let mut entries = VecDeque::with_capacity(max_len);
        entries.push_front(initial);
        Self { entries, max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Current (most recent) value.
    pub fn current(&self) -> Timestamped<S> {
        // `entries` is never empty, see `new` and `merge`.
        self.entries[0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `n` most recent entries, newest first.
    pub fn history(&self, n: usize) -> Vec<Timestamped<S>> {
        self.entries.iter().take(n).copied().collect()
    }

    /// Record `value` at `timestamp`. Returns the change iff the current
    /// value changed. Identical values are ignored; entries older than the
    /// head are filed into history without touching the current value.
    pub fn insert(&mut self, timestamp: DateTime<Utc>, value: S) -> Option<StatusChange<S>> {
        let head = self.current();

        if timestamp < head.timestamp {
            let position = self
                .entries
                .iter()
                .position(|e| e.timestamp <= timestamp)
                .unwrap_or(self.entries.len());
            if self
                .entries
                .get(position)
                .is_some_and(|e| e.timestamp == timestamp && e.value == value)
            {
                return None;
            }
            self.entries.insert(position, Timestamped::new(timestamp, value));
            self.entries.truncate(self.max_len);
            return None;
        }

        if head.value == value {
            return None;
        }

        let new = Timestamped::new(timestamp, value);
        self.entries.push_front(new);
        self.entries.truncate(self.max_len);

        Some(StatusChange {
            timestamp,
            old: head,
            new,
        })
    }

    /// Reconcile with an externally supplied list (any order). Returns the
    /// change iff the current value changed.
    pub fn merge(
        &mut self,
        supplied: &[Timestamped<S>],
        method: ChangeMethod,
    ) -> Option<StatusChange<S>> {
        if supplied.is_empty() {
            return None;
        }
        let head = self.current();

        let mut merged: Vec<Timestamped<S>> = match method {
            ChangeMethod::ReplaceAll => supplied.to_vec(),
            ChangeMethod::MergePrepend => supplied
                .iter()
                .copied()
                .chain(self.entries.iter().copied())
                .collect(),
            ChangeMethod::MergeAppend => self
                .entries
                .iter()
                .copied()
                .chain(supplied.iter().copied())
                .collect(),
        };

        // Stable sort keeps the preferred source first among equal timestamps.
        merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        merged.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);
        merged.truncate(self.max_len);

        self.entries = merged.into_iter().collect();

        let new = self.current();
        (new.value != head.value).then_some(StatusChange {
            timestamp: new.timestamp,
            old: head,
            new,
        })
    }
}
