use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::controller::FormState;
use crate::descriptor::{FieldKey, FieldValues};

pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Deep copy of the form state at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub values: FieldValues,
    pub errors: BTreeMap<FieldKey, String>,
    pub touched: BTreeMap<FieldKey, bool>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl StateSnapshot {
    pub fn capture(state: &FormState) -> Self {
        Self {
            values: state.values.clone(),
            errors: state.errors.clone(),
            touched: state.touched.clone(),
            timestamp: now_millis(),
        }
    }

    pub fn to_state(&self) -> FormState {
        FormState {
            values: self.values.clone(),
            errors: self.errors.clone(),
            touched: self.touched.clone(),
        }
    }
}

/// Bounded linear undo/redo buffer. Pushing after an undo discards the redo
/// branch; exceeding capacity evicts the oldest entry.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<StateSnapshot>,
    cursor: Option<usize>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, snapshot: StateSnapshot) {
        match self.cursor {
            Some(cursor) => self.entries.truncate(cursor + 1),
            None => self.entries.clear(),
        }
        self.entries.push_back(snapshot);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            tracing::trace!(capacity = self.capacity, "history full, dropped oldest snapshot");
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn undo(&mut self) -> Option<&StateSnapshot> {
        let cursor = self.cursor.filter(|cursor| *cursor > 0)? - 1;
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }

    pub fn redo(&mut self) -> Option<&StateSnapshot> {
        let cursor = self
            .cursor
            .filter(|cursor| cursor + 1 < self.entries.len())?
            + 1;
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|cursor| cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor
            .is_some_and(|cursor| cursor + 1 < self.entries.len())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> Vec<StateSnapshot> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: i64) -> StateSnapshot {
        let mut state = FormState::default();
        state.values.insert(FieldKey::from("n"), json!(value));
        StateSnapshot::capture(&state)
    }

    fn current(history: &History) -> Option<i64> {
        let cursor = history.cursor()?;
        history.entries()[cursor].values["n"].as_i64()
    }

    #[test]
    fn undo_and_redo_walk_the_cursor() {
        let mut history = History::new(10);
        assert!(!history.can_undo());
        for value in 0..3 {
            history.push(snapshot(value));
        }
        assert_eq!(current(&history), Some(2));

        assert_eq!(history.undo().and_then(|s| s.values["n"].as_i64()), Some(1));
        assert_eq!(history.undo().and_then(|s| s.values["n"].as_i64()), Some(0));
        assert!(history.undo().is_none());
        assert_eq!(history.cursor(), Some(0));

        assert_eq!(history.redo().and_then(|s| s.values["n"].as_i64()), Some(1));
        assert!(history.can_redo());
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut history = History::new(10);
        for value in 0..4 {
            history.push(snapshot(value));
        }
        history.undo();
        history.undo();
        history.push(snapshot(9));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(current(&history), Some(9));
    }

    #[test]
    fn capacity_evicts_oldest_and_keeps_cursor_on_newest() {
        let mut history = History::new(3);
        for value in 0..5 {
            history.push(snapshot(value));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), Some(2));
        let kept = history
            .entries()
            .iter()
            .filter_map(|s| s.values["n"].as_i64())
            .collect::<Vec<_>>();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn clear_resets_cursor() {
        let mut history = History::new(0);
        assert_eq!(history.capacity(), 1);
        history.push(snapshot(1));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.cursor(), None);
        assert!(history.redo().is_none());
    }
}
