//! Per-table lifecycle within one run.
//!
//! ```text
//! pending -> loading -> loaded -> merging -> merged
//!               |  ^                |  ^
//!               |  +- retry         |  +- retry
//!               v                   v
//!             failed              failed
//! ```

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableState {
    Pending,
    Loading,
    Loaded,
    Merging,
    Merged,
    Failed,
}

impl TableState {
    pub fn can_transition_to(self, next: TableState) -> bool {
        use TableState::*;
        matches!(
            (self, next),
            (Pending, Loading)
                | (Loading, Loading)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (Loaded, Merging)
                | (Merging, Merging)
                | (Merging, Merged)
                | (Merging, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TableState::Merged | TableState::Failed)
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableState::Pending => "pending",
            TableState::Loading => "loading",
            TableState::Loaded => "loaded",
            TableState::Merging => "merging",
            TableState::Merged => "merged",
            TableState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the state of every table of a run.
#[derive(Debug)]
pub struct TableTracker {
    states: Mutex<IndexMap<String, TableState>>,
}

impl TableTracker {
    pub fn new<'a>(tables: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            states: Mutex::new(
                tables
                    .into_iter()
                    .map(|t| (t.to_string(), TableState::Pending))
                    .collect(),
            ),
        }
    }

    /// Move `table` to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&self, table: &str, next: TableState) -> Result<TableState, StateError> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let Some(current) = states.get_mut(table) else {
            return Err(StateError::UnknownTable {
                table: table.to_string(),
            });
        };
        if !current.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                table: table.to_string(),
                from: *current,
                to: next,
            });
        }
        debug!(table, from = %current, to = %next, "Table state changed");
        let previous = *current;
        *current = next;
        Ok(previous)
    }

    pub fn get(&self, table: &str) -> Option<TableState> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(table).copied()
    }

    pub fn snapshot(&self) -> IndexMap<String, TableState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let tracker = TableTracker::new(["orders"]);
        for next in [
            TableState::Loading,
            TableState::Loaded,
            TableState::Merging,
            TableState::Merged,
        ] {
            tracker.transition("orders", next).unwrap();
        }
        assert_eq!(tracker.get("orders"), Some(TableState::Merged));
        assert!(TableState::Merged.is_terminal());
    }

    #[test]
    fn test_retry_stays_in_state() {
        let tracker = TableTracker::new(["orders"]);
        tracker.transition("orders", TableState::Loading).unwrap();
        let previous = tracker.transition("orders", TableState::Loading).unwrap();
        assert_eq!(previous, TableState::Loading);
    }

    #[test]
    fn test_invalid_transitions() {
        let tracker = TableTracker::new(["orders", "sellers"]);
        let err = tracker
            .transition("orders", TableState::Merging)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Table 'orders' cannot move from pending to merging"
        );

        tracker.transition("sellers", TableState::Loading).unwrap();
        tracker.transition("sellers", TableState::Failed).unwrap();
        assert!(tracker.transition("sellers", TableState::Loading).is_err());

        assert!(matches!(
            tracker.transition("nope", TableState::Loading),
            Err(StateError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_snapshot_keeps_order() {
        let tracker = TableTracker::new(["b", "a"]);
        let keys: Vec<String> = tracker.snapshot().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
