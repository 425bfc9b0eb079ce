//! Per-model record of committed transitions.
//!
//! Recording is opt-in through the machine's history limit. The history keeps
//! the most recent records and drops the oldest once the limit is reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of one committed state change.
///
/// # Example
///
/// ```rust
/// use canopy::core::TransitionRecord;
/// use chrono::Utc;
///
/// let record = TransitionRecord {
///     trigger: "go".to_string(),
///     from: vec!["A".to_string()],
///     to: vec!["B".to_string()],
///     timestamp: Utc::now(),
/// };
/// assert_eq!(record.to, vec!["B"]);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Trigger that caused the change
    pub trigger: String,
    /// Active leaves before the change
    pub from: Vec<String>,
    /// Active leaves after the change
    pub to: Vec<String>,
    /// When the new tree was committed
    pub timestamp: DateTime<Utc>,
}

/// Bounded, ordered history of committed transitions.
///
/// # Example
///
/// ```rust
/// use canopy::core::{History, TransitionRecord};
/// use chrono::Utc;
///
/// let mut history = History::bounded(2);
/// for (from, to) in [("A", "B"), ("B", "C"), ("C", "D")] {
///     history.record(TransitionRecord {
///         trigger: "next".to_string(),
///         from: vec![from.to_string()],
///         to: vec![to.to_string()],
///         timestamp: Utc::now(),
///     });
/// }
///
/// assert_eq!(history.len(), 2);
/// let path: Vec<_> = history.get_path().into_iter().map(|s| s.join(",")).collect();
/// assert_eq!(path, vec!["B", "C", "D"]);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    transitions: Vec<TransitionRecord>,
    limit: Option<usize>,
}

impl History {
    /// Unbounded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// History keeping at most `limit` records.
    pub fn bounded(limit: usize) -> Self {
        Self {
            transitions: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn record(&mut self, record: TransitionRecord) {
        self.transitions.push(record);
        if let Some(limit) = self.limit {
            let excess = self.transitions.len().saturating_sub(limit);
            if excess > 0 {
                self.transitions.drain(..excess);
            }
        }
    }

    /// Active leaf sets traversed: the source of the oldest kept record,
    /// then the destination of every record.
    pub fn get_path(&self) -> Vec<&[String]> {
        let mut path: Vec<&[String]> = Vec::new();
        if let Some(first) = self.transitions.first() {
            path.push(&first.from);
        }
        for transition in &self.transitions {
            path.push(&transition.to);
        }
        path
    }

    /// Time between the first and the last kept record.
    pub fn duration(&self) -> Option<Duration> {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => last
                .timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .ok(),
            _ => None,
        }
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
