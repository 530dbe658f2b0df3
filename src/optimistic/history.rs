use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one optimistic operation for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub(crate) u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Replace,
    Merge,
}

/// Public view of an operation the backend has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: OpId,
    pub kind: OpKind,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Change<T, U> {
    Replace(T),
    Merge(U),
}

#[derive(Debug, Clone)]
struct Op<T, U> {
    id: OpId,
    change: Change<T, U>,
    applied_at: DateTime<Utc>,
}

/// Confirmed data plus the optimistic operations layered on top of it.
///
/// The visible value is the base with every outstanding operation applied
/// in order. Every payload sent to the backend is built from the visible
/// value, so it already carries the operations before it. When one is
/// accepted, the payload becomes the base and every operation up to and
/// including it is settled. Failing an operation removes only that
/// operation; later ones are replayed on top of the base.
#[derive(Debug, Clone)]
pub struct OpHistory<T, U> {
    base: Option<T>,
    ops: Vec<Op<T, U>>,
    visible: Option<T>,
    next_id: u64,
}

impl<T, U> Default for OpHistory<T, U> {
    fn default() -> Self {
        Self {
            base: None,
            ops: Vec::new(),
            visible: None,
            next_id: 0,
        }
    }
}

impl<T: Clone, U> OpHistory<T, U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The confirmed value.
    pub fn base(&self) -> Option<&T> {
        self.base.as_ref()
    }

    /// The confirmed value with every outstanding operation applied.
    pub fn visible(&self) -> Option<&T> {
        self.visible.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        !self.ops.is_empty()
    }

    /// Number of operations still waiting for the backend.
    pub fn pending_len(&self) -> usize {
        self.ops.len()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.ops
            .iter()
            .map(|op| HistoryEntry {
                id: op.id,
                kind: match op.change {
                    Change::Replace(_) => OpKind::Replace,
                    Change::Merge(_) => OpKind::Merge,
                },
                applied_at: op.applied_at,
            })
            .collect()
    }

    /// Replace the confirmed value, keeping outstanding operations on top.
    pub fn set_base(&mut self, value: Option<T>, merge: &dyn Fn(&T, &U) -> T) {
        self.base = value;
        self.recompute(merge);
    }

    /// Apply a full replacement optimistically.
    pub fn push_replace(&mut self, value: T) -> OpId {
        self.visible = Some(value.clone());
        self.push(Change::Replace(value))
    }

    /// Apply a partial update optimistically.
    pub fn push_merge(&mut self, partial: U, merge: &dyn Fn(&T, &U) -> T) -> OpId {
        if let Some(current) = &self.visible {
            self.visible = Some(merge(current, &partial));
        }
        self.push(Change::Merge(partial))
    }

    /// Record that the backend accepted `payload`, the value sent for `id`.
    ///
    /// The payload becomes the base even when `id` is no longer outstanding
    /// (undone, or settled by a later payload), since the backend now holds
    /// it. Returns the number of operations settled.
    pub fn confirm(&mut self, id: OpId, payload: T, merge: &dyn Fn(&T, &U) -> T) -> usize {
        let settled = self.ops.iter().take_while(|op| op.id <= id).count();
        self.ops.drain(..settled);
        self.base = Some(payload);
        self.recompute(merge);
        settled
    }

    /// Remove an operation whose backend call failed. Unknown ids are ignored.
    pub fn revert(&mut self, id: OpId, merge: &dyn Fn(&T, &U) -> T) -> bool {
        let before = self.ops.len();
        self.ops.retain(|op| op.id != id);
        if self.ops.len() == before {
            return false;
        }
        self.recompute(merge);
        true
    }

    /// Drop the most recent outstanding operation from the visible value.
    pub fn undo_last(&mut self, merge: &dyn Fn(&T, &U) -> T) -> Option<OpId> {
        let op = self.ops.pop()?;
        self.recompute(merge);
        Some(op.id)
    }

    fn push(&mut self, change: Change<T, U>) -> OpId {
        self.next_id += 1;
        let id = OpId(self.next_id);
        self.ops.push(Op {
            id,
            change,
            applied_at: Utc::now(),
        });
        id
    }

    fn recompute(&mut self, merge: &dyn Fn(&T, &U) -> T) {
        let mut value = self.base.clone();
        for op in &self.ops {
            value = apply(value, &op.change, merge);
        }
        self.visible = value;
    }
}

fn apply<T: Clone, U>(
    value: Option<T>,
    change: &Change<T, U>,
    merge: &dyn Fn(&T, &U) -> T,
) -> Option<T> {
    match change {
        Change::Replace(next) => Some(next.clone()),
        // A partial update has nothing to apply to until data exists.
        Change::Merge(partial) => value.map(|current| merge(&current, partial)),
    }
}
