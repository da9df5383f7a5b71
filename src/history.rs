//! Undo/redo log of row mutations.
//!
//! Entries are self-contained: they carry full before/after row snapshots so
//! replaying never depends on anything but the entry and the store. Replays go
//! through the normal store operations with history recording suppressed.
//!
//! The store holds the log behind `Rc<RefCell<_>>` and records into it, while
//! [`HistoryLog::undo`] and [`HistoryLog::redo`] need the store. They therefore
//! take the shared handle, pop with a short borrow and release it before
//! calling back into the store.

use crate::schema::{Row, ID_KEY};
use crate::store::SchemaStore;
use crate::value::CellValue;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use uuid::Uuid;

const DIFF_SKIP_KEYS: [&str; 3] = [ID_KEY, "updated_at", "created_at"];
const DIFF_MAX_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryKind {
    Create,
    Update,
    Delete,
}

/// One recorded row mutation.
///
/// `Create` has no `before`, `Delete` has no `after`, `Update` has both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Tie-breaker for entries recorded within the same clock tick.
    pub seq: u64,
    pub user_id: String,
    pub kind: HistoryKind,
    pub table_id: String,
    pub row_id: String,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

impl HistoryEntry {
    /// Human-readable summary of what the entry changed.
    pub fn describe(&self) -> String {
        match self.kind {
            HistoryKind::Create => "Created a new row".to_string(),
            HistoryKind::Delete => "Deleted a row".to_string(),
            HistoryKind::Update => match (&self.before, &self.after) {
                (Some(before), Some(after)) => describe_update(before, after),
                _ => "Unknown change".to_string(),
            },
        }
    }
}

fn describe_update(before: &Row, after: &Row) -> String {
    let keys: BTreeSet<&String> = before.fields.keys().chain(after.fields.keys()).collect();
    let changes: Vec<String> = keys
        .into_iter()
        .filter(|key| !DIFF_SKIP_KEYS.contains(&key.as_str()))
        .filter_map(|key| {
            let old = before.field(key);
            let new = after.field(key);
            if old == new {
                return None;
            }
            Some(format!(
                "{}: \"{}\" → \"{}\"",
                key,
                truncate(old),
                truncate(new)
            ))
        })
        .collect();

    if changes.is_empty() {
        "Updated data".to_string()
    } else {
        changes.join(", ")
    }
}

fn truncate(value: Option<&CellValue>) -> String {
    let text = value.map(|v| v.to_string()).unwrap_or_default();
    if text.chars().count() > DIFF_MAX_CHARS {
        let head: String = text.chars().take(DIFF_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text
    }
}

/// Bounded undo and redo stacks.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: VecDeque<HistoryEntry>,
    capacity: usize,
    next_seq: u64,
    user_id: String,
}

impl HistoryLog {
    pub fn new(capacity: usize, user_id: impl Into<String>) -> Self {
        HistoryLog {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            capacity: capacity.max(1),
            next_seq: 0,
            user_id: user_id.into(),
        }
    }

    pub fn shared(capacity: usize, user_id: impl Into<String>) -> Rc<RefCell<HistoryLog>> {
        Rc::new(RefCell::new(Self::new(capacity, user_id)))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a new action. Clears the redo stack.
    pub fn record(
        &mut self,
        kind: HistoryKind,
        table_id: &str,
        row_id: &str,
        before: Option<Row>,
        after: Option<Row>,
    ) -> &HistoryEntry {
        let entry = HistoryEntry {
            id: format!("hist_{}", Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            seq: self.next_seq,
            user_id: self.user_id.clone(),
            kind,
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
            before,
            after,
        };
        self.next_seq += 1;
        debug!("History recorded [{:?}] {}", entry.kind, entry.describe());

        self.redo_stack.clear();
        push_bounded(&mut self.undo_stack, entry, self.capacity);
        &self.undo_stack[self.undo_stack.len() - 1]
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Most recent undoable entry.
    pub fn peek_undo(&self) -> Option<&HistoryEntry> {
        self.undo_stack.back()
    }

    pub fn peek_redo(&self) -> Option<&HistoryEntry> {
        self.redo_stack.back()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Entries touching a row from both stacks, newest first.
    pub fn get_by_row(&self, table_id: &str, row_id: &str) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .filter(|e| e.table_id == table_id && e.row_id == row_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.timestamp, b.seq).cmp(&(a.timestamp, a.seq)));
        entries
    }

    /// Revert the newest entry. Returns it, or `None` when there is nothing
    /// to undo. An entry that no longer applies (its row is gone, or its id
    /// was taken again) is discarded and `None` is returned.
    pub fn undo(history: &Rc<RefCell<HistoryLog>>, store: &mut SchemaStore) -> Option<HistoryEntry> {
        let entry = history.borrow_mut().undo_stack.pop_back()?;
        debug!("Undo [{:?}] {}/{}", entry.kind, entry.table_id, entry.row_id);
        if !revert(&entry, store) {
            warn!("Undo of {}/{} no longer applies, dropping it", entry.table_id, entry.row_id);
            return None;
        }

        let mut log = history.borrow_mut();
        let capacity = log.capacity;
        push_bounded(&mut log.redo_stack, entry.clone(), capacity);
        Some(entry)
    }

    /// Re-apply the newest undone entry. Same discard rule as [`undo`](Self::undo).
    pub fn redo(history: &Rc<RefCell<HistoryLog>>, store: &mut SchemaStore) -> Option<HistoryEntry> {
        let entry = history.borrow_mut().redo_stack.pop_back()?;
        debug!("Redo [{:?}] {}/{}", entry.kind, entry.table_id, entry.row_id);
        if !apply(&entry, store) {
            warn!("Redo of {}/{} no longer applies, dropping it", entry.table_id, entry.row_id);
            return None;
        }

        let mut log = history.borrow_mut();
        let capacity = log.capacity;
        push_bounded(&mut log.undo_stack, entry.clone(), capacity);
        Some(entry)
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
    stack.push_back(entry);
    while stack.len() > capacity {
        stack.pop_front();
    }
}

fn revert(entry: &HistoryEntry, store: &mut SchemaStore) -> bool {
    match (entry.kind, &entry.before) {
        (HistoryKind::Create, _) => store.delete_row(&entry.table_id, &entry.row_id, true),
        (HistoryKind::Delete, Some(before)) => store.reinsert_row(&entry.table_id, before.clone()),
        (HistoryKind::Update, Some(before)) => store.restore_row(&entry.table_id, before.clone()),
        (_, None) => false,
    }
}

fn apply(entry: &HistoryEntry, store: &mut SchemaStore) -> bool {
    match (entry.kind, &entry.after) {
        (HistoryKind::Delete, _) => store.delete_row(&entry.table_id, &entry.row_id, true),
        (HistoryKind::Create, Some(after)) => store.reinsert_row(&entry.table_id, after.clone()),
        (HistoryKind::Update, Some(after)) => store.restore_row(&entry.table_id, after.clone()),
        (_, None) => false,
    }
}
