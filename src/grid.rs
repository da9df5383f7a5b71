//! Grid controller: focus/edit state machine over the processed row order.
//!
//! The controller owns the pipeline and virtualizer for one table and routes
//! committed edits through the store and, when attached, the presence channel.
//! Focus is tracked by row id so it survives re-sorting.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;

use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::messages::{CellRef, UserCursor};
use crate::pipeline::{display_value, RowPipeline};
use crate::schema::{ColumnDefinition, Row, RowData, SortConfig, ID_KEY};
use crate::store::SchemaStore;
use crate::sync::{BusTransport, PresenceChannel, SyncTransport};
use crate::value::{CellValue, ColumnType};
use crate::virtualizer::{VirtualItem, VirtualWindow, Virtualizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusState {
    Idle,
    Focused {
        row_id: String,
        column_key: String,
    },
    Editing {
        row_id: String,
        column_key: String,
        buffer: String,
    },
}

impl FocusState {
    pub fn cell(&self) -> Option<(&str, &str)> {
        match self {
            FocusState::Idle => None,
            FocusState::Focused { row_id, column_key }
            | FocusState::Editing {
                row_id, column_key, ..
            } => Some((row_id, column_key)),
        }
    }

    pub fn is_editing(&self) -> bool {
        matches!(self, FocusState::Editing { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Keyboard input understood by [`GridController::handle_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKey {
    Enter,
    Escape,
    Arrow(Direction),
}

pub struct GridController<T: SyncTransport = BusTransport> {
    store: Rc<RefCell<SchemaStore>>,
    presence: Option<Rc<RefCell<PresenceChannel<T>>>>,
    role_id: String,
    pipeline: RowPipeline,
    virtualizer: Virtualizer,
    hidden_column_keys: Vec<String>,
    focus: FocusState,
}

impl<T: SyncTransport> GridController<T> {
    pub fn new(
        store: Rc<RefCell<SchemaStore>>,
        table_id: impl Into<String>,
        role_id: impl Into<String>,
        config: &GridConfig,
    ) -> Self {
        let virtualizer = Virtualizer::new(0, config.row_height, 0.0).with_overscan(config.overscan);
        let mut grid = GridController {
            store,
            presence: None,
            role_id: role_id.into(),
            pipeline: RowPipeline::new(table_id),
            virtualizer,
            hidden_column_keys: Vec::new(),
            focus: FocusState::Idle,
        };
        grid.refresh();
        grid
    }

    pub fn with_presence(mut self, presence: Rc<RefCell<PresenceChannel<T>>>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn table_id(&self) -> &str {
        self.pipeline.table_id()
    }

    pub fn role_id(&self) -> &str {
        &self.role_id
    }

    pub fn focus(&self) -> &FocusState {
        &self.focus
    }

    pub fn buffer(&self) -> Option<&str> {
        match &self.focus {
            FocusState::Editing { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    // ==================== Rows and columns ====================

    /// Recompute the row order if the store changed and resize the
    /// virtualizer. A focused row that no longer exists drops focus.
    pub fn refresh(&mut self) -> usize {
        let store = self.store.borrow();
        let len = if store.get_permission(&self.role_id, self.table_id()).view {
            self.pipeline.refresh(&store).len()
        } else {
            self.pipeline.invalidate();
            0
        };
        if let Some((row_id, _)) = self.focus.cell() {
            if store.row(self.pipeline.table_id(), row_id).is_none() {
                debug!("Focused row {} disappeared, clearing focus", row_id);
                self.focus = FocusState::Idle;
            }
        }
        drop(store);
        self.virtualizer.set_count(len);
        len
    }

    pub fn row_count(&self) -> usize {
        self.virtualizer.count()
    }

    /// Row ids in display order.
    pub fn row_ids(&mut self) -> Vec<String> {
        self.refresh();
        self.ids_in_window(0, usize::MAX)
    }

    fn ids_in_window(&self, start: usize, end: usize) -> Vec<String> {
        let store = self.store.borrow();
        let (Some(table), Some(map)) = (store.table(self.table_id()), self.pipeline.cached()) else {
            return Vec::new();
        };
        if self.virtualizer.count() == 0 {
            return Vec::new();
        }
        map.slice(start, end)
            .iter()
            .filter_map(|&i| table.rows.get(i as usize))
            .map(|row| row.id.clone())
            .collect()
    }

    /// Rows in the current scroll window with their layout positions.
    pub fn visible_rows(&mut self) -> Vec<(VirtualItem, Row)> {
        self.refresh();
        let store = self.store.borrow();
        let (Some(table), Some(map)) = (store.table(self.table_id()), self.pipeline.cached()) else {
            return Vec::new();
        };
        self.virtualizer
            .virtual_items()
            .into_iter()
            .filter_map(|item| {
                let index = map.get(item.index)?;
                table.rows.get(index).map(|row| (item, row.clone()))
            })
            .collect()
    }

    /// Columns shown: not hidden on the column, not hidden by the applied
    /// view, and viewable by the role.
    pub fn visible_columns(&self) -> Vec<ColumnDefinition> {
        let store = self.store.borrow();
        let Some(table) = store.table(self.table_id()) else {
            return Vec::new();
        };
        table
            .columns
            .iter()
            .filter(|c| !c.hidden)
            .filter(|c| !self.hidden_column_keys.contains(&c.key))
            .filter(|c| {
                store
                    .get_column_permission(&self.role_id, &table.id, &c.key)
                    .view
            })
            .cloned()
            .collect()
    }

    /// Display text of a cell, references and formulas resolved.
    pub fn cell_text(&self, row_id: &str, column_key: &str) -> Option<String> {
        let store = self.store.borrow();
        let table = store.table(self.table_id())?;
        let row = table.row(row_id)?;
        let column = table.column(column_key)?;
        let lookups = store.reference_lookups(&table.id);
        Some(display_value(row, column, &lookups).to_string())
    }

    // ==================== Pipeline inputs ====================

    pub fn set_filter(&mut self, key: &str, value: &str) {
        self.pipeline.set_filter(key, value);
        self.refresh();
    }

    pub fn clear_filters(&mut self) {
        self.pipeline.clear_filters();
        self.refresh();
    }

    pub fn toggle_sort(&mut self, key: &str) -> SortConfig {
        let sort = self.pipeline.toggle_sort(key).clone();
        self.refresh();
        sort
    }

    pub fn sort(&self) -> Option<&SortConfig> {
        self.pipeline.sort()
    }

    /// Apply a saved view's filters, sort and hidden columns.
    pub fn apply_saved_view(&mut self, view_id: &str) -> bool {
        let view = {
            let store = self.store.borrow();
            let Some(view) = store
                .table(self.table_id())
                .and_then(|t| t.views.iter().find(|v| v.id == view_id))
            else {
                return false;
            };
            view.clone()
        };
        self.pipeline.apply_view(&view);
        self.hidden_column_keys = view.hidden_column_keys;
        self.refresh();
        true
    }

    // ==================== Scrolling ====================

    pub fn on_scroll(&mut self, scroll_top: f64) -> VirtualWindow {
        self.virtualizer.on_scroll(scroll_top)
    }

    pub fn set_viewport_height(&mut self, height: f64) -> VirtualWindow {
        self.virtualizer.set_container_height(height)
    }

    pub fn window(&self) -> VirtualWindow {
        self.virtualizer.window()
    }

    pub fn total_height(&self) -> f64 {
        self.virtualizer.total_height()
    }

    // ==================== Focus and editing ====================

    /// Focus a cell. Not allowed while editing.
    pub fn click(&mut self, row_id: &str, column_key: &str) -> Result<bool> {
        if self.focus.is_editing() {
            return Err(GridError::InvalidState("editing a cell"));
        }
        let exists = {
            let store = self.store.borrow();
            store
                .table(self.table_id())
                .is_some_and(|t| t.row(row_id).is_some() && t.has_column(column_key))
        };
        if !exists {
            return Ok(false);
        }
        self.focus = FocusState::Focused {
            row_id: row_id.to_string(),
            column_key: column_key.to_string(),
        };
        self.publish_cursor(false);
        Ok(true)
    }

    /// Focused -> Editing, with the buffer set to the cell's current text.
    pub fn begin_edit(&mut self) -> Result<()> {
        let (row_id, column_key) = match &self.focus {
            FocusState::Focused { row_id, column_key } => (row_id.clone(), column_key.clone()),
            FocusState::Editing { .. } => return Err(GridError::InvalidState("editing a cell")),
            FocusState::Idle => return Err(GridError::InvalidState("no cell is focused")),
        };
        let cell = CellRef::new(self.table_id(), row_id.as_str(), column_key.as_str());

        if let Some(presence) = &self.presence {
            let presence = presence.borrow();
            if presence.is_cell_locked(&cell) {
                let user_name = presence
                    .lock_holder(&cell)
                    .map(|h| h.user_name.clone())
                    .unwrap_or_default();
                return Err(GridError::CellLocked {
                    row_id,
                    column: column_key,
                    user_name,
                });
            }
        }

        let buffer = {
            let store = self.store.borrow();
            let table_id = self.table_id();
            if !store.get_permission(&self.role_id, table_id).edit
                || !store.get_column_permission(&self.role_id, table_id, &column_key).edit
            {
                return Err(GridError::PermissionDenied {
                    role_id: self.role_id.clone(),
                    table_id: table_id.to_string(),
                    action: "edit",
                });
            }
            let column = store.table(table_id).and_then(|t| t.column(&column_key));
            if column_key == ID_KEY || column.is_some_and(|c| c.column_type == ColumnType::Formula) {
                return Err(GridError::InvalidState("the column is read-only"));
            }
            store
                .row(table_id, &row_id)
                .and_then(|row| row.get(&column_key))
                .unwrap_or_default()
                .to_string()
        };

        if let Some(presence) = &self.presence {
            presence.borrow_mut().broadcast_lock(cell);
        }
        self.focus = FocusState::Editing {
            row_id,
            column_key,
            buffer,
        };
        self.publish_cursor(true);
        Ok(())
    }

    pub fn set_buffer(&mut self, text: impl Into<String>) -> bool {
        match &mut self.focus {
            FocusState::Editing { buffer, .. } => {
                *buffer = text.into();
                true
            }
            _ => false,
        }
    }

    /// Parse and validate the buffer, write it, broadcast, and return to
    /// Focused. A validation failure keeps the cell in Editing.
    pub fn commit(&mut self) -> Result<CellValue> {
        let FocusState::Editing {
            row_id,
            column_key,
            buffer,
        } = &self.focus
        else {
            return Err(GridError::InvalidState("not editing"));
        };
        let (row_id, column_key) = (row_id.clone(), column_key.clone());
        let table_id = self.table_id().to_string();

        let column = {
            let store = self.store.borrow();
            store.table(&table_id).and_then(|t| t.column(&column_key)).cloned()
        };
        let value = match &column {
            Some(column) => {
                let value = CellValue::parse_for(column.column_type, buffer);
                column.validate(&value)?;
                value
            }
            None => CellValue::parse_for(ColumnType::Text, buffer),
        };

        let changes = RowData::from([(column_key.clone(), value.clone())]);
        let written = self
            .store
            .borrow_mut()
            .update_row(&table_id, &row_id, changes.clone(), false);

        if let Some(presence) = &self.presence {
            let mut presence = presence.borrow_mut();
            if written {
                presence.broadcast_row_update(&table_id, &row_id, changes);
            }
            presence.broadcast_unlock(CellRef::new(table_id.as_str(), row_id.as_str(), column_key.as_str()));
        }
        if !written {
            warn!("Row {} vanished while editing, edit dropped", row_id);
            self.focus = FocusState::Idle;
            self.publish_cursor(false);
            self.refresh();
            return Err(GridError::RowNotFound { table_id, row_id });
        }
        self.focus = FocusState::Focused { row_id, column_key };
        self.publish_cursor(false);
        self.refresh();
        Ok(value)
    }

    /// Editing -> Focused, discarding the buffer.
    pub fn cancel(&mut self) -> bool {
        let FocusState::Editing {
            row_id, column_key, ..
        } = &self.focus
        else {
            return false;
        };
        let (row_id, column_key) = (row_id.clone(), column_key.clone());
        if let Some(presence) = &self.presence {
            presence.borrow_mut().broadcast_unlock(CellRef::new(
                self.table_id(),
                row_id.as_str(),
                column_key.as_str(),
            ));
        }
        self.focus = FocusState::Focused { row_id, column_key };
        self.publish_cursor(false);
        true
    }

    /// Move focus one cell within the processed rows and visible columns.
    /// Returns false at the edges.
    pub fn navigate(&mut self, direction: Direction) -> Result<bool> {
        let (row_id, column_key) = match &self.focus {
            FocusState::Focused { row_id, column_key } => (row_id.clone(), column_key.clone()),
            FocusState::Editing { .. } => return Err(GridError::InvalidState("editing a cell")),
            FocusState::Idle => return Ok(false),
        };

        let (next_row, next_col) = match direction {
            Direction::Up | Direction::Down => {
                let ids = self.row_ids();
                let Some(pos) = ids.iter().position(|id| *id == row_id) else {
                    return Ok(false);
                };
                let next = match direction {
                    Direction::Up => pos.checked_sub(1),
                    _ => Some(pos + 1).filter(|&p| p < ids.len()),
                };
                let Some(next) = next else {
                    return Ok(false);
                };
                self.virtualizer.scroll_to_index(next);
                (ids[next].clone(), column_key)
            }
            Direction::Left | Direction::Right => {
                let keys: Vec<String> = self.visible_columns().into_iter().map(|c| c.key).collect();
                let Some(pos) = keys.iter().position(|k| *k == column_key) else {
                    return Ok(false);
                };
                let next = match direction {
                    Direction::Left => pos.checked_sub(1),
                    _ => Some(pos + 1).filter(|&p| p < keys.len()),
                };
                let Some(next) = next else {
                    return Ok(false);
                };
                (row_id, keys[next].clone())
            }
        };

        self.focus = FocusState::Focused {
            row_id: next_row,
            column_key: next_col,
        };
        self.publish_cursor(false);
        Ok(true)
    }

    /// Enter opens or commits an edit, Escape cancels, arrows move.
    pub fn handle_key(&mut self, key: GridKey) -> Result<()> {
        match key {
            GridKey::Enter if self.focus.is_editing() => self.commit().map(|_| ()),
            GridKey::Enter => self.begin_edit(),
            GridKey::Escape => {
                self.cancel();
                Ok(())
            }
            GridKey::Arrow(direction) => self.navigate(direction).map(|_| ()),
        }
    }

    // ==================== Presence ====================

    fn publish_cursor(&self, is_editing: bool) {
        let Some(presence) = &self.presence else {
            return;
        };
        let (row_id, column_key) = match self.focus.cell() {
            Some((r, c)) => (Some(r), Some(c)),
            None => (None, None),
        };
        presence.borrow_mut().broadcast_cursor(
            Some(self.table_id()),
            row_id,
            column_key,
            is_editing,
            Utc::now(),
        );
    }

    /// Other actors' cursors on this table.
    pub fn remote_cursors(&self) -> Vec<UserCursor> {
        match &self.presence {
            Some(presence) => presence
                .borrow()
                .cursors_for_table(self.table_id())
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Periodic work: apply incoming messages, evict stale cursors, refresh.
    /// Returns the evicted actor ids.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = match &self.presence {
            Some(presence) => {
                let mut presence = presence.borrow_mut();
                presence.pump(&mut self.store.borrow_mut(), now);
                presence.sweep(now)
            }
            None => Vec::new(),
        };
        self.refresh();
        evicted
    }
}
