//! Schema store: the single source of truth for tables, rows, roles and
//! permissions.
//!
//! Every mutation goes through [`SchemaStore`]. A mutation updates state,
//! optionally records a history entry, persists, bumps the change generation
//! and finally notifies subscribers. Unknown table or row ids are silent
//! no-ops reported through `Option`/`bool` returns; malformed schema changes
//! return [`SchemaError`].
//!
//! # Examples
//!
//! ```
//! use livegrid::{RowData, SchemaStore};
//!
//! let mut store = SchemaStore::with_tables(Vec::new());
//! let table_id = store.add_table("Site Visits").id.clone();
//! assert!(table_id.starts_with("site_visits_"));
//!
//! let mut data = RowData::new();
//! data.insert("created_at".to_string(), "2025-01-01".into());
//! let row_id = store.add_row(&table_id, data, false).unwrap();
//! assert!(store.row(&table_id, &row_id).is_some());
//!
//! assert!(store.add_row("missing", RowData::new(), false).is_none());
//! ```

use crate::changeset::{Changeset, ListenerRegistry, StoreEvent, Subscription};
use crate::defaults;
use crate::error::SchemaError;
use crate::history::{HistoryKind, HistoryLog};
use crate::persistence::{KeyValueStore, MemoryKv, PersistedState, StateRef, StorageKeys};
use crate::schema::{
    ColumnDefinition, ColumnPatch, ColumnPermission, ColumnPermissionMatrix,
    ColumnPermissionPatch, FormLayout, MoveDirection, PermissionMatrix, PermissionPatch,
    PermissionRule, Role, Row, RowData, SavedView, TableDefinition,
};
use crate::value::{CellValue, ColumnType};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use uuid::Uuid;

/// Role id that always resolves to full access.
pub const ADMIN_ROLE: &str = "admin";

const COPY_SUFFIX: &str = " (Copy)";
const UNTITLED_ASSET: &str = "Untitled file";

/// Image or file cell surfaced to the file-manager view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAsset {
    pub id: String,
    pub url: String,
    pub name: String,
    pub source_table_id: String,
    pub source_table_name: String,
    pub row_id: String,
    pub column_key: String,
    pub ai_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_tables: usize,
    pub total_rows: usize,
    pub total_files: usize,
}

pub struct SchemaStore {
    tables: Vec<TableDefinition>,
    roles: Vec<Role>,
    permissions: PermissionMatrix,
    column_permissions: ColumnPermissionMatrix,
    changeset: Changeset,
    listeners: ListenerRegistry<StoreEvent>,
    history: Option<Rc<RefCell<HistoryLog>>>,
    kv: Box<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl SchemaStore {
    /// Load from `kv`, falling back to the built-in dataset per missing key.
    pub fn load(kv: Box<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        let state = PersistedState::load(kv.as_ref(), &keys, defaults::default_state);
        Self::from_state(state, kv, keys)
    }

    pub fn from_state(state: PersistedState, kv: Box<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        info!(
            "Schema store ready: {} tables, {} roles",
            state.tables.len(),
            state.roles.len()
        );
        SchemaStore {
            tables: state.tables,
            roles: state.roles,
            permissions: state.permissions,
            column_permissions: state.column_permissions,
            changeset: Changeset::new(),
            listeners: ListenerRegistry::new(),
            history: None,
            kv,
            keys,
        }
    }

    /// In-memory store over the given tables and the default roles.
    pub fn with_tables(tables: Vec<TableDefinition>) -> Self {
        let state = PersistedState {
            tables,
            roles: defaults::default_roles(),
            permissions: defaults::default_permissions(),
            column_permissions: ColumnPermissionMatrix::new(),
        };
        Self::from_state(state, Box::new(MemoryKv::new()), StorageKeys::default())
    }

    /// In-memory store over the built-in dataset.
    pub fn with_defaults() -> Self {
        Self::from_state(
            defaults::default_state(),
            Box::new(MemoryKv::new()),
            StorageKeys::default(),
        )
    }

    /// Route row mutations into `history`. Without a log nothing is recorded.
    pub fn attach_history(&mut self, history: Rc<RefCell<HistoryLog>>) {
        self.history = Some(history);
    }

    pub fn history(&self) -> Option<&Rc<RefCell<HistoryLog>>> {
        self.history.as_ref()
    }

    /// Bumped by every successful mutation and by [`SchemaStore::force_refresh`].
    pub fn generation(&self) -> u64 {
        self.changeset.generation()
    }

    /// Register a change listener. Listeners run after the mutation has
    /// completed and must not borrow the store again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Notify subscribers without a local mutation.
    pub fn force_refresh(&mut self) {
        self.changeset.push(StoreEvent::Refreshed);
        self.notify();
    }

    // ==================== Reads ====================

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    pub fn table(&self, table_id: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    pub fn row(&self, table_id: &str, row_id: &str) -> Option<&Row> {
        self.table(table_id).and_then(|t| t.row(row_id))
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn to_csv(&self, table_id: &str) -> Option<String> {
        self.table(table_id).map(TableDefinition::to_csv)
    }

    /// Map of row id to the display label found under `label_key`.
    pub fn lookup_map(&self, table_id: &str, label_key: &str) -> HashMap<String, String> {
        let Some(table) = self.table(table_id) else {
            return HashMap::new();
        };
        table
            .rows
            .iter()
            .map(|row| {
                let label = row.get(label_key).map(|v| v.to_string()).unwrap_or_default();
                (row.id.clone(), label)
            })
            .collect()
    }

    /// Lookup maps for every reference column of `table_id`, keyed by column key.
    pub fn reference_lookups(&self, table_id: &str) -> HashMap<String, HashMap<String, String>> {
        let Some(table) = self.table(table_id) else {
            return HashMap::new();
        };
        table
            .columns
            .iter()
            .filter(|c| c.column_type == ColumnType::Reference)
            .filter_map(|c| {
                let target = c.reference_table_id.as_deref()?;
                let label_key = c.reference_label_key.as_deref().unwrap_or("name");
                Some((c.key.clone(), self.lookup_map(target, label_key)))
            })
            .collect()
    }

    /// Flat list of image and file cells across all tables.
    pub fn all_assets(&self) -> Vec<FileAsset> {
        let mut assets = Vec::new();
        for table in &self.tables {
            let asset_columns: Vec<&ColumnDefinition> = table
                .columns
                .iter()
                .filter(|c| c.column_type.is_asset())
                .collect();
            if asset_columns.is_empty() {
                continue;
            }
            for row in &table.rows {
                for column in &asset_columns {
                    let Some(url) = row.field(&column.key).and_then(CellValue::as_str) else {
                        continue;
                    };
                    if url.chars().count() <= 5 {
                        continue;
                    }
                    assets.push(FileAsset {
                        id: format!("{}_{}", row.id, column.key),
                        url: url.to_string(),
                        name: asset_name(row),
                        source_table_id: table.id.clone(),
                        source_table_name: table.name.clone(),
                        row_id: row.id.clone(),
                        column_key: column.key.clone(),
                        ai_tags: row
                            .field("ai_tags")
                            .and_then(CellValue::as_list)
                            .map(<[String]>::to_vec)
                            .unwrap_or_default(),
                    });
                }
            }
        }
        assets
    }

    pub fn total_stats(&self) -> StoreStats {
        StoreStats {
            total_tables: self.tables.len(),
            total_rows: self.tables.iter().map(|t| t.rows.len()).sum(),
            total_files: self.all_assets().len(),
        }
    }

    // ==================== Tables & columns ====================

    /// Create an empty table seeded with `id` and `created_at` columns.
    pub fn add_table(&mut self, name: &str) -> &TableDefinition {
        let base = format!("{}_{}", slug(name), Utc::now().timestamp_millis());
        let mut id = base.clone();
        let mut n = 1;
        while self.table(&id).is_some() {
            id = format!("{}_{}", base, n);
            n += 1;
        }

        let mut table = TableDefinition::new(id.clone(), name);
        table.columns = vec![
            ColumnDefinition::new("id", "ID", ColumnType::Text).with_width(80),
            ColumnDefinition::new("created_at", "Created", ColumnType::Date).with_width(120),
        ];
        self.tables.push(table);
        self.changeset.push(StoreEvent::TableAdded { table_id: id });
        self.commit();

        let last = self.tables.len() - 1;
        &self.tables[last]
    }

    /// Remove a table. System tables are refused.
    pub fn delete_table(&mut self, table_id: &str) -> Result<bool, SchemaError> {
        let Some(idx) = self.table_index(table_id) else {
            return Ok(false);
        };
        if self.tables[idx].is_system {
            return Err(SchemaError::SystemTable(table_id.to_string()));
        }
        self.tables.remove(idx);
        for rules in self.permissions.values_mut() {
            rules.remove(table_id);
        }
        self.column_permissions.remove(table_id);
        self.changeset.push(StoreEvent::TableDeleted {
            table_id: table_id.to_string(),
        });
        self.commit();
        Ok(true)
    }

    /// Append a column. `Ok(false)` when the table doesn't exist.
    pub fn add_column(&mut self, table_id: &str, column: ColumnDefinition) -> Result<bool, SchemaError> {
        let Some(idx) = self.table_index(table_id) else {
            return Ok(false);
        };
        if self.tables[idx].column(&column.key).is_some() {
            return Err(SchemaError::DuplicateColumn {
                table_id: table_id.to_string(),
                key: column.key,
            });
        }
        self.check_reference(&column)?;

        self.tables[idx].columns.push(column);
        self.changeset.push(StoreEvent::ColumnsChanged {
            table_id: table_id.to_string(),
        });
        self.commit();
        Ok(true)
    }

    /// Patch a column. Nested `validation` and `style` merge field by field.
    pub fn update_column(
        &mut self,
        table_id: &str,
        key: &str,
        patch: &ColumnPatch,
    ) -> Result<bool, SchemaError> {
        let Some(idx) = self.table_index(table_id) else {
            return Ok(false);
        };
        let Some(col_idx) = self.tables[idx].column_index(key) else {
            return Ok(false);
        };

        let mut updated = self.tables[idx].columns[col_idx].clone();
        patch.apply_to(&mut updated);
        self.check_reference(&updated)?;

        self.tables[idx].columns[col_idx] = updated;
        self.changeset.push(StoreEvent::ColumnsChanged {
            table_id: table_id.to_string(),
        });
        self.commit();
        Ok(true)
    }

    /// Swap a column with its neighbour. No-op at either end.
    pub fn move_column(&mut self, table_id: &str, key: &str, direction: MoveDirection) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        let columns = &mut self.tables[idx].columns;
        let Some(from) = columns.iter().position(|c| c.key == key) else {
            return false;
        };
        let to = match direction {
            MoveDirection::Up if from > 0 => from - 1,
            MoveDirection::Down if from + 1 < columns.len() => from + 1,
            _ => return false,
        };
        columns.swap(from, to);
        self.changeset.push(StoreEvent::ColumnsChanged {
            table_id: table_id.to_string(),
        });
        self.commit();
        true
    }

    // ==================== Rows ====================

    /// Append a row, generating an id when `data` has none.
    pub fn add_row(&mut self, table_id: &str, mut data: RowData, skip_history: bool) -> Option<String> {
        let idx = self.table_index(table_id)?;
        self.drop_unknown_keys(idx, &mut data);

        let mut row = Row::from_data(data, generated_row_id);
        if self.tables[idx].row(&row.id).is_some() {
            let fresh = generated_row_id();
            warn!(
                "Row id '{}' already exists in '{}', using '{}'",
                row.id, table_id, fresh
            );
            row.id = fresh;
        }
        let row_id = row.id.clone();

        self.tables[idx].rows.push(row.clone());
        if !skip_history {
            self.record(HistoryKind::Create, table_id, &row_id, None, Some(row.clone()));
        }
        self.changeset.push(StoreEvent::RowInserted {
            table_id: table_id.to_string(),
            row,
        });
        self.commit();
        Some(row_id)
    }

    /// Shallow-merge `partial` into a row. Silent no-op if the row is missing.
    pub fn update_row(&mut self, table_id: &str, row_id: &str, mut partial: RowData, skip_history: bool) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        let Some(row_idx) = self.tables[idx].row_index(row_id) else {
            return false;
        };
        self.drop_unknown_keys(idx, &mut partial);

        let before = self.tables[idx].rows[row_idx].clone();
        self.tables[idx].rows[row_idx].merge(&partial);
        let after = self.tables[idx].rows[row_idx].clone();

        if !skip_history {
            self.record(
                HistoryKind::Update,
                table_id,
                row_id,
                Some(before.clone()),
                Some(after.clone()),
            );
        }
        self.changeset.push(StoreEvent::RowUpdated {
            table_id: table_id.to_string(),
            before,
            after,
        });
        self.commit();
        true
    }

    /// Replace a row wholesale with a snapshot. Never recorded in history.
    pub fn restore_row(&mut self, table_id: &str, mut row: Row) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        let Some(row_idx) = self.tables[idx].row_index(&row.id) else {
            return false;
        };
        self.drop_unknown_keys(idx, &mut row.fields);

        let before = std::mem::replace(&mut self.tables[idx].rows[row_idx], row.clone());
        self.changeset.push(StoreEvent::RowUpdated {
            table_id: table_id.to_string(),
            before,
            after: row,
        });
        self.commit();
        true
    }

    /// Put a snapshot back under its own id. Refuses (returns false) when
    /// the id is taken. Never recorded in history.
    pub fn reinsert_row(&mut self, table_id: &str, mut row: Row) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        if self.tables[idx].row(&row.id).is_some() {
            warn!("Row id '{}' is taken in '{}', not reinserting", row.id, table_id);
            return false;
        }
        self.drop_unknown_keys(idx, &mut row.fields);

        self.tables[idx].rows.push(row.clone());
        self.changeset.push(StoreEvent::RowInserted {
            table_id: table_id.to_string(),
            row,
        });
        self.commit();
        true
    }

    /// Hard-delete a row.
    pub fn delete_row(&mut self, table_id: &str, row_id: &str, skip_history: bool) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        let Some(row_idx) = self.tables[idx].row_index(row_id) else {
            return false;
        };

        let removed = self.tables[idx].rows.remove(row_idx);
        if !skip_history {
            self.record(HistoryKind::Delete, table_id, row_id, Some(removed.clone()), None);
        }
        self.changeset.push(StoreEvent::RowDeleted {
            table_id: table_id.to_string(),
            row: removed,
        });
        self.commit();
        true
    }

    /// Clone a row under a new id, suffixing a non-empty `name`. Recorded as a
    /// regular create.
    pub fn duplicate_row(&mut self, table_id: &str, row_id: &str) -> Option<String> {
        let source = self.row(table_id, row_id)?;
        let mut data = source.fields.clone();
        if let Some(CellValue::Text(name)) = data.get_mut("name") {
            if !name.is_empty() {
                name.push_str(COPY_SUFFIX);
            }
        }
        data.insert(
            "id".to_string(),
            CellValue::Text(format!("copy-{}", Uuid::new_v4().simple())),
        );
        self.add_row(table_id, data, false)
    }

    /// Append many rows at once without history. Returns the number inserted.
    ///
    /// Used by [`import_rows`] for each chunk; persists and notifies once.
    pub fn insert_rows(&mut self, table_id: &str, rows: Vec<RowData>) -> usize {
        let Some(idx) = self.table_index(table_id) else {
            return 0;
        };
        let count = rows.len();
        let mut known: HashSet<String> = self.tables[idx].rows.iter().map(|r| r.id.clone()).collect();
        for mut data in rows {
            self.drop_unknown_keys(idx, &mut data);
            let mut row = Row::from_data(data, generated_row_id);
            if !known.insert(row.id.clone()) {
                row.id = generated_row_id();
                known.insert(row.id.clone());
            }
            self.tables[idx].rows.push(row);
        }
        self.changeset.push(StoreEvent::RowsImported {
            table_id: table_id.to_string(),
            count,
        });
        self.commit();
        count
    }

    // ==================== Views & layouts ====================

    pub fn save_form_layout(&mut self, table_id: &str, layout: FormLayout) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        self.tables[idx].form_layout = Some(layout);
        self.push_views_changed(table_id);
        true
    }

    pub fn add_view(&mut self, table_id: &str, view: SavedView) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        self.tables[idx].views.push(view);
        self.push_views_changed(table_id);
        true
    }

    pub fn delete_view(&mut self, table_id: &str, view_id: &str) -> bool {
        let Some(idx) = self.table_index(table_id) else {
            return false;
        };
        let views = &mut self.tables[idx].views;
        let before = views.len();
        views.retain(|v| v.id != view_id);
        if views.len() == before {
            return false;
        }
        self.push_views_changed(table_id);
        true
    }

    // ==================== Roles & permissions ====================

    /// Create a role and return its id.
    pub fn add_role(&mut self, name: &str, color: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}", slug(name), &suffix[..6]);
        self.roles.push(Role {
            id: id.clone(),
            name: name.to_string(),
            color: color.to_string(),
            description: Some("New role".to_string()),
            is_system: false,
        });
        self.changeset.push(StoreEvent::PermissionsChanged);
        self.commit();
        id
    }

    /// Remove a non-system role together with its permission rows.
    pub fn delete_role(&mut self, role_id: &str) -> Result<bool, SchemaError> {
        let Some(role) = self.roles.iter().find(|r| r.id == role_id) else {
            return Ok(false);
        };
        if role.is_system {
            return Err(SchemaError::SystemRole(role_id.to_string()));
        }
        self.roles.retain(|r| r.id != role_id);
        self.permissions.remove(role_id);
        for columns in self.column_permissions.values_mut() {
            for roles in columns.values_mut() {
                roles.remove(role_id);
            }
        }
        self.changeset.push(StoreEvent::PermissionsChanged);
        self.commit();
        Ok(true)
    }

    /// Table-level rule. `admin` always gets everything; unset rules deny.
    pub fn get_permission(&self, role_id: &str, table_id: &str) -> PermissionRule {
        if role_id == ADMIN_ROLE {
            return PermissionRule::ALL;
        }
        self.permissions
            .get(role_id)
            .and_then(|rules| rules.get(table_id))
            .copied()
            .unwrap_or(PermissionRule::NONE)
    }

    /// Column-level permission. `admin` always gets everything; unset allows.
    pub fn get_column_permission(&self, role_id: &str, table_id: &str, column_key: &str) -> ColumnPermission {
        if role_id == ADMIN_ROLE {
            return ColumnPermission::ALL;
        }
        self.column_permissions
            .get(table_id)
            .and_then(|columns| columns.get(column_key))
            .and_then(|roles| roles.get(role_id))
            .copied()
            .unwrap_or_default()
    }

    /// Merge `patch` over the role's current rule. Ignored for `admin`.
    pub fn update_permission(&mut self, role_id: &str, table_id: &str, patch: PermissionPatch) -> bool {
        if role_id == ADMIN_ROLE {
            return false;
        }
        let mut rule = self.get_permission(role_id, table_id);
        patch.apply_to(&mut rule);
        self.permissions
            .entry(role_id.to_string())
            .or_default()
            .insert(table_id.to_string(), rule);
        self.changeset.push(StoreEvent::PermissionsChanged);
        self.commit();
        true
    }

    pub fn update_column_permission(
        &mut self,
        role_id: &str,
        table_id: &str,
        column_key: &str,
        patch: ColumnPermissionPatch,
    ) -> bool {
        if role_id == ADMIN_ROLE {
            return false;
        }
        let mut perm = self.get_column_permission(role_id, table_id, column_key);
        patch.apply_to(&mut perm);
        self.column_permissions
            .entry(table_id.to_string())
            .or_default()
            .entry(column_key.to_string())
            .or_default()
            .insert(role_id.to_string(), perm);
        self.changeset.push(StoreEvent::PermissionsChanged);
        self.commit();
        true
    }

    // ==================== Internals ====================

    fn table_index(&self, table_id: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.id == table_id)
    }

    fn check_reference(&self, column: &ColumnDefinition) -> Result<(), SchemaError> {
        if column.column_type != ColumnType::Reference {
            return Ok(());
        }
        let target = column
            .reference_table_id
            .as_deref()
            .ok_or_else(|| SchemaError::MissingReferenceTarget {
                key: column.key.clone(),
            })?;
        if self.table(target).is_none() {
            return Err(SchemaError::UnknownReferenceTarget {
                key: column.key.clone(),
                target: target.to_string(),
            });
        }
        Ok(())
    }

    fn drop_unknown_keys(&self, table_idx: usize, data: &mut RowData) {
        let table = &self.tables[table_idx];
        let dropped = table.retain_known_keys(data);
        if !dropped.is_empty() {
            warn!("Dropping unknown keys {:?} for table '{}'", dropped, table.id);
        }
    }

    fn record(
        &self,
        kind: HistoryKind,
        table_id: &str,
        row_id: &str,
        before: Option<Row>,
        after: Option<Row>,
    ) {
        if let Some(history) = &self.history {
            history.borrow_mut().record(kind, table_id, row_id, before, after);
        }
    }

    fn push_views_changed(&mut self, table_id: &str) {
        self.changeset.push(StoreEvent::ViewsChanged {
            table_id: table_id.to_string(),
        });
        self.commit();
    }

    /// Persist, then hand pending events to subscribers.
    fn commit(&mut self) {
        let state = StateRef {
            tables: &self.tables,
            roles: &self.roles,
            permissions: &self.permissions,
            column_permissions: &self.column_permissions,
        };
        if let Err(e) = state.save(self.kv.as_mut(), &self.keys) {
            warn!("Failed to persist workspace state: {}", e);
        }
        self.notify();
    }

    fn notify(&mut self) {
        for event in self.changeset.drain() {
            self.listeners.emit(&event);
        }
    }
}

/// Insert `rows` in chunks of `chunk_size`, yielding to the executor between
/// chunks so other local tasks keep running. History is not recorded.
///
/// The store is borrowed only while a chunk is inserted.
pub async fn import_rows(
    store: &Rc<RefCell<SchemaStore>>,
    table_id: &str,
    rows: Vec<RowData>,
    chunk_size: usize,
) -> usize {
    let chunk_size = chunk_size.max(1);
    let total = rows.len();
    let mut inserted = 0;
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
        let chunk: Vec<RowData> = rows.by_ref().take(chunk_size).collect();
        let count = store.borrow_mut().insert_rows(table_id, chunk);
        if count == 0 {
            break;
        }
        inserted += count;
        tokio::task::yield_now().await;
    }

    info!("Imported {}/{} rows into '{}'", inserted, total, table_id);
    inserted
}

fn generated_row_id() -> String {
    format!("gen-{}", Uuid::new_v4().simple())
}

fn slug(name: &str) -> String {
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

fn asset_name(row: &Row) -> String {
    ["name", "title", "description"]
        .iter()
        .filter_map(|key| row.field(key))
        .map(|v| v.to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| UNTITLED_ASSET.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnStyle, ColumnValidation, FormSection};
    use std::cell::Cell;

    fn data(pairs: &[(&str, CellValue)]) -> RowData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn tasks_table() -> TableDefinition {
        let mut table = TableDefinition::new("tasks", "Tasks");
        table.columns = vec![
            ColumnDefinition::new("id", "ID", ColumnType::Text),
            ColumnDefinition::new("name", "Name", ColumnType::Text),
            ColumnDefinition::new("photo", "Photo", ColumnType::Image),
        ];
        table
    }

    fn store() -> SchemaStore {
        SchemaStore::with_tables(vec![tasks_table()])
    }

    #[test]
    fn test_add_table_seeds_columns() {
        let mut store = SchemaStore::with_tables(vec![]);
        let table = store.add_table("Weekly   Report");
        assert!(table.id.starts_with("weekly_report_"));
        let keys: Vec<&str> = table.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["id", "created_at"]);
        assert_eq!(table.columns[0].width, 80);
        assert_eq!(table.columns[1].column_type, ColumnType::Date);
        assert!(!table.is_system);
    }

    #[test]
    fn test_add_table_ids_are_unique() {
        let mut store = SchemaStore::with_tables(vec![]);
        let a = store.add_table("Same").id.clone();
        let b = store.add_table("Same").id.clone();
        assert_ne!(a, b);
    }

    #[test]
    fn test_delete_table_refuses_system() {
        let mut store = SchemaStore::with_defaults();
        assert_eq!(
            store.delete_table("projects"),
            Err(SchemaError::SystemTable("projects".to_string()))
        );
        let id = store.add_table("Scratch").id.clone();
        assert_eq!(store.delete_table(&id), Ok(true));
        assert_eq!(store.delete_table(&id), Ok(false));
    }

    #[test]
    fn test_add_column_rejects_duplicates_and_dangling_references() {
        let mut store = store();
        let dup = store.add_column("tasks", ColumnDefinition::new("name", "Again", ColumnType::Text));
        assert!(matches!(dup, Err(SchemaError::DuplicateColumn { .. })));

        let dangling = ColumnDefinition::reference("owner", "Owner", "nowhere", "name");
        assert!(matches!(
            store.add_column("tasks", dangling),
            Err(SchemaError::UnknownReferenceTarget { .. })
        ));

        let untargeted = ColumnDefinition::new("owner", "Owner", ColumnType::Reference);
        assert!(matches!(
            store.add_column("tasks", untargeted),
            Err(SchemaError::MissingReferenceTarget { .. })
        ));

        assert_eq!(
            store.add_column("missing", ColumnDefinition::new("x", "X", ColumnType::Text)),
            Ok(false)
        );
    }

    #[test]
    fn test_update_column_merges_nested() {
        let mut store = store();
        let patch = ColumnPatch {
            validation: Some(ColumnValidation::required()),
            style: Some(ColumnStyle {
                bold: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(store.update_column("tasks", "name", &patch), Ok(true));

        let patch = ColumnPatch {
            validation: Some(ColumnValidation {
                max_length: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        store.update_column("tasks", "name", &patch).unwrap();

        let column = store.table("tasks").unwrap().column("name").unwrap();
        assert_eq!(column.validation.required, Some(true));
        assert_eq!(column.validation.max_length, Some(10));
        assert_eq!(column.style.bold, Some(true));
        assert_eq!(store.update_column("tasks", "nope", &patch), Ok(false));
    }

    #[test]
    fn test_move_column_boundaries() {
        let mut store = store();
        assert!(!store.move_column("tasks", "id", MoveDirection::Up));
        assert!(!store.move_column("tasks", "photo", MoveDirection::Down));
        assert!(store.move_column("tasks", "photo", MoveDirection::Up));
        let keys: Vec<String> = store.table("tasks").unwrap().columns.iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec!["id", "photo", "name"]);
    }

    #[test]
    fn test_add_row_generates_id_and_drops_unknown_keys() {
        let mut store = store();
        let id = store
            .add_row("tasks", data(&[("name", "A".into()), ("bogus", 1.into())]), false)
            .unwrap();
        assert!(id.starts_with("gen-"));
        let row = store.row("tasks", &id).unwrap();
        assert!(row.field("bogus").is_none());
        assert_eq!(row.field("name"), Some(&"A".into()));
    }

    #[test]
    fn test_add_row_keeps_given_id_unless_taken() {
        let mut store = store();
        let id = store.add_row("tasks", data(&[("id", "t1".into())]), false).unwrap();
        assert_eq!(id, "t1");
        let second = store.add_row("tasks", data(&[("id", "t1".into())]), false).unwrap();
        assert_ne!(second, "t1");
    }

    #[test]
    fn test_reinsert_row_keeps_id_and_refuses_collision() {
        let mut store = store();
        let mut row = Row::new("t1");
        row.set("name", "A");
        assert!(store.reinsert_row("tasks", row.clone()));
        assert_eq!(store.row("tasks", "t1").unwrap().field("name"), Some(&"A".into()));

        row.set("name", "B");
        assert!(!store.reinsert_row("tasks", row));
        assert_eq!(store.table("tasks").unwrap().rows.len(), 1);
        assert_eq!(store.row("tasks", "t1").unwrap().field("name"), Some(&"A".into()));
        assert!(!store.reinsert_row("nope", Row::new("x")));
    }

    #[test]
    fn test_update_row_merges_and_ignores_missing() {
        let mut store = store();
        let id = store
            .add_row("tasks", data(&[("name", "A".into()), ("photo", "x.png".into())]), false)
            .unwrap();
        assert!(store.update_row("tasks", &id, data(&[("name", "B".into())]), false));
        let row = store.row("tasks", &id).unwrap();
        assert_eq!(row.field("name"), Some(&"B".into()));
        assert_eq!(row.field("photo"), Some(&"x.png".into()));

        let generation = store.generation();
        assert!(!store.update_row("tasks", "missing", RowData::new(), false));
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn test_duplicate_row_suffixes_name() {
        let mut store = store();
        let id = store.add_row("tasks", data(&[("name", "Roof".into())]), false).unwrap();
        let copy = store.duplicate_row("tasks", &id).unwrap();
        assert!(copy.starts_with("copy-"));
        assert_eq!(
            store.row("tasks", &copy).unwrap().field("name"),
            Some(&"Roof (Copy)".into())
        );

        let unnamed = store.add_row("tasks", RowData::new(), false).unwrap();
        let copy = store.duplicate_row("tasks", &unnamed).unwrap();
        assert!(store.row("tasks", &copy).unwrap().field("name").is_none());
        assert!(store.duplicate_row("tasks", "missing").is_none());
    }

    #[test]
    fn test_history_recording_respects_skip_flag() {
        let mut store = store();
        let history = HistoryLog::shared(100, "u1");
        store.attach_history(Rc::clone(&history));

        let id = store.add_row("tasks", data(&[("name", "A".into())]), false).unwrap();
        store.update_row("tasks", &id, data(&[("name", "B".into())]), true);
        store.delete_row("tasks", &id, false);
        assert_eq!(history.borrow().undo_len(), 2);

        let delete = history.borrow().peek_undo().cloned().unwrap();
        assert_eq!(delete.kind, HistoryKind::Delete);
        assert_eq!(delete.before.unwrap().field("name"), Some(&"B".into()));
        assert!(delete.after.is_none());
    }

    #[test]
    fn test_subscribe_and_drop() {
        let mut store = store();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = store.subscribe(move |_| h.set(h.get() + 1));

        store.add_row("tasks", RowData::new(), false);
        store.force_refresh();
        assert_eq!(hits.get(), 2);

        drop(sub);
        store.add_row("tasks", RowData::new(), false);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_generation_bumps_per_mutation() {
        let mut store = store();
        let g0 = store.generation();
        store.add_row("tasks", RowData::new(), false);
        let g1 = store.generation();
        assert!(g1 > g0);
        store.force_refresh();
        assert!(store.generation() > g1);
    }

    #[test]
    fn test_permissions_admin_override_and_defaults() {
        let mut store = SchemaStore::with_defaults();
        assert_eq!(store.get_permission("admin", "projects"), PermissionRule::ALL);
        assert_eq!(store.get_permission("worker", "projects"), PermissionRule::NONE);
        assert_eq!(
            store.get_column_permission("worker", "projects", "budget"),
            ColumnPermission::ALL
        );

        assert!(!store.update_permission("admin", "projects", PermissionPatch {
            view: Some(false),
            ..Default::default()
        }));
        assert_eq!(store.get_permission("admin", "projects"), PermissionRule::ALL);

        store.update_permission("worker", "projects", PermissionPatch {
            view: Some(true),
            ..Default::default()
        });
        store.update_permission("worker", "projects", PermissionPatch {
            edit: Some(true),
            ..Default::default()
        });
        let rule = store.get_permission("worker", "projects");
        assert!(rule.view && rule.edit && !rule.create && !rule.delete);

        store.update_column_permission("worker", "projects", "budget", ColumnPermissionPatch {
            edit: Some(false),
            ..Default::default()
        });
        assert_eq!(
            store.get_column_permission("worker", "projects", "budget"),
            ColumnPermission { view: true, edit: false }
        );
    }

    #[test]
    fn test_roles_add_and_delete() {
        let mut store = SchemaStore::with_defaults();
        let id = store.add_role("Site Inspector", "#000");
        assert!(id.starts_with("site_inspector_"));
        store.update_permission(&id, "projects", PermissionPatch {
            view: Some(true),
            ..Default::default()
        });

        assert_eq!(store.delete_role(&id), Ok(true));
        assert!(store.roles().iter().all(|r| r.id != id));
        assert_eq!(store.get_permission(&id, "projects"), PermissionRule::NONE);

        assert_eq!(
            store.delete_role("admin"),
            Err(SchemaError::SystemRole("admin".to_string()))
        );
        assert_eq!(store.delete_role("ghost"), Ok(false));
    }

    #[test]
    fn test_views_and_form_layout() {
        let mut store = store();
        let view = SavedView {
            id: "v1".to_string(),
            name: "Mine".to_string(),
            view_mode: Default::default(),
            filters: Default::default(),
            sort_config: None,
            hidden_column_keys: vec![],
        };
        assert!(store.add_view("tasks", view));
        assert!(store.delete_view("tasks", "v1"));
        assert!(!store.delete_view("tasks", "v1"));

        let layout = FormLayout {
            sections: vec![FormSection {
                id: "s1".to_string(),
                title: "Main".to_string(),
                column_keys: vec!["name".to_string()],
                is_two_column: false,
            }],
        };
        assert!(store.save_form_layout("tasks", layout.clone()));
        assert_eq!(store.table("tasks").unwrap().form_layout, Some(layout));
    }

    #[test]
    fn test_lookup_map_and_assets() {
        let mut store = store();
        store.add_row("tasks", data(&[("id", "t1".into()), ("name", "Roof".into()), ("photo", "https://x/roof.png".into())]), false);
        store.add_row("tasks", data(&[("id", "t2".into()), ("photo", "x".into())]), false);

        let lookup = store.lookup_map("tasks", "name");
        assert_eq!(lookup.get("t1").map(String::as_str), Some("Roof"));
        assert_eq!(lookup.get("t2").map(String::as_str), Some(""));
        assert!(store.lookup_map("missing", "name").is_empty());

        let assets = store.all_assets();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "t1_photo");
        assert_eq!(assets[0].name, "Roof");

        let stats = store.total_stats();
        assert_eq!(stats, StoreStats { total_tables: 1, total_rows: 2, total_files: 1 });
    }

    #[test]
    fn test_persists_and_reloads() {
        let keys = StorageKeys::with_prefix("test");
        let mut store = SchemaStore::from_state(
            PersistedState {
                tables: vec![tasks_table()],
                roles: vec![],
                permissions: PermissionMatrix::new(),
                column_permissions: ColumnPermissionMatrix::new(),
            },
            Box::new(MemoryKv::new()),
            keys.clone(),
        );
        store.add_row("tasks", data(&[("id", "t1".into())]), false);

        let saved = store.kv.get(&keys.schema).unwrap().unwrap();
        let tables: Vec<TableDefinition> = serde_json::from_str(&saved).unwrap();
        assert_eq!(tables[0].rows[0].id, "t1");
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let store = SchemaStore::load(Box::new(MemoryKv::new()), StorageKeys::default());
        assert!(store.table("projects").is_some());
        assert_eq!(store.roles().len(), 5);
    }

    #[tokio::test]
    async fn test_import_rows_in_chunks() {
        let store = Rc::new(RefCell::new(store()));
        let events = Rc::new(Cell::new(0));
        let e = Rc::clone(&events);
        let _sub = store.borrow().subscribe(move |event| {
            if matches!(event, StoreEvent::RowsImported { .. }) {
                e.set(e.get() + 1);
            }
        });

        let rows: Vec<RowData> = (0..25)
            .map(|i| data(&[("name", format!("row {}", i).into())]))
            .collect();
        let inserted = import_rows(&store, "tasks", rows, 10).await;

        assert_eq!(inserted, 25);
        assert_eq!(events.get(), 3);
        assert_eq!(store.borrow().table("tasks").unwrap().rows.len(), 25);
        assert_eq!(import_rows(&store, "missing", vec![RowData::new()], 10).await, 0);
    }
}
