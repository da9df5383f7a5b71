//! Schema model: tables, columns, rows, views, roles and permissions.
//!
//! # Examples
//!
//! ```
//! use livegrid::{ColumnDefinition, ColumnType, TableDefinition};
//!
//! let mut table = TableDefinition::new("tasks", "Tasks");
//! table.columns.push(ColumnDefinition::new("name", "Name", ColumnType::Text));
//!
//! assert!(table.has_column("name"));
//! assert!(table.has_column("id"));
//! assert!(!table.has_column("budget"));
//! ```

use crate::error::ValidationError;
use crate::value::{CellValue, ColumnType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Reserved key holding a row's identity.
pub const ID_KEY: &str = "id";

/// Row payload without identity guarantees (may or may not contain `id`).
pub type RowData = BTreeMap<String, CellValue>;

/// A table row: mandatory unique `id` plus an open map of cell values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(flatten)]
    pub fields: RowData,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Row {
            id: id.into(),
            fields: RowData::new(),
        }
    }

    /// Build a row from loose data, taking the id from `data["id"]` when it
    /// is non-empty text and from `fallback_id` otherwise.
    pub fn from_data(mut data: RowData, fallback_id: impl FnOnce() -> String) -> Self {
        let id = match data.remove(ID_KEY) {
            Some(CellValue::Text(id)) if !id.trim().is_empty() => id,
            Some(CellValue::Int(id)) => id.to_string(),
            _ => fallback_id(),
        };
        Row { id, fields: data }
    }

    /// Value for a key, treating `id` as a regular readable field.
    pub fn get(&self, key: &str) -> Option<CellValue> {
        if key == ID_KEY {
            Some(CellValue::Text(self.id.clone()))
        } else {
            self.fields.get(key).cloned()
        }
    }

    /// Borrowing variant of [`Row::get`] that ignores the `id` key.
    pub fn field(&self, key: &str) -> Option<&CellValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CellValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Full snapshot including `id`, used for history and wire payloads.
    pub fn to_data(&self) -> RowData {
        let mut data = self.fields.clone();
        data.insert(ID_KEY.to_string(), CellValue::Text(self.id.clone()));
        data
    }

    /// Shallow merge: every key in `data` except `id` overwrites this row.
    pub fn merge(&mut self, data: &RowData) {
        for (key, value) in data {
            if key != ID_KEY {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ColumnValidation {
    pub fn required() -> Self {
        ColumnValidation {
            required: Some(true),
            ..Default::default()
        }
    }

    /// Field-by-field merge; fields set in `patch` win.
    pub fn merge(&mut self, patch: &ColumnValidation) {
        if patch.required.is_some() {
            self.required = patch.required;
        }
        if patch.min_length.is_some() {
            self.min_length = patch.min_length;
        }
        if patch.max_length.is_some() {
            self.max_length = patch.max_length;
        }
        if patch.min.is_some() {
            self.min = patch.min;
        }
        if patch.max.is_some() {
            self.max = patch.max;
        }
    }

    /// Check a value against these rules. Empty values only fail `required`;
    /// length and range rules apply to non-empty values.
    pub fn check(&self, column: &str, value: &CellValue) -> Result<(), ValidationError> {
        if value.is_empty() {
            if self.required.unwrap_or(false) {
                return Err(ValidationError::Required {
                    column: column.to_string(),
                });
            }
            return Ok(());
        }

        if let CellValue::Text(text) = value {
            let actual = text.chars().count();
            if let Some(min) = self.min_length {
                if actual < min {
                    return Err(ValidationError::TooShort {
                        column: column.to_string(),
                        min,
                        actual,
                    });
                }
            }
            if let Some(max) = self.max_length {
                if actual > max {
                    return Err(ValidationError::TooLong {
                        column: column.to_string(),
                        max,
                        actual,
                    });
                }
            }
        }

        if let Some(actual) = value.as_f64() {
            if let Some(min) = self.min {
                if actual < min {
                    return Err(ValidationError::BelowMinimum {
                        column: column.to_string(),
                        min,
                        actual,
                    });
                }
            }
            if let Some(max) = self.max {
                if actual > max {
                    return Err(ValidationError::AboveMaximum {
                        column: column.to_string(),
                        max,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSize {
    Sm,
    Md,
    Lg,
}

/// Presentation hints; the engine stores them but never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_size: Option<TextSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ColumnStyle {
    pub fn merge(&mut self, patch: &ColumnStyle) {
        if patch.text_size.is_some() {
            self.text_size = patch.text_size;
        }
        if patch.bold.is_some() {
            self.bold = patch.bold;
        }
        if patch.color.is_some() {
            self.color = patch.color.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_label_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub validation: ColumnValidation,
    #[serde(default)]
    pub style: ColumnStyle,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

fn default_width() -> u32 {
    150
}

impl ColumnDefinition {
    pub fn new(key: impl Into<String>, label: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDefinition {
            key: key.into(),
            label: label.into(),
            column_type,
            width: default_width(),
            reference_table_id: None,
            reference_label_key: None,
            options: Vec::new(),
            validation: ColumnValidation::default(),
            style: ColumnStyle::default(),
            hidden: false,
            formula: None,
        }
    }

    /// Foreign-key column displaying `label_key` of rows in `table_id`.
    pub fn reference(
        key: impl Into<String>,
        label: impl Into<String>,
        table_id: impl Into<String>,
        label_key: impl Into<String>,
    ) -> Self {
        let mut column = Self::new(key, label, ColumnType::Reference);
        column.reference_table_id = Some(table_id.into());
        column.reference_label_key = Some(label_key.into());
        column
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_validation(mut self, validation: ColumnValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Validate a committed value: option membership, then the column rules.
    pub fn validate(&self, value: &CellValue) -> Result<(), ValidationError> {
        if self.column_type.is_numeric() && !value.is_empty() && value.as_f64().is_none() {
            return Err(ValidationError::NotANumber {
                column: self.key.clone(),
                input: value.to_string(),
            });
        }
        if self.column_type.has_options() && !self.options.is_empty() && !value.is_empty() {
            let text = value.to_string();
            if !self.options.iter().any(|o| *o == text) {
                return Err(ValidationError::UnknownOption {
                    column: self.key.clone(),
                    input: text,
                });
            }
        }
        self.validation.check(&self.key, value)
    }
}

/// Partial column update. `key` is immutable and therefore absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPatch {
    pub label: Option<String>,
    pub column_type: Option<ColumnType>,
    pub width: Option<u32>,
    pub reference_table_id: Option<String>,
    pub reference_label_key: Option<String>,
    pub options: Option<Vec<String>>,
    pub validation: Option<ColumnValidation>,
    pub style: Option<ColumnStyle>,
    pub hidden: Option<bool>,
    pub formula: Option<String>,
}

impl ColumnPatch {
    pub(crate) fn apply_to(&self, column: &mut ColumnDefinition) {
        if let Some(label) = &self.label {
            column.label = label.clone();
        }
        if let Some(column_type) = self.column_type {
            column.column_type = column_type;
        }
        if let Some(width) = self.width {
            column.width = width;
        }
        if let Some(table_id) = &self.reference_table_id {
            column.reference_table_id = Some(table_id.clone());
        }
        if let Some(label_key) = &self.reference_label_key {
            column.reference_label_key = Some(label_key.clone());
        }
        if let Some(options) = &self.options {
            column.options = options.clone();
        }
        if let Some(validation) = &self.validation {
            column.validation.merge(validation);
        }
        if let Some(style) = &self.style {
            column.style.merge(style);
        }
        if let Some(hidden) = self.hidden {
            column.hidden = hidden;
        }
        if let Some(formula) = &self.formula {
            column.formula = Some(formula.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    Board,
    Gallery,
    Calendar,
    Gantt,
    Table,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub key: String,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn asc(key: impl Into<String>) -> Self {
        SortConfig {
            key: key.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        SortConfig {
            key: key.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Header-click semantics: same key flips direction, a new key starts
    /// ascending.
    pub fn toggle(current: Option<&SortConfig>, key: &str) -> SortConfig {
        match current {
            Some(sort) if sort.key == key => SortConfig {
                key: key.to_string(),
                direction: match sort.direction {
                    SortDirection::Asc => SortDirection::Desc,
                    SortDirection::Desc => SortDirection::Asc,
                },
            },
            _ => SortConfig::asc(key),
        }
    }
}

/// Named snapshot of pipeline inputs plus column visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub sort_config: Option<SortConfig>,
    #[serde(default)]
    pub hidden_column_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub id: String,
    pub title: String,
    pub column_keys: Vec<String>,
    #[serde(default)]
    pub is_two_column: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormLayout {
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub views: Vec<SavedView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_layout: Option<FormLayout>,
    #[serde(default)]
    pub is_system: bool,
}

impl TableDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        TableDefinition {
            id: id.into(),
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            views: Vec::new(),
            form_layout: None,
            is_system: false,
        }
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }

    /// `id` is always a valid key even when no `id` column is declared.
    pub fn has_column(&self, key: &str) -> bool {
        key == ID_KEY || self.column(key).is_some()
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn row_index(&self, row_id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id == row_id)
    }

    /// Drop keys that are not columns of this table. Returns the dropped keys.
    pub fn retain_known_keys(&self, data: &mut RowData) -> Vec<String> {
        let unknown: Vec<String> = data
            .keys()
            .filter(|key| !self.has_column(key))
            .cloned()
            .collect();
        for key in &unknown {
            data.remove(key);
        }
        unknown
    }

    /// Export to CSV: header of column labels, every non-empty value quoted.
    pub fn to_csv(&self) -> String {
        let header: Vec<&str> = self.columns.iter().map(|c| c.label.as_str()).collect();
        let mut result = header.join(",");
        result.push('\n');

        let lines: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| match row.get(&c.key) {
                        Some(value) if !value.is_empty() => {
                            format!("\"{}\"", value.to_string().replace('"', "\"\""))
                        }
                        _ => String::new(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        result.push_str(&lines.join("\n"));
        result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub view: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
}

impl PermissionRule {
    pub const ALL: PermissionRule = PermissionRule {
        view: true,
        create: true,
        edit: true,
        delete: true,
    };

    pub const NONE: PermissionRule = PermissionRule {
        view: false,
        create: false,
        edit: false,
        delete: false,
    };
}

/// Partial permission update merged over the current effective rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPatch {
    pub view: Option<bool>,
    pub create: Option<bool>,
    pub edit: Option<bool>,
    pub delete: Option<bool>,
}

impl PermissionPatch {
    pub(crate) fn apply_to(&self, rule: &mut PermissionRule) {
        if let Some(v) = self.view {
            rule.view = v;
        }
        if let Some(v) = self.create {
            rule.create = v;
        }
        if let Some(v) = self.edit {
            rule.edit = v;
        }
        if let Some(v) = self.delete {
            rule.delete = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPermission {
    pub view: bool,
    pub edit: bool,
}

impl ColumnPermission {
    pub const ALL: ColumnPermission = ColumnPermission {
        view: true,
        edit: true,
    };
}

impl Default for ColumnPermission {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPermissionPatch {
    pub view: Option<bool>,
    pub edit: Option<bool>,
}

impl ColumnPermissionPatch {
    pub(crate) fn apply_to(&self, perm: &mut ColumnPermission) {
        if let Some(v) = self.view {
            perm.view = v;
        }
        if let Some(v) = self.edit {
            perm.edit = v;
        }
    }
}

/// role id -> table id -> rule
pub type PermissionMatrix = HashMap<String, HashMap<String, PermissionRule>>;

/// table id -> column key -> role id -> permission
pub type ColumnPermissionMatrix =
    HashMap<String, HashMap<String, HashMap<String, ColumnPermission>>>;
