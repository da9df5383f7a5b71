//! Cell values and column types.
//!
//! Rows are open maps from column key to [`CellValue`]. The value enum is a
//! small tagged union instead of free-form JSON so every read and write site
//! can match on it. Dates are stored as ISO-8601 text.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Select,
    Reference,
    Currency,
    Status,
    Image,
    File,
    Tags,
    Progress,
    LongText,
    Formula,
}

impl ColumnType {
    /// Returns true for types whose cells hold numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Number | ColumnType::Currency | ColumnType::Progress)
    }

    /// Returns true for types whose cells hold an asset URL.
    pub fn is_asset(&self) -> bool {
        matches!(self, ColumnType::Image | ColumnType::File)
    }

    /// Returns true for types restricted to the column's `options`.
    pub fn has_options(&self) -> bool {
        matches!(self, ColumnType::Select | ColumnType::Status)
    }
}

/// Value stored in a single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null, empty text and empty lists all count as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            CellValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Parse user-entered text into a value appropriate for `column_type`.
    ///
    /// Empty input becomes `Null`. Numeric columns fall back to text when the
    /// input doesn't parse so the caller's validation can report it.
    pub fn parse_for(column_type: ColumnType, input: &str) -> CellValue {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }

        match column_type {
            t if t.is_numeric() => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    CellValue::Int(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    CellValue::Float(f)
                } else {
                    CellValue::Text(input.to_string())
                }
            }
            ColumnType::Tags => CellValue::List(
                trimmed
                    .split(',')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect(),
            ),
            _ => CellValue::Text(input.to_string()),
        }
    }

    /// Ordering used by the sort pipeline. Numbers sort before everything
    /// else and compare with `f64::total_cmp`; the rest compare by their
    /// lowercased display text. Total for any mix of variants.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => {
                let a = self.to_string().to_lowercase();
                let b = other.to_string().to_lowercase();
                a.cmp(&b)
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            CellValue::Null => JsonValue::Null,
            CellValue::Bool(v) => JsonValue::Bool(*v),
            CellValue::Int(v) => JsonValue::Number((*v).into()),
            CellValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            CellValue::Text(v) => JsonValue::String(v.clone()),
            CellValue::List(v) => {
                JsonValue::Array(v.iter().cloned().map(JsonValue::String).collect())
            }
        }
    }

    /// Convert a JSON value. Nested objects and mixed arrays are flattened
    /// to their JSON text since cells never hold structured data.
    pub fn from_json(value: &JsonValue) -> CellValue {
        match value {
            JsonValue::Null => CellValue::Null,
            JsonValue::Bool(b) => CellValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellValue::Int(i)
                } else {
                    n.as_f64().map(CellValue::Float).unwrap_or(CellValue::Null)
                }
            }
            JsonValue::String(s) => CellValue::Text(s.clone()),
            JsonValue::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                match strings {
                    Some(list) => CellValue::List(list),
                    None => CellValue::Text(value.to_string()),
                }
            }
            JsonValue::Object(_) => CellValue::Text(value.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(v) => f.write_str(v),
            CellValue::List(v) => f.write_str(&v.join(", ")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<Vec<String>> for CellValue {
    fn from(v: Vec<String>) -> Self {
        CellValue::List(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}
