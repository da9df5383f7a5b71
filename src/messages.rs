/// Presence and sync message types exchanged between actors
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::schema::RowData;

/// Address of a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub table_id: String,
    pub row_id: String,
    pub column_key: String,
}

impl CellRef {
    pub fn new(
        table_id: impl Into<String>,
        row_id: impl Into<String>,
        column_key: impl Into<String>,
    ) -> Self {
        CellRef {
            table_id: table_id.into(),
            row_id: row_id.into(),
            column_key: column_key.into(),
        }
    }
}

/// Last known focus of a remote actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCursor {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub focused_row_id: Option<String>,
    #[serde(default)]
    pub focused_col_key: Option<String>,
    #[serde(default)]
    pub is_editing: bool,
    pub last_active: DateTime<Utc>,
}

/// Messages broadcast between actors sharing a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// Actor moved focus. Informational only
    CursorUpdate(UserCursor),

    /// Actor began editing a cell. Advisory
    CellLock {
        user_id: String,
        user_name: String,
        color: String,
        cell: CellRef,
    },

    /// Actor finished editing
    CellUnlock { user_id: String, cell: CellRef },

    /// Actor committed field changes
    RowUpdate {
        table_id: String,
        row_id: String,
        changes: RowData,
    },

    /// Actor changed the schema; receivers refresh
    SchemaChange {
        #[serde(default)]
        table_id: Option<String>,
    },
}

/// A message plus the id of the actor that sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, message: SyncMessage) -> Self {
        Envelope {
            sender: sender.into(),
            message,
        }
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::Codec(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellValue;
    use serde_json::json;

    #[test]
    fn test_wire_form_is_tagged() {
        let msg = SyncMessage::CellUnlock {
            user_id: "u1".to_string(),
            cell: CellRef::new("projects", "p1", "name"),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], json!("CELL_UNLOCK"));
        assert_eq!(value["payload"]["cell"]["row_id"], json!("p1"));

        let schema = serde_json::to_value(SyncMessage::SchemaChange { table_id: None }).unwrap();
        assert_eq!(schema["type"], json!("SCHEMA_CHANGE"));
    }

    #[test]
    fn test_envelope_from_json() {
        let text = r#"{
            "sender": "u2",
            "message": {
                "type": "ROW_UPDATE",
                "payload": {"table_id": "t", "row_id": "r1", "changes": {"budget": 12, "name": "B"}}
            }
        }"#;
        let envelope = Envelope::from_json(text).unwrap();
        assert_eq!(envelope.sender, "u2");
        match envelope.message {
            SyncMessage::RowUpdate { changes, .. } => {
                assert_eq!(changes.get("budget"), Some(&CellValue::Int(12)));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_is_codec_error() {
        let err = Envelope::from_json(r#"{"sender":"u","message":{"type":"NOPE"}}"#).unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));
    }
}
