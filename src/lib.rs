//! LiveGrid - dynamic table engine for no-code workspaces
//!
//! A mutable, user-defined schema store with per-row undo history, a
//! filter/sort pipeline over virtual index maps, windowed rendering math and
//! advisory multi-actor presence. Everything runs single-threaded per actor;
//! shared services are `Rc<RefCell<_>>` wired by [`Workspace`].
//!
//! ```
//! use livegrid::{ColumnDefinition, ColumnType, RowData, SchemaStore, TableDefinition};
//!
//! let mut table = TableDefinition::new("tasks", "Tasks");
//! table.columns.push(ColumnDefinition::new("title", "Title", ColumnType::Text));
//! let mut store = SchemaStore::with_tables(vec![table]);
//!
//! let mut data = RowData::new();
//! data.insert("title".to_string(), "Pour concrete".into());
//! let id = store.add_row("tasks", data, false).unwrap();
//! assert_eq!(store.row("tasks", &id).unwrap().field("title"), Some(&"Pour concrete".into()));
//! ```

pub mod annotate;
pub mod automation;
pub mod changeset;
pub mod config;
pub mod defaults;
pub mod error;
pub mod formula;
pub mod grid;
pub mod history;
pub mod index_map;
pub mod messages;
pub mod persistence;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod sync;
pub mod value;
pub mod virtualizer;
pub mod workspace;

pub use annotate::{annotate_row, annotate_table, Annotation, Annotator};
pub use automation::{
    Automation, AutomationAction, AutomationCondition, AutomationEngine, AutomationTrigger,
    ConditionOperator, Notification, NotificationOutbox, NotificationSink, TriggerKind,
};
pub use changeset::{Changeset, ListenerRegistry, StoreEvent, Subscription};
pub use config::GridConfig;
pub use error::{
    AnnotateError, ConfigError, FormulaError, GridError, PersistenceError, Result, SchemaError,
    SyncError, ValidationError,
};
pub use grid::{Direction, FocusState, GridController, GridKey};
pub use history::{HistoryEntry, HistoryKind, HistoryLog};
pub use index_map::VirtualIndexMap;
pub use messages::{CellRef, Envelope, SyncMessage, UserCursor};
pub use persistence::{DirKv, KeyValueStore, MemoryKv, PersistedState, StorageKeys};
pub use pipeline::{display_value, process_rows, LookupMaps, RowPipeline, MISSING_REFERENCE};
pub use schema::{
    ColumnDefinition, ColumnPatch, ColumnPermission, ColumnPermissionPatch, ColumnStyle,
    ColumnValidation, FormLayout, FormSection, MoveDirection, PermissionPatch, PermissionRule,
    Role, Row, RowData, SavedView, SortConfig, SortDirection, TableDefinition, ViewMode,
};
pub use store::{import_rows, FileAsset, SchemaStore, StoreStats, ADMIN_ROLE};
pub use sync::{ActorIdentity, BroadcastBus, BusTransport, ChannelState, PresenceChannel, SyncTransport};
pub use value::{CellValue, ColumnType};
pub use virtualizer::{compute_window, VirtualItem, VirtualWindow, Virtualizer};
pub use workspace::Workspace;
