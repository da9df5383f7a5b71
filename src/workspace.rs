//! Explicit wiring of one actor's services.
//!
//! A [`Workspace`] owns the shared store, its history log, the automation
//! engine and optionally a presence channel. Tests build a fresh one per case.

use chrono::{DateTime, Utc};
use log::info;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::automation::{AutomationEngine, Notification, NotificationOutbox};
use crate::config::GridConfig;
use crate::defaults;
use crate::error::Result;
use crate::grid::GridController;
use crate::history::{HistoryEntry, HistoryLog};
use crate::persistence::{DirKv, KeyValueStore, MemoryKv, StorageKeys};
use crate::schema::RowData;
use crate::store::{self, SchemaStore};
use crate::sync::{ActorIdentity, BroadcastBus, PresenceChannel};

pub struct Workspace {
    config: GridConfig,
    store: Rc<RefCell<SchemaStore>>,
    history: Rc<RefCell<HistoryLog>>,
    presence: Option<Rc<RefCell<PresenceChannel>>>,
    automations: AutomationEngine,
    notifications: NotificationOutbox,
}

impl Workspace {
    /// Load state from `kv` (falling back to the built-in dataset) and wire
    /// history and the sample automations.
    pub fn new(config: GridConfig, kv: Box<dyn KeyValueStore>, user_id: &str) -> Self {
        let keys = StorageKeys::with_prefix(&config.storage_prefix);
        let mut store = SchemaStore::load(kv, keys);
        let history = HistoryLog::shared(config.history_capacity, user_id);
        store.attach_history(Rc::clone(&history));

        let notifications = NotificationOutbox::new();
        let mut automations = AutomationEngine::new(notifications.clone());
        automations.attach(&store);
        for automation in defaults::default_automations() {
            automations.add_automation(automation);
        }

        info!("Workspace ready for user {}", user_id);
        Workspace {
            config,
            store: Rc::new(RefCell::new(store)),
            history,
            presence: None,
            automations,
            notifications,
        }
    }

    pub fn in_memory(config: GridConfig, user_id: &str) -> Self {
        Self::new(config, Box::new(MemoryKv::new()), user_id)
    }

    /// Workspace persisted as JSON files under `dir`.
    pub fn open_dir(config: GridConfig, dir: impl AsRef<Path>, user_id: &str) -> Result<Self> {
        let kv = DirKv::open(dir)?;
        Ok(Self::new(config, Box::new(kv), user_id))
    }

    /// Connect to `bus` as `identity`.
    pub fn join(mut self, bus: &BroadcastBus, identity: ActorIdentity) -> Self {
        let channel = PresenceChannel::new(bus.connect(), identity, &self.config);
        self.presence = Some(Rc::new(RefCell::new(channel)));
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn store(&self) -> &Rc<RefCell<SchemaStore>> {
        &self.store
    }

    pub fn history(&self) -> &Rc<RefCell<HistoryLog>> {
        &self.history
    }

    pub fn presence(&self) -> Option<&Rc<RefCell<PresenceChannel>>> {
        self.presence.as_ref()
    }

    pub fn automations(&mut self) -> &mut AutomationEngine {
        &mut self.automations
    }

    /// Grid over `table_id` for `role_id`, sharing this workspace's presence.
    pub fn grid(&self, table_id: &str, role_id: &str) -> GridController {
        let grid = GridController::new(Rc::clone(&self.store), table_id, role_id, &self.config);
        match &self.presence {
            Some(presence) => grid.with_presence(Rc::clone(presence)),
            None => grid,
        }
    }

    pub fn undo(&self) -> Option<HistoryEntry> {
        HistoryLog::undo(&self.history, &mut self.store.borrow_mut())
    }

    pub fn redo(&self) -> Option<HistoryEntry> {
        HistoryLog::redo(&self.history, &mut self.store.borrow_mut())
    }

    /// Run automations for changes made since the last call.
    pub fn run_automations(&mut self) -> usize {
        self.automations.process(&mut self.store.borrow_mut())
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        self.notifications.take()
    }

    /// Periodic work: incoming sync messages, presence sweep, automations.
    /// Returns evicted actor ids.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = match &self.presence {
            Some(presence) => {
                let mut presence = presence.borrow_mut();
                presence.pump(&mut self.store.borrow_mut(), now);
                presence.sweep(now)
            }
            None => Vec::new(),
        };
        self.run_automations();
        evicted
    }

    /// Bulk insert using the configured chunk size.
    pub async fn import_rows(&self, table_id: &str, rows: Vec<RowData>) -> usize {
        store::import_rows(&self.store, table_id, rows, self.config.bulk_chunk_size).await
    }
}
