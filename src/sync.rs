//! Presence and sync channel between actors sharing one logical dataset.
//!
//! Each actor owns a [`PresenceChannel`] over some [`SyncTransport`]. The
//! in-process [`BroadcastBus`] connects actors in the same process; any
//! pub/sub transport can stand in for it.
//!
//! Cell locks are advisory. They let the grid warn a second editor but the
//! store accepts writes from anyone, so two simultaneous edits of one cell
//! resolve as last `ROW_UPDATE` processed wins.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::GridConfig;
use crate::error::SyncError;
use crate::messages::{CellRef, Envelope, SyncMessage, UserCursor};
use crate::schema::RowData;
use crate::store::SchemaStore;

/// Message transport between actors.
pub trait SyncTransport {
    /// Deliver to every connected actor, the sender included.
    fn send(&self, envelope: &Envelope) -> Result<(), SyncError>;

    /// Next pending message, `Ok(None)` when there is nothing to read.
    fn try_recv(&mut self) -> Result<Option<Envelope>, SyncError>;
}

// ==================== Broadcast bus ====================

/// In-process bus built on a bounded tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<String>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        BroadcastBus { sender }
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self::new(config.bus_capacity)
    }

    /// New endpoint that sees every message sent after this call.
    pub fn connect(&self) -> BusTransport {
        BusTransport {
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One actor's endpoint on a [`BroadcastBus`].
#[derive(Debug)]
pub struct BusTransport {
    sender: broadcast::Sender<String>,
    receiver: broadcast::Receiver<String>,
}

impl SyncTransport for BusTransport {
    fn send(&self, envelope: &Envelope) -> Result<(), SyncError> {
        let text = envelope.to_json()?;
        self.sender
            .send(text)
            .map(|_| ())
            .map_err(|_| SyncError::Disconnected)
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, SyncError> {
        match self.receiver.try_recv() {
            Ok(text) => Envelope::from_json(&text).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(skipped)) => Err(SyncError::Lagged(skipped)),
            Err(TryRecvError::Closed) => Err(SyncError::Disconnected),
        }
    }
}

// ==================== Presence channel ====================

/// Who this actor is, as shown to the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
}

impl ActorIdentity {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        ActorIdentity {
            user_id: user_id.into(),
            user_name: user_name.into(),
            color: color.into(),
        }
    }
}

/// Holder of an advisory cell lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
}

/// Connection health of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    /// Missed messages; remote presence was reset and is rebuilding.
    Lagged,
    /// Transport is gone; the actor works alone.
    Disconnected,
}

/// Summary of one [`PresenceChannel::pump`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub applied: usize,
    pub ignored_echoes: usize,
    pub malformed: usize,
}

pub struct PresenceChannel<T: SyncTransport = BusTransport> {
    transport: T,
    identity: ActorIdentity,
    cursors: HashMap<String, UserCursor>,
    locks: HashMap<CellRef, LockHolder>,
    timeout_ms: i64,
    state: ChannelState,
}

impl<T: SyncTransport> PresenceChannel<T> {
    pub fn new(transport: T, identity: ActorIdentity, config: &GridConfig) -> Self {
        PresenceChannel {
            transport,
            identity,
            cursors: HashMap::new(),
            locks: HashMap::new(),
            timeout_ms: config.presence_timeout_ms as i64,
            state: ChannelState::Connected,
        }
    }

    pub fn identity(&self) -> &ActorIdentity {
        &self.identity
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// True when presence can't be trusted: lagged or disconnected.
    pub fn is_degraded(&self) -> bool {
        self.state != ChannelState::Connected
    }

    // ==================== Outgoing ====================

    pub fn broadcast_cursor(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        column_key: Option<&str>,
        is_editing: bool,
        now: DateTime<Utc>,
    ) {
        let cursor = UserCursor {
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.user_name.clone(),
            color: self.identity.color.clone(),
            table_id: table_id.map(str::to_string),
            focused_row_id: row_id.map(str::to_string),
            focused_col_key: column_key.map(str::to_string),
            is_editing,
            last_active: now,
        };
        self.send(SyncMessage::CursorUpdate(cursor));
    }

    pub fn broadcast_lock(&mut self, cell: CellRef) {
        self.send(SyncMessage::CellLock {
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.user_name.clone(),
            color: self.identity.color.clone(),
            cell,
        });
    }

    pub fn broadcast_unlock(&mut self, cell: CellRef) {
        self.send(SyncMessage::CellUnlock {
            user_id: self.identity.user_id.clone(),
            cell,
        });
    }

    pub fn broadcast_row_update(&mut self, table_id: &str, row_id: &str, changes: RowData) {
        self.send(SyncMessage::RowUpdate {
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
            changes,
        });
    }

    pub fn broadcast_schema_change(&mut self, table_id: Option<&str>) {
        self.send(SyncMessage::SchemaChange {
            table_id: table_id.map(str::to_string),
        });
    }

    fn send(&mut self, message: SyncMessage) {
        if self.state == ChannelState::Disconnected {
            return;
        }
        let envelope = Envelope::new(self.identity.user_id.clone(), message);
        if let Err(e) = self.transport.send(&envelope) {
            warn!("Sync send failed, continuing without presence: {}", e);
            self.disconnect();
        }
    }

    // ==================== Incoming ====================

    /// Drain pending messages and apply them.
    ///
    /// Row updates go into `store` with history suppressed. Own echoes are
    /// skipped. Transport failures degrade the channel and never fail the
    /// caller.
    pub fn pump(&mut self, store: &mut SchemaStore, now: DateTime<Utc>) -> PumpReport {
        let mut report = PumpReport::default();
        if self.state == ChannelState::Disconnected {
            return report;
        }

        loop {
            match self.transport.try_recv() {
                Ok(Some(envelope)) => {
                    if self.state == ChannelState::Lagged {
                        self.state = ChannelState::Connected;
                    }
                    if envelope.sender == self.identity.user_id {
                        report.ignored_echoes += 1;
                        continue;
                    }
                    self.apply(envelope, store, now);
                    report.applied += 1;
                }
                Ok(None) => break,
                Err(SyncError::Lagged(skipped)) => {
                    warn!("Sync receiver lagged by {} messages, resetting presence", skipped);
                    self.cursors.clear();
                    self.locks.clear();
                    self.state = ChannelState::Lagged;
                }
                Err(SyncError::Codec(e)) => {
                    warn!("Dropping malformed sync message: {}", e);
                    report.malformed += 1;
                }
                Err(SyncError::Disconnected) => {
                    warn!("Sync transport closed, switching to single-actor mode");
                    self.disconnect();
                    break;
                }
            }
        }
        report
    }

    fn apply(&mut self, envelope: Envelope, store: &mut SchemaStore, now: DateTime<Utc>) {
        let sender = envelope.sender;
        match envelope.message {
            SyncMessage::CursorUpdate(mut cursor) => {
                debug!("Cursor update from {}", sender);
                // Receipt time, not the sender's clock
                cursor.last_active = now;
                self.cursors.insert(sender, cursor);
            }
            SyncMessage::CellLock {
                user_id,
                user_name,
                color,
                cell,
            } => {
                debug!("{} locked {}/{}/{}", user_id, cell.table_id, cell.row_id, cell.column_key);
                // A lock is also a cursor, so the sweep can always release it
                let cursor = self.cursors.entry(sender).or_insert_with(|| UserCursor {
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    color: color.clone(),
                    table_id: None,
                    focused_row_id: None,
                    focused_col_key: None,
                    is_editing: false,
                    last_active: now,
                });
                cursor.table_id = Some(cell.table_id.clone());
                cursor.focused_row_id = Some(cell.row_id.clone());
                cursor.focused_col_key = Some(cell.column_key.clone());
                cursor.is_editing = true;
                cursor.last_active = now;
                self.locks.insert(
                    cell,
                    LockHolder {
                        user_id,
                        user_name,
                        color,
                    },
                );
            }
            SyncMessage::CellUnlock { user_id, cell } => {
                self.touch(&sender, now);
                if self.locks.get(&cell).is_some_and(|h| h.user_id == user_id) {
                    self.locks.remove(&cell);
                }
            }
            SyncMessage::RowUpdate {
                table_id,
                row_id,
                changes,
            } => {
                debug!("Applying remote update to {}/{}", table_id, row_id);
                self.touch(&sender, now);
                if !store.update_row(&table_id, &row_id, changes, true) {
                    debug!("Remote update for unknown row {}/{} ignored", table_id, row_id);
                }
            }
            SyncMessage::SchemaChange { table_id } => {
                debug!("Remote schema change ({:?})", table_id);
                self.touch(&sender, now);
                store.force_refresh();
            }
        }
    }

    fn touch(&mut self, user_id: &str, now: DateTime<Utc>) {
        if let Some(cursor) = self.cursors.get_mut(user_id) {
            cursor.last_active = now;
        }
    }

    fn disconnect(&mut self) {
        self.state = ChannelState::Disconnected;
        self.cursors.clear();
        self.locks.clear();
    }

    // ==================== Presence state ====================

    /// Evict cursors idle longer than the presence timeout, releasing their
    /// locks. Returns the evicted actor ids.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeout_ms = self.timeout_ms;
        let mut evicted: Vec<String> = self
            .cursors
            .iter()
            .filter(|(_, c)| (now - c.last_active).num_milliseconds() > timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        evicted.sort();

        for user_id in &evicted {
            debug!("Evicting stale cursor {}", user_id);
            self.cursors.remove(user_id);
        }
        let cursors = &self.cursors;
        self.locks.retain(|_, holder| cursors.contains_key(&holder.user_id));
        evicted
    }

    pub fn cursor(&self, user_id: &str) -> Option<&UserCursor> {
        self.cursors.get(user_id)
    }

    /// Remote cursors, ordered by user id.
    pub fn cursors(&self) -> Vec<&UserCursor> {
        let mut cursors: Vec<&UserCursor> = self.cursors.values().collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        cursors
    }

    pub fn cursors_for_table(&self, table_id: &str) -> Vec<&UserCursor> {
        self.cursors()
            .into_iter()
            .filter(|c| c.table_id.as_deref() == Some(table_id))
            .collect()
    }

    pub fn lock_holder(&self, cell: &CellRef) -> Option<&LockHolder> {
        self.locks.get(cell)
    }

    /// Locked by an actor other than this one.
    pub fn is_cell_locked(&self, cell: &CellRef) -> bool {
        self.locks
            .get(cell)
            .is_some_and(|holder| holder.user_id != self.identity.user_id)
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
