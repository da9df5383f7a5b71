//! Change notification for the schema store.
//!
//! Mutations push [`StoreEvent`]s into a [`Changeset`] buffer. Once the
//! mutation is finished and all borrows are released the store drains the
//! buffer and hands each event to the [`ListenerRegistry`].
//!
//! # Usage Pattern
//!
//! 1. A store operation mutates state and pushes one or more events
//! 2. The generation counter is bumped for every pushed event
//! 3. The store drains the buffer and emits to every listener
//! 4. Derived state (pipelines, grid windows) compares generations to detect staleness
//!
//! Listeners are held as `Rc<dyn Fn>` and snapshotted before dispatch, so a
//! listener may subscribe or drop subscriptions while being called.

use crate::schema::Row;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Represents a single change to the schema store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TableAdded { table_id: String },
    TableDeleted { table_id: String },
    /// Column added, patched or reordered.
    ColumnsChanged { table_id: String },
    RowInserted { table_id: String, row: Row },
    RowUpdated {
        table_id: String,
        before: Row,
        after: Row,
    },
    RowDeleted { table_id: String, row: Row },
    /// A bulk import committed a chunk of rows.
    RowsImported { table_id: String, count: usize },
    /// Saved views or form layout changed.
    ViewsChanged { table_id: String },
    /// Roles or any permission matrix changed.
    PermissionsChanged,
    /// Notification without a local mutation (remote schema change).
    Refreshed,
}

impl StoreEvent {
    /// Table touched by this event, if any.
    pub fn table_id(&self) -> Option<&str> {
        match self {
            StoreEvent::TableAdded { table_id }
            | StoreEvent::TableDeleted { table_id }
            | StoreEvent::ColumnsChanged { table_id }
            | StoreEvent::RowInserted { table_id, .. }
            | StoreEvent::RowUpdated { table_id, .. }
            | StoreEvent::RowDeleted { table_id, .. }
            | StoreEvent::RowsImported { table_id, .. }
            | StoreEvent::ViewsChanged { table_id } => Some(table_id),
            StoreEvent::PermissionsChanged | StoreEvent::Refreshed => None,
        }
    }

    /// Returns true if row data (not just schema metadata) changed.
    pub fn touches_rows(&self) -> bool {
        matches!(
            self,
            StoreEvent::RowInserted { .. }
                | StoreEvent::RowUpdated { .. }
                | StoreEvent::RowDeleted { .. }
                | StoreEvent::RowsImported { .. }
                | StoreEvent::TableDeleted { .. }
                | StoreEvent::Refreshed
        )
    }
}

/// Pending events plus a monotonically increasing generation
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<StoreEvent>,
    generation: u64,
}

impl Changeset {
    pub fn new() -> Self {
        Changeset {
            changes: Vec::new(),
            generation: 0,
        }
    }

    /// Add a change and bump the generation
    pub fn push(&mut self, change: StoreEvent) {
        self.changes.push(change);
        self.generation += 1;
    }

    pub fn changes(&self) -> &[StoreEvent] {
        &self.changes
    }

    /// Returns the current generation number
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Drain changes, returning ownership and clearing the buffer
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.changes)
    }
}

type Listener<E> = Rc<dyn Fn(&E)>;

struct RegistryInner<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Set of callbacks keyed by subscription id.
pub struct ListenerRegistry<E> {
    inner: Rc<RefCell<RegistryInner<E>>>,
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new() -> Self {
        ListenerRegistry {
            inner: Rc::new(RefCell::new(RegistryInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned guard is
    /// dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + 'static,
    {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Rc::new(listener)));
            id
        };

        let weak: Weak<RefCell<RegistryInner<E>>> = Rc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Call every listener registered at the moment of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `subscribe`; unsubscribes when dropped.
#[must_use = "dropping the subscription immediately unsubscribes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Keep the listener registered for the lifetime of its registry.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_changeset_basic() {
        let mut cs = Changeset::new();
        assert!(cs.is_empty());
        assert_eq!(cs.generation(), 0);

        cs.push(StoreEvent::TableAdded {
            table_id: "t".to_string(),
        });
        cs.push(StoreEvent::Refreshed);

        assert_eq!(cs.len(), 2);
        assert_eq!(cs.generation(), 2);

        let drained = cs.drain();
        assert_eq!(drained.len(), 2);
        assert!(cs.is_empty());
        // Draining never rewinds the generation
        assert_eq!(cs.generation(), 2);
    }

    #[test]
    fn test_event_table_id() {
        let event = StoreEvent::RowDeleted {
            table_id: "projects".to_string(),
            row: Row::new("p1"),
        };
        assert_eq!(event.table_id(), Some("projects"));
        assert!(event.touches_rows());
        assert_eq!(StoreEvent::PermissionsChanged.table_id(), None);
        assert!(!StoreEvent::PermissionsChanged.touches_rows());
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let sub = registry.subscribe(move |v| h.set(h.get() + *v));
        registry.emit(&2);
        assert_eq!(hits.get(), 2);
        assert_eq!(registry.len(), 1);

        drop(sub);
        registry.emit(&5);
        assert_eq!(hits.get(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detached_subscription_stays() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        registry.subscribe(move |_| h.set(h.get() + 1)).detach();
        registry.emit(&());
        registry.emit(&());
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_listener_can_subscribe_during_emit() {
        let registry: Rc<ListenerRegistry<()>> = Rc::new(ListenerRegistry::new());
        let r = Rc::clone(&registry);
        let _sub = registry.subscribe(move |_| {
            r.subscribe(|_| {}).detach();
        });
        registry.emit(&());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_guard_outliving_registry_is_harmless() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new();
        let sub = registry.subscribe(|_| {});
        drop(registry);
        drop(sub);
    }
}
