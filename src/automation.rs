//! Rule-based automations triggered by row changes.
//!
//! The engine subscribes to the store and only queues events from inside the
//! listener. [`AutomationEngine::process`] runs after the mutation that
//! produced them has finished, so actions can mutate the store without
//! re-entering it. Changes made by actions are not queued again.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::changeset::{StoreEvent, Subscription};
use crate::schema::{Row, RowData};
use crate::store::SchemaStore;
use crate::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    RowCreated,
    RowUpdated,
    RowDeleted,
    StatusChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTrigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Restrict ROW_UPDATED to changes of this column; required for
    /// STATUS_CHANGED.
    #[serde(default)]
    pub column_key: Option<String>,
    /// STATUS_CHANGED only fires when the column changed to this value.
    #[serde(default)]
    pub to_value: Option<String>,
}

impl AutomationTrigger {
    pub fn new(kind: TriggerKind) -> Self {
        AutomationTrigger {
            kind,
            column_key: None,
            to_value: None,
        }
    }

    pub fn status_changed(column_key: impl Into<String>, to_value: Option<&str>) -> Self {
        AutomationTrigger {
            kind: TriggerKind::StatusChanged,
            column_key: Some(column_key.into()),
            to_value: to_value.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationCondition {
    pub column: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: CellValue,
}

impl AutomationCondition {
    pub fn new(column: impl Into<String>, operator: ConditionOperator, value: impl Into<CellValue>) -> Self {
        AutomationCondition {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or_default();
        match self.operator {
            ConditionOperator::Equals => loose_eq(&actual, &self.value),
            ConditionOperator::NotEquals => !loose_eq(&actual, &self.value),
            ConditionOperator::Contains => actual.to_string().contains(&self.value.to_string()),
            ConditionOperator::GreaterThan => {
                matches!((numeric(&actual), numeric(&self.value)), (Some(a), Some(b)) if a > b)
            }
            ConditionOperator::LessThan => {
                matches!((numeric(&actual), numeric(&self.value)), (Some(a), Some(b)) if a < b)
            }
            ConditionOperator::IsEmpty => actual.is_empty(),
            ConditionOperator::IsNotEmpty => !actual.is_empty(),
        }
    }
}

/// Number held by a cell, reading numeric text as well.
fn numeric(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Text(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    }
}

/// Numbers compare numerically, everything else by text.
fn loose_eq(a: &CellValue, b: &CellValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.to_string() == b.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationAction {
    /// Message with `{{column_key}}` placeholders.
    NotifyUser { message: String },
    UpdateRow {
        target_column: String,
        value: CellValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub table_id: String,
    pub trigger: AutomationTrigger,
    #[serde(default)]
    pub conditions: Vec<AutomationCondition>,
    pub actions: Vec<AutomationAction>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

/// Message produced by a NOTIFY_USER action.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub automation_id: String,
    pub table_id: String,
    pub row_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Receiver of automation notifications.
pub trait NotificationSink {
    fn deliver(&self, notification: Notification);
}

/// Sink that keeps notifications until taken. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct NotificationOutbox {
    inner: Rc<RefCell<Vec<Notification>>>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for NotificationOutbox {
    fn deliver(&self, notification: Notification) {
        self.inner.borrow_mut().push(notification);
    }
}

/// Replace `{{key}}` with the row's value for `key`; unknown keys become
/// empty text.
pub fn interpolate(template: &str, row: &Row) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end)
                if end > 0
                    && after[..end].chars().all(|c| c.is_alphanumeric() || c == '_') =>
            {
                let key = &after[..end];
                out.push_str(&row.get(key).unwrap_or_default().to_string());
                rest = &after[end + 2..];
            }
            _ => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A queued row change, reduced to what triggers need.
struct RowChange {
    table_id: String,
    kind: TriggerKind,
    row: Row,
    changed: Vec<String>,
}

impl RowChange {
    fn from_event(event: &StoreEvent) -> Option<RowChange> {
        match event {
            StoreEvent::RowInserted { table_id, row } => Some(RowChange {
                table_id: table_id.clone(),
                kind: TriggerKind::RowCreated,
                changed: row.fields.keys().cloned().collect(),
                row: row.clone(),
            }),
            StoreEvent::RowUpdated {
                table_id,
                before,
                after,
            } => {
                let mut changed: Vec<String> = after
                    .fields
                    .keys()
                    .chain(before.fields.keys())
                    .filter(|k| before.field(k) != after.field(k))
                    .cloned()
                    .collect();
                changed.sort();
                changed.dedup();
                Some(RowChange {
                    table_id: table_id.clone(),
                    kind: TriggerKind::RowUpdated,
                    row: after.clone(),
                    changed,
                })
            }
            StoreEvent::RowDeleted { table_id, row } => Some(RowChange {
                table_id: table_id.clone(),
                kind: TriggerKind::RowDeleted,
                row: row.clone(),
                changed: Vec::new(),
            }),
            _ => None,
        }
    }

    fn fires(&self, trigger: &AutomationTrigger) -> bool {
        match trigger.kind {
            TriggerKind::RowCreated | TriggerKind::RowDeleted => trigger.kind == self.kind,
            TriggerKind::RowUpdated => {
                self.kind == TriggerKind::RowUpdated
                    && trigger
                        .column_key
                        .as_ref()
                        .map_or(true, |key| self.changed.contains(key))
            }
            TriggerKind::StatusChanged => {
                let Some(key) = &trigger.column_key else {
                    return false;
                };
                if self.kind != TriggerKind::RowUpdated || !self.changed.contains(key) {
                    return false;
                }
                match &trigger.to_value {
                    Some(target) => self.row.get(key).unwrap_or_default().to_string() == *target,
                    None => true,
                }
            }
        }
    }
}

pub struct AutomationEngine {
    automations: Vec<Automation>,
    queue: Rc<RefCell<VecDeque<StoreEvent>>>,
    applying: Rc<Cell<bool>>,
    sink: Box<dyn NotificationSink>,
    subscription: Option<Subscription>,
}

impl AutomationEngine {
    pub fn new(sink: impl NotificationSink + 'static) -> Self {
        AutomationEngine {
            automations: Vec::new(),
            queue: Rc::new(RefCell::new(VecDeque::new())),
            applying: Rc::new(Cell::new(false)),
            sink: Box::new(sink),
            subscription: None,
        }
    }

    /// Start queueing row events from `store`. Replaces any previous
    /// attachment.
    pub fn attach(&mut self, store: &SchemaStore) {
        let queue = Rc::clone(&self.queue);
        let applying = Rc::clone(&self.applying);
        self.subscription = Some(store.subscribe(move |event| {
            if applying.get() {
                return;
            }
            if matches!(
                event,
                StoreEvent::RowInserted { .. } | StoreEvent::RowUpdated { .. } | StoreEvent::RowDeleted { .. }
            ) {
                queue.borrow_mut().push_back(event.clone());
            }
        }));
    }

    pub fn detach(&mut self) {
        self.subscription = None;
        self.queue.borrow_mut().clear();
    }

    pub fn add_automation(&mut self, automation: Automation) {
        self.automations.retain(|a| a.id != automation.id);
        self.automations.push(automation);
    }

    pub fn remove_automation(&mut self, id: &str) -> bool {
        let before = self.automations.len();
        self.automations.retain(|a| a.id != id);
        self.automations.len() != before
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.automations.iter_mut().find(|a| a.id == id) {
            Some(automation) => {
                automation.active = active;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Automation> {
        self.automations.iter().find(|a| a.id == id)
    }

    pub fn automations_for(&self, table_id: &str) -> Vec<&Automation> {
        self.automations.iter().filter(|a| a.table_id == table_id).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run automations for every queued event. Returns how many automation
    /// runs happened.
    pub fn process(&mut self, store: &mut SchemaStore) -> usize {
        let events: Vec<StoreEvent> = self.queue.borrow_mut().drain(..).collect();
        let mut runs = 0;
        for change in events.iter().filter_map(RowChange::from_event) {
            for i in 0..self.automations.len() {
                let automation = &self.automations[i];
                if !automation.active
                    || automation.table_id != change.table_id
                    || !change.fires(&automation.trigger)
                    || !automation.conditions.iter().all(|c| c.matches(&change.row))
                {
                    continue;
                }
                info!("Running automation '{}' for row {}", automation.name, change.row.id);
                let actions = automation.actions.clone();
                let automation_id = automation.id.clone();
                for action in &actions {
                    self.run_action(&automation_id, action, &change, store);
                }
                let automation = &mut self.automations[i];
                automation.run_count += 1;
                automation.last_run = Some(Utc::now());
                runs += 1;
            }
        }
        runs
    }

    fn run_action(
        &self,
        automation_id: &str,
        action: &AutomationAction,
        change: &RowChange,
        store: &mut SchemaStore,
    ) {
        match action {
            AutomationAction::NotifyUser { message } => {
                self.sink.deliver(Notification {
                    automation_id: automation_id.to_string(),
                    table_id: change.table_id.clone(),
                    row_id: change.row.id.clone(),
                    message: interpolate(message, &change.row),
                    at: Utc::now(),
                });
            }
            AutomationAction::UpdateRow {
                target_column,
                value,
            } => {
                let data = RowData::from([(target_column.clone(), value.clone())]);
                self.applying.set(true);
                let applied = store.update_row(&change.table_id, &change.row.id, data, false);
                self.applying.set(false);
                if !applied {
                    debug!("Automation {} skipped update of missing row {}", automation_id, change.row.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDefinition, TableDefinition};
    use crate::value::ColumnType;

    fn store() -> SchemaStore {
        let mut table = TableDefinition::new("projects", "Projects");
        table.columns = vec![
            ColumnDefinition::new("name", "Name", ColumnType::Text),
            ColumnDefinition::new("status", "Status", ColumnType::Status).with_options(["Active", "Done"]),
            ColumnDefinition::new("progress", "Progress", ColumnType::Progress),
        ];
        let mut store = SchemaStore::with_tables(vec![table]);
        let data = RowData::from([
            ("id".to_string(), CellValue::from("p1")),
            ("name".to_string(), "Bridge".into()),
            ("status".to_string(), "Active".into()),
            ("progress".to_string(), 40.into()),
        ]);
        store.add_row("projects", data, true);
        store
    }

    fn done_automation() -> Automation {
        Automation {
            id: "auto_done".to_string(),
            name: "Project finished".to_string(),
            active: true,
            table_id: "projects".to_string(),
            trigger: AutomationTrigger::status_changed("status", Some("Done")),
            conditions: vec![],
            actions: vec![
                AutomationAction::NotifyUser {
                    message: "{{name}} is done ({{missing}})".to_string(),
                },
                AutomationAction::UpdateRow {
                    target_column: "progress".to_string(),
                    value: 100.into(),
                },
            ],
            run_count: 0,
            last_run: None,
        }
    }

    fn set(store: &mut SchemaStore, key: &str, value: &str) {
        store.update_row("projects", "p1", RowData::from([(key.to_string(), value.into())]), false);
    }

    #[test]
    fn test_status_changed_runs_actions_once() {
        let mut store = store();
        let outbox = NotificationOutbox::new();
        let mut engine = AutomationEngine::new(outbox.clone());
        engine.attach(&store);
        engine.add_automation(done_automation());

        set(&mut store, "name", "Bridge 2");
        assert_eq!(engine.process(&mut store), 0);

        set(&mut store, "status", "Done");
        assert_eq!(engine.pending(), 1);
        assert_eq!(engine.process(&mut store), 1);

        let notes = outbox.take();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "Bridge 2 is done ()");
        assert_eq!(store.row("projects", "p1").unwrap().field("progress"), Some(&CellValue::Int(100)));

        // The action's own update was not queued
        assert_eq!(engine.pending(), 0);
        assert_eq!(engine.get("auto_done").unwrap().run_count, 1);
        assert!(engine.get("auto_done").unwrap().last_run.is_some());
    }

    #[test]
    fn test_conditions_and_inactive() {
        let mut store = store();
        let outbox = NotificationOutbox::new();
        let mut engine = AutomationEngine::new(outbox.clone());
        engine.attach(&store);
        engine.add_automation(Automation {
            id: "a".to_string(),
            name: "Big progress".to_string(),
            active: true,
            table_id: "projects".to_string(),
            trigger: AutomationTrigger {
                kind: TriggerKind::RowUpdated,
                column_key: Some("progress".to_string()),
                to_value: None,
            },
            conditions: vec![AutomationCondition::new("progress", ConditionOperator::GreaterThan, 50)],
            actions: vec![AutomationAction::NotifyUser {
                message: "{{progress}}%".to_string(),
            }],
            run_count: 0,
            last_run: None,
        });

        set(&mut store, "progress", "30");
        set(&mut store, "name", "Other");
        set(&mut store, "progress", "80");
        assert_eq!(engine.process(&mut store), 1);
        assert_eq!(outbox.take()[0].message, "80%");

        engine.set_active("a", false);
        set(&mut store, "progress", "90");
        assert_eq!(engine.process(&mut store), 0);
    }

    #[test]
    fn test_created_and_deleted_triggers() {
        let mut store = store();
        let outbox = NotificationOutbox::new();
        let mut engine = AutomationEngine::new(outbox.clone());
        engine.attach(&store);
        for (id, kind) in [("c", TriggerKind::RowCreated), ("d", TriggerKind::RowDeleted)] {
            engine.add_automation(Automation {
                id: id.to_string(),
                name: id.to_string(),
                active: true,
                table_id: "projects".to_string(),
                trigger: AutomationTrigger::new(kind),
                conditions: vec![AutomationCondition::new("name", ConditionOperator::IsNotEmpty, CellValue::Null)],
                actions: vec![AutomationAction::NotifyUser {
                    message: format!("{} {{{{name}}}}", id),
                }],
                run_count: 0,
                last_run: None,
            });
        }

        let id = store
            .add_row("projects", RowData::from([("name".to_string(), CellValue::from("New"))]), false)
            .unwrap();
        store.delete_row("projects", &id, false);
        assert_eq!(engine.process(&mut store), 2);
        let messages: Vec<String> = outbox.take().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["c New", "d New"]);

        engine.detach();
        store.delete_row("projects", "p1", false);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_condition_operators() {
        let mut row = Row::new("r");
        row.set("n", 10);
        row.set("s", "Hello World");
        let check = |col: &str, op, value: CellValue| AutomationCondition::new(col, op, value).matches(&row);

        assert!(check("n", ConditionOperator::Equals, "10".into()));
        assert!(check("n", ConditionOperator::NotEquals, 11.into()));
        assert!(check("s", ConditionOperator::Contains, "World".into()));
        assert!(!check("s", ConditionOperator::Contains, "world".into()));
        assert!(check("n", ConditionOperator::LessThan, 11.into()));
        assert!(!check("missing", ConditionOperator::GreaterThan, 0.into()));
        assert!(check("missing", ConditionOperator::IsEmpty, CellValue::Null));
    }

    #[test]
    fn test_ordering_conditions_read_text_as_numbers() {
        let mut row = Row::new("r");
        row.set("qty", "30");
        row.set("note", "many");
        let check = |col: &str, op, value: CellValue| AutomationCondition::new(col, op, value).matches(&row);

        assert!(check("qty", ConditionOperator::LessThan, "100".into()));
        assert!(!check("qty", ConditionOperator::GreaterThan, "100".into()));
        assert!(check("qty", ConditionOperator::GreaterThan, 4.into()));
        assert!(check("qty", ConditionOperator::LessThan, 30.5.into()));
        // Non-numeric sides never satisfy an ordering condition
        assert!(!check("note", ConditionOperator::GreaterThan, 0.into()));
        assert!(!check("note", ConditionOperator::LessThan, 0.into()));
    }

    #[test]
    fn test_interpolate_leaves_malformed_placeholders() {
        let mut row = Row::new("r1");
        row.set("name", "A");
        assert_eq!(interpolate("{{name}}/{{id}}", &row), "A/r1");
        assert_eq!(interpolate("{{ name }} {{", &row), "{{ name }} {{");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::json!({
            "id": "x", "name": "n", "active": true, "table_id": "projects",
            "trigger": {"type": "STATUS_CHANGED", "column_key": "status", "to_value": "Done"},
            "conditions": [{"column": "progress", "operator": "less_than", "value": 100}],
            "actions": [{"type": "UPDATE_ROW", "target_column": "progress", "value": 100}]
        });
        let automation: Automation = serde_json::from_value(json).unwrap();
        assert_eq!(automation.trigger.kind, TriggerKind::StatusChanged);
        assert_eq!(automation.run_count, 0);
    }
}
