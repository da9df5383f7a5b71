use livegrid::history::HistoryLog;
use livegrid::persistence::MemoryKv;
use livegrid::schema::{PermissionMatrix, PermissionRule};
use livegrid::{
    compute_window, process_rows, CellValue, ColumnDefinition, ColumnPermissionPatch, ColumnType,
    LookupMaps, PermissionPatch, PersistedState, Row, RowData, SchemaStore, SortConfig,
    StorageKeys, TableDefinition, ADMIN_ROLE,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
enum Op {
    Add(String, i64),
    Update(usize, String),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        ("[a-z]{1,6}", 0i64..1000).prop_map(|(name, qty)| Op::Add(name, qty)),
        (0usize..16, "[a-z]{1,6}").prop_map(|(i, name)| Op::Update(i, name)),
        (0usize..16).prop_map(Op::Delete),
    ]
}

fn table() -> TableDefinition {
    let mut table = TableDefinition::new("t", "T");
    table.columns = vec![
        ColumnDefinition::new("name", "Name", ColumnType::Text),
        ColumnDefinition::new("qty", "Qty", ColumnType::Number),
    ];
    for i in 0..3 {
        let mut row = Row::new(format!("seed{}", i));
        row.set("name", format!("seed {}", i));
        row.set("qty", i as i64);
        table.rows.push(row);
    }
    table
}

fn sorted_rows(store: &SchemaStore) -> Vec<Row> {
    let mut rows = store.table("t").unwrap().rows.clone();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

fn apply(store: &mut SchemaStore, op: &Op) {
    let ids: Vec<String> = store.table("t").unwrap().rows.iter().map(|r| r.id.clone()).collect();
    match op {
        Op::Add(name, qty) => {
            let data = RowData::from([
                ("name".to_string(), CellValue::from(name.as_str())),
                ("qty".to_string(), CellValue::Int(*qty)),
            ]);
            store.add_row("t", data, false);
        }
        Op::Update(i, name) if !ids.is_empty() => {
            let id = &ids[i % ids.len()];
            let data = RowData::from([("name".to_string(), CellValue::from(name.as_str()))]);
            store.update_row("t", id, data, false);
        }
        Op::Delete(i) if !ids.is_empty() => {
            store.delete_row("t", &ids[i % ids.len()], false);
        }
        _ => {}
    }
}

fn fresh() -> (SchemaStore, std::rc::Rc<std::cell::RefCell<HistoryLog>>) {
    let mut store = SchemaStore::with_tables(vec![table()]);
    let history = HistoryLog::shared(1000, "prop");
    store.attach_history(history.clone());
    (store, history)
}

proptest! {
    #[test]
    fn prop_undo_all_restores_initial_rows(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let (mut store, history) = fresh();
        let initial = sorted_rows(&store);
        for op in &ops {
            apply(&mut store, op);
        }
        for _ in 0..ops.len() {
            HistoryLog::undo(&history, &mut store);
        }
        prop_assert_eq!(sorted_rows(&store), initial);
        prop_assert!(!history.borrow().can_undo());
    }

    #[test]
    fn prop_undo_then_redo_is_identity(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let (mut store, history) = fresh();
        for op in &ops {
            apply(&mut store, op);
        }
        let before = sorted_rows(&store);
        if HistoryLog::undo(&history, &mut store).is_some() {
            HistoryLog::redo(&history, &mut store).unwrap();
        }
        prop_assert_eq!(sorted_rows(&store), before);
    }

    #[test]
    fn prop_window_bounds(
        count in 0usize..100_000,
        item_height in 1.0f64..200.0,
        container_height in 0.0f64..5000.0,
        scroll_fraction in 0.0f64..=1.0,
        overscan in 0usize..20,
    ) {
        let scroll_top = scroll_fraction * count as f64 * item_height;
        let w = compute_window(count, item_height, container_height, scroll_top, overscan);
        prop_assert!(w.start <= w.end);
        prop_assert!(w.end <= count);
    }

    #[test]
    fn prop_pipeline_is_pure(
        names in prop::collection::vec("[a-cA-C]{0,4}", 0..40),
        needle in "[a-c]{0,2}",
        desc in any::<bool>(),
    ) {
        let columns = vec![ColumnDefinition::new("name", "Name", ColumnType::Text)];
        let rows: Vec<Row> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut row = Row::new(format!("r{}", i));
                row.set("name", name.as_str());
                row
            })
            .collect();
        let filters = BTreeMap::from([("name".to_string(), needle)]);
        let sort = if desc { SortConfig::desc("name") } else { SortConfig::asc("name") };

        let first = process_rows(&rows, &filters, Some(&sort), &columns, &LookupMaps::new());
        let second = process_rows(&rows, &filters, Some(&sort), &columns, &LookupMaps::new());
        prop_assert_eq!(first, second);
    }
}

#[test]
fn test_new_action_clears_redo() {
    let (mut store, history) = fresh();
    store.update_row("t", "seed0", RowData::from([("name".to_string(), "x".into())]), false);
    HistoryLog::undo(&history, &mut store).unwrap();
    assert!(history.borrow().can_redo());

    store.update_row("t", "seed1", RowData::from([("name".to_string(), "y".into())]), false);
    let snapshot = sorted_rows(&store);
    assert!(HistoryLog::redo(&history, &mut store).is_none());
    assert_eq!(sorted_rows(&store), snapshot);
}

#[test]
fn test_admin_always_has_full_access() {
    let mut permissions = PermissionMatrix::new();
    permissions.insert(
        ADMIN_ROLE.to_string(),
        HashMap::from([("t".to_string(), PermissionRule::NONE)]),
    );
    let state = PersistedState {
        tables: vec![table()],
        roles: Vec::new(),
        permissions,
        column_permissions: Default::default(),
    };
    let mut store = SchemaStore::from_state(state, Box::new(MemoryKv::new()), StorageKeys::default());

    assert!(!store.update_permission(
        ADMIN_ROLE,
        "t",
        PermissionPatch {
            view: Some(false),
            ..Default::default()
        }
    ));
    assert!(!store.update_column_permission(
        ADMIN_ROLE,
        "t",
        "name",
        ColumnPermissionPatch {
            edit: Some(false),
            ..Default::default()
        }
    ));
    for table_id in ["t", "anything", ""] {
        assert_eq!(store.get_permission(ADMIN_ROLE, table_id), PermissionRule::ALL);
        assert!(store.get_column_permission(ADMIN_ROLE, table_id, "name").edit);
    }
}

#[test]
fn test_reference_sort_uses_labels_not_ids() {
    let mut companies = TableDefinition::new("companies", "Companies");
    companies.columns = vec![ColumnDefinition::new("name", "Name", ColumnType::Text)];
    for (id, name) in [("c1", "Zulu"), ("c2", "Alpha"), ("c3", "Mike")] {
        let mut row = Row::new(id);
        row.set("name", name);
        companies.rows.push(row);
    }
    let mut jobs = TableDefinition::new("jobs", "Jobs");
    jobs.columns = vec![ColumnDefinition::reference("client", "Client", "companies", "name")];
    for (id, client) in [("j1", "c1"), ("j2", "c2"), ("j3", "c3")] {
        let mut row = Row::new(id);
        row.set("client", client);
        jobs.rows.push(row);
    }
    let store = SchemaStore::with_tables(vec![companies, jobs]);
    let jobs = store.table("jobs").unwrap();
    let lookups = store.reference_lookups("jobs");

    let map = process_rows(&jobs.rows, &BTreeMap::new(), Some(&SortConfig::asc("client")), &jobs.columns, &lookups);
    let order: Vec<&str> = map.iter().map(|i| jobs.rows[i].id.as_str()).collect();
    // Raw id order would be j1, j2, j3
    assert_eq!(order, vec!["j2", "j3", "j1"]);
}
