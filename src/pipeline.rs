//! Row processing pipeline: filter, then sort, over a table's raw rows.
//!
//! [`process_rows`] is a pure function from its inputs to a
//! [`VirtualIndexMap`]; the same inputs always give the same order.
//! [`RowPipeline`] wraps it with the mutable filter/sort state of one grid
//! and caches the result until the store generation or its inputs change.

use crate::formula;
use crate::index_map::VirtualIndexMap;
use crate::schema::{ColumnDefinition, Row, SavedView, SortConfig, SortDirection, TableDefinition};
use crate::store::SchemaStore;
use crate::value::{CellValue, ColumnType};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Display label for a reference whose target row no longer exists.
pub const MISSING_REFERENCE: &str = "(missing)";

/// Column key -> (referenced row id -> label).
pub type LookupMaps = HashMap<String, HashMap<String, String>>;

/// Column filters: column key -> substring.
pub type Filters = BTreeMap<String, String>;

/// The value a cell shows: reference labels resolved, formulas evaluated.
pub fn display_value(row: &Row, column: &ColumnDefinition, lookups: &LookupMaps) -> CellValue {
    if let Some(formula_text) = &column.formula {
        return formula::evaluate(formula_text, row);
    }

    let raw = row.get(&column.key).unwrap_or_default();
    if column.column_type != ColumnType::Reference || raw.is_empty() {
        return raw;
    }
    match lookups.get(&column.key) {
        Some(labels) => match labels.get(&raw.to_string()) {
            Some(label) => CellValue::Text(label.clone()),
            None => CellValue::Text(MISSING_REFERENCE.to_string()),
        },
        None => raw,
    }
}

fn cell_for(row: &Row, key: &str, columns: &[ColumnDefinition], lookups: &LookupMaps) -> CellValue {
    match columns.iter().find(|c| c.key == key) {
        Some(column) => display_value(row, column, lookups),
        None => row.get(key).unwrap_or_default(),
    }
}

/// Filter then sort `rows`.
///
/// Every non-empty filter must be a case-insensitive substring of the cell's
/// display text. Sorting is stable on a single key; empty values go last in
/// both directions.
pub fn process_rows(
    rows: &[Row],
    filters: &Filters,
    sort: Option<&SortConfig>,
    columns: &[ColumnDefinition],
    lookups: &LookupMaps,
) -> VirtualIndexMap {
    let mut map = VirtualIndexMap::identity(rows.len());

    let active: Vec<(&str, String)> = filters
        .iter()
        .filter(|(_, needle)| !needle.trim().is_empty())
        .map(|(key, needle)| (key.as_str(), needle.to_lowercase()))
        .collect();
    if !active.is_empty() {
        map.retain(|i| {
            active.iter().all(|(key, needle)| {
                cell_for(&rows[i], key, columns, lookups)
                    .to_string()
                    .to_lowercase()
                    .contains(needle.as_str())
            })
        });
    }

    if let Some(sort) = sort {
        // Resolve sort keys once instead of inside the comparator
        let keys: HashMap<usize, CellValue> = map
            .iter()
            .map(|i| (i, cell_for(&rows[i], &sort.key, columns, lookups)))
            .collect();
        map.sort_by(|a, b| compare_for_sort(&keys[&a], &keys[&b], sort.direction));
    }

    map
}

fn compare_for_sort(a: &CellValue, b: &CellValue, direction: SortDirection) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let base = a.compare(b);
            match direction {
                SortDirection::Asc => base,
                SortDirection::Desc => base.reverse(),
            }
        }
    }
}

/// Filter/sort state for one table plus a cached result.
#[derive(Debug, Clone)]
pub struct RowPipeline {
    table_id: String,
    filters: Filters,
    sort: Option<SortConfig>,
    cache: Option<(u64, VirtualIndexMap)>,
}

impl RowPipeline {
    pub fn new(table_id: impl Into<String>) -> Self {
        RowPipeline {
            table_id: table_id.into(),
            filters: Filters::new(),
            sort: None,
            cache: None,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn sort(&self) -> Option<&SortConfig> {
        self.sort.as_ref()
    }

    /// Set or clear (empty value) the filter for one column.
    pub fn set_filter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let key = key.into();
        if value.is_empty() {
            self.filters.remove(&key);
        } else {
            self.filters.insert(key, value);
        }
        self.invalidate();
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.invalidate();
    }

    pub fn set_sort(&mut self, sort: Option<SortConfig>) {
        self.sort = sort;
        self.invalidate();
    }

    /// Header click: same key flips direction, a new key starts ascending.
    pub fn toggle_sort(&mut self, key: &str) -> &SortConfig {
        let next = SortConfig::toggle(self.sort.as_ref(), key);
        self.invalidate();
        self.sort.insert(next)
    }

    /// Replace filters and sort with a saved view's.
    pub fn apply_view(&mut self, view: &SavedView) {
        self.filters = view.filters.clone();
        self.sort = view.sort_config.clone();
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Current display order, recomputed when the store has changed since the
    /// last call or the inputs were modified.
    pub fn refresh(&mut self, store: &SchemaStore) -> &VirtualIndexMap {
        let generation = store.generation();
        let map = match self.cache.take() {
            Some((g, map)) if g == generation => map,
            _ => match store.table(&self.table_id) {
                Some(table) => self.compute(store, table),
                None => VirtualIndexMap::default(),
            },
        };
        &self.cache.insert((generation, map)).1
    }

    /// Last computed order without recomputing.
    pub fn cached(&self) -> Option<&VirtualIndexMap> {
        self.cache.as_ref().map(|(_, map)| map)
    }

    fn compute(&self, store: &SchemaStore, table: &TableDefinition) -> VirtualIndexMap {
        let lookups = store.reference_lookups(&table.id);
        process_rows(
            &table.rows,
            &self.filters,
            self.sort.as_ref(),
            &table.columns,
            &lookups,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RowData;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("name", "Name", ColumnType::Text),
            ColumnDefinition::new("budget", "Budget", ColumnType::Currency),
            ColumnDefinition::reference("client_id", "Client", "companies", "name"),
        ]
    }

    fn rows() -> Vec<Row> {
        let make = |id: &str, name: &str, budget: Option<i64>, client: &str| {
            let mut row = Row::new(id);
            row.set("name", name);
            if let Some(b) = budget {
                row.set("budget", b);
            }
            row.set("client_id", client);
            row
        };
        vec![
            make("p1", "Bridge", Some(500), "c2"),
            make("p2", "alpha tower", None, "c1"),
            make("p3", "Canal", Some(100), "c9"),
            make("p4", "Alpha yard", Some(500), "c1"),
        ]
    }

    fn lookups() -> LookupMaps {
        let mut labels = HashMap::new();
        labels.insert("c1".to_string(), "Zeta Corp".to_string());
        labels.insert("c2".to_string(), "Acme".to_string());
        let mut maps = LookupMaps::new();
        maps.insert("client_id".to_string(), labels);
        maps
    }

    fn ids(rows: &[Row], map: &VirtualIndexMap) -> Vec<String> {
        map.iter().map(|i| rows[i].id.clone()).collect()
    }

    #[test]
    fn test_no_inputs_is_identity() {
        let rows = rows();
        let map = process_rows(&rows, &Filters::new(), None, &columns(), &lookups());
        assert_eq!(ids(&rows, &map), vec!["p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_filter_is_case_insensitive_and() {
        let rows = rows();
        let mut filters = Filters::new();
        filters.insert("name".to_string(), "ALPHA".to_string());
        let map = process_rows(&rows, &filters, None, &columns(), &lookups());
        assert_eq!(ids(&rows, &map), vec!["p2", "p4"]);

        filters.insert("budget".to_string(), "5".to_string());
        let map = process_rows(&rows, &filters, None, &columns(), &lookups());
        assert_eq!(ids(&rows, &map), vec!["p4"]);

        filters.insert("budget".to_string(), "   ".to_string());
        let map = process_rows(&rows, &filters, None, &columns(), &lookups());
        assert_eq!(ids(&rows, &map), vec!["p2", "p4"]);
    }

    #[test]
    fn test_sort_numeric_stable_with_empty_last() {
        let rows = rows();
        let sort = SortConfig::asc("budget");
        let map = process_rows(&rows, &Filters::new(), Some(&sort), &columns(), &lookups());
        assert_eq!(ids(&rows, &map), vec!["p3", "p1", "p4", "p2"]);

        let sort = SortConfig::desc("budget");
        let map = process_rows(&rows, &Filters::new(), Some(&sort), &columns(), &lookups());
        // Ties keep raw order; empty stays last when descending too
        assert_eq!(ids(&rows, &map), vec!["p1", "p4", "p3", "p2"]);
    }

    #[test]
    fn test_reference_sort_uses_labels() {
        let rows = rows();
        let sort = SortConfig::asc("client_id");
        let map = process_rows(&rows, &Filters::new(), Some(&sort), &columns(), &lookups());
        // "(missing)" < "Acme" < "Zeta Corp"
        assert_eq!(ids(&rows, &map), vec!["p3", "p1", "p2", "p4"]);
    }

    #[test]
    fn test_sort_mixed_numbers_and_text() {
        let cols = vec![ColumnDefinition::new("v", "V", ColumnType::Number)];
        let rows: Vec<Row> = (0..4000)
            .map(|n| {
                let mut row = Row::new(format!("r{}", n));
                match n % 3 {
                    0 => row.set("v", CellValue::Int(n as i64)),
                    1 => row.set("v", CellValue::Text(format!("{}x", n))),
                    _ => row.set("v", CellValue::Float(f64::NAN)),
                }
                row
            })
            .collect();

        let sort = SortConfig::asc("v");
        let map = process_rows(&rows, &Filters::new(), Some(&sort), &cols, &LookupMaps::new());
        assert_eq!(map.len(), 4000);
        assert_eq!(ids(&rows, &map)[0], "r0");
        // Numbers (NaN last among them) come before text
        let last = map.get(3999).unwrap();
        assert!(rows[last].field("v").unwrap().as_str().is_some());

        let sort = SortConfig::desc("v");
        let map = process_rows(&rows, &Filters::new(), Some(&sort), &cols, &LookupMaps::new());
        assert_eq!(map.len(), 4000);
    }

    #[test]
    fn test_display_value_missing_reference_and_formula() {
        let rows = rows();
        let cols = columns();
        assert_eq!(
            display_value(&rows[2], &cols[2], &lookups()),
            CellValue::from(MISSING_REFERENCE)
        );
        assert_eq!(display_value(&rows[0], &cols[2], &lookups()), CellValue::from("Acme"));
        // Without a lookup map the raw id is shown
        assert_eq!(
            display_value(&rows[0], &cols[2], &LookupMaps::new()),
            CellValue::from("c2")
        );

        let doubled = ColumnDefinition::new("double", "Double", ColumnType::Formula)
            .with_formula("={budget} * 2");
        assert_eq!(display_value(&rows[0], &doubled, &lookups()), CellValue::Int(1000));
    }

    #[test]
    fn test_pipeline_caches_by_generation() {
        let mut table = TableDefinition::new("t", "T");
        table.columns = vec![ColumnDefinition::new("name", "Name", ColumnType::Text)];
        let mut store = SchemaStore::with_tables(vec![table]);
        for name in ["b", "a"] {
            let mut data = RowData::new();
            data.insert("name".to_string(), name.into());
            store.add_row("t", data, false);
        }

        let mut pipeline = RowPipeline::new("t");
        assert_eq!(pipeline.refresh(&store).len(), 2);
        assert_eq!(pipeline.toggle_sort("name"), &SortConfig::asc("name"));
        let first = pipeline.refresh(&store).get(0).unwrap();
        assert_eq!(store.table("t").unwrap().rows[first].field("name"), Some(&"a".into()));

        let mut data = RowData::new();
        data.insert("name".to_string(), "0".into());
        store.add_row("t", data, false);
        assert!(pipeline.cached().is_some());
        assert_eq!(pipeline.refresh(&store).len(), 3);

        assert_eq!(pipeline.toggle_sort("name").direction, SortDirection::Desc);
        pipeline.set_filter("name", "a");
        assert_eq!(pipeline.refresh(&store).len(), 1);
        pipeline.set_filter("name", "");
        assert!(pipeline.filters().is_empty());
    }

    #[test]
    fn test_unknown_table_is_empty() {
        let store = SchemaStore::with_tables(vec![]);
        let mut pipeline = RowPipeline::new("nope");
        assert!(pipeline.refresh(&store).is_empty());
    }
}
