//! AI annotation of rows through an opaque async service.
//!
//! Failures never propagate: a failed or slow call yields
//! [`Annotation::degraded`] and leaves the row untouched.

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::AnnotateError;
use crate::schema::RowData;
use crate::store::SchemaStore;
use crate::value::CellValue;

pub const TAGS_KEY: &str = "ai_tags";
pub const DESCRIPTION_KEY: &str = "ai_description";
pub const DEGRADED_DESCRIPTION: &str = "Analysis unavailable.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub tags: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub detected_objects: Vec<String>,
}

impl Annotation {
    pub fn degraded() -> Self {
        Annotation {
            tags: Vec::new(),
            description: DEGRADED_DESCRIPTION.to_string(),
            detected_objects: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.tags.is_empty() && self.description == DEGRADED_DESCRIPTION
    }

    /// Parse a JSON service response.
    pub fn from_json(text: &str) -> Result<Self, AnnotateError> {
        serde_json::from_str(text).map_err(|e| AnnotateError::BadResponse(e.to_string()))
    }
}

/// Async annotation backend. Implementations are driven from the actor's
/// single-threaded executor.
#[async_trait(?Send)]
pub trait Annotator {
    async fn analyze(&self, input: &str) -> Result<Annotation, AnnotateError>;
}

/// Call the annotator, bounded by `timeout`, degrading on any failure.
pub async fn analyze_or_degrade(annotator: &dyn Annotator, input: &str, timeout: Duration) -> Annotation {
    match tokio::time::timeout(timeout, annotator.analyze(input)).await {
        Ok(Ok(annotation)) => annotation,
        Ok(Err(e)) => {
            warn!("Annotation failed, using degraded result: {}", e);
            Annotation::degraded()
        }
        Err(_) => {
            warn!("Annotation timed out after {:?}", timeout);
            Annotation::degraded()
        }
    }
}

/// Annotate one row from the text of `input_key` and write the result to the
/// `ai_tags` / `ai_description` columns that exist in the table.
///
/// The store is not borrowed while the service call is in flight.
pub async fn annotate_row(
    store: &Rc<RefCell<SchemaStore>>,
    annotator: &dyn Annotator,
    table_id: &str,
    row_id: &str,
    input_key: &str,
    timeout: Duration,
) -> Option<Annotation> {
    let input = {
        let store = store.borrow();
        let row = store.row(table_id, row_id)?;
        row.get(input_key).unwrap_or_default().to_string()
    };

    let annotation = analyze_or_degrade(annotator, &input, timeout).await;
    if annotation.is_degraded() {
        return Some(annotation);
    }

    let mut store = store.borrow_mut();
    let mut changes = RowData::new();
    if let Some(table) = store.table(table_id) {
        if table.has_column(TAGS_KEY) {
            changes.insert(TAGS_KEY.to_string(), CellValue::List(annotation.tags.clone()));
        }
        if table.has_column(DESCRIPTION_KEY) {
            changes.insert(DESCRIPTION_KEY.to_string(), annotation.description.clone().into());
        }
    }
    if !changes.is_empty() {
        store.update_row(table_id, row_id, changes, false);
    }
    Some(annotation)
}

/// Annotate every row of a table in chunks, yielding between chunks.
/// Returns the number of rows that got a non-degraded annotation.
pub async fn annotate_table(
    store: &Rc<RefCell<SchemaStore>>,
    annotator: &dyn Annotator,
    table_id: &str,
    input_key: &str,
    chunk_size: usize,
    timeout: Duration,
) -> usize {
    let row_ids: Vec<String> = match store.borrow().table(table_id) {
        Some(table) => table.rows.iter().map(|r| r.id.clone()).collect(),
        None => return 0,
    };

    let mut annotated = 0;
    for chunk in row_ids.chunks(chunk_size.max(1)) {
        for row_id in chunk {
            let result = annotate_row(store, annotator, table_id, row_id, input_key, timeout).await;
            if result.is_some_and(|a| !a.is_degraded()) {
                annotated += 1;
            }
        }
        tokio::task::yield_now().await;
    }
    info!("Annotated {}/{} rows in {}", annotated, row_ids.len(), table_id);
    annotated
}
