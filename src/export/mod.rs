//! Export surface
//!
//! Shapes handed to collaborators outside the model: per-element records for
//! codecs, a summary for metadata caches, and (offset, value, duration)
//! triples for plotting. None of these define bytes on their own apart from
//! the JSON rendering of records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Result, StreamError};
use crate::models::{rational_to_f64, ElementId, Rational, TieRole};
use crate::stream::{Container, Placed};

/// One element as seen by an exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub id: ElementId,
    pub class_name: String,
    pub offset: f64,
    pub quarter_length: f64,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "is_untied")]
    pub tie: TieRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

fn is_untied(tie: &TieRole) -> bool {
    *tie == TieRole::None
}

impl ExportRecord {
    fn from_placed(placed: &Placed) -> Self {
        let element = &placed.element;
        Self {
            id: element.id(),
            class_name: element.class_name().to_string(),
            offset: rational_to_f64(placed.offset),
            quarter_length: rational_to_f64(element.quarter_length()),
            priority: element.priority(),
            tie: element.tie_role(),
            tags: element.tags().into_iter().collect(),
            attributes: element.attributes(),
        }
    }
}

/// Receiver of exported records
pub trait ExportSink {
    fn accept(&mut self, record: ExportRecord) -> Result<()>;
}

impl ExportSink for Vec<ExportRecord> {
    fn accept(&mut self, record: ExportRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Render records as a JSON array
pub fn records_to_json(records: &[ExportRecord]) -> Result<String> {
    serde_json::to_string_pretty(records).map_err(|e| StreamError::Export(e.to_string()))
}

/// Snapshot handed to a metadata cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Leaf elements, nested ones included
    pub count: usize,
    pub lowest_offset: Rational,
    pub highest_time: Rational,
    /// First value met for each attribute key, in time order
    pub first_seen: BTreeMap<String, Value>,
}

impl ContainerSummary {
    pub fn span(&self) -> Rational {
        self.highest_time - self.lowest_offset
    }

    /// Stable textual key for the summarised content
    pub fn content_key(&self) -> String {
        let attributes: Vec<String> = self
            .first_seen
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        format!(
            "n{}:[{},{}]:{}",
            self.count,
            self.lowest_offset,
            self.highest_time,
            attributes.join(";")
        )
    }
}

/// Summarise `container` from an independent deep copy
pub fn summarize(container: &Container) -> ContainerSummary {
    let flat = container.deep_copy().flatten(false);
    let entries = flat.entries();

    let mut first_seen = BTreeMap::new();
    for placed in &entries {
        for (key, value) in placed.element.attributes() {
            first_seen.entry(key).or_insert(value);
        }
    }

    ContainerSummary {
        count: entries.len(),
        lowest_offset: flat.lowest_offset(),
        highest_time: flat.highest_time(),
        first_seen,
    }
}

/// One plotted point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub offset: f64,
    pub value: Option<Value>,
    pub duration: f64,
}

/// Flattened (offset, attribute value, duration) triples
pub fn plot_triples(container: &Container, attribute: &str) -> Vec<PlotPoint> {
    container
        .flatten(false)
        .entries()
        .iter()
        .map(|placed| PlotPoint {
            offset: rational_to_f64(placed.offset),
            value: placed.element.attribute(attribute),
            duration: rational_to_f64(placed.element.quarter_length()),
        })
        .collect()
}

impl Container {
    /// Emit one record per direct member in sorted order; returns the count
    pub fn export_to(&self, sink: &mut dyn ExportSink) -> Result<usize> {
        let entries = self.sorted_entries();
        for placed in entries.iter() {
            sink.accept(ExportRecord::from_placed(placed))?;
        }
        Ok(entries.len())
    }
}
