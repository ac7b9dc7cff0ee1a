//! Partitioner: windowing and tie merging
//!
//! # Architecture
//!
//! ```text
//! source ──flatten──► leaves ──place/split──► Part [ Measure 1 | Measure 2 | ... ]
//!                                                   (tie: start ... stop)
//!
//! windows ──flatten + deep copy──► scan tie runs ──merge──► one element per chain
//! ```
//!
//! Both directions leave their input untouched. Conditions that still allow a
//! best-effort result are logged and returned as [`DataConsistencyError`]s in
//! the result struct; only a placement failure aborts [`Partitioner::make_windows`].

mod ties;
mod windows;

use serde::{Deserialize, Serialize};

use crate::error::{DataConsistencyError, Result};
use crate::models::{Element, Meter};
use crate::stream::Container;

pub use ties::strip_ties;

/// Windowing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSettings {
    /// Window length used when no marker is in force
    pub default_meter: Meter,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            default_meter: Meter::default(),
        }
    }
}

/// Tie-merge settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripTiesOptions {
    /// Attribute key that also closes a run when an untagged element carries
    /// the same value as the run (heuristic, off by default)
    pub match_by_attribute: Option<String>,
}

impl StripTiesOptions {
    pub fn match_by_attribute(key: &str) -> Self {
        Self {
            match_by_attribute: Some(key.to_string()),
        }
    }
}

/// Strategy producing the marker that tags the first window
///
/// Receives the flattened source content.
pub trait LeadingContext {
    fn resolve(&self, content: &Container) -> Option<Element>;
}

impl<F> LeadingContext for F
where
    F: Fn(&Container) -> Option<Element>,
{
    fn resolve(&self, content: &Container) -> Option<Element> {
        self(content)
    }
}

/// Output of [`Partitioner::make_windows`]
#[derive(Debug)]
pub struct Windowed {
    /// `Part` container holding the windows at their absolute offsets
    pub part: Container,
    pub issues: Vec<DataConsistencyError>,
}

impl Windowed {
    /// Window containers in time order
    pub fn windows(&self) -> Vec<Container> {
        self.part
            .sorted_view()
            .iter()
            .filter_map(|e| e.as_container())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Output of [`strip_ties`]
#[derive(Debug)]
pub struct TiesStripped {
    /// Flat container with every tie chain merged into its first member
    pub container: Container,
    pub issues: Vec<DataConsistencyError>,
}

impl TiesStripped {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Windowing engine with its settings and optional leading-context strategy
#[derive(Default)]
pub struct Partitioner {
    settings: PartitionSettings,
    leading_context: Option<Box<dyn LeadingContext>>,
}

impl Partitioner {
    pub fn new(settings: PartitionSettings) -> Self {
        Self {
            settings,
            leading_context: None,
        }
    }

    pub fn with_leading_context(mut self, strategy: impl LeadingContext + 'static) -> Self {
        self.leading_context = Some(Box::new(strategy));
        self
    }

    pub fn settings(&self) -> &PartitionSettings {
        &self.settings
    }
}

/// [`Partitioner::make_windows`] with default settings
pub fn make_windows(
    source: &Container,
    window_markers: &Container,
    reference: Option<&Container>,
) -> Result<Windowed> {
    Partitioner::default().make_windows(source, window_markers, reference)
}

/// [`Partitioner::make_windows_from_source`] with default settings
pub fn make_windows_from_source(source: &Container, reference: Option<&Container>) -> Result<Windowed> {
    Partitioner::default().make_windows_from_source(source, reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        assert_eq!(PartitionSettings::default().default_meter, Meter::default());
        assert!(StripTiesOptions::default().match_by_attribute.is_none());
    }

    #[test]
    fn test_settings_deserialize_with_missing_fields() {
        let settings: PartitionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, PartitionSettings::default());

        let settings: PartitionSettings =
            serde_json::from_str(r#"{"default_meter":{"numerator":3,"denominator":4}}"#).unwrap();
        assert_eq!(settings.default_meter, Meter::new(3, 4).unwrap());

        let options: StripTiesOptions =
            serde_json::from_str(r#"{"match_by_attribute":"pitch"}"#).unwrap();
        assert_eq!(options, StripTiesOptions::match_by_attribute("pitch"));
    }

    #[test]
    fn test_closure_is_a_leading_context() {
        let strategy = |_: &Container| Some(Element::marker("Clef"));
        let content = Container::new();
        let marker = strategy.resolve(&content).unwrap();
        assert!(marker.is_class("Clef"));
    }
}
