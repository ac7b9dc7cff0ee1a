//! Score Stream
//!
//! Hierarchical, offset-indexed element containers for a music score model.
//! An element can live in several containers at once, each keeping its own
//! offset for it in the site registry.
//!
//! # Modules
//!
//! - **models**: durations, meters and elements
//! - **sites**: the (element, container) → offset registry
//! - **stream**: containers, queries, flattening, context lookup, deep copy
//! - **layering**: simultaneity/overlap maps and grouping
//! - **partition**: windowing with tied splits, and tie merging
//! - **export**: records, summaries and plot triples for outside consumers
//!
//! The model is single-threaded: handles are `Rc`-based and the registry is
//! thread-local. The library logs through the `log` facade and never installs
//! a logger.

pub mod error;
pub mod export;
pub mod layering;
pub mod models;
pub mod partition;
pub mod sites;
pub mod stream;

// Re-export commonly used types
pub use error::{DataConsistencyError, Result, StreamError, StructuralError};
pub use export::{plot_triples, records_to_json, summarize, ContainerSummary, ExportRecord, ExportSink, PlotPoint};
pub use layering::{spans_overlap, LayerAnalysis, Span};
pub use models::{Duration, Element, ElementId, ElementKind, Meter, Rational, StreamKind, TieRole};
pub use partition::{
    make_windows, make_windows_from_source, strip_ties, LeadingContext, PartitionSettings,
    Partitioner, StripTiesOptions, TiesStripped, Windowed,
};
pub use stream::{Container, ContextProvider, DerivationMethod, RangeQuery};
