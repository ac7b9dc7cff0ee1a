//! Stream Module
//!
//! Containers and the engines that operate on them.
//!
//! # Modules
//!
//! - **container**: storage, insertion/removal, ordering, cached aggregates
//! - **query**: range and nearest-offset queries
//! - **flatten**: flat and semi-flat views with absolute offsets
//! - **context**: reverse scope-walking lookups ([`ContextProvider`])
//! - **copy**: deep copy with site rebinding

pub mod container;
pub mod context;
pub mod copy;
pub mod flatten;
pub mod query;

pub use container::{Container, DerivationMethod, Placed};
pub use context::ContextProvider;
pub use flatten::WalkItem;
pub use query::{OffsetMapEntry, RangeQuery};
