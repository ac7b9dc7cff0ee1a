//! Container core: storage, insertion, removal, ordering and cached aggregates
//!
//! # Architecture
//!
//! ```text
//! Container (handle)  ──Rc──►  Node { id, kind, state, body: StreamBody }
//!                                               │
//!                     elements: Vec<Element> ◄──┘   (owns members)
//!
//! SiteRegistry (per thread)
//!   (element, container) → { offset, insertion_index, weak container }
//! ```
//!
//! Storage order is insertion order until [`Container::sort`] is called. The
//! sorted view is derived on demand: offset ascending, then priority
//! ascending, then insertion order. Aggregates (highest/lowest offset,
//! highest time, sorted view) are cached in the body and dropped on every
//! mutation of this container or of anything nested inside it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::error::{Result, StreamError, StructuralError};
use crate::models::element::Node;
use crate::models::{
    to_rational, Duration, Element, ElementId, ElementKind, Meter, Rational, StreamKind,
};
use crate::sites::{self, with_sites};

/// An element together with its offset in one container
#[derive(Debug, Clone)]
pub struct Placed {
    pub offset: Rational,
    pub element: Element,
    /// Insertion index of the element's site in this container
    pub insertion_index: u64,
}

impl Placed {
    /// Offset plus duration
    pub fn end(&self) -> Rational {
        self.offset + self.element.quarter_length()
    }
}

/// How a container was derived from another one
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DerivationMethod {
    Flat,
    SemiFlat,
    DeepCopy,
    Windows,
    StripTies,
}

#[derive(Clone)]
pub(crate) struct Derivation {
    pub(crate) origin: Weak<Node>,
    pub(crate) method: DerivationMethod,
}

/// Window metadata carried by partitioner output
#[derive(Debug, Clone)]
pub(crate) struct WindowInfo {
    pub(crate) number: u32,
    pub(crate) meter: Meter,
    pub(crate) leading_context: Option<Element>,
}

#[derive(Default)]
pub(crate) struct AggregateCache {
    entries: Option<Rc<Vec<Placed>>>,
    highest_offset: Option<Rational>,
    lowest_offset: Option<Rational>,
    highest_time: Option<Rational>,
}

/// Storage owned by a container node
pub(crate) struct StreamBody {
    pub(crate) elements: Vec<Element>,
    /// Storage is known to be in sorted-view order
    pub(crate) sorted: bool,
    /// No member is a container
    pub(crate) flat: bool,
    pub(crate) duration_override: Option<Duration>,
    pub(crate) derivation: Option<Derivation>,
    pub(crate) window: Option<WindowInfo>,
    pub(crate) cache: AggregateCache,
}

impl StreamBody {
    pub(crate) fn new() -> Self {
        Self {
            elements: Vec::new(),
            sorted: true,
            flat: true,
            duration_override: None,
            derivation: None,
            window: None,
            cache: AggregateCache::default(),
        }
    }
}

/// Typed handle onto a container element
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Container(Element);

impl Container {
    pub fn new() -> Self {
        Self::with_kind(StreamKind::Stream)
    }

    pub fn with_kind(kind: StreamKind) -> Self {
        Container(Element::new(ElementKind::Stream(kind), Duration::zero()))
    }

    pub(crate) fn from_element(element: &Element) -> Option<Container> {
        element
            .is_container()
            .then(|| Container(element.clone()))
    }

    pub fn as_element(&self) -> &Element {
        &self.0
    }

    pub fn into_element(self) -> Element {
        self.0
    }

    pub fn id(&self) -> ElementId {
        self.0.id()
    }

    pub fn kind(&self) -> StreamKind {
        match self.0.kind() {
            ElementKind::Stream(kind) => *kind,
            // Handles are only built by from_element/with_kind, both over stream nodes
            _ => unreachable!("container handle over a non-stream element"),
        }
    }

    pub(crate) fn node(&self) -> &Rc<Node> {
        &self.0 .0
    }

    pub(crate) fn body(&self) -> &RefCell<StreamBody> {
        match &self.0 .0.body {
            Some(body) => body,
            // Stream nodes always carry a body (see Element::new)
            None => unreachable!("container handle without a stream body"),
        }
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Place `element` at `offset`
    ///
    /// # Errors
    /// - `InvalidOffset` for negative offsets
    /// - `StructuralError::SelfContainment` if `element` is this container or
    ///   (transitively) contains it
    /// - `StructuralError::DuplicateSite` if `element` is already a direct member
    pub fn insert(&self, offset: Rational, element: impl AsRef<Element>) -> Result<()> {
        self.insert_core(offset, element.as_ref(), true)
    }

    /// Float entry point; rejects NaN, infinities and negative values
    pub fn insert_f64(&self, offset: f64, element: impl AsRef<Element>) -> Result<()> {
        let offset = to_rational(offset).ok_or_else(|| StreamError::InvalidOffset(offset.to_string()))?;
        self.insert(offset, element)
    }

    /// Place at the current highest time (queue semantics)
    pub fn append(&self, element: impl AsRef<Element>) -> Result<()> {
        let offset = self.highest_time();
        self.insert(offset, element)
    }

    /// Insert a batch atomically
    ///
    /// Every item is validated first; on any failure nothing is inserted and
    /// one aggregated `StreamError::Batch` is returned.
    pub fn insert_many(&self, items: &[(Rational, Element)]) -> Result<()> {
        let mut failures = Vec::new();
        let mut seen = HashSet::new();

        for (index, (offset, element)) in items.iter().enumerate() {
            let checked = self
                .validate_insert(*offset, element)
                .and_then(|_| {
                    if seen.insert(element.id()) {
                        Ok(())
                    } else {
                        Err(StructuralError::DuplicateSite {
                            element: element.id(),
                            container: self.id(),
                        }
                        .into())
                    }
                });
            if let Err(err) = checked {
                failures.push((index, err));
            }
        }

        if !failures.is_empty() {
            return Err(StreamError::Batch {
                total: items.len(),
                failures,
            });
        }

        for (offset, element) in items {
            self.insert_core(*offset, element, true)?;
        }
        Ok(())
    }

    fn validate_insert(&self, offset: Rational, element: &Element) -> Result<()> {
        if offset < Rational::from_integer(0) {
            return Err(StreamError::InvalidOffset(offset.to_string()));
        }
        if let Some(inner) = element.as_container() {
            if inner.id() == self.id() || inner.contains_recursive(self.id()) {
                return Err(StructuralError::SelfContainment {
                    container: self.id(),
                    element: inner.id(),
                }
                .into());
            }
        }
        if sites::offset_for(element.id(), self.id()).is_some() {
            return Err(StructuralError::DuplicateSite {
                element: element.id(),
                container: self.id(),
            }
            .into());
        }
        Ok(())
    }

    /// Shared insertion path
    ///
    /// Derived views (flatten results) pass `set_active_site = false` so that
    /// context lookups keep following the element's real home.
    pub(crate) fn insert_core(
        &self,
        offset: Rational,
        element: &Element,
        set_active_site: bool,
    ) -> Result<()> {
        self.validate_insert(offset, element)?;

        // Stays sorted only if the new key sorts after the current last one
        let (was_sorted, last) = {
            let body = self.body().borrow();
            (body.sorted, body.elements.last().cloned())
        };
        let keeps_sorted = was_sorted
            && match &last {
                None => true,
                Some(prev) => {
                    let prev_offset = sites::offset_for(prev.id(), self.id())
                        .unwrap_or_else(|| Rational::from_integer(0));
                    offset > prev_offset
                        || (offset == prev_offset && element.priority() >= prev.priority())
                }
            };

        with_sites(|registry| registry.add_site(element, self, offset))?;

        {
            let mut body = self.body().borrow_mut();
            body.elements.push(element.clone());
            body.sorted = keeps_sorted;
            if element.is_container() {
                body.flat = false;
            }
        }

        if set_active_site {
            element.set_active_site_node(Rc::downgrade(self.node()));
        }
        self.invalidate_cache();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal and replacement
    // ------------------------------------------------------------------

    /// Remove `element` if it is a direct member; returns the count removed
    pub fn remove(&self, element: impl AsRef<Element>) -> usize {
        let element = element.as_ref();
        let removed: Vec<Element> = {
            let mut body = self.body().borrow_mut();
            let mut removed = Vec::new();
            body.elements.retain(|e| {
                if e.id() == element.id() {
                    removed.push(e.clone());
                    false
                } else {
                    true
                }
            });
            if !removed.is_empty() && element.is_container() {
                body.flat = !body.elements.iter().any(|e| e.is_container());
            }
            removed
        };

        if removed.is_empty() {
            return 0;
        }

        with_sites(|registry| registry.remove_site(element.id(), self.id()));
        element.clear_active_site_if(self.id());
        self.invalidate_cache();
        removed.len()
    }

    /// Remove several elements; returns the total count removed
    pub fn remove_many(&self, elements: &[Element]) -> usize {
        elements.iter().map(|e| self.remove(e)).sum()
    }

    /// Remove and return the element at a storage index
    pub fn pop(&self, index: usize) -> Option<Element> {
        let element = self.body().borrow().elements.get(index).cloned()?;
        self.remove(&element);
        Some(element)
    }

    /// Remove every member
    pub fn clear(&self) {
        let members = {
            let mut body = self.body().borrow_mut();
            body.sorted = true;
            body.flat = true;
            std::mem::take(&mut body.elements)
        };
        let ids: Vec<ElementId> = members.iter().map(|e| e.id()).collect();
        with_sites(|registry| registry.remove_container(self.id(), &ids));
        for member in &members {
            member.clear_active_site_if(self.id());
        }
        self.invalidate_cache();
    }

    /// Put `replacement` where `target` is (same offset, same storage slot)
    pub fn replace(&self, target: impl AsRef<Element>, replacement: impl AsRef<Element>) -> Result<()> {
        let target = target.as_ref();
        let replacement = replacement.as_ref();

        let offset = sites::offset_for(target.id(), self.id()).ok_or(StreamError::NotFound {
            element: target.id(),
            container: self.id(),
        })?;
        if target.id() == replacement.id() {
            return Ok(());
        }
        self.validate_insert(offset, replacement)?;

        with_sites(|registry| -> Result<()> {
            registry.remove_site(target.id(), self.id());
            registry.add_site(replacement, self, offset)?;
            Ok(())
        })?;

        {
            let mut body = self.body().borrow_mut();
            if let Some(slot) = body.elements.iter_mut().find(|e| e.id() == target.id()) {
                *slot = replacement.clone();
            }
            // The replacement carries a newer insertion index
            body.sorted = body.elements.len() <= 1;
            body.flat = !body.elements.iter().any(|e| e.is_container());
        }

        target.clear_active_site_if(self.id());
        replacement.set_active_site_node(Rc::downgrade(self.node()));
        self.invalidate_cache();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Repositioning
    // ------------------------------------------------------------------

    /// Move a direct member (exact match required)
    pub fn set_offset(&self, element: impl AsRef<Element>, offset: Rational) -> Result<()> {
        let element = element.as_ref();
        if offset < Rational::from_integer(0) {
            return Err(StreamError::InvalidOffset(offset.to_string()));
        }
        with_sites(|registry| registry.update_offset(element.id(), self.id(), offset))?;
        self.mark_unsorted();
        self.invalidate_cache();
        Ok(())
    }

    /// Add `delta` to every member's offset
    ///
    /// Fails without changing anything if any offset would become negative.
    pub fn shift_elements(&self, delta: Rational) -> Result<()> {
        let entries = self.storage_entries();
        if let Some(lowest) = entries.iter().map(|(offset, _)| *offset).min() {
            let shifted = lowest + delta;
            if shifted < Rational::from_integer(0) {
                return Err(StreamError::InvalidOffset(shifted.to_string()));
            }
        }
        with_sites(|registry| -> Result<()> {
            for (offset, element) in &entries {
                registry.update_offset(element.id(), self.id(), *offset + delta)?;
            }
            Ok(())
        })?;
        self.invalidate_cache();
        Ok(())
    }

    /// Reorder storage into sorted-view order
    pub fn sort(&self) {
        let entries = self.sorted_entries();
        let mut body = self.body().borrow_mut();
        body.elements = entries.iter().map(|p| p.element.clone()).collect();
        body.sorted = true;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.body().borrow().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body().borrow().elements.is_empty()
    }

    /// Members in storage order
    pub fn elements(&self) -> Vec<Element> {
        self.body().borrow().elements.clone()
    }

    /// Members in storage order, with their offsets
    pub(crate) fn storage_entries(&self) -> Vec<(Rational, Element)> {
        let elements = self.elements();
        with_sites(|registry| {
            elements
                .into_iter()
                .filter_map(|e| registry.offset_for(e.id(), self.id()).map(|o| (o, e)))
                .collect()
        })
    }

    pub fn contains(&self, element: impl AsRef<Element>) -> bool {
        let id = element.as_ref().id();
        self.body().borrow().elements.iter().any(|e| e.id() == id)
    }

    /// Whether `id` is a member at any nesting depth
    pub fn contains_recursive(&self, id: ElementId) -> bool {
        self.elements().iter().any(|e| {
            e.id() == id
                || e
                    .as_container()
                    .map(|inner| inner.contains_recursive(id))
                    .unwrap_or(false)
        })
    }

    /// Storage index of a direct member
    pub fn index(&self, element: impl AsRef<Element>) -> Option<usize> {
        let id = element.as_ref().id();
        self.body().borrow().elements.iter().position(|e| e.id() == id)
    }

    /// Offset of a direct member
    pub fn element_offset(&self, element: impl AsRef<Element>) -> Option<Rational> {
        sites::offset_for(element.as_ref().id(), self.id())
    }

    /// Whether storage is known to be in sorted order
    pub fn is_sorted(&self) -> bool {
        self.body().borrow().sorted
    }

    /// Whether no member is a container
    pub fn is_flat(&self) -> bool {
        self.body().borrow().flat
    }

    /// Members ordered by (offset, priority, insertion order)
    pub fn sorted_view(&self) -> Vec<Element> {
        self.sorted_entries()
            .iter()
            .map(|p| p.element.clone())
            .collect()
    }

    /// Sorted members with offsets
    pub fn entries(&self) -> Vec<Placed> {
        self.sorted_entries().as_ref().clone()
    }

    pub(crate) fn sorted_entries(&self) -> Rc<Vec<Placed>> {
        if let Some(cached) = self.body().borrow().cache.entries.clone() {
            return cached;
        }

        let elements = self.elements();
        let mut entries: Vec<Placed> = with_sites(|registry| {
            elements
                .into_iter()
                .filter_map(|element| {
                    registry.entry(element.id(), self.id()).map(|site| Placed {
                        offset: site.offset(),
                        insertion_index: site.insertion_index(),
                        element,
                    })
                })
                .collect()
        });
        entries.sort_by(|a, b| {
            a.offset
                .cmp(&b.offset)
                .then_with(|| a.element.priority().cmp(&b.element.priority()))
                .then_with(|| a.insertion_index.cmp(&b.insertion_index))
        });

        let entries = Rc::new(entries);
        self.body().borrow_mut().cache.entries = Some(entries.clone());
        entries
    }

    /// Largest member offset (0 when empty)
    pub fn highest_offset(&self) -> Rational {
        if let Some(cached) = self.body().borrow().cache.highest_offset {
            return cached;
        }
        let value = if self.is_sorted() {
            // Sorted storage: the last member carries the highest offset
            let last = self.body().borrow().elements.last().cloned();
            last.and_then(|e| self.element_offset(&e))
                .unwrap_or_else(|| Rational::from_integer(0))
        } else {
            self.storage_entries()
                .iter()
                .map(|(offset, _)| *offset)
                .max()
                .unwrap_or_else(|| Rational::from_integer(0))
        };
        self.body().borrow_mut().cache.highest_offset = Some(value);
        value
    }

    /// Smallest member offset (0 when empty)
    pub fn lowest_offset(&self) -> Rational {
        if let Some(cached) = self.body().borrow().cache.lowest_offset {
            return cached;
        }
        let value = if self.is_sorted() {
            let first = self.body().borrow().elements.first().cloned();
            first
                .and_then(|e| self.element_offset(&e))
                .unwrap_or_else(|| Rational::from_integer(0))
        } else {
            self.storage_entries()
                .iter()
                .map(|(offset, _)| *offset)
                .min()
                .unwrap_or_else(|| Rational::from_integer(0))
        };
        self.body().borrow_mut().cache.lowest_offset = Some(value);
        value
    }

    /// Largest member end time (offset + duration; 0 when empty)
    pub fn highest_time(&self) -> Rational {
        if let Some(cached) = self.body().borrow().cache.highest_time {
            return cached;
        }
        let value = self
            .storage_entries()
            .iter()
            .map(|(offset, element)| *offset + element.quarter_length())
            .max()
            .unwrap_or_else(|| Rational::from_integer(0));
        self.body().borrow_mut().cache.highest_time = Some(value);
        value
    }

    /// Explicit override if set, otherwise the highest time
    pub fn duration(&self) -> Duration {
        if let Some(duration) = self.body().borrow().duration_override.clone() {
            return duration;
        }
        Duration::new(self.highest_time()).unwrap_or_default()
    }

    pub(crate) fn set_duration_override(&self, duration: Option<Duration>) {
        self.body().borrow_mut().duration_override = duration;
    }

    // ------------------------------------------------------------------
    // Derivation and window metadata
    // ------------------------------------------------------------------

    /// Container this one was derived from, if it is still alive
    pub fn derived_from(&self) -> Option<Container> {
        let origin = self
            .body()
            .borrow()
            .derivation
            .as_ref()
            .map(|d| d.origin.clone())?;
        origin
            .upgrade()
            .and_then(|node| Container::from_element(&Element(node)))
    }

    pub fn derivation_method(&self) -> Option<DerivationMethod> {
        self.body().borrow().derivation.as_ref().map(|d| d.method)
    }

    pub(crate) fn set_derivation(&self, origin: &Container, method: DerivationMethod) {
        self.body().borrow_mut().derivation = Some(Derivation {
            origin: Rc::downgrade(origin.node()),
            method,
        });
    }

    /// Window number (1-based) for partitioner output
    pub fn window_number(&self) -> Option<u32> {
        self.body().borrow().window.as_ref().map(|w| w.number)
    }

    /// Window-length marker active for this window
    pub fn window_meter(&self) -> Option<Meter> {
        self.body().borrow().window.as_ref().map(|w| w.meter)
    }

    /// Leading-context marker attached to the first window
    pub fn leading_context(&self) -> Option<Element> {
        self.body()
            .borrow()
            .window
            .as_ref()
            .and_then(|w| w.leading_context.clone())
    }

    pub(crate) fn set_window(&self, number: u32, meter: Meter) {
        self.body().borrow_mut().window = Some(WindowInfo {
            number,
            meter,
            leading_context: None,
        });
        self.set_duration_override(Some(
            Duration::new(meter.bar_length()).unwrap_or_default(),
        ));
    }

    pub(crate) fn set_leading_context(&self, marker: Element) {
        if let Some(window) = self.body().borrow_mut().window.as_mut() {
            window.leading_context = Some(marker);
        }
    }

    pub(crate) fn window_info(&self) -> Option<WindowInfo> {
        self.body().borrow().window.clone()
    }

    pub(crate) fn set_window_info(&self, info: Option<WindowInfo>) {
        self.body().borrow_mut().window = info;
    }

    pub(crate) fn duration_override(&self) -> Option<Duration> {
        self.body().borrow().duration_override.clone()
    }

    // ------------------------------------------------------------------
    // Cache maintenance
    // ------------------------------------------------------------------

    pub(crate) fn mark_unsorted(&self) {
        let mut body = self.body().borrow_mut();
        body.sorted = body.elements.len() <= 1;
    }

    /// Drop cached aggregates here and in every container holding this one
    pub(crate) fn invalidate_cache(&self) {
        let stale = std::mem::take(&mut self.body().borrow_mut().cache);
        drop(stale);
        for site in sites::sites_of(self.id()) {
            if let Some(parent) = site.container() {
                parent.invalidate_cache();
            }
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Element> for Container {
    fn as_ref(&self) -> &Element {
        &self.0
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.0.class_name())
            .field("id", &self.id())
            .field("len", &self.len())
            .field("sorted", &self.is_sorted())
            .field("flat", &self.is_flat())
            .finish()
    }
}
