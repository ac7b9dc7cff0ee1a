//! Site Registry - the single source of truth for element placement.
//!
//! A site is an (element, container) membership record carrying that
//! element's offset inside that container and a global insertion index used
//! for stable tie-breaking. Containers never store offsets themselves; they
//! ask the registry.
//!
//! [`SiteRegistry`] is a plain value type. The crate keeps one instance per
//! thread (the model is single-threaded and its handles are `!Send`), which
//! containers use through the crate-private helpers at the bottom of this
//! module.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{Result, StreamError, StructuralError};
use crate::models::element::Node;
use crate::models::{Element, ElementId, Rational};
use crate::stream::Container;

/// One (element, container) membership record
#[derive(Clone)]
pub struct SiteEntry {
    container_id: ElementId,
    /// Non-owning back-reference to the container
    container: Weak<Node>,
    offset: Rational,
    insertion_index: u64,
}

impl SiteEntry {
    pub fn container_id(&self) -> ElementId {
        self.container_id
    }

    /// The container, if it is still alive
    pub fn container(&self) -> Option<Container> {
        self.container
            .upgrade()
            .and_then(|node| Container::from_element(&Element(node)))
    }

    pub fn offset(&self) -> Rational {
        self.offset
    }

    pub fn insertion_index(&self) -> u64 {
        self.insertion_index
    }
}

impl std::fmt::Debug for SiteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteEntry")
            .field("container", &self.container_id)
            .field("offset", &self.offset)
            .field("insertion_index", &self.insertion_index)
            .finish()
    }
}

/// Membership registry keyed by (element, container)
#[derive(Default)]
pub struct SiteRegistry {
    /// element → one entry per container holding it directly
    entries: HashMap<ElementId, Vec<SiteEntry>>,
    /// Monotonic insertion counter shared by all containers
    next_insertion: u64,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `element` inside `container` at `offset`
    ///
    /// Returns the insertion index assigned to the new entry.
    ///
    /// # Errors
    /// `StructuralError::DuplicateSite` if the pair is already registered;
    /// use [`SiteRegistry::update_offset`] to move an element.
    pub fn add_site(
        &mut self,
        element: &Element,
        container: &Container,
        offset: Rational,
    ) -> Result<u64> {
        let element_id = element.id();
        let container_id = container.id();
        let sites = self.entries.entry(element_id).or_default();

        if sites.iter().any(|s| s.container_id == container_id) {
            return Err(StructuralError::DuplicateSite {
                element: element_id,
                container: container_id,
            }
            .into());
        }

        let insertion_index = self.next_insertion;
        self.next_insertion += 1;

        sites.push(SiteEntry {
            container_id,
            container: Rc::downgrade(container.node()),
            offset,
            insertion_index,
        });
        Ok(insertion_index)
    }

    /// Remove the entry for the pair; no-op (returns `None`) if absent
    pub fn remove_site(&mut self, element: ElementId, container: ElementId) -> Option<SiteEntry> {
        let sites = self.entries.get_mut(&element)?;
        let position = sites.iter().position(|s| s.container_id == container)?;
        let removed = sites.remove(position);
        if sites.is_empty() {
            self.entries.remove(&element);
        }
        Some(removed)
    }

    /// Offset of `element` inside `container`, or `None` if not a direct member
    pub fn offset_for(&self, element: ElementId, container: ElementId) -> Option<Rational> {
        self.entry(element, container).map(|s| s.offset)
    }

    pub fn entry(&self, element: ElementId, container: ElementId) -> Option<&SiteEntry> {
        self.entries
            .get(&element)?
            .iter()
            .find(|s| s.container_id == container)
    }

    /// Move an already-registered element; the insertion index is kept
    pub fn update_offset(
        &mut self,
        element: ElementId,
        container: ElementId,
        offset: Rational,
    ) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&element)
            .and_then(|sites| sites.iter_mut().find(|s| s.container_id == container))
            .ok_or(StreamError::NotFound { element, container })?;
        entry.offset = offset;
        Ok(())
    }

    pub fn sites_of(&self, element: ElementId) -> &[SiteEntry] {
        self.entries
            .get(&element)
            .map(|sites| sites.as_slice())
            .unwrap_or(&[])
    }

    pub fn site_count(&self, element: ElementId) -> usize {
        self.sites_of(element).len()
    }

    /// Drop every entry naming `container` for the given members
    pub fn remove_container(&mut self, container: ElementId, members: &[ElementId]) -> usize {
        members
            .iter()
            .filter(|member| self.remove_site(**member, container).is_some())
            .count()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.entries.values().map(|sites| sites.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Per-thread registry used by containers
// =============================================================================

thread_local! {
    static SITES: RefCell<SiteRegistry> = RefCell::new(SiteRegistry::new());
}

/// Run `f` with mutable access to this thread's registry
///
/// `f` must not call back into containers or drop elements.
pub(crate) fn with_sites<R>(f: impl FnOnce(&mut SiteRegistry) -> R) -> R {
    SITES.with(|registry| f(&mut registry.borrow_mut()))
}

/// Offset of `element` inside `container` in this thread's registry
pub fn offset_for(element: ElementId, container: ElementId) -> Option<Rational> {
    with_sites(|registry| registry.offset_for(element, container))
}

/// Every site of `element` in this thread's registry
pub fn sites_of(element: ElementId) -> Vec<SiteEntry> {
    with_sites(|registry| registry.sites_of(element).to_vec())
}

pub fn site_count(element: ElementId) -> usize {
    with_sites(|registry| registry.site_count(element))
}

/// Called from container drop; tolerates thread teardown
pub(crate) fn release_container(container: ElementId, members: &[ElementId]) {
    let released = SITES.try_with(|registry| match registry.try_borrow_mut() {
        Ok(mut registry) => {
            registry.remove_container(container, members);
            true
        }
        Err(_) => false,
    });
    if let Ok(false) = released {
        log::warn!(
            "site registry busy while dropping container {}; {} entries left behind",
            container,
            members.len()
        );
    }
}
