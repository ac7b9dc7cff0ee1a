//! Elements: identity, duration, priority, tie role and opaque attributes
//!
//! An [`Element`] is a cheap, clonable handle onto shared state. Cloning the
//! handle never copies the element; use [`Element::duplicate`] for that.
//! Elements never store their own offset: every placement lives in the
//! site registry (see [`crate::sites`]), keyed by (element, container).
//!
//! Containers are elements too. A container node carries a stream body in
//! addition to the common element state; [`crate::stream::Container`] is the
//! typed handle for such nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::duration::{Duration, Rational};
use crate::models::meter::Meter;
use crate::sites::{self, SiteEntry};
use crate::stream::container::StreamBody;
use crate::stream::Container;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an element (never reused within a process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(u64);

impl ElementId {
    fn next() -> Self {
        ElementId(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id from its raw value (for diagnostics and tests)
    pub fn from_raw(raw: u64) -> Self {
        ElementId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Container flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Generic container
    Stream,
    /// Top-level container of parts
    Score,
    /// One instrument/voice line
    Part,
    /// Window produced by the partitioner
    Measure,
    /// Independent layer inside a window
    Voice,
}

impl StreamKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            StreamKind::Stream => "Stream",
            StreamKind::Score => "Score",
            StreamKind::Part => "Part",
            StreamKind::Measure => "Measure",
            StreamKind::Voice => "Voice",
        }
    }
}

/// What an element is, as far as type filters are concerned
///
/// The domain meaning of notes and markers lives in the attribute payload;
/// the kind only drives class matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Note,
    Rest,
    Chord,
    /// Named zero-or-more-length marker (clef, key, tempo, ...)
    Marker(String),
    /// Window-length marker
    Meter(Meter),
    /// Container
    Stream(StreamKind),
}

impl ElementKind {
    /// Most specific class name
    pub fn class_name(&self) -> &str {
        match self {
            ElementKind::Note => "Note",
            ElementKind::Rest => "Rest",
            ElementKind::Chord => "Chord",
            ElementKind::Marker(name) => name.as_str(),
            ElementKind::Meter(_) => "Meter",
            ElementKind::Stream(kind) => kind.class_name(),
        }
    }

    /// Family class name shared by related kinds
    pub fn family(&self) -> &'static str {
        match self {
            ElementKind::Note | ElementKind::Rest | ElementKind::Chord => "GeneralNote",
            ElementKind::Marker(_) | ElementKind::Meter(_) => "Marker",
            ElementKind::Stream(_) => "Stream",
        }
    }

    /// Whether a type filter selects this kind
    ///
    /// A filter matches the class name, the family name, or `"Element"`.
    pub fn is_class(&self, filter: &str) -> bool {
        filter == self.class_name() || filter == self.family() || filter == "Element"
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ElementKind::Stream(_))
    }
}

/// Role of an element in a tie chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieRole {
    #[default]
    None,
    /// Ties forward into the next fragment (also used for continuations)
    Start,
    /// Last fragment of a tie chain
    Stop,
}

/// Mutable per-element state
#[derive(Debug, Clone, Default)]
pub(crate) struct ElementState {
    pub(crate) duration: Duration,
    pub(crate) priority: i32,
    pub(crate) tie: TieRole,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) attributes: BTreeMap<String, Value>,
    /// Container this element was most recently placed into (non-owning)
    pub(crate) active_site: Weak<Node>,
}

/// Shared node behind every element handle
pub(crate) struct Node {
    pub(crate) id: ElementId,
    pub(crate) kind: ElementKind,
    pub(crate) state: RefCell<ElementState>,
    /// Present iff `kind` is a stream kind
    pub(crate) body: Option<RefCell<StreamBody>>,
}

impl Drop for Node {
    fn drop(&mut self) {
        // A dropped container must not leave site entries naming it behind
        if let Some(body) = self.body.as_mut() {
            let members: Vec<ElementId> =
                body.get_mut().elements.iter().map(|e| e.id()).collect();
            sites::release_container(self.id, &members);
        }
    }
}

/// Shared handle onto an element
#[derive(Clone)]
pub struct Element(pub(crate) Rc<Node>);

impl Element {
    /// Create a standalone element of the given kind
    pub fn new(kind: ElementKind, duration: Duration) -> Self {
        let body = kind.is_stream().then(|| RefCell::new(StreamBody::new()));
        Element(Rc::new(Node {
            id: ElementId::next(),
            kind,
            state: RefCell::new(ElementState {
                duration,
                ..ElementState::default()
            }),
            body,
        }))
    }

    pub(crate) fn from_state(kind: ElementKind, state: ElementState) -> Self {
        let body = kind.is_stream().then(|| RefCell::new(StreamBody::new()));
        Element(Rc::new(Node {
            id: ElementId::next(),
            kind,
            state: RefCell::new(state),
            body,
        }))
    }

    pub fn note(duration: Duration) -> Self {
        Self::new(ElementKind::Note, duration)
    }

    pub fn rest(duration: Duration) -> Self {
        Self::new(ElementKind::Rest, duration)
    }

    pub fn chord(duration: Duration) -> Self {
        Self::new(ElementKind::Chord, duration)
    }

    /// Zero-length named marker
    pub fn marker(name: &str) -> Self {
        Self::new(ElementKind::Marker(name.to_string()), Duration::zero())
    }

    /// Zero-length window-length marker
    pub fn meter_marker(meter: Meter) -> Self {
        Self::new(ElementKind::Meter(meter), Duration::zero())
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn with_priority(self, priority: i32) -> Self {
        self.set_priority(priority);
        self
    }

    pub fn with_tie(self, tie: TieRole) -> Self {
        self.set_tie_role(tie);
        self
    }

    pub fn with_tag(self, tag: &str) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn with_attribute(self, key: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(key, value);
        self
    }

    // ------------------------------------------------------------------
    // Identity and kind
    // ------------------------------------------------------------------

    pub fn id(&self) -> ElementId {
        self.0.id
    }

    pub fn kind(&self) -> &ElementKind {
        &self.0.kind
    }

    pub fn class_name(&self) -> &str {
        self.0.kind.class_name()
    }

    pub fn is_class(&self, filter: &str) -> bool {
        self.0.kind.is_class(filter)
    }

    pub fn is_container(&self) -> bool {
        self.0.body.is_some()
    }

    /// Typed container handle, if this element is a container
    pub fn as_container(&self) -> Option<Container> {
        Container::from_element(self)
    }

    /// Meter carried by a window-length marker
    pub fn as_meter(&self) -> Option<Meter> {
        match &self.0.kind {
            ElementKind::Meter(meter) => Some(*meter),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Duration and ordering
    // ------------------------------------------------------------------

    /// Element duration
    ///
    /// For containers this is the explicit override when one is set,
    /// otherwise the container's highest time.
    pub fn duration(&self) -> Duration {
        if let Some(container) = self.as_container() {
            return container.duration();
        }
        self.0.state.borrow().duration.clone()
    }

    pub fn quarter_length(&self) -> Rational {
        self.duration().quarter_length()
    }

    /// Set the duration (for containers: the explicit override)
    pub fn set_duration(&self, duration: Duration) {
        match self.as_container() {
            Some(container) => container.set_duration_override(Some(duration)),
            None => self.0.state.borrow_mut().duration = duration,
        }
        self.notify_sites_changed(false);
    }

    pub fn priority(&self) -> i32 {
        self.0.state.borrow().priority
    }

    pub fn set_priority(&self, priority: i32) {
        let changed = {
            let mut state = self.0.state.borrow_mut();
            let changed = state.priority != priority;
            state.priority = priority;
            changed
        };
        if changed {
            self.notify_sites_changed(true);
        }
    }

    pub fn tie_role(&self) -> TieRole {
        self.0.state.borrow().tie
    }

    pub fn set_tie_role(&self, tie: TieRole) {
        self.0.state.borrow_mut().tie = tie;
    }

    // ------------------------------------------------------------------
    // Tags and attributes
    // ------------------------------------------------------------------

    pub fn tags(&self) -> BTreeSet<String> {
        self.0.state.borrow().tags.clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.0.state.borrow().tags.contains(tag)
    }

    pub fn add_tag(&self, tag: &str) {
        self.0.state.borrow_mut().tags.insert(tag.to_string());
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        self.0.state.borrow_mut().tags.remove(tag)
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.0.state.borrow().attributes.get(key).cloned()
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.0.state.borrow().attributes.clone()
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<Value>) {
        self.0
            .state
            .borrow_mut()
            .attributes
            .insert(key.to_string(), value.into());
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.0.state.borrow_mut().attributes.remove(key)
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    /// All containers currently holding this element directly
    pub fn sites(&self) -> Vec<SiteEntry> {
        sites::sites_of(self.id())
    }

    pub fn site_count(&self) -> usize {
        sites::site_count(self.id())
    }

    /// Offset of this element inside `container`, if it is a direct member
    pub fn offset_in(&self, container: &Container) -> Option<Rational> {
        sites::offset_for(self.id(), container.id())
    }

    /// Container this element was most recently placed into, if still alive
    pub fn active_site(&self) -> Option<Container> {
        let weak = self.0.state.borrow().active_site.clone();
        weak.upgrade()
            .and_then(|node| Container::from_element(&Element(node)))
    }

    /// Point context lookups at one of this element's containers
    ///
    /// Returns `false` (and changes nothing) when the element is not a direct
    /// member of `container`.
    pub fn set_active_site(&self, container: &Container) -> bool {
        if !container.contains(self) {
            return false;
        }
        self.set_active_site_node(Rc::downgrade(container.node()));
        true
    }

    pub(crate) fn set_active_site_node(&self, site: Weak<Node>) {
        self.0.state.borrow_mut().active_site = site;
    }

    pub(crate) fn clear_active_site_if(&self, container: ElementId) {
        let mut state = self.0.state.borrow_mut();
        let points_here = state
            .active_site
            .upgrade()
            .map(|node| node.id == container)
            .unwrap_or(false);
        if points_here {
            state.active_site = Weak::new();
        }
    }

    /// Invalidate the caches of every container holding this element
    ///
    /// `reorders` marks the holders' storage as unsorted (priority changes).
    pub(crate) fn notify_sites_changed(&self, reorders: bool) {
        for site in sites::sites_of(self.id()) {
            if let Some(container) = site.container() {
                if reorders {
                    container.mark_unsorted();
                }
                container.invalidate_cache();
            }
        }
    }

    /// Copy of the element state with no sites and no active site
    pub(crate) fn state_snapshot(&self) -> ElementState {
        let mut state = self.0.state.borrow().clone();
        state.active_site = Weak::new();
        state
    }

    /// Fresh element with a new identity and the same data
    ///
    /// Containers are deep-copied (see [`Container::deep_copy`]).
    pub fn duplicate(&self) -> Element {
        if let Some(container) = self.as_container() {
            return container.deep_copy().into_element();
        }
        Element::from_state(self.0.kind.clone(), self.state_snapshot())
    }
}

impl AsRef<Element> for Element {
    fn as_ref(&self) -> &Element {
        self
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Containers print their own summary; avoid recursing into members
        if self.is_container() {
            return write!(f, "<{} {}>", self.class_name(), self.id());
        }
        let state = self.0.state.borrow();
        f.debug_struct(self.class_name())
            .field("id", &self.id())
            .field("duration", &state.duration)
            .field("priority", &state.priority)
            .field("tie", &state.tie)
            .finish()
    }
}
