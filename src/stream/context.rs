//! Reverse contextual lookup
//!
//! Answers "which `Meter` (or clef, key, ...) is in force at this point?" by
//! searching the nearest scope first and widening outwards through each
//! container's active site. Only non-owning references are followed, so the
//! walk can neither keep containers alive nor loop.

use crate::models::{Element, Rational};
use crate::stream::container::Container;

/// Nearest-preceding lookup by type tag
pub trait ContextProvider {
    /// Nearest element matching `type_tag` at or before `offset` (in the
    /// provider's own coordinates)
    fn nearest_before(&self, offset: Rational, type_tag: &str) -> Option<Element>;
}

impl ContextProvider for Container {
    fn nearest_before(&self, offset: Rational, type_tag: &str) -> Option<Element> {
        if offset < Rational::from_integer(0) {
            return None;
        }

        // Search this scope, nested members included; later offsets win,
        // equal offsets keep the earliest insertion
        let mut best: Option<(Rational, u64, Element)> = None;
        self.walk(&mut |item| {
            if item.offset > offset || !item.element.is_class(type_tag) {
                return;
            }
            let better = match &best {
                None => true,
                Some((best_offset, best_index, _)) => {
                    item.offset > *best_offset
                        || (item.offset == *best_offset && item.insertion_index < *best_index)
                }
            };
            if better {
                best = Some((item.offset, item.insertion_index, item.element.clone()));
            }
        });
        if let Some((_, _, found)) = best {
            return Some(found);
        }

        // Widen to the enclosing scope
        let parent = self.as_element().active_site()?;
        let own_offset = parent.element_offset(self.as_element())?;
        parent.nearest_before(own_offset + offset, type_tag)
    }
}

impl Element {
    /// Nearest element of class `type_tag` in force at this element's position
    ///
    /// Starts from the element's active site; the element itself qualifies
    /// when it matches.
    pub fn context_by_class(&self, type_tag: &str) -> Option<Element> {
        let site = self.active_site()?;
        let offset = site.element_offset(self)?;
        site.nearest_before(offset, type_tag)
    }
}
