//! Flatten / recurse engine
//!
//! Produces new containers holding the *same* element handles as the source
//! at absolute offsets. Sharing is the point: attribute changes made through
//! a flattened view are visible in the source and vice versa. Callers that
//! need independence deep-copy first.

use std::collections::HashSet;

use crate::models::{Element, Rational};
use crate::stream::container::{Container, DerivationMethod};

/// One node visited by [`Container::walk`]
#[derive(Debug, Clone)]
pub struct WalkItem {
    /// Offset relative to the container the walk started from
    pub offset: Rational,
    /// 1 for direct members, 2 for their members, ...
    pub depth: usize,
    pub element: Element,
    /// Insertion index of the element's site in its direct container
    pub insertion_index: u64,
}

impl Container {
    /// Visit every descendant in storage order, depth first
    ///
    /// A nested container is visited before its own members.
    pub fn walk(&self, visit: &mut dyn FnMut(&WalkItem)) {
        self.walk_from(Rational::from_integer(0), 1, visit);
    }

    fn walk_from(&self, base: Rational, depth: usize, visit: &mut dyn FnMut(&WalkItem)) {
        // Collect first so no borrow is held while the visitor runs
        let members: Vec<(Rational, u64, Element)> = crate::sites::with_sites(|registry| {
            self.elements()
                .into_iter()
                .filter_map(|e| {
                    registry
                        .entry(e.id(), self.id())
                        .map(|site| (site.offset(), site.insertion_index(), e))
                })
                .collect()
        });

        for (offset, insertion_index, element) in members {
            let absolute = base + offset;
            visit(&WalkItem {
                offset: absolute,
                depth,
                element: element.clone(),
                insertion_index,
            });
            if let Some(inner) = element.as_container() {
                inner.walk_from(absolute, depth + 1, visit);
            }
        }
    }

    /// Merge nested containers into one container with absolute offsets
    ///
    /// With `retain_containers` the nested containers themselves are kept as
    /// members too (semi-flat output). The receiver is never mutated. An
    /// element reachable twice keeps its first position in the walk.
    pub fn flatten(&self, retain_containers: bool) -> Container {
        let result = Container::with_kind(self.kind());
        let mut seen = HashSet::new();

        self.walk(&mut |item| {
            if item.element.is_container() && !retain_containers {
                return;
            }
            if !seen.insert(item.element.id()) {
                log::debug!(
                    "flatten: {} reachable more than once in {}; keeping first offset",
                    item.element.id(),
                    self.id()
                );
                return;
            }
            if let Err(err) = result.insert_core(item.offset, &item.element, false) {
                log::warn!("flatten: could not place {}: {}", item.element.id(), err);
            }
        });

        let method = if retain_containers {
            DerivationMethod::SemiFlat
        } else {
            DerivationMethod::Flat
        };
        result.set_derivation(self, method);
        result
    }

    /// Fully flat view (no nested containers)
    pub fn flat(&self) -> Container {
        self.flatten(false)
    }

    /// Flat view that keeps nested containers as members
    pub fn semi_flat(&self) -> Container {
        self.flatten(true)
    }

    /// Every descendant leaf, in walk order
    pub fn recurse_leaves(&self) -> Vec<Element> {
        let mut leaves = Vec::new();
        self.walk(&mut |item| {
            if !item.element.is_container() {
                leaves.push(item.element.clone());
            }
        });
        leaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Duration, StreamKind};

    fn r(n: i64) -> Rational {
        Rational::from_integer(n)
    }

    fn note(ql: i64) -> Element {
        Element::note(Duration::new(r(ql)).unwrap())
    }

    #[test]
    fn test_flatten_accumulates_offsets() {
        let part = Container::with_kind(StreamKind::Part);
        let m1 = Container::with_kind(StreamKind::Measure);
        let m2 = Container::with_kind(StreamKind::Measure);
        let voice = Container::with_kind(StreamKind::Voice);
        let a = note(1);
        let b = note(1);
        let c = note(1);

        m1.insert(r(1), &a).unwrap();
        voice.insert(r(2), &c).unwrap();
        m2.insert(r(0), &b).unwrap();
        m2.insert(r(1), &voice).unwrap();
        part.insert(r(0), &m1).unwrap();
        part.insert(r(4), &m2).unwrap();

        let flat = part.flatten(false);
        assert_eq!(flat.len(), 3);
        assert!(flat.is_flat());
        assert_eq!(flat.element_offset(&a), Some(r(1)));
        assert_eq!(flat.element_offset(&b), Some(r(4)));
        assert_eq!(flat.element_offset(&c), Some(r(7)));
        assert_eq!(flat.derived_from(), Some(part.clone()));
        assert_eq!(flat.derivation_method(), Some(DerivationMethod::Flat));
    }

    #[test]
    fn test_semi_flat_retains_containers() {
        let part = Container::with_kind(StreamKind::Part);
        let m = Container::with_kind(StreamKind::Measure);
        let a = note(1);
        m.insert(r(1), &a).unwrap();
        part.insert(r(4), &m).unwrap();

        let semi = part.flatten(true);
        assert_eq!(semi.len(), 2);
        assert_eq!(semi.element_offset(&m), Some(r(4)));
        assert_eq!(semi.element_offset(&a), Some(r(5)));
        assert!(!semi.is_flat());
    }

    #[test]
    fn test_flatten_shares_identity_and_leaves_source_alone() {
        let outer = Container::new();
        let inner = Container::new();
        let a = note(1).with_attribute("pitch", "C4");
        inner.insert(r(0), &a).unwrap();
        outer.insert(r(2), &inner).unwrap();

        let flat = outer.flatten(false);
        let shared = flat.first().unwrap();
        assert!(shared.ptr_eq(&a));
        shared.set_attribute("pitch", "E4");
        assert_eq!(a.attribute("pitch"), Some(serde_json::Value::from("E4")));

        // Source untouched, active site still the real home
        assert_eq!(outer.len(), 1);
        assert_eq!(inner.element_offset(&a), Some(r(0)));
        assert_eq!(a.active_site(), Some(inner.clone()));
        assert_eq!(a.site_count(), 2);
    }

    #[test]
    fn test_element_reachable_twice_keeps_first() {
        let outer = Container::new();
        let x = Container::new();
        let y = Container::new();
        let shared = note(1);
        x.insert(r(0), &shared).unwrap();
        y.insert(r(0), &shared).unwrap();
        outer.insert(r(0), &x).unwrap();
        outer.insert(r(8), &y).unwrap();

        let flat = outer.flatten(false);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.element_offset(&shared), Some(r(0)));
    }

    #[test]
    fn test_walk_reports_depth() {
        let outer = Container::new();
        let inner = Container::new();
        inner.insert(r(1), note(1)).unwrap();
        outer.insert(r(1), &inner).unwrap();

        let mut seen = Vec::new();
        outer.walk(&mut |item| seen.push((item.depth, item.offset)));
        assert_eq!(seen, vec![(1, r(1)), (2, r(2))]);
        assert_eq!(outer.recurse_leaves().len(), 1);
    }
}
