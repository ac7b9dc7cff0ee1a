//! Layering / overlap analysis
//!
//! Works on the sorted view of a container (normally a flat one): index `i`
//! below always means position `i` in [`Container::sorted_view`].
//!
//! ```text
//! offsets   0     1     2     3
//! a         [=====)
//! b               [===========)
//! c                     [=====)
//!
//! simultaneity_map  → [[], [], []]           (no shared offsets)
//! overlap_map(false)→ [[], [2], [1]]          (b and c overlap on [2,3))
//! overlap_map(true) → [[1], [0,2], [1]]       (touching ends count)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{Element, Rational};
use crate::stream::{Container, Placed};

/// Per-index list of related indices
pub type LayerMap = Vec<Vec<usize>>;

/// Half-open time span `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Rational,
    pub end: Rational,
}

impl Span {
    pub fn new(start: Rational, end: Rational) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> Rational {
        self.end - self.start
    }
}

/// Whether two spans overlap
///
/// Excluding the boundary, spans overlap iff `max(starts) < min(ends)`;
/// including it, touching spans overlap too (`<=`).
pub fn spans_overlap(a: Span, b: Span, include_end_boundary: bool) -> bool {
    let latest_start = a.start.max(b.start);
    let earliest_end = a.end.min(b.end);
    if include_end_boundary {
        latest_start <= earliest_end
    } else {
        latest_start < earliest_end
    }
}

/// Offsets and spans of a container's sorted view, computed once
pub struct LayerAnalysis {
    entries: Vec<Placed>,
    spans: Vec<Span>,
}

impl LayerAnalysis {
    pub fn new(container: &Container) -> Self {
        let entries = container.entries();
        let spans = entries.iter().map(|p| Span::new(p.offset, p.end())).collect();
        Self { entries, spans }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn offsets(&self) -> Vec<Rational> {
        self.spans.iter().map(|s| s.start).collect()
    }

    pub fn element(&self, index: usize) -> Option<&Element> {
        self.entries.get(index).map(|p| &p.element)
    }

    /// Indices sharing each element's offset
    pub fn simultaneity_map(&self) -> LayerMap {
        self.pairwise(|a, b| a.start == b.start)
    }

    /// Indices whose spans overlap each element's span
    pub fn overlap_map(&self, include_end_boundary: bool) -> LayerMap {
        self.pairwise(|a, b| spans_overlap(a, b, include_end_boundary))
    }

    fn pairwise(&self, related: impl Fn(Span, Span) -> bool) -> LayerMap {
        let n = self.spans.len();
        let mut map: LayerMap = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if related(self.spans[i], self.spans[j]) {
                    map[i].push(j);
                    map[j].push(i);
                }
            }
        }
        for related in map.iter_mut() {
            related.sort_unstable();
        }
        map
    }

    /// True iff no two elements overlap (boundary excluded)
    pub fn is_sequence(&self) -> bool {
        self.overlap_map(false).iter().all(|related| related.is_empty())
    }

    /// Group related indices into buckets keyed by offset
    pub fn consolidate(&self, map: &LayerMap) -> BTreeMap<Rational, Vec<usize>> {
        consolidate(map, &self.offsets())
    }

    /// Resolve consolidated buckets to elements
    pub fn resolve(&self, buckets: &BTreeMap<Rational, Vec<usize>>) -> BTreeMap<Rational, Vec<Element>> {
        buckets
            .iter()
            .map(|(offset, indices)| {
                let elements = indices
                    .iter()
                    .filter_map(|&i| self.element(i).cloned())
                    .collect();
                (*offset, elements)
            })
            .collect()
    }

    /// Uncovered spans between the first offset and the last end
    pub fn gaps(&self) -> Vec<Span> {
        let mut gaps = Vec::new();
        let mut covered_until: Option<Rational> = None;
        for span in &self.spans {
            match covered_until {
                None => covered_until = Some(span.end),
                Some(end) => {
                    if span.start > end {
                        gaps.push(Span::new(end, span.start));
                    }
                    covered_until = Some(end.max(span.end));
                }
            }
        }
        gaps
    }
}

/// Group indices that share a relation into offset-keyed buckets
///
/// Walks indices in order. A group is `i` plus its related indices; it joins
/// the bucket already holding any of its members (the smallest such key), or
/// opens a bucket keyed by `offsets[i]`. Each index lands in at most one
/// bucket and indices with no relations land in none.
pub fn consolidate(map: &LayerMap, offsets: &[Rational]) -> BTreeMap<Rational, Vec<usize>> {
    let mut buckets: BTreeMap<Rational, Vec<usize>> = BTreeMap::new();
    let mut assigned: HashMap<usize, Rational> = HashMap::new();

    for (i, related) in map.iter().enumerate() {
        if related.is_empty() {
            continue;
        }
        let Some(&own_offset) = offsets.get(i) else {
            continue;
        };

        let group: Vec<usize> = std::iter::once(i).chain(related.iter().copied()).collect();
        let key = group
            .iter()
            .filter_map(|index| assigned.get(index))
            .min()
            .copied()
            .unwrap_or(own_offset);

        let bucket = buckets.entry(key).or_default();
        for index in group {
            if let std::collections::hash_map::Entry::Vacant(slot) = assigned.entry(index) {
                slot.insert(key);
                bucket.push(index);
            }
        }
    }

    for bucket in buckets.values_mut() {
        bucket.sort_unstable();
    }
    buckets
}

/// True iff no two members of `container` overlap (boundary excluded)
pub fn is_sequence(container: &Container) -> bool {
    LayerAnalysis::new(container).is_sequence()
}

impl Container {
    /// Whether members play strictly one after another
    pub fn is_sequence(&self) -> bool {
        is_sequence(self)
    }

    /// Members grouped by shared offset
    pub fn get_simultaneous(&self) -> BTreeMap<Rational, Vec<Element>> {
        let analysis = LayerAnalysis::new(self);
        let buckets = analysis.consolidate(&analysis.simultaneity_map());
        analysis.resolve(&buckets)
    }

    /// Members grouped by overlapping spans
    pub fn get_overlaps(&self, include_end_boundary: bool) -> BTreeMap<Rational, Vec<Element>> {
        let analysis = LayerAnalysis::new(self);
        let buckets = analysis.consolidate(&analysis.overlap_map(include_end_boundary));
        analysis.resolve(&buckets)
    }

    /// Spans not covered by any member
    pub fn find_gaps(&self) -> Vec<Span> {
        LayerAnalysis::new(self).gaps()
    }
}
