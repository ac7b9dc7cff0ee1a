//! Offset queries over a container's direct members
//!
//! All queries are read-only and walk the cached sorted view. "No match" is
//! an empty result, never an error; only malformed input (negative offsets,
//! a range whose start lies after its end) is rejected.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::models::{Element, ElementId, Rational};
use crate::stream::container::{Container, Placed};

/// Range query parameters
///
/// Defaults: inclusive end boundary, elements must begin in the span,
/// need not finish in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub start: Rational,
    pub end: Rational,
    #[serde(default = "default_true")]
    pub include_end_boundary: bool,
    #[serde(default = "default_true")]
    pub must_begin_in_span: bool,
    #[serde(default)]
    pub must_finish_in_span: bool,
}

fn default_true() -> bool {
    true
}

impl RangeQuery {
    pub fn new(start: Rational, end: Rational) -> Self {
        Self {
            start,
            end,
            include_end_boundary: true,
            must_begin_in_span: true,
            must_finish_in_span: false,
        }
    }

    pub fn include_end_boundary(mut self, include: bool) -> Self {
        self.include_end_boundary = include;
        self
    }

    pub fn must_begin_in_span(mut self, must: bool) -> Self {
        self.must_begin_in_span = must;
        self
    }

    pub fn must_finish_in_span(mut self, must: bool) -> Self {
        self.must_finish_in_span = must;
        self
    }

    /// Whether an element spanning `[offset, end]` matches
    ///
    /// The start side tests `offset` when the element must begin in the span
    /// and its end otherwise; the end side tests its end when it must finish
    /// in the span and its offset otherwise. Excluding the end boundary makes
    /// the end test strict, and the start test strict when it looks at the
    /// element's end.
    pub fn matches(&self, offset: Rational, end: Rational) -> bool {
        let start_ok = if self.must_begin_in_span {
            offset >= self.start
        } else if self.include_end_boundary {
            end >= self.start
        } else {
            end > self.start
        };

        let effective_end = if self.must_finish_in_span { end } else { offset };
        let end_ok = if self.include_end_boundary {
            effective_end <= self.end
        } else {
            effective_end < self.end
        };

        start_ok && end_ok
    }

    fn validate(&self) -> Result<()> {
        check_offset(self.start)?;
        check_offset(self.end)?;
        if self.start > self.end {
            return Err(StreamError::InvalidOffset(format!(
                "range start {} after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// One row of [`Container::offset_map`]
#[derive(Debug, Clone)]
pub struct OffsetMapEntry {
    pub element: Element,
    pub offset: Rational,
    pub end: Rational,
}

fn check_offset(offset: Rational) -> Result<()> {
    if offset < Rational::from_integer(0) {
        return Err(StreamError::InvalidOffset(offset.to_string()));
    }
    Ok(())
}

fn matches_filter(placed: &Placed, type_filter: Option<&str>) -> bool {
    type_filter.map_or(true, |filter| placed.element.is_class(filter))
}

/// Keep the candidate with the better offset; equal offsets keep the
/// earliest insertion
fn pick<'a>(
    best: Option<&'a Placed>,
    candidate: &'a Placed,
    prefer_later: bool,
) -> Option<&'a Placed> {
    match best {
        None => Some(candidate),
        Some(current) => {
            let better_offset = if prefer_later {
                candidate.offset > current.offset
            } else {
                candidate.offset < current.offset
            };
            let earlier_tie = candidate.offset == current.offset
                && candidate.insertion_index < current.insertion_index;
            if better_offset || earlier_tie {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    }
}

impl Container {
    /// Members selected by a range query, in sorted order
    pub fn elements_in_range(&self, query: &RangeQuery) -> Result<Vec<Element>> {
        query.validate()?;
        Ok(self
            .sorted_entries()
            .iter()
            .filter(|p| query.matches(p.offset, p.end()))
            .map(|p| p.element.clone())
            .collect())
    }

    /// Range query with explicit boundary flags
    pub fn elements_by_offset_range(
        &self,
        start: Rational,
        end: Rational,
        include_end_boundary: bool,
        must_begin_in_span: bool,
        must_finish_in_span: bool,
    ) -> Result<Vec<Element>> {
        let query = RangeQuery {
            start,
            end,
            include_end_boundary,
            must_begin_in_span,
            must_finish_in_span,
        };
        self.elements_in_range(&query)
    }

    /// Members starting exactly at `offset`
    pub fn elements_at_offset(&self, offset: Rational) -> Result<Vec<Element>> {
        self.elements_in_range(&RangeQuery::new(offset, offset))
    }

    /// Nearest member at or before `offset`
    ///
    /// Minimises `offset - element_offset`; equal offsets resolve to the
    /// earliest inserted member.
    pub fn get_element_at_or_before(
        &self,
        offset: Rational,
        type_filter: Option<&str>,
    ) -> Result<Option<Element>> {
        self.nearest(offset, type_filter, |o| o <= offset, true)
    }

    /// Nearest member strictly before `offset`
    pub fn get_element_before_offset(
        &self,
        offset: Rational,
        type_filter: Option<&str>,
    ) -> Result<Option<Element>> {
        self.nearest(offset, type_filter, |o| o < offset, true)
    }

    /// Nearest member at or after `offset`
    pub fn get_element_at_or_after(
        &self,
        offset: Rational,
        type_filter: Option<&str>,
    ) -> Result<Option<Element>> {
        self.nearest(offset, type_filter, |o| o >= offset, false)
    }

    /// Nearest member strictly after `offset`
    pub fn get_element_after_offset(
        &self,
        offset: Rational,
        type_filter: Option<&str>,
    ) -> Result<Option<Element>> {
        self.nearest(offset, type_filter, |o| o > offset, false)
    }

    fn nearest(
        &self,
        offset: Rational,
        type_filter: Option<&str>,
        admits: impl Fn(Rational) -> bool,
        prefer_later: bool,
    ) -> Result<Option<Element>> {
        check_offset(offset)?;
        let entries = self.sorted_entries();
        let best = entries
            .iter()
            .filter(|p| admits(p.offset) && matches_filter(p, type_filter))
            .fold(None, |best, candidate| pick(best, candidate, prefer_later));
        Ok(best.map(|p| p.element.clone()))
    }

    /// Members matching a type filter, in sorted order
    pub fn elements_by_class(&self, type_filter: &str) -> Vec<Element> {
        self.sorted_entries()
            .iter()
            .filter(|p| p.element.is_class(type_filter))
            .map(|p| p.element.clone())
            .collect()
    }

    /// Direct member with the given identity
    pub fn get_element_by_id(&self, id: ElementId) -> Option<Element> {
        self.elements().into_iter().find(|e| e.id() == id)
    }

    pub fn first(&self) -> Option<Element> {
        self.sorted_entries().first().map(|p| p.element.clone())
    }

    pub fn last(&self) -> Option<Element> {
        self.sorted_entries().last().map(|p| p.element.clone())
    }

    /// Next member in sorted order
    pub fn element_after(&self, element: impl AsRef<Element>) -> Option<Element> {
        let id = element.as_ref().id();
        let entries = self.sorted_entries();
        let position = entries.iter().position(|p| p.element.id() == id)?;
        entries.get(position + 1).map(|p| p.element.clone())
    }

    /// Previous member in sorted order
    pub fn element_before(&self, element: impl AsRef<Element>) -> Option<Element> {
        let id = element.as_ref().id();
        let entries = self.sorted_entries();
        let position = entries.iter().position(|p| p.element.id() == id)?;
        position
            .checked_sub(1)
            .and_then(|previous| entries.get(previous))
            .map(|p| p.element.clone())
    }

    /// (element, offset, end) for every member, in sorted order
    pub fn offset_map(&self) -> Vec<OffsetMapEntry> {
        self.sorted_entries()
            .iter()
            .map(|p| OffsetMapEntry {
                element: p.element.clone(),
                offset: p.offset,
                end: p.end(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Duration;

    fn r(n: i64) -> Rational {
        Rational::from_integer(n)
    }

    fn note(ql: i64) -> Element {
        Element::note(Duration::new(r(ql)).unwrap())
    }

    /// a: [0,2)  b: [2,4)  c: [3,6)  d: [4,4] (zero length)
    fn fixture() -> (Container, Vec<Element>) {
        let c = Container::new();
        let a = note(2);
        let b = note(2);
        let cc = note(3);
        let d = Element::marker("Clef");
        c.insert(r(0), &a).unwrap();
        c.insert(r(2), &b).unwrap();
        c.insert(r(3), &cc).unwrap();
        c.insert(r(4), &d).unwrap();
        (c, vec![a, b, cc, d])
    }

    #[test]
    fn test_range_default_flags() {
        let (c, els) = fixture();
        // must begin in [2,4], end inclusive
        let found = c.elements_by_offset_range(r(2), r(4), true, true, false).unwrap();
        assert_eq!(found, vec![els[1].clone(), els[2].clone(), els[3].clone()]);
    }

    #[test]
    fn test_range_exclusive_end() {
        let (c, els) = fixture();
        let found = c.elements_by_offset_range(r(2), r(4), false, true, false).unwrap();
        assert_eq!(found, vec![els[1].clone(), els[2].clone()]);
    }

    #[test]
    fn test_range_overlapping_elements() {
        let (c, els) = fixture();
        // Anything still sounding at 2 and starting no later than 3
        let found = c.elements_by_offset_range(r(2), r(3), true, false, false).unwrap();
        assert_eq!(found, vec![els[0].clone(), els[1].clone(), els[2].clone()]);

        // Excluding the boundary drops `a`, which ends exactly at 2, and `c`, which starts at 3
        let found = c.elements_by_offset_range(r(2), r(3), false, false, false).unwrap();
        assert_eq!(found, vec![els[1].clone()]);
    }

    #[test]
    fn test_range_must_finish() {
        let (c, els) = fixture();
        let found = c.elements_by_offset_range(r(0), r(4), true, true, true).unwrap();
        assert_eq!(found, vec![els[0].clone(), els[1].clone(), els[3].clone()]);

        let found = c.elements_by_offset_range(r(0), r(4), false, true, true).unwrap();
        assert_eq!(found, vec![els[0].clone()]);
    }

    #[test]
    fn test_range_rejects_malformed() {
        let (c, _) = fixture();
        assert!(c.elements_by_offset_range(r(3), r(2), true, true, false).is_err());
        assert!(c.elements_by_offset_range(r(-1), r(2), true, true, false).is_err());
    }

    #[test]
    fn test_at_or_before_with_filter() {
        let (c, els) = fixture();
        assert_eq!(c.get_element_at_or_before(r(5), None).unwrap(), Some(els[3].clone()));
        assert_eq!(
            c.get_element_at_or_before(r(5), Some("Note")).unwrap(),
            Some(els[2].clone())
        );
        assert_eq!(c.get_element_at_or_before(r(10), Some("Rest")).unwrap(), None);
        assert!(c.get_element_at_or_before(r(-1), None).is_err());
    }

    #[test]
    fn test_strict_and_after_variants() {
        let (c, els) = fixture();
        assert_eq!(c.get_element_before_offset(r(2), None).unwrap(), Some(els[0].clone()));
        assert_eq!(c.get_element_at_or_after(r(1), None).unwrap(), Some(els[1].clone()));
        assert_eq!(c.get_element_after_offset(r(3), None).unwrap(), Some(els[3].clone()));
        assert_eq!(c.get_element_after_offset(r(4), None).unwrap(), None);
    }

    #[test]
    fn test_neighbours() {
        let (c, els) = fixture();
        assert_eq!(c.element_after(&els[0]), Some(els[1].clone()));
        assert_eq!(c.element_before(&els[0]), None);
        assert_eq!(c.element_before(&els[3]), Some(els[2].clone()));
        assert_eq!(c.first(), Some(els[0].clone()));
        assert_eq!(c.last(), Some(els[3].clone()));
    }

    #[test]
    fn test_elements_at_offset_and_by_class() {
        let (c, els) = fixture();
        assert_eq!(c.elements_at_offset(r(3)).unwrap(), vec![els[2].clone()]);
        assert_eq!(c.elements_by_class("Clef"), vec![els[3].clone()]);
        assert_eq!(c.elements_by_class("Note").len(), 3);
        assert_eq!(c.get_element_by_id(els[1].id()), Some(els[1].clone()));
    }

    #[test]
    fn test_offset_map() {
        let (c, _) = fixture();
        let map = c.offset_map();
        assert_eq!(map[2].offset, r(3));
        assert_eq!(map[2].end, r(6));
    }
}
