//! Window generation and boundary splitting

use crate::error::{DataConsistencyError, Result, StreamError};
use crate::models::{Duration, Element, Meter, Rational, StreamKind, TieRole};
use crate::partition::{Partitioner, Windowed};
use crate::stream::{Container, DerivationMethod};

/// One generated window before it is placed into the part
struct Slot {
    start: Rational,
    end: Rational,
    window: Container,
}

impl Partitioner {
    /// Split `source` into consecutive windows
    ///
    /// The active window length at any point is the nearest `Meter` at or
    /// before it in `window_markers` (the configured default when there is
    /// none). Elements crossing a window end are split into tied fragments.
    /// Every placed element is a fresh copy; `source` is not modified.
    ///
    /// # Errors
    /// `StreamError::Placement` when an element has no window to live in.
    pub fn make_windows(
        &self,
        source: &Container,
        window_markers: &Container,
        reference: Option<&Container>,
    ) -> Result<Windowed> {
        let content = source.flatten(false);
        let markers = window_markers.flatten(false);
        let mut issues = Vec::new();

        let computed = content.highest_time();
        let mut span = computed;
        if let Some(reference) = reference {
            let supplied = reference.highest_time();
            if supplied != computed {
                log::warn!(
                    "make_windows: reference span {} differs from source span {}; using the larger",
                    supplied,
                    computed
                );
                issues.push(DataConsistencyError::SpanMismatch { computed, supplied });
            }
            span = span.max(supplied);
        }

        // Meter markers steer the windowing; they are not window content
        let placeable: Vec<(Rational, Element)> = content
            .entries()
            .into_iter()
            .filter(|p| p.element.as_meter().is_none())
            .map(|p| (p.offset, p.element))
            .collect();

        let mut slots = Vec::new();
        self.push_slot(&mut slots, &markers, Rational::from_integer(0))?;
        // A zero-length element sitting on the final boundary still needs a home
        let latest_start = placeable.iter().map(|(offset, _)| *offset).max();
        loop {
            let end = last_end(&slots);
            let covered = end >= span && latest_start.map_or(true, |latest| end > latest);
            if covered {
                break;
            }
            self.push_slot(&mut slots, &markers, end)?;
        }
        log::debug!(
            "make_windows: {} windows over [0, {}] for {} elements",
            slots.len(),
            span,
            placeable.len()
        );

        for (offset, element) in &placeable {
            self.place(&mut slots, &markers, *offset, element)?;
        }

        if let (Some(strategy), Some(first)) = (&self.leading_context, slots.first()) {
            if let Some(marker) = strategy.resolve(&content) {
                first.window.set_leading_context(marker);
            }
        }

        let part = Container::with_kind(StreamKind::Part);
        for slot in &slots {
            part.insert(slot.start, &slot.window)?;
        }
        part.set_derivation(source, DerivationMethod::Windows);

        Ok(Windowed { part, issues })
    }

    /// Window `source` using the `Meter` markers found inside it
    pub fn make_windows_from_source(
        &self,
        source: &Container,
        reference: Option<&Container>,
    ) -> Result<Windowed> {
        // A flat view leaves the markers' active sites alone
        let markers = source.flatten(false);
        self.make_windows(source, &markers, reference)
    }

    fn meter_at(&self, markers: &Container, offset: Rational) -> Result<Meter> {
        let found = markers.get_element_at_or_before(offset, Some("Meter"))?;
        Ok(found
            .and_then(|marker| marker.as_meter())
            .unwrap_or(self.settings.default_meter))
    }

    fn push_slot(&self, slots: &mut Vec<Slot>, markers: &Container, start: Rational) -> Result<()> {
        let meter = self.meter_at(markers, start)?;
        // A window that does not advance would never cover the span
        if meter.bar_length() <= Rational::from_integer(0) {
            log::error!("make_windows: window marker {} has no length", meter);
            return Err(StreamError::InvalidMeter(meter.to_string()));
        }
        let window = Container::with_kind(StreamKind::Measure);
        window.set_window(slots.len() as u32 + 1, meter);
        slots.push(Slot {
            start,
            end: start + meter.bar_length(),
            window,
        });
        Ok(())
    }

    /// Place a copy of `element`, splitting it at every window end it crosses
    fn place(
        &self,
        slots: &mut Vec<Slot>,
        markers: &Container,
        offset: Rational,
        element: &Element,
    ) -> Result<()> {
        let mut index = find_slot(slots, offset).ok_or_else(|| {
            let message = format!("no window holds {} at offset {}", element.id(), offset);
            log::error!("make_windows: {}", message);
            StreamError::Placement(message)
        })?;

        let end = offset + element.quarter_length();
        if end <= slots[index].end {
            let copy = element.duplicate();
            slots[index].window.insert(offset - slots[index].start, &copy)?;
            return Ok(());
        }

        let mut start = offset;
        while end > slots[index].end {
            let head = fragment(element, slots[index].end - start, TieRole::Start)?;
            slots[index].window.insert(start - slots[index].start, &head)?;

            start = slots[index].end;
            index += 1;
            if index == slots.len() {
                self.push_slot(slots, markers, start)?;
            }
        }

        // A source that already ties forward keeps tying forward
        let role = match element.tie_role() {
            TieRole::Start => TieRole::Start,
            _ => TieRole::Stop,
        };
        let tail = fragment(element, end - start, role)?;
        slots[index].window.insert(start - slots[index].start, &tail)?;
        Ok(())
    }
}

fn last_end(slots: &[Slot]) -> Rational {
    slots
        .last()
        .map(|slot| slot.end)
        .unwrap_or_else(|| Rational::from_integer(0))
}

/// The window with `start <= offset < end`
fn find_slot(slots: &[Slot], offset: Rational) -> Option<usize> {
    let after = slots.partition_point(|slot| slot.start <= offset);
    let index = after.checked_sub(1)?;
    (offset < slots[index].end).then_some(index)
}

fn fragment(element: &Element, length: Rational, role: TieRole) -> Result<Element> {
    let piece = element.duplicate();
    piece.set_duration(Duration::new(length)?);
    piece.set_tie_role(role);
    Ok(piece)
}
