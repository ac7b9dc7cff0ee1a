// Structural properties that must hold for any container graph

use score_stream::{
    make_windows, spans_overlap, strip_ties, Container, Duration, Element, LayerAnalysis, Meter,
    Rational, Span, StreamKind, StripTiesOptions,
};

fn r(n: i64) -> Rational {
    Rational::from_integer(n)
}

fn q(num: i64, den: i64) -> Rational {
    Rational::new(num, den)
}

fn note(length: Rational) -> Element {
    Element::note(Duration::new(length).unwrap())
}

/// Part → measures → (notes, voice → notes), with a shared element
fn build_graph() -> (Container, usize) {
    let part = Container::with_kind(StreamKind::Part);
    let mut leaves = 0;
    for bar in 0..3i64 {
        let measure = Container::with_kind(StreamKind::Measure);
        for beat in 0..4i64 {
            measure
                .insert(r(beat), note(r(1)).with_priority((beat % 2) as i32))
                .unwrap();
            leaves += 1;
        }
        let voice = Container::with_kind(StreamKind::Voice);
        voice.insert(q(1, 2), note(q(3, 2))).unwrap();
        voice.insert(r(2), Element::marker("Dynamic")).unwrap();
        leaves += 2;
        measure.insert(r(0), &voice).unwrap();
        part.insert(r(bar * 4), &measure).unwrap();
    }
    (part, leaves)
}

#[test]
fn test_flatten_counts_every_leaf() {
    let (part, leaves) = build_graph();
    let flat = part.flatten(false);
    assert_eq!(flat.len(), leaves);
    assert!(flat.elements().iter().all(|e| !e.is_container()));
    assert_eq!(part.recurse_leaves().len(), leaves);
}

#[test]
fn test_flatten_is_idempotent() {
    let (part, _) = build_graph();
    let once = part.flatten(false);
    let twice = once.flatten(false);

    let pairs = |c: &Container| -> Vec<(Rational, Element)> {
        c.entries().into_iter().map(|p| (p.offset, p.element)).collect()
    };
    assert_eq!(pairs(&once), pairs(&twice));
}

#[test]
fn test_sorted_view_is_ordered() {
    let (part, _) = build_graph();
    let flat = part.flatten(false);
    let entries = flat.entries();
    for pair in entries.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.offset <= b.offset);
        if a.offset == b.offset {
            assert!(a.element.priority() <= b.element.priority());
        }
    }
}

#[test]
fn test_overlap_symmetry_and_sequence_agreement() {
    let spans = [
        Span::new(r(0), r(2)),
        Span::new(r(2), r(3)),
        Span::new(r(1), r(1)),
        Span::new(q(5, 2), r(4)),
        Span::new(r(6), r(7)),
    ];
    for a in spans {
        for b in spans {
            for boundary in [false, true] {
                assert_eq!(spans_overlap(a, b, boundary), spans_overlap(b, a, boundary));
            }
        }
    }

    let sequential = Container::new();
    sequential.insert(r(0), note(r(2))).unwrap();
    sequential.insert(r(2), note(r(1))).unwrap();
    let layered = Container::new();
    layered.insert(r(0), note(r(2))).unwrap();
    layered.insert(r(1), note(r(2))).unwrap();

    for c in [&sequential, &layered] {
        let all_empty = LayerAnalysis::new(c)
            .overlap_map(false)
            .iter()
            .all(|entry| entry.is_empty());
        assert_eq!(c.is_sequence(), all_empty);
    }
    assert!(sequential.is_sequence());
    assert!(!layered.is_sequence());
}

#[test]
fn test_round_trip_restores_split_elements() {
    let source = Container::new();
    source.insert(r(1), note(r(13))).unwrap();
    source.insert(r(3), note(q(5, 2))).unwrap();
    source.insert(r(15), note(q(1, 2))).unwrap();

    let markers = Container::new();
    markers
        .insert(r(0), Element::meter_marker(Meter::new(3, 4).unwrap()))
        .unwrap();
    markers
        .insert(r(6), Element::meter_marker(Meter::new(6, 8).unwrap()))
        .unwrap();

    let windowed = make_windows(&source, &markers, None).unwrap();
    assert!(windowed.windows().len() > 3);

    let stripped = strip_ties(&windowed.part, &StripTiesOptions::default()).unwrap();
    assert!(stripped.is_clean());
    let restored: Vec<(Rational, Rational)> = stripped
        .container
        .entries()
        .iter()
        .map(|p| (p.offset, p.element.quarter_length()))
        .collect();
    let original: Vec<(Rational, Rational)> = source
        .entries()
        .iter()
        .map(|p| (p.offset, p.element.quarter_length()))
        .collect();
    assert_eq!(restored, original);
}

#[test]
fn test_deep_copy_is_independent() {
    let (part, leaves) = build_graph();
    let copy = part.deep_copy();

    let originals: Vec<Element> = part.recurse_leaves();
    let copies: Vec<Element> = copy.recurse_leaves();
    assert_eq!(copies.len(), leaves);

    let original_ids: Vec<_> = originals.iter().map(|e| e.id()).collect();
    for element in &copies {
        assert!(!original_ids.contains(&element.id()));
        for site in element.sites() {
            let holder = site.container().unwrap();
            assert!(copy.contains_recursive(holder.id()));
        }
        element.set_attribute("pitch", "B4");
    }
    assert!(originals.iter().all(|e| e.attribute("pitch").is_none()));
}

#[test]
fn test_dropping_container_releases_sites() {
    let shared = note(r(1));
    let keeper = Container::new();
    keeper.insert(r(0), &shared).unwrap();
    let before = shared.site_count();

    {
        let temporary = Container::new();
        temporary.insert(r(3), &shared).unwrap();
        assert_eq!(shared.site_count(), before + 1);
        let _flat = temporary.flatten(false);
        assert_eq!(shared.site_count(), before + 2);
    }

    assert_eq!(shared.site_count(), before);
    assert_eq!(shared.active_site(), None);
    assert!(shared.set_active_site(&keeper));
    assert_eq!(shared.active_site(), Some(keeper));
}
