//! Tie merging: the inverse of windowing

use serde_json::Value;

use crate::error::{DataConsistencyError, Result};
use crate::models::{Duration, Rational, TieRole};
use crate::partition::{StripTiesOptions, TiesStripped};
use crate::stream::{Container, DerivationMethod, Placed};

/// A tie chain being collected
struct Run {
    /// Indices into the sorted entries
    members: Vec<usize>,
    /// End time of the last member
    end: Rational,
    /// Key attribute value shared by the chain (attribute mode only)
    key: Option<Value>,
}

/// Merge every tie chain in `container` into its first member
///
/// Works on a deep copy of the flattened input, so the caller's graph is
/// never touched. A chain continues with an element that starts exactly where
/// the chain's last member ends; a `Stop` continuation closes it. With
/// `match_by_attribute` set, an untagged continuation carrying the same key
/// value closes it too.
pub fn strip_ties(container: &Container, options: &StripTiesOptions) -> Result<TiesStripped> {
    let flat = container.flatten(false);
    let work = flat.deep_copy();
    drop(flat);

    let entries = work.entries();
    let key_name = options.match_by_attribute.as_deref();
    let mut open: Vec<Run> = Vec::new();
    let mut doomed: Vec<usize> = Vec::new();
    let mut issues = Vec::new();

    for (index, placed) in entries.iter().enumerate() {
        let key = key_name.and_then(|name| placed.element.attribute(name));
        let continues = open.iter().position(|run| {
            run.end == placed.offset && (key_name.is_none() || run.key == key)
        });

        match (placed.element.tie_role(), continues) {
            (TieRole::Start, Some(at)) => {
                let run = &mut open[at];
                run.members.push(index);
                run.end = placed.end();
            }
            (TieRole::Start, None) => open.push(Run {
                members: vec![index],
                end: placed.end(),
                key,
            }),
            (TieRole::Stop, Some(at)) => {
                let mut run = open.remove(at);
                run.members.push(index);
                close(&entries, run, TieRole::None, &mut doomed, &mut issues)?;
            }
            (TieRole::Stop, None) => {
                log::warn!(
                    "strip_ties: stop on {} at {} has no open run",
                    placed.element.id(),
                    placed.offset
                );
                issues.push(DataConsistencyError::OrphanTieStop {
                    element: placed.element.id(),
                    offset: placed.offset,
                });
            }
            (TieRole::None, Some(at)) if key.is_some() => {
                let mut run = open.remove(at);
                run.members.push(index);
                close(&entries, run, TieRole::None, &mut doomed, &mut issues)?;
            }
            (TieRole::None, _) => {}
        }
    }

    // Chains still tying forward at the end of the input
    for run in open {
        close(&entries, run, TieRole::Start, &mut doomed, &mut issues)?;
    }

    doomed.sort_unstable_by(|a, b| b.cmp(a));
    for index in &doomed {
        work.remove(&entries[*index].element);
    }
    log::debug!(
        "strip_ties: merged away {} fragments from {}",
        doomed.len(),
        container.id()
    );

    work.set_derivation(container, DerivationMethod::StripTies);
    Ok(TiesStripped {
        container: work,
        issues,
    })
}

/// Fold a finished run into its first member
fn close(
    entries: &[Placed],
    run: Run,
    final_role: TieRole,
    doomed: &mut Vec<usize>,
    issues: &mut Vec<DataConsistencyError>,
) -> Result<()> {
    let first = &entries[run.members[0]];
    if run.members.len() < 2 {
        log::warn!(
            "strip_ties: tie on {} at {} has a single member; left as is",
            first.element.id(),
            first.offset
        );
        issues.push(DataConsistencyError::SingleMemberTie {
            element: first.element.id(),
            offset: first.offset,
        });
        return Ok(());
    }

    let total: Rational = run
        .members
        .iter()
        .map(|&i| entries[i].element.quarter_length())
        .sum();
    first.element.set_duration(Duration::new(total)?);
    first.element.set_tie_role(final_role);
    doomed.extend_from_slice(&run.members[1..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Element;

    fn r(n: i64) -> Rational {
        Rational::from_integer(n)
    }

    fn tied(ql: i64, role: TieRole) -> Element {
        Element::note(Duration::new(r(ql)).unwrap()).with_tie(role)
    }

    #[test]
    fn test_chain_merges_into_first_member() {
        let c = Container::new();
        let head = tied(4, TieRole::Start);
        c.insert(r(0), &head).unwrap();
        c.insert(r(4), tied(4, TieRole::Start)).unwrap();
        c.insert(r(8), tied(2, TieRole::Stop)).unwrap();

        let result = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.container.len(), 1);
        let merged = result.container.first().unwrap();
        assert_eq!(merged.quarter_length(), r(10));
        assert_eq!(merged.tie_role(), TieRole::None);
        assert_eq!(result.container.element_offset(&merged), Some(r(0)));

        // Input untouched
        assert_eq!(c.len(), 3);
        assert_eq!(head.quarter_length(), r(4));
        assert_eq!(head.tie_role(), TieRole::Start);
        assert_eq!(
            result.container.derivation_method(),
            Some(DerivationMethod::StripTies)
        );
    }

    #[test]
    fn test_simultaneous_chains_stay_apart() {
        let c = Container::new();
        c.insert(r(0), tied(2, TieRole::Start)).unwrap();
        c.insert(r(0), tied(3, TieRole::Start)).unwrap();
        c.insert(r(2), tied(1, TieRole::Stop)).unwrap();
        c.insert(r(3), tied(1, TieRole::Stop)).unwrap();

        let result = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert!(result.is_clean());
        let lengths: Vec<Rational> = result
            .container
            .sorted_view()
            .iter()
            .map(|e| e.quarter_length())
            .collect();
        assert_eq!(lengths, vec![r(3), r(4)]);
    }

    #[test]
    fn test_orphan_stop_is_reported() {
        let c = Container::new();
        let stop = tied(1, TieRole::Stop);
        c.insert(r(2), &stop).unwrap();
        let result = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert_eq!(result.container.len(), 1);
        assert!(matches!(
            result.issues.as_slice(),
            [DataConsistencyError::OrphanTieStop { .. }]
        ));
    }

    #[test]
    fn test_single_member_run_is_reported_and_kept() {
        let c = Container::new();
        c.insert(r(0), tied(2, TieRole::Start)).unwrap();
        c.insert(r(5), tied(1, TieRole::None)).unwrap();

        let result = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert_eq!(result.container.len(), 2);
        let first = result.container.first().unwrap();
        assert_eq!(first.quarter_length(), r(2));
        assert_eq!(first.tie_role(), TieRole::Start);
        assert_eq!(
            result.issues,
            vec![DataConsistencyError::SingleMemberTie {
                element: first.id(),
                offset: r(0)
            }]
        );
    }

    #[test]
    fn test_open_run_at_end_merges_and_keeps_start() {
        let c = Container::new();
        c.insert(r(0), tied(2, TieRole::Start)).unwrap();
        c.insert(r(2), tied(2, TieRole::Start)).unwrap();

        let result = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert!(result.is_clean());
        let merged = result.container.first().unwrap();
        assert_eq!(result.container.len(), 1);
        assert_eq!(merged.quarter_length(), r(4));
        assert_eq!(merged.tie_role(), TieRole::Start);
    }

    #[test]
    fn test_attribute_mode_closes_on_untagged_match() {
        let c = Container::new();
        c.insert(r(0), tied(2, TieRole::Start).with_attribute("pitch", "C4"))
            .unwrap();
        c.insert(r(2), tied(1, TieRole::None).with_attribute("pitch", "C4"))
            .unwrap();
        c.insert(r(3), tied(1, TieRole::None).with_attribute("pitch", "C4"))
            .unwrap();

        let plain = strip_ties(&c, &StripTiesOptions::default()).unwrap();
        assert_eq!(plain.container.len(), 3);

        let result = strip_ties(&c, &StripTiesOptions::match_by_attribute("pitch")).unwrap();
        assert!(result.is_clean());
        let lengths: Vec<Rational> = result
            .container
            .sorted_view()
            .iter()
            .map(|e| e.quarter_length())
            .collect();
        assert_eq!(lengths, vec![r(3), r(1)]);
    }

    #[test]
    fn test_attribute_mode_requires_same_key() {
        let c = Container::new();
        c.insert(r(0), tied(2, TieRole::Start).with_attribute("pitch", "C4"))
            .unwrap();
        c.insert(r(2), tied(1, TieRole::Stop).with_attribute("pitch", "D4"))
            .unwrap();

        let result = strip_ties(&c, &StripTiesOptions::match_by_attribute("pitch")).unwrap();
        assert_eq!(result.container.len(), 2);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn test_nested_input_is_flattened() {
        let part = Container::new();
        let m1 = Container::new();
        let m2 = Container::new();
        m1.insert(r(2), tied(2, TieRole::Start)).unwrap();
        m2.insert(r(0), tied(3, TieRole::Stop)).unwrap();
        part.insert(r(0), &m1).unwrap();
        part.insert(r(4), &m2).unwrap();

        let result = strip_ties(&part, &StripTiesOptions::default()).unwrap();
        assert!(result.container.is_flat());
        let merged = result.container.first().unwrap();
        assert_eq!(merged.quarter_length(), r(5));
        assert_eq!(result.container.element_offset(&merged), Some(r(2)));
    }
}
