//! Deep copy of a container graph
//!
//! The copy is the only transaction boundary the model offers: it is built in
//! one pass, shares nothing with the source, and every site entry it creates
//! names a copied container. Sharing *inside* the source graph is preserved
//! (an element held by two containers is held by both copies).

use std::collections::HashMap;

use crate::models::{Element, ElementId};
use crate::stream::container::{Container, DerivationMethod};

impl Container {
    /// Fully independent copy of this container and everything below it
    pub fn deep_copy(&self) -> Container {
        let mut memo: HashMap<ElementId, Element> = HashMap::new();
        self.copy_with(&mut memo)
    }

    fn copy_with(&self, memo: &mut HashMap<ElementId, Element>) -> Container {
        let copy = Container::from_element(&Element::from_state(
            self.as_element().kind().clone(),
            self.as_element().state_snapshot(),
        ))
        .unwrap_or_else(|| Container::with_kind(self.kind()));
        memo.insert(self.id(), copy.as_element().clone());

        copy.set_duration_override(self.duration_override());
        if let Some(mut window) = self.window_info() {
            window.leading_context = window.leading_context.map(|marker| marker.duplicate());
            copy.set_window_info(Some(window));
        }

        // Storage order keeps the copy's insertion indices in the same relative order
        for (offset, member) in self.storage_entries() {
            let copied = match memo.get(&member.id()) {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = match member.as_container() {
                        Some(inner) => inner.copy_with(memo).into_element(),
                        None => member.duplicate(),
                    };
                    memo.insert(member.id(), fresh.clone());
                    fresh
                }
            };
            if let Err(err) = copy.insert(offset, &copied) {
                log::warn!("deep copy: could not place copy of {}: {}", member.id(), err);
            }
        }

        copy.set_derivation(self, DerivationMethod::DeepCopy);
        copy
    }
}
