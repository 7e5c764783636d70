use std::any::TypeId;
use std::collections::HashMap;

use crate::codec::MAX_SELECTOR;
use crate::engine::fact::{Fact, TypeKey};
use crate::errors::{EngineError, Result};

/// Stable identity of a fact within one fact space.
pub type FactId = u64;

/// Per-session handle to a fact identity; re-allocated by modification.
pub type Selector = u16;

/// The bucket of all facts of one exact runtime type, in insertion order.
#[derive(Debug, Clone)]
pub struct TypeSlot {
    type_key: TypeKey,
    identities: Vec<FactId>,
}

impl TypeSlot {
    /// The runtime type this slot holds.
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Identities of the live facts in this slot, in insertion order.
    pub fn identities(&self) -> &[FactId] {
        &self.identities
    }

    /// Number of live facts in this slot.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether the slot currently holds no facts.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[derive(Debug)]
struct FactRecord {
    fact: Fact,
    slot: usize,
    selector: Selector,
}

/// Working memory: a multi-type store of facts with stable identities and
/// selector-based addressing.
///
/// Each distinct runtime type gets a [`TypeSlot`]; slot order is the order
/// in which the first fact of each type arrived and forms the space's
/// schema. Every structural change (insert, modify, retract) bumps the
/// version counter, which the evaluator watches to decide when to re-plan.
#[derive(Debug, Default)]
pub struct FactSpace {
    slots: Vec<TypeSlot>,
    slot_index: HashMap<TypeId, usize>,
    identity_by_addr: HashMap<usize, FactId>,
    records: HashMap<FactId, FactRecord>,
    selector_map: HashMap<Selector, FactId>,
    next_id: FactId,
    next_selector: u32,
    version: u64,
}

impl FactSpace {
    /// Create an empty fact space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a fact to the space.
    ///
    /// Inserting a handle that is already present (by identity) is a no-op
    /// and returns the existing identity. Otherwise the fact is assigned a
    /// fresh identity and selector and appended to its type's slot, creating
    /// the slot if this is the first fact of its type.
    pub fn add(&mut self, fact: &Fact) -> Result<FactId> {
        if let Some(&id) = self.identity_by_addr.get(&fact.ptr_id()) {
            return Ok(id);
        }

        let slot = match self.slot_index.get(&fact.type_key().id()) {
            Some(&slot) => slot,
            None => {
                let slot = self.slots.len();
                self.slots.push(TypeSlot {
                    type_key: fact.type_key(),
                    identities: Vec::new(),
                });
                self.slot_index.insert(fact.type_key().id(), slot);
                slot
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        let selector = self.alloc_selector()?;

        self.slots[slot].identities.push(id);
        self.identity_by_addr.insert(fact.ptr_id(), id);
        self.selector_map.insert(selector, id);
        self.records.insert(
            id,
            FactRecord {
                fact: fact.clone(),
                slot,
                selector,
            },
        );
        self.version += 1;
        Ok(id)
    }

    /// Offer several facts, preserving input order; duplicates are ignored.
    pub fn add_all<I>(&mut self, facts: I) -> Result<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        for fact in facts {
            self.add(&fact)?;
        }
        Ok(())
    }

    /// Invalidate `selector` and allocate a fresh selector for the same
    /// identity.
    ///
    /// The fact keeps its position in its type slot; only the tuple name
    /// changes, which is what forces existing activations stale.
    pub fn modify(&mut self, selector: Selector) -> Result<Selector> {
        let id = self
            .selector_map
            .remove(&selector)
            .ok_or(EngineError::InvalidSelector { selector })?;
        let fresh = self.alloc_selector()?;
        self.selector_map.insert(fresh, id);
        if let Some(record) = self.records.get_mut(&id) {
            record.selector = fresh;
        }
        self.version += 1;
        Ok(fresh)
    }

    /// [`modify`](Self::modify) addressed by fact handle.
    pub fn modify_fact(&mut self, fact: &Fact) -> Result<Selector> {
        let selector = self.selector_of(fact).ok_or(EngineError::UnknownFact)?;
        self.modify(selector)
    }

    /// Remove the fact addressed by `selector` from the space.
    ///
    /// The selector and identity both become unresolvable.
    pub fn retract(&mut self, selector: Selector) -> Result<()> {
        let id = self
            .selector_map
            .remove(&selector)
            .ok_or(EngineError::InvalidSelector { selector })?;
        if let Some(record) = self.records.remove(&id) {
            self.slots[record.slot].identities.retain(|&other| other != id);
            self.identity_by_addr.remove(&record.fact.ptr_id());
        }
        self.version += 1;
        Ok(())
    }

    /// [`retract`](Self::retract) addressed by fact handle.
    pub fn retract_fact(&mut self, fact: &Fact) -> Result<()> {
        let selector = self.selector_of(fact).ok_or(EngineError::UnknownFact)?;
        self.retract(selector)
    }

    /// Resolve a selector tuple to fact handles, in tuple order.
    ///
    /// Any invalidated selector makes the whole tuple unresolvable.
    pub fn get_tuple(&self, selectors: &[Selector]) -> Option<Vec<Fact>> {
        selectors
            .iter()
            .map(|selector| {
                let id = self.selector_map.get(selector)?;
                self.records.get(id).map(|record| record.fact.clone())
            })
            .collect()
    }

    /// Resolve a selector tuple to fact identities.
    pub fn identities_for(&self, selectors: &[Selector]) -> Option<Vec<FactId>> {
        selectors
            .iter()
            .map(|selector| self.selector_map.get(selector).copied())
            .collect()
    }

    /// The runtime types of an identity tuple.
    pub fn fact_types(&self, identities: &[FactId]) -> Option<Vec<TypeKey>> {
        identities
            .iter()
            .map(|id| {
                self.records
                    .get(id)
                    .map(|record| self.slots[record.slot].type_key)
            })
            .collect()
    }

    /// The current selector of a fact handle, if the fact is live.
    pub fn selector_of(&self, fact: &Fact) -> Option<Selector> {
        let id = self.identity_by_addr.get(&fact.ptr_id())?;
        self.records.get(id).map(|record| record.selector)
    }

    /// The ordered type slots; stable order matching first insertion of each
    /// type.
    pub fn schema(&self) -> &[TypeSlot] {
        &self.slots
    }

    /// Current selectors of the facts in one slot, in insertion order.
    pub fn selectors_in_slot(&self, slot: usize) -> Vec<Selector> {
        self.slots[slot]
            .identities
            .iter()
            .filter_map(|id| self.records.get(id).map(|record| record.selector))
            .collect()
    }

    /// Structural version; bumped by every insert, modify, and retract.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live facts across all slots.
    pub fn fact_count(&self) -> usize {
        self.records.len()
    }

    /// Whether the space holds no live facts.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn alloc_selector(&mut self) -> Result<Selector> {
        if self.next_selector > u32::from(MAX_SELECTOR) {
            return Err(EngineError::SelectorSpaceExhausted);
        }
        let selector = self.next_selector as Selector;
        self.next_selector += 1;
        Ok(selector)
    }
}
