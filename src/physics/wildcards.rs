//! User-declared auxiliary values attached to contacts and owners.
//!
//! Contact wildcards hold per-pair history such as accumulated tangential displacement. They
//! survive from one contact list to the next for every pair present in both, and return to
//! their initial values whenever the pair is not in geometric contact.

use crate::error::{DemError, DemResult};

/// A named wildcard and the value it starts from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WildcardDeclaration {
    /// Name the wildcard is addressed by.
    pub name: &'static str,
    /// Value of a fresh wildcard.
    pub initial: f64,
}

impl WildcardDeclaration {
    /// Creates a declaration.
    pub const fn new(name: &'static str, initial: f64) -> Self {
        Self { name, initial }
    }
}

/// Wildcard layout declared by a force model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WildcardSchema {
    contact: Vec<WildcardDeclaration>,
    owner: Vec<WildcardDeclaration>,
}

impl WildcardSchema {
    /// Creates a schema from the contact and owner declarations.
    pub fn new(contact: &[WildcardDeclaration], owner: &[WildcardDeclaration]) -> Self {
        Self {
            contact: contact.to_vec(),
            owner: owner.to_vec(),
        }
    }

    /// Gets the number of contact wildcards.
    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contact.len()
    }

    /// Gets the number of owner wildcards.
    #[inline]
    pub fn owner_count(&self) -> usize {
        self.owner.len()
    }

    /// Gets the slot of a contact wildcard.
    pub fn contact_slot(&self, name: &str) -> Option<usize> {
        self.contact.iter().position(|d| d.name == name)
    }

    /// Gets the slot of an owner wildcard.
    pub fn owner_slot(&self, name: &str) -> DemResult<usize> {
        self.owner
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| DemError::UnknownWildcard(name.to_owned()))
    }

    /// Initial values of a fresh contact.
    pub fn contact_initial_values(&self) -> Vec<f64> {
        self.contact.iter().map(|d| d.initial).collect()
    }

    /// Initial values of a fresh owner.
    pub fn owner_initial_values(&self) -> Vec<f64> {
        self.owner.iter().map(|d| d.initial).collect()
    }
}

/// Dense wildcard storage with a fixed number of values per entity.
///
/// Every entity gets at least one slot so chunked iteration lines up with the entities even
/// when no wildcard is declared. Only the first [`WildcardStore::stride`] values of a chunk
/// are meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct WildcardStore {
    stride: usize,
    initial: Vec<f64>,
    values: Vec<f64>,
}

impl WildcardStore {
    /// Creates an empty store for entities with the given initial values.
    pub fn new(initial: Vec<f64>) -> Self {
        Self {
            stride: initial.len(),
            initial,
            values: Vec::new(),
        }
    }

    /// Gets the number of meaningful values per entity.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Gets the storage stride, at least one.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.stride.max(1)
    }

    /// Gets the number of entities covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len() / self.chunk_size()
    }

    /// Whether no entity is covered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Gets the initial values of a fresh entity.
    #[inline]
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// Gets the values of one entity.
    #[inline]
    pub fn get(&self, entity: usize) -> &[f64] {
        let start = entity * self.chunk_size();
        &self.values[start..start + self.stride]
    }

    /// Gets the mutable values of one entity.
    #[inline]
    pub fn get_mut(&mut self, entity: usize) -> &mut [f64] {
        let start = entity * self.chunk_size();
        &mut self.values[start..start + self.stride]
    }

    /// Gets the initial values alongside the raw storage.
    #[inline]
    pub fn parts_mut(&mut self) -> (&[f64], &mut [f64]) {
        (&self.initial, &mut self.values)
    }

    /// Resizes to `count` entities, filling new ones with initial values.
    pub fn resize(&mut self, count: usize) {
        let chunk = self.chunk_size();
        let old = self.len();
        if count <= old {
            self.values.truncate(count * chunk);
            return;
        }
        self.values.reserve((count - old) * chunk);
        for _ in old..count {
            self.push_initial();
        }
    }

    /// Appends an entity with initial values.
    pub fn push_initial(&mut self) {
        self.values.extend_from_slice(&self.initial);
        if self.stride == 0 {
            self.values.push(0.0);
        }
    }

    /// Appends an entity with explicit values.
    pub fn push_values(&mut self, values: &[f64]) {
        debug_assert!(values.len() == self.stride);
        self.values.extend_from_slice(values);
        if self.stride == 0 {
            self.values.push(0.0);
        }
    }

    /// Keeps the entities flagged in `keep`, in order.
    pub fn retain(&mut self, keep: &[bool]) {
        debug_assert!(keep.len() == self.len());
        let chunk = self.chunk_size();
        let mut write = 0;
        for entity in (0..keep.len()).filter(|&entity| keep[entity]) {
            if write != entity {
                self.values
                    .copy_within(entity * chunk..(entity + 1) * chunk, write * chunk);
            }
            write += 1;
        }
        self.values.truncate(write * chunk);
    }

    /// Removes every entity.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Overwrites slot `slot` of every entity.
    ///
    /// # Arguments
    ///
    /// * `name` - Wildcard name, used for error reporting.
    /// * `slot` - Slot index within an entity.
    /// * `values` - Exactly one value per entity.
    pub fn set_slot(&mut self, name: &str, slot: usize, values: &[f64]) -> DemResult<()> {
        if values.len() != self.len() {
            return Err(DemError::WildcardLengthMismatch {
                name: name.to_owned(),
                expected: self.len(),
                found: values.len(),
            });
        }
        let chunk = self.chunk_size();
        for (entity, &value) in values.iter().enumerate() {
            self.values[entity * chunk + slot] = value;
        }
        Ok(())
    }

    /// Collects slot `slot` of every entity.
    pub fn slot_values(&self, slot: usize) -> Vec<f64> {
        self.values
            .chunks(self.chunk_size())
            .map(|chunk| chunk[slot])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lookup() {
        let schema = WildcardSchema::new(
            &[WildcardDeclaration::new("delta_x", 0.0)],
            &[WildcardDeclaration::new("charge", 1.5)],
        );
        assert_eq!(schema.contact_slot("delta_x"), Some(0));
        assert_eq!(schema.owner_slot("charge"), Ok(0));
        assert_eq!(
            schema.owner_slot("spin"),
            Err(DemError::UnknownWildcard("spin".into()))
        );
        assert_eq!(schema.owner_initial_values(), vec![1.5]);
    }

    #[test]
    fn test_store_resize_keeps_initial_values() {
        let mut store = WildcardStore::new(vec![0.0, 1.0]);
        store.resize(3);
        assert_eq!(store.len(), 3);
        store.get_mut(1)[0] = 5.0;
        assert_eq!(store.get(1), &[5.0, 1.0]);
        assert_eq!(store.get(2), &[0.0, 1.0]);
        store.resize(1);
        assert_eq!(store.len(), 1);
        store.resize(2);
        assert_eq!(store.get(1), &[0.0, 1.0]);
    }

    #[test]
    fn test_store_without_wildcards_still_counts_entities() {
        let mut store = WildcardStore::new(Vec::new());
        store.resize(4);
        assert_eq!(store.len(), 4);
        assert!(store.get(2).is_empty());
        store.retain(&[true, false, false, true]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_slot_checks_length() {
        let mut store = WildcardStore::new(vec![0.0]);
        store.resize(2);
        assert!(store.set_slot("charge", 0, &[1.0, 2.0]).is_ok());
        assert_eq!(store.slot_values(0), vec![1.0, 2.0]);
        assert_eq!(
            store.set_slot("charge", 0, &[1.0]),
            Err(DemError::WildcardLengthMismatch {
                name: "charge".into(),
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_retain_keeps_order() {
        let mut store = WildcardStore::new(vec![0.0]);
        store.resize(4);
        store.set_slot("delta", 0, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        store.retain(&[false, true, false, true]);
        assert_eq!(store.slot_values(0), vec![2.0, 4.0]);

        let mut empty = WildcardStore::new(Vec::new());
        empty.resize(3);
        empty.retain(&[true, false, true]);
        assert_eq!(empty.len(), 2);
    }
}
