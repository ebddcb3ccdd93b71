//! The reference manager decouples object identity from file layout.
//!
//! While a binary is being read or built, elements are addressed by *keys*:
//! `(section, index)`, `(section, offset)`, a bare section id, or a file
//! offset. The manager hands out [`SafeRef`] handles for keys whose target
//! may not exist yet, binds keys to typed locator [`RefTarget`]s as elements
//! materialize, and finally folds everything into a compact [`RefTable`]
//! owned by the finished binary.
//!
//! The manager is an explicit context passed through the reader, writer and
//! assembler call trees; there is no process-global instance.

use std::collections::HashMap;

use tpef_errors::diagnostic_error;

use crate::base::*;
use crate::section::SectionData;
use crate::Section;

diagnostic_error! {
    /// Errors raised by reference management.
    pub enum Error {
        [code: E003, help: "Every section id, element index and section offset may be registered once."]
        #[error("key {0:?} is already bound")]
        KeyConflict(RefKey),

        [code: E002, help: "The binary references an element that was never registered."]
        #[error("unresolved reference through key {0:?}")]
        UnresolvedReference(RefKey),

        [code: E006, help: "The referenced object is not part of the binary being written."]
        #[error("no {0} key is registered for target {1:?}")]
        KeyNotFound(&'static str, RefTarget),
    }
}

/// What a safe reference ultimately resolves to: a typed locator into a
/// binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefTarget {
    /// A whole section.
    Section(SectionId),
    /// Element `index` of a section.
    Element(SectionId, SectionIndex),
    /// A byte position inside a chunkable section.
    Chunk(SectionId, SectionOffset),
}

impl RefTarget {
    /// The section the target lives in.
    pub fn section(&self) -> SectionId {
        match *self {
            RefTarget::Section(id) | RefTarget::Element(id, _) | RefTarget::Chunk(id, _) => id,
        }
    }
}

/// A key under which a persisted object may be addressed before (or after)
/// it exists in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKey {
    /// `(section id, element index)`.
    SectionIndex(SectionId, SectionIndex),
    /// `(section id, section offset)`.
    SectionOffset(SectionId, SectionOffset),
    /// A bare section id.
    Section(SectionId),
    /// An absolute file offset.
    FileOffset(FileOffset),
}

/// An opaque handle that resolves to a [`RefTarget`] once the target is
/// registered, or to nothing.
///
/// Handles carry the generation of the manager that issued them; a handle
/// that survives a [`ReferenceManager::cleanup`] stops resolving instead of
/// aliasing an unrelated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SafeRef {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default, Clone)]
struct Cell {
    target: Option<RefTarget>,
    alive: bool,
}

#[derive(Debug, Default)]
struct Entry {
    target: Option<RefTarget>,
    refs: Vec<u32>,
}

/// The key-to-target registry.
///
/// One instance manages the references of one binary while it is being read
/// or built.
#[derive(Debug, Default)]
pub struct ReferenceManager {
    generation: u32,
    cells: Vec<Cell>,
    si_map: HashMap<(SectionId, SectionIndex), Entry>,
    so_map: HashMap<(SectionId, SectionOffset), Entry>,
    s_map: HashMap<SectionId, Entry>,
    fo_map: HashMap<FileOffset, Entry>,
    r_map: HashMap<RefTarget, Vec<u32>>,
}

impl ReferenceManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn new_cell(&mut self, target: Option<RefTarget>) -> SafeRef {
        let index = self.cells.len() as u32;
        self.cells.push(Cell { target, alive: true });

        SafeRef { index, generation: self.generation }
    }

    fn entry(&mut self, key: RefKey) -> &mut Entry {
        match key {
            RefKey::SectionIndex(id, index) => self.si_map.entry((id, index)).or_default(),
            RefKey::SectionOffset(id, offset) => self.so_map.entry((id, offset)).or_default(),
            RefKey::Section(id) => self.s_map.entry(id).or_default(),
            RefKey::FileOffset(offset) => self.fo_map.entry(offset).or_default(),
        }
    }

    /// Returns a new safe reference for `key`.
    ///
    /// If the key is already bound, the reference resolves immediately;
    /// otherwise it resolves once [`Self::add_object_reference`] binds the
    /// key.
    pub fn reference(&mut self, key: RefKey) -> SafeRef {
        let generation = self.generation;
        let index = self.cells.len() as u32;

        let entry = self.entry(key);
        let target = entry.target;
        entry.refs.push(index);

        self.cells.push(Cell { target, alive: true });

        if let Some(target) = target {
            self.r_map.entry(target).or_default().push(index);
        }

        SafeRef { index, generation }
    }

    /// Returns a new safe reference already bound to `target`.
    pub fn bound(&mut self, target: RefTarget) -> SafeRef {
        let reference = self.new_cell(Some(target));
        self.r_map.entry(target).or_default().push(reference.index);

        reference
    }

    /// Binds `key` to `target`.
    ///
    /// Every safe reference previously created for `key` starts resolving to
    /// `target`. Binding an already-bound key fails with
    /// [`Error::KeyConflict`], whether or not the target is the same.
    pub fn add_object_reference(&mut self, key: RefKey, target: RefTarget) -> Result<(), Error> {
        let entry = self.entry(key);

        if entry.target.is_some() {
            return Err(Error::KeyConflict(key));
        }

        entry.target = Some(target);
        let refs = entry.refs.clone();

        for &index in &refs {
            self.cells[index as usize].target = Some(target);
        }

        self.r_map.entry(target).or_default().extend(refs);

        Ok(())
    }

    /// Rebinds one safe reference to a new target.
    pub fn replace_reference(&mut self, reference: SafeRef, new_target: RefTarget) {
        if reference.generation != self.generation {
            return;
        }

        let cell = &mut self.cells[reference.index as usize];

        if let Some(old) = cell.target {
            if let Some(list) = self.r_map.get_mut(&old) {
                list.retain(|&index| index != reference.index);
            }
        }

        cell.target = Some(new_target);
        self.r_map.entry(new_target).or_default().push(reference.index);
    }

    /// Migrates every safe reference resolving to `old_target` so that it
    /// resolves to `new_target`.
    pub fn replace_all_references(&mut self, new_target: RefTarget, old_target: RefTarget) {
        let Some(refs) = self.r_map.remove(&old_target) else {
            return;
        };

        for &index in &refs {
            self.cells[index as usize].target = Some(new_target);
        }

        self.r_map.entry(new_target).or_default().extend(refs);
    }

    /// Tells the manager that `target` has been destroyed: every safe
    /// reference to it starts resolving to nothing.
    pub fn inform_deleted_target(&mut self, target: RefTarget) {
        if let Some(refs) = self.r_map.remove(&target) {
            for index in refs {
                self.cells[index as usize].target = None;
            }
        }
    }

    /// Drops one safe reference from the bookkeeping.
    pub fn inform_deleted_reference(&mut self, reference: SafeRef) {
        if reference.generation != self.generation {
            return;
        }

        self.cells[reference.index as usize].alive = false;
    }

    /// True if at least one live safe reference resolves to `target`.
    pub fn is_referenced(&self, target: RefTarget) -> bool {
        self.r_map
            .get(&target)
            .is_some_and(|refs| refs.iter().any(|&index| self.cells[index as usize].alive))
    }

    /// Resolves a safe reference to its current target.
    pub fn target_of(&self, reference: SafeRef) -> Option<RefTarget> {
        if reference.generation != self.generation {
            return None;
        }

        let cell = self.cells.get(reference.index as usize)?;
        cell.alive.then_some(cell.target).flatten()
    }

    fn alive_count(cells: &[Cell], refs: &[u32]) -> usize {
        refs.iter().filter(|&&index| cells[index as usize].alive).count()
    }

    /// Binds every still-outstanding key.
    ///
    /// Section-offset keys into chunkable sections materialize a chunk at
    /// the given offset; every other outstanding key fails with
    /// [`Error::UnresolvedReference`], as does an offset past the section's
    /// logical length.
    pub fn resolve(&mut self, sections: &[Section]) -> Result<(), Error> {
        let pending: Vec<(SectionId, SectionOffset)> = self
            .so_map
            .iter()
            .filter(|(_, entry)| {
                entry.target.is_none() && Self::alive_count(&self.cells, &entry.refs) > 0
            })
            .map(|(&key, _)| key)
            .collect();

        for (id, offset) in pending {
            let key = RefKey::SectionOffset(id, offset);

            let section = sections
                .iter()
                .find(|section| section.id() == id)
                .ok_or(Error::UnresolvedReference(key))?;

            let in_bounds = match &section.data {
                SectionData::Strings(bytes) | SectionData::Data(bytes) => {
                    (offset as usize) < bytes.len()
                }
                SectionData::UData { length } => offset < *length,
                _ => return Err(Error::UnresolvedReference(key)),
            };

            if !in_bounds {
                return Err(Error::UnresolvedReference(key));
            }

            self.add_object_reference(key, RefTarget::Chunk(id, offset))
                .map_err(|_| Error::UnresolvedReference(key))?;
        }

        let unresolved = self
            .si_map
            .iter()
            .map(|(&(id, index), entry)| (RefKey::SectionIndex(id, index), entry))
            .chain(
                self.so_map
                    .iter()
                    .map(|(&(id, offset), entry)| (RefKey::SectionOffset(id, offset), entry)),
            )
            .chain(self.s_map.iter().map(|(&id, entry)| (RefKey::Section(id), entry)))
            .chain(self.fo_map.iter().map(|(&offset, entry)| (RefKey::FileOffset(offset), entry)))
            .find(|(_, entry)| {
                entry.target.is_none() && Self::alive_count(&self.cells, &entry.refs) > 0
            });

        match unresolved {
            Some((key, _)) => Err(Error::UnresolvedReference(key)),
            None => Ok(()),
        }
    }

    fn key_for<K: Copy>(
        map: &HashMap<K, Entry>,
        target: RefTarget,
        kind: &'static str,
    ) -> Result<K, Error> {
        map.iter()
            .find_map(|(&key, entry)| (entry.target == Some(target)).then_some(key))
            .ok_or(Error::KeyNotFound(kind, target))
    }

    /// The section-index key bound to `target`, if any.
    pub fn section_index_key_for(
        &self,
        target: RefTarget,
    ) -> Result<(SectionId, SectionIndex), Error> {
        Self::key_for(&self.si_map, target, "section-index")
    }

    /// The section-offset key bound to `target`, if any.
    pub fn section_offset_key_for(
        &self,
        target: RefTarget,
    ) -> Result<(SectionId, SectionOffset), Error> {
        Self::key_for(&self.so_map, target, "section-offset")
    }

    /// The section key bound to `target`, if any.
    pub fn section_key_for(&self, target: RefTarget) -> Result<SectionId, Error> {
        Self::key_for(&self.s_map, target, "section")
    }

    /// The file-offset key bound to `target`, if any.
    pub fn file_offset_key_for(&self, target: RefTarget) -> Result<FileOffset, Error> {
        Self::key_for(&self.fo_map, target, "file-offset")
    }

    /// Clears the four key tables but keeps issued references resolving.
    pub fn cleanup_key_tables(&mut self) {
        self.si_map.clear();
        self.so_map.clear();
        self.s_map.clear();
        self.fo_map.clear();
    }

    /// Drops every table and invalidates every outstanding safe reference.
    pub fn cleanup(&mut self) {
        self.cells.clear();
        self.r_map.clear();
        self.cleanup_key_tables();
        self.generation += 1;
    }

    /// Folds the manager into the compact table a finished binary owns.
    pub fn into_table(self) -> RefTable {
        RefTable {
            generation: self.generation,
            targets: self.cells.iter().map(|cell| cell.alive.then_some(cell.target).flatten()).collect(),
        }
    }
}

/// The resolved reference table a finished [`crate::Binary`] owns.
#[derive(Debug, Default, Clone)]
pub struct RefTable {
    generation: u32,
    targets: Vec<Option<RefTarget>>,
}

impl RefTable {
    /// Resolves a safe reference to its target.
    pub fn target(&self, reference: SafeRef) -> Option<RefTarget> {
        if reference.generation != self.generation {
            return None;
        }

        self.targets.get(reference.index as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionData;

    fn fake_element() -> RefTarget {
        RefTarget::Element(7, 42)
    }

    #[test]
    fn test_reference_then_bind() {
        let mut refs = ReferenceManager::new();
        let key = RefKey::SectionIndex(21, 2);

        let handles: Vec<_> = (0..5).map(|_| refs.reference(key)).collect();

        for &handle in &handles {
            assert_eq!(refs.target_of(handle), None);
        }

        refs.add_object_reference(key, fake_element()).unwrap();

        for &handle in &handles {
            assert_eq!(refs.target_of(handle), Some(fake_element()));
        }
    }

    #[test]
    fn test_bind_then_reference() {
        let mut refs = ReferenceManager::new();
        let key = RefKey::FileOffset(0x1234);

        refs.add_object_reference(key, fake_element()).unwrap();
        let handle = refs.reference(key);

        assert_eq!(refs.target_of(handle), Some(fake_element()));
    }

    #[test]
    fn test_key_conflict() {
        let mut refs = ReferenceManager::new();
        let key = RefKey::Section(9);

        refs.add_object_reference(key, fake_element()).unwrap();

        // Re-binding is rejected even with the same target.
        assert!(matches!(
            refs.add_object_reference(key, fake_element()),
            Err(Error::KeyConflict(_))
        ));
        assert!(matches!(
            refs.add_object_reference(key, RefTarget::Section(1)),
            Err(Error::KeyConflict(_))
        ));
    }

    #[test]
    fn test_resolution_is_order_independent() {
        // Interleave creates and binds in both orders; the outcome matches.
        for bind_first in [false, true] {
            let mut refs = ReferenceManager::new();
            let key = RefKey::SectionOffset(3, 16);

            let early = (!bind_first).then(|| refs.reference(key));
            refs.add_object_reference(key, RefTarget::Chunk(3, 16)).unwrap();
            let late = refs.reference(key);

            if let Some(early) = early {
                assert_eq!(refs.target_of(early), Some(RefTarget::Chunk(3, 16)));
            }
            assert_eq!(refs.target_of(late), Some(RefTarget::Chunk(3, 16)));
        }
    }

    #[test]
    fn test_resolve_materializes_chunks() {
        let mut refs = ReferenceManager::new();
        let offsets = [0u32, 1, 2];

        let handles: Vec<_> = offsets
            .iter()
            .map(|&offset| refs.reference(RefKey::SectionOffset(100, offset)))
            .collect();

        let mut section = Section::new(SectionData::Data(vec![0x50, 0x60, 0x70]));
        section.set_id(100);

        refs.resolve(std::slice::from_ref(&section)).unwrap();

        for (&offset, &handle) in offsets.iter().zip(&handles) {
            assert_eq!(refs.target_of(handle), Some(RefTarget::Chunk(100, offset)));
        }
    }

    #[test]
    fn test_resolve_rejects_missing_section() {
        let mut refs = ReferenceManager::new();
        refs.reference(RefKey::SectionOffset(123, 12));

        assert!(matches!(refs.resolve(&[]), Err(Error::UnresolvedReference(_))));
    }

    #[test]
    fn test_resolve_rejects_non_chunkable_section() {
        let mut refs = ReferenceManager::new();
        refs.reference(RefKey::SectionOffset(1, 12));

        let mut section = Section::new(SectionData::Code(crate::CodeData::default()));
        section.set_id(1);

        assert!(matches!(
            refs.resolve(std::slice::from_ref(&section)),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_offset_past_length() {
        let mut refs = ReferenceManager::new();
        refs.reference(RefKey::SectionOffset(5, 10));

        let mut section = Section::new(SectionData::Data(vec![0; 4]));
        section.set_id(5);

        assert!(matches!(
            refs.resolve(std::slice::from_ref(&section)),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_unbound_index_key() {
        let mut refs = ReferenceManager::new();
        refs.reference(RefKey::SectionIndex(666, 888));

        assert!(matches!(refs.resolve(&[]), Err(Error::UnresolvedReference(_))));
    }

    #[test]
    fn test_replace_all_references() {
        let mut refs = ReferenceManager::new();
        let old = RefTarget::Element(1, 1);
        let new = RefTarget::Element(1, 2);

        let handle = refs.bound(old);
        refs.replace_all_references(new, old);

        assert_eq!(refs.target_of(handle), Some(new));
    }

    #[test]
    fn test_deleted_target_nulls_references() {
        let mut refs = ReferenceManager::new();
        let key = RefKey::SectionIndex(0xfe, 0x12e);

        let handle = refs.reference(key);
        refs.add_object_reference(key, fake_element()).unwrap();
        refs.inform_deleted_target(fake_element());

        assert_eq!(refs.target_of(handle), None);
        assert!(!refs.is_referenced(fake_element()));
    }

    #[test]
    fn test_deleted_reference_is_dropped() {
        let mut refs = ReferenceManager::new();
        let handle = refs.bound(fake_element());

        assert!(refs.is_referenced(fake_element()));

        refs.inform_deleted_reference(handle);

        assert!(!refs.is_referenced(fake_element()));
        assert_eq!(refs.target_of(handle), None);
    }

    #[test]
    fn test_reverse_key_lookups() {
        let mut refs = ReferenceManager::new();
        let target = fake_element();

        assert!(refs.section_index_key_for(target).is_err());

        refs.add_object_reference(RefKey::SectionIndex(5, 3), target).unwrap();
        refs.add_object_reference(RefKey::SectionOffset(5, 36), target).unwrap();
        refs.add_object_reference(RefKey::Section(5), target).unwrap();
        refs.add_object_reference(RefKey::FileOffset(96), target).unwrap();

        assert_eq!(refs.section_index_key_for(target).unwrap(), (5, 3));
        assert_eq!(refs.section_offset_key_for(target).unwrap(), (5, 36));
        assert_eq!(refs.section_key_for(target).unwrap(), 5);
        assert_eq!(refs.file_offset_key_for(target).unwrap(), 96);
    }

    #[test]
    fn test_cleanup_invalidates_generation() {
        let mut refs = ReferenceManager::new();
        let handle = refs.bound(fake_element());

        refs.cleanup();

        assert_eq!(refs.target_of(handle), None);

        // A new handle from the new generation resolves fine.
        let fresh = refs.bound(fake_element());
        assert_eq!(refs.target_of(fresh), Some(fake_element()));
    }

    #[test]
    fn test_into_table() {
        let mut refs = ReferenceManager::new();
        let bound = refs.bound(fake_element());
        let dangling = refs.reference(RefKey::Section(9));

        let table = refs.into_table();

        assert_eq!(table.target(bound), Some(fake_element()));
        assert_eq!(table.target(dangling), None);
    }
}
