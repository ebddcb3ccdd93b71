use std::cell::OnceCell;

use crate::base::*;
use crate::instruction::InstructionElement;
use crate::section::ModelError;

/// The element list of a code section plus its instruction-start cache.
///
/// The cache maps bundle indices to element indices; it is rebuilt lazily
/// and invalidated by every mutation, so cached lookups never observe stale
/// element positions.
#[derive(Debug, Default, Clone)]
pub struct CodeData {
    elements: Vec<InstructionElement>,
    starts: OnceCell<Vec<Word>>,
}

impl CodeData {
    /// Creates an empty code payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instruction elements.
    pub fn element_count(&self) -> Word {
        self.elements.len() as Word
    }

    /// The elements in section order.
    pub fn elements(&self) -> &[InstructionElement] {
        &self.elements
    }

    /// One element.
    pub fn element(&self, index: Word) -> Result<&InstructionElement, ModelError> {
        self.elements
            .get(index as usize)
            .ok_or_else(|| ModelError::OutOfRange(format!("element index {index}")))
    }

    /// Mutable [`Self::element`]. Invalidates the instruction cache.
    pub fn element_mut(&mut self, index: Word) -> Result<&mut InstructionElement, ModelError> {
        self.clear_instruction_cache();
        self.elements
            .get_mut(index as usize)
            .ok_or_else(|| ModelError::OutOfRange(format!("element index {index}")))
    }

    /// Appends an element. Invalidates the instruction cache.
    pub fn add_element(&mut self, element: InstructionElement) {
        self.clear_instruction_cache();
        self.elements.push(element);
    }

    /// Replaces the element at `index`. Invalidates the instruction cache.
    pub fn set_element(
        &mut self,
        index: Word,
        element: InstructionElement,
    ) -> Result<(), ModelError> {
        *self.element_mut(index)? = element;

        Ok(())
    }

    /// Clears the instruction start cache.
    pub fn clear_instruction_cache(&mut self) {
        self.starts.take();
    }

    fn starts(&self) -> &Vec<Word> {
        self.starts.get_or_init(|| {
            self.elements
                .iter()
                .enumerate()
                .filter(|(_, element)| element.begin)
                .map(|(index, _)| index as Word)
                .collect()
        })
    }

    /// Number of instructions (bundles) stored in the section.
    pub fn instruction_count(&self) -> Word {
        self.starts().len() as Word
    }

    /// Element index of the first element of instruction `index`.
    pub fn instruction_to_section_index(&self, index: Word) -> Result<Word, ModelError> {
        self.starts()
            .get(index as usize)
            .copied()
            .ok_or_else(|| ModelError::OutOfRange(format!("instruction index {index}")))
    }

    /// Starting element of instruction `index`.
    pub fn instruction(&self, index: Word) -> Result<&InstructionElement, ModelError> {
        self.element(self.instruction_to_section_index(index)?)
    }

    /// Mutable [`Self::instruction`]. Invalidates the instruction cache.
    pub fn instruction_mut(
        &mut self,
        index: Word,
    ) -> Result<&mut InstructionElement, ModelError> {
        let element_index = self.instruction_to_section_index(index)?;

        self.element_mut(element_index)
    }

    /// Index of the instruction containing element `element_index`,
    /// found by binary search over the start cache.
    pub fn index_of_instruction(&self, element_index: Word) -> Result<Word, ModelError> {
        if element_index >= self.element_count() {
            return Err(ModelError::OutOfRange(format!("element index {element_index}")));
        }

        let starts = self.starts();

        match starts.binary_search(&element_index) {
            Ok(position) => Ok(position as Word),
            // An element in the middle of a bundle belongs to the
            // preceding start.
            Err(position) => Ok(position.saturating_sub(1) as Word),
        }
    }
}
