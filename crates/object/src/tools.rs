//! Convenience queries over a finished [`Binary`] that do not fit any
//! single section's interface.

use crate::base::*;
use crate::refs::RefTarget;
use crate::section::{ModelError, Section, SectionData};
use crate::{Binary, RelocElement, ResourceType};

/// The section an element or chunk locator lives in.
pub fn section_of_element(binary: &Binary, target: RefTarget) -> Option<&Section> {
    binary.section_by_id(target.section())
}

/// The name of a machine resource, looked up by type and id in the
/// binary's resource sections.
pub fn resource_name(
    binary: &Binary,
    kind: ResourceType,
    id: HalfWord,
) -> Result<String, ModelError> {
    for section in binary.sections() {
        let SectionData::Resources(elements) = &section.data else {
            continue;
        };

        let Some(element) = elements.iter().find(|e| e.kind == kind && e.id == id) else {
            continue;
        };

        let Some((strings_id, offset)) = binary.chunk_target(element.name) else {
            return Ok(String::new());
        };

        return binary
            .section_by_id(strings_id)
            .ok_or_else(|| ModelError::UnexpectedValue("resource name in ghost section".into()))?
            .chunk_to_string(offset);
    }

    Err(ModelError::UnexpectedValue(format!("no resource of type {kind:?} with id {id}")))
}

/// The name of an address space, given its element locator.
pub fn address_space_name(binary: &Binary, aspace: RefTarget) -> Result<String, ModelError> {
    let RefTarget::Element(section_id, index) = aspace else {
        return Err(ModelError::UnexpectedValue("not an address-space element".into()));
    };

    let element = binary
        .section_by_id(section_id)
        .ok_or_else(|| ModelError::UnexpectedValue("address space in ghost section".into()))?
        .as_aspaces()?
        .elements
        .get(index as usize)
        .copied()
        .ok_or_else(|| ModelError::OutOfRange(format!("address-space element {index}")))?;

    let Some((strings_id, offset)) = binary.chunk_target(element.name) else {
        return Ok(String::new());
    };

    binary
        .section_by_id(strings_id)
        .ok_or_else(|| ModelError::UnexpectedValue("address-space name in ghost section".into()))?
        .chunk_to_string(offset)
}

/// True if some relocation's location is the given element or chunk.
pub fn has_relocation(binary: &Binary, target: RefTarget) -> bool {
    relocation(binary, target).is_some()
}

/// The relocation whose location is the given element or chunk, if any.
pub fn relocation(binary: &Binary, target: RefTarget) -> Option<&RelocElement> {
    for section in binary.sections() {
        let SectionData::Relocs(relocs) = &section.data else {
            continue;
        };

        for element in &relocs.elements {
            if binary.target_opt(element.location) == Some(target) {
                return Some(element);
            }
        }
    }

    None
}
