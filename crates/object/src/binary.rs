use crate::base::*;
use crate::refs::{RefTable, RefTarget, SafeRef};
use crate::section::{Section, SectionType};

/// Storing types of TTA code.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    /// Illegal/undefined type.
    #[default]
    Null = 0x00,
    /// Sequential TTA object code.
    ObjSeq = 0x04,
    /// Sequential TTA code, no unresolved symbols.
    PureSeq = 0x05,
    /// Collection of sequential object code files for linkage.
    LibSeq = 0x06,
    /// Partly scheduled code.
    Mixed = 0x09,
    /// Fully scheduled or mixed code.
    Parallel = 0x0d,
}

impl FileType {
    /// Decodes a persisted file-type byte.
    pub fn from_byte(byte: Byte) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Null,
            0x04 => Self::ObjSeq,
            0x05 => Self::PureSeq,
            0x06 => Self::LibSeq,
            0x09 => Self::Mixed,
            0x0d => Self::Parallel,
            _ => return None,
        })
    }
}

/// Encodings of program sections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileArchitecture {
    /// Illegal/undefined architecture.
    #[default]
    NoArch = 0x00,
    /// Move design framework.
    TtaMove = 0x01,
    /// New TTA template.
    TtaTut = 0x02,
    /// TTA Design Studio architecture.
    TdsTi = 0x03,
}

impl FileArchitecture {
    /// Decodes a persisted architecture byte.
    pub fn from_byte(byte: Byte) -> Option<Self> {
        Some(match byte {
            0x00 => Self::NoArch,
            0x01 => Self::TtaMove,
            0x02 => Self::TtaTut,
            0x03 => Self::TdsTi,
            _ => return None,
        })
    }
}

/// Root of the in-memory TPEF representation.
///
/// The binary exclusively owns its sections and the folded reference table
/// their elements resolve cross-references through.
#[derive(Debug, Default)]
pub struct Binary {
    sections: Vec<Section>,
    next_id: SectionId,
    refs: RefTable,
    /// Format-version tag.
    pub version: Byte,
    /// File type of the stored program.
    pub file_type: FileType,
    /// File architecture of the stored program.
    pub arch: FileArchitecture,
    strings: Option<SectionId>,
}

impl Binary {
    /// Current format version.
    pub const FORMAT_VERSION: Byte = 1;

    /// Creates an empty binary.
    pub fn new() -> Self {
        Self { version: Self::FORMAT_VERSION, ..Self::default() }
    }

    /// Adds a section and returns its identification code.
    ///
    /// A section whose id is already in use (or the sections of a reader,
    /// which assigns file ids itself) keeps its id and bumps the allocator
    /// past it; otherwise a fresh id is assigned.
    pub fn add_section(&mut self, mut section: Section) -> SectionId {
        let id = if section.id() == 0 && self.sections.iter().any(|s| s.id() == 0) {
            let id = self.next_id;
            section.set_id(id);

            id
        } else {
            section.id()
        };

        self.next_id = self.next_id.max(id.wrapping_add(1));
        self.sections.push(section);

        id
    }

    /// Removes a section by id. References to it go dangling; the writer
    /// reports them as missing keys.
    pub fn remove_section(&mut self, id: SectionId) -> Option<Section> {
        let position = self.sections.iter().position(|section| section.id() == id)?;

        Some(self.sections.remove(position))
    }

    /// The sections in insertion order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Number of sections.
    pub fn section_count(&self) -> Word {
        self.sections.len() as Word
    }

    /// Number of sections of the given type.
    pub fn section_count_of_type(&self, section_type: SectionType) -> Word {
        self.sections.iter().filter(|section| section.section_type() == section_type).count()
            as Word
    }

    /// Section by position.
    pub fn section(&self, index: Word) -> Option<&Section> {
        self.sections.get(index as usize)
    }

    /// The `number`th section of the given type.
    pub fn section_of_type(&self, section_type: SectionType, number: Word) -> Option<&Section> {
        self.sections
            .iter()
            .filter(|section| section.section_type() == section_type)
            .nth(number as usize)
    }

    /// Mutable [`Self::section_of_type`].
    pub fn section_of_type_mut(
        &mut self,
        section_type: SectionType,
        number: Word,
    ) -> Option<&mut Section> {
        self.sections
            .iter_mut()
            .filter(|section| section.section_type() == section_type)
            .nth(number as usize)
    }

    /// Section by identification code.
    pub fn section_by_id(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|section| section.id() == id)
    }

    /// Mutable [`Self::section_by_id`].
    pub fn section_by_id_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.iter_mut().find(|section| section.id() == id)
    }

    /// The binary-wide string section.
    pub fn strings(&self) -> Option<&Section> {
        self.section_by_id(self.strings?)
    }

    /// Mutable [`Self::strings`].
    pub fn strings_mut(&mut self) -> Option<&mut Section> {
        self.section_by_id_mut(self.strings?)
    }

    /// Id of the binary-wide string section.
    pub fn strings_id(&self) -> Option<SectionId> {
        self.strings
    }

    /// Designates the binary-wide string section.
    pub fn set_strings(&mut self, id: SectionId) {
        self.strings = Some(id);
    }

    /// Installs the folded reference table.
    pub fn set_refs(&mut self, refs: RefTable) {
        self.refs = refs;
    }

    /// The folded reference table.
    pub fn refs(&self) -> &RefTable {
        &self.refs
    }

    /// Resolves a safe reference to its typed locator.
    pub fn target(&self, reference: SafeRef) -> Option<RefTarget> {
        self.refs.target(reference)
    }

    /// Resolves an optional safe reference.
    pub fn target_opt(&self, reference: Option<SafeRef>) -> Option<RefTarget> {
        self.target(reference?)
    }

    /// Resolves a reference expected to be a chunk.
    pub fn chunk_target(&self, reference: Option<SafeRef>) -> Option<(SectionId, SectionOffset)> {
        match self.target_opt(reference)? {
            RefTarget::Chunk(section, offset) => Some((section, offset)),
            _ => None,
        }
    }

    /// Resolves a reference expected to be an element.
    pub fn element_target(&self, reference: Option<SafeRef>) -> Option<(SectionId, SectionIndex)> {
        match self.target_opt(reference)? {
            RefTarget::Element(section, index) => Some((section, index)),
            _ => None,
        }
    }

    /// Resolves a reference expected to be a section, yielding the section.
    pub fn section_target(&self, reference: Option<SafeRef>) -> Option<&Section> {
        match self.target_opt(reference)? {
            RefTarget::Section(id) => self.section_by_id(id),
            _ => None,
        }
    }

    /// The name of a section as a string, through the binary string section.
    pub fn section_name(&self, section: &Section) -> Option<String> {
        let (strings_id, offset) = self.chunk_target(section.name)?;

        self.section_by_id(strings_id)?.chunk_to_string(offset).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionData;

    #[test]
    fn test_id_assignment() {
        let mut binary = Binary::new();

        let null = binary.add_section(Section::new(SectionData::Null));
        let strings = binary.add_section(Section::new(SectionData::Strings(Vec::new())));
        let data = binary.add_section(Section::new(SectionData::Data(Vec::new())));

        assert_eq!(null, 0);
        assert_eq!(strings, 1);
        assert_eq!(data, 2);
        assert!(binary.section_by_id(1).is_some());
    }

    #[test]
    fn test_explicit_ids_are_kept() {
        let mut binary = Binary::new();

        let mut section = Section::new(SectionData::Data(Vec::new()));
        section.set_id(7);
        assert_eq!(binary.add_section(section), 7);

        // The allocator continues past explicit ids.
        assert_eq!(binary.add_section(Section::new(SectionData::Null)), 0);
        assert_eq!(binary.add_section(Section::new(SectionData::Strings(Vec::new()))), 8);
    }

    #[test]
    fn test_section_of_type() {
        let mut binary = Binary::new();
        binary.add_section(Section::new(SectionData::Null));
        binary.add_section(Section::new(SectionData::Data(vec![1])));
        binary.add_section(Section::new(SectionData::Data(vec![2])));

        assert_eq!(binary.section_count_of_type(SectionType::Data), 2);

        let second = binary.section_of_type(SectionType::Data, 1).unwrap();
        assert_eq!(second.byte(0).unwrap(), 2);

        assert!(binary.section_of_type(SectionType::Code, 0).is_none());
    }

    #[test]
    fn test_strings_designation() {
        let mut binary = Binary::new();
        binary.add_section(Section::new(SectionData::Null));
        let strings = binary.add_section(Section::new(SectionData::Strings(vec![0])));

        binary.set_strings(strings);

        assert_eq!(binary.strings().unwrap().id(), strings);
    }
}
