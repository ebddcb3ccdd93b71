//! The legacy a.out reader.
//!
//! Reads classic OMAGIC a.out objects produced by the sequential TTA
//! compiler and synthesizes a full TPEF object graph out of them: the five
//! mandatory reserved sections, a code section whose instruction boundaries
//! are invented from the 8-byte record size, two address spaces with the
//! TTA-conventional MAU of 8 bits, and a machine-resource table built from
//! the `N_PRTAB` entries of the symbol table. Compilation-unit start
//! symbols split the symbol table into modules whose operation-id clashes
//! are reconciled by rewriting the instruction stream.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::base::*;
use crate::instruction::*;
use crate::read::{tpef::finalize_relocations, Error, FormatReader};
use crate::refs::{RefKey, RefTarget, ReferenceManager, SafeRef};
use crate::section::*;
use crate::stream::{self, BinaryStream};
use crate::{
    ASpaceElement, Binary, DebugElement, FileArchitecture, FileType, RelocElement, RelocType,
    ResourceElement, ResourceType, SymbolBinding, SymbolElement, SymbolKind, SymbolType,
};

/// Magic of 'old impure format' a.out files.
const OMAGIC: HalfWord = 0x0107;
/// Size of the a.out file header.
const FILE_HEADER_SIZE: Word = 32;

/// MAU of both synthesized address spaces, a TTA convention.
const AOUT_BITS_PER_MAU: Byte = 8;
const AOUT_WORD_ALIGN: Byte = 4;
const AOUT_WORD_SIZE: Byte = 4;
/// Size of one a.out instruction in bytes.
const AOUT_INSTRUCTION_SIZE: Word = 8;

const AOUT_CODE_ASPACE_NAME: &str = "universal_instructions";
const AOUT_DATA_ASPACE_NAME: &str = "universal_data";

/// Universal register plan of sequential code.
const INT_REGISTERS: Word = 1024;
const FP_REGISTERS: Word = 1024;
const BOOL_REGISTERS: Word = 1;

const FIRST_INT_REGISTER: Word = 0;
const FIRST_FP_REGISTER: Word = FIRST_INT_REGISTER + INT_REGISTERS;
const FIRST_BOOL_REGISTER: Word = FIRST_FP_REGISTER + FP_REGISTERS;
const FIRST_FU_REGISTER: Word = FIRST_BOOL_REGISTER + BOOL_REGISTERS;

/// Bit marking an inline immediate in the source word of a text record.
const IMMEDIATE_SOURCE_MASK: Word = 0x8000_0000;

// a.out symbol types.
const N_EXT: Byte = 0x01;
const N_UNDF: Byte = 0x00;
const N_TEXT: Byte = 0x04;
const N_DATA: Byte = 0x06;
const N_BSS: Byte = 0x08;
const N_FN: Byte = 0x1e;
/// TTA extension: operation-id resource table entry.
const N_PRTAB: Byte = 0x24;
/// TTA extension: annotation entry in `ID:payload` form.
const N_ANN: Byte = 0x26;

/// Compilation-unit start markers emitted by the sequential compiler.
const GCC_MODULE_START_SYMBOL_1: &str = "gcc2_compiled.";
const GCC_MODULE_START_SYMBOL_2: &str = "___gnu_compiled_c";

// Identification codes of the synthesized sections. Text, data and udata
// reuse the a.out symbol-type values so symbol records translate into keys
// directly.
const ST_NULL: SectionId = 0;
const ST_ADDRSP: SectionId = 1;
const ST_MR: SectionId = 2;
const ST_DEBUG: SectionId = 3;
const ST_TEXT: SectionId = N_TEXT as SectionId;
const ST_TEXT_RELOC: SectionId = 5;
const ST_DATA: SectionId = N_DATA as SectionId;
const ST_DATA_RELOC: SectionId = 7;
const ST_UDATA: SectionId = N_BSS as SectionId;
const ST_SYMBOL: SectionId = 10;
const ST_STRING: SectionId = 12;

/// Address-space element indices in the synthesized address-space section.
const ASPACE_UNDEF: Word = 0;
const ASPACE_CODE: Word = 1;
const ASPACE_DATA: Word = 2;

#[derive(Debug, Default, Clone, Copy)]
struct Header {
    text: Word,
    data: Word,
    udata: Word,
    symbols: Word,
    text_reloc: Word,
    data_reloc: Word,
    strings: Word,
}

/// One compilation unit and its operation-id remapping table.
#[derive(Debug, Default)]
struct CompilationModule {
    /// First instruction of the module.
    start_address: Word,
    /// Clashing operation-id replacements: in this module's instructions,
    /// key ids rewrite to value ids.
    resources: HashMap<Word, Word>,
}

/// The legacy a.out format reader.
#[derive(Default)]
pub struct AOutReader;

impl AOutReader {
    /// Creates the reader.
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for AOutReader {
    fn is_my_stream_type(&self, stream: &mut BinaryStream) -> Result<bool, stream::Error> {
        let start = stream.read_position();

        if stream.size_of_file() < start + FILE_HEADER_SIZE {
            return Ok(false);
        }

        stream.read_half_word()?;
        let magic = stream.read_half_word()?;
        stream.set_read_position(start);

        Ok(magic == OMAGIC)
    }

    fn read_data(&self, stream: &mut BinaryStream) -> Result<Binary, Error> {
        Import::new().run(stream)
    }
}

/// State of one a.out import.
struct Import {
    refs: ReferenceManager,
    header: Header,
    /// Collected `N_PRTAB` entries, name to id, ordered by name.
    resolved_resources: BTreeMap<String, Word>,
    /// Per-compilation-unit remap tables, in module order.
    modules: Vec<CompilationModule>,
    /// Collected `N_ANN` entries: instruction number and raw stab string.
    annotations: Vec<(Word, String)>,
}

impl Import {
    fn new() -> Self {
        Self {
            refs: ReferenceManager::new(),
            header: Header::default(),
            resolved_resources: BTreeMap::new(),
            modules: Vec::new(),
            annotations: Vec::new(),
        }
    }

    fn run(mut self, stream: &mut BinaryStream) -> Result<Binary, Error> {
        self.read_header(stream)?;

        let mut sections = self.create_sections();

        let text_start = stream.read_position();
        let data_start = text_start + self.header.text;
        let text_reloc_start = data_start + self.header.data;
        let data_reloc_start = text_reloc_start + self.header.text_reloc;
        let symbol_start = data_reloc_start + self.header.data_reloc;
        let string_start = symbol_start + self.header.symbols;

        // The string table first: symbol names resolve against it while the
        // symbol records are read.
        stream.set_read_position(string_start);
        self.read_strings(stream, &mut sections)?;

        stream.set_read_position(text_start);
        self.read_text(stream, &mut sections)?;

        stream.set_read_position(data_start);
        self.read_data_bytes(stream, &mut sections)?;

        stream.set_read_position(symbol_start);
        self.read_symbols(stream, &mut sections)?;

        self.finalize_symbols(&mut sections)?;
        self.apply_operation_remaps(&mut sections)?;
        self.attach_annotations(&mut sections)?;

        stream.set_read_position(text_reloc_start);
        self.read_relocations(stream, &mut sections, ST_TEXT, self.header.text_reloc)?;

        stream.set_read_position(data_reloc_start);
        self.read_relocations(stream, &mut sections, ST_DATA, self.header.data_reloc)?;

        self.name_sections(&mut sections)?;

        let mut binary = Binary::new();
        binary.file_type = FileType::ObjSeq;
        binary.arch = FileArchitecture::TtaTut;

        for section in sections {
            // Sections the input did not populate are dropped; the reserved
            // sections always carry at least one element or byte.
            let keep = match &section.data {
                SectionData::Null | SectionData::ASpaces(_) => true,
                SectionData::Strings(bytes) => !bytes.is_empty(),
                SectionData::Data(bytes) => !bytes.is_empty(),
                SectionData::UData { length } => *length > 0,
                SectionData::Code(code) => code.element_count() > 0,
                SectionData::Symbols(symbols) => !symbols.is_empty(),
                SectionData::Relocs(relocs) => !relocs.elements.is_empty(),
                SectionData::Resources(resources) => !resources.is_empty(),
                SectionData::Debug(elements) => !elements.is_empty(),
                SectionData::LineNumbers(linenos) => !linenos.procedures.is_empty(),
            };

            if keep {
                binary.add_section(section);
            } else {
                self.refs.inform_deleted_target(RefTarget::Section(section.id()));
            }
        }

        binary.set_strings(ST_STRING);

        self.refs.resolve(binary.sections())?;
        finalize_relocations(&mut binary, &mut self.refs)?;

        binary.set_refs(self.refs.into_table());

        Ok(binary)
    }

    fn read_header(&mut self, stream: &mut BinaryStream) -> Result<(), Error> {
        stream.read_half_word()?;
        if stream.read_half_word()? != OMAGIC {
            return Err(Error::UnexpectedValue("not an OMAGIC a.out".into()));
        }

        self.header.text = stream.read_word()?;
        self.header.data = stream.read_word()?;
        self.header.udata = stream.read_word()?;
        self.header.symbols = stream.read_word()?;

        // The entry point of sequential objects is always zero.
        if stream.read_word()? != 0 {
            return Err(Error::UnexpectedValue("a.out entry point is not zero".into()));
        }

        self.header.text_reloc = stream.read_word()?;
        self.header.data_reloc = stream.read_word()?;

        let string_start = FILE_HEADER_SIZE
            + self.header.text
            + self.header.data
            + self.header.text_reloc
            + self.header.data_reloc
            + self.header.symbols;

        self.header.strings = stream.size_of_file().saturating_sub(string_start);

        Ok(())
    }

    fn create_sections(&mut self) -> Vec<Section> {
        let specs: Vec<(SectionId, SectionData)> = vec![
            (ST_NULL, SectionData::Null),
            (ST_ADDRSP, SectionData::ASpaces(Default::default())),
            (ST_MR, SectionData::Resources(Vec::new())),
            (ST_DEBUG, SectionData::Debug(Vec::new())),
            (ST_TEXT, SectionData::Code(Default::default())),
            (ST_TEXT_RELOC, SectionData::Relocs(Default::default())),
            (ST_DATA, SectionData::Data(Vec::new())),
            (ST_DATA_RELOC, SectionData::Relocs(Default::default())),
            (ST_UDATA, SectionData::UData { length: 0 }),
            (ST_SYMBOL, SectionData::Symbols(Vec::new())),
            (ST_STRING, SectionData::Strings(Vec::new())),
        ];

        let mut sections: Vec<Section> = specs
            .into_iter()
            .map(|(id, data)| {
                let mut section = Section::new(data);
                section.set_id(id);

                self.refs
                    .add_object_reference(RefKey::Section(id), RefTarget::Section(id))
                    .expect("each synthesized section id is registered once");

                section
            })
            .collect();

        // The three address spaces: undefined, code and data.
        {
            let aspaces = section_mut(&mut sections, ST_ADDRSP)
                .as_aspaces_mut()
                .expect("the address-space skeleton was just created");

            aspaces.elements.push(ASpaceElement::default());
            aspaces.elements.push(ASpaceElement {
                mau: AOUT_BITS_PER_MAU,
                align: AOUT_WORD_ALIGN,
                word_size: AOUT_WORD_SIZE,
                name: None,
            });
            aspaces.elements.push(ASpaceElement {
                mau: AOUT_BITS_PER_MAU,
                align: AOUT_WORD_ALIGN,
                word_size: AOUT_WORD_SIZE,
                name: None,
            });
            aspaces.undefined = Some(self.aspace_ref(ASPACE_UNDEF));
        }

        let undef = self.aspace_ref(ASPACE_UNDEF);
        let code = self.aspace_ref(ASPACE_CODE);
        let data = self.aspace_ref(ASPACE_DATA);

        let null_link = self.refs.reference(RefKey::Section(ST_NULL));
        let string_link = self.refs.reference(RefKey::Section(ST_STRING));
        let mr_link = self.refs.reference(RefKey::Section(ST_MR));
        let symbol_link = self.refs.reference(RefKey::Section(ST_SYMBOL));

        let header = self.header;

        for section in sections.iter_mut() {
            let (aspace, link, start) = match section.id() {
                // The code section starts from address zero, data follows
                // it, uninitialized data comes last.
                ST_TEXT => (code, mr_link, 0),
                ST_DATA => (data, null_link, header.text),
                ST_UDATA => (data, null_link, header.text + header.data),
                ST_TEXT_RELOC | ST_DATA_RELOC => (undef, symbol_link, 0),
                ST_ADDRSP | ST_DEBUG | ST_MR => (undef, string_link, 0),
                ST_SYMBOL => (undef, string_link, 0),
                _ => (undef, null_link, 0),
            };

            section.aspace = Some(aspace);
            section.link = Some(link);
            section.starting_address = start;
        }

        section_mut(&mut sections, ST_TEXT_RELOC).as_relocs_mut().unwrap().referenced_section =
            Some(self.refs.reference(RefKey::Section(ST_TEXT)));
        section_mut(&mut sections, ST_DATA_RELOC).as_relocs_mut().unwrap().referenced_section =
            Some(self.refs.reference(RefKey::Section(ST_DATA)));

        sections
    }

    fn aspace_ref(&mut self, index: Word) -> SafeRef {
        self.refs.bound(RefTarget::Element(ST_ADDRSP, index))
    }

    fn read_strings(
        &mut self,
        stream: &mut BinaryStream,
        sections: &mut [Section],
    ) -> Result<(), Error> {
        let strings = section_mut(sections, ST_STRING);

        for _ in 0..self.header.strings {
            let byte = stream.read_byte()?;
            strings.add_byte(byte)?;
        }

        // There is always at least the leading zero.
        if strings.length()? == 0 {
            strings.add_byte(0)?;
        }

        Ok(())
    }

    /// Reads the text section: every 8-byte record is one instruction
    /// holding one move, source word then destination word.
    fn read_text(
        &mut self,
        stream: &mut BinaryStream,
        sections: &mut [Section],
    ) -> Result<(), Error> {
        let text = section_mut(sections, ST_TEXT);
        let code = text.as_code_mut()?;

        let instruction_count = self.header.text / AOUT_INSTRUCTION_SIZE;

        for instruction in 0..instruction_count {
            let source = stream.read_word()?;
            let destination = stream.read_word()?;

            let first_element = code.element_count();

            let mut element = MoveElement { bus: 0, ..Default::default() };

            if source & IMMEDIATE_SOURCE_MASK != 0 {
                let mut immediate = ImmediateElement {
                    destination_unit: ResourceElement::INLINE_IMM as Byte,
                    destination_index: 1,
                    bytes: Vec::new(),
                };
                immediate.set_word(source & !IMMEDIATE_SOURCE_MASK);

                let mut immediate = InstructionElement::from_immediate(immediate);
                immediate.begin = true;
                code.add_element(immediate);

                element.source_type = MoveFieldType::Immediate;
                element.source_unit = ResourceElement::INLINE_IMM as Byte;
                element.source_index = 1;
            } else {
                let (field_type, unit, index) = universal_register(source)?;
                element.source_type = field_type;
                element.source_unit = unit;
                element.source_index = index;
            }

            let (field_type, unit, index) = universal_register(destination)?;
            element.destination_type = field_type;
            element.destination_unit = unit;
            element.destination_index = index;

            let mut move_element = InstructionElement::from_move(element);
            move_element.begin = first_element == code.element_count();
            code.add_element(move_element);

            // Keys by a.out byte address and by instruction number.
            self.refs.add_object_reference(
                RefKey::SectionOffset(ST_TEXT, instruction * AOUT_INSTRUCTION_SIZE),
                RefTarget::Element(ST_TEXT, first_element),
            )?;
            self.refs.add_object_reference(
                RefKey::SectionIndex(ST_TEXT, instruction),
                RefTarget::Element(ST_TEXT, first_element),
            )?;
        }

        Ok(())
    }

    fn read_data_bytes(
        &mut self,
        stream: &mut BinaryStream,
        sections: &mut [Section],
    ) -> Result<(), Error> {
        {
            let data = section_mut(sections, ST_DATA);
            for _ in 0..self.header.data {
                let byte = stream.read_byte()?;
                data.add_byte(byte)?;
            }
        }

        section_mut(sections, ST_UDATA).set_data_length(self.header.udata)?;

        Ok(())
    }

    fn read_symbols(
        &mut self,
        stream: &mut BinaryStream,
        sections: &mut [Section],
    ) -> Result<(), Error> {
        // The undefined symbol the format mandates at index 0. The string
        // table is fully read by now, so name references bind directly to
        // chunks.
        let undefined = SymbolElement::undefined(
            Some(self.refs.bound(RefTarget::Chunk(ST_STRING, 0))),
            Some(self.refs.reference(RefKey::Section(ST_NULL))),
        );

        self.refs.add_object_reference(
            RefKey::SectionIndex(ST_SYMBOL, 0),
            RefTarget::Element(ST_SYMBOL, 0),
        )?;

        section_mut(sections, ST_SYMBOL).as_symbols_mut()?.push(undefined);

        let start = stream.read_position();
        let mut symbol_index: Word = 0;

        while stream.read_position() < start + self.header.symbols {
            let section_offset = stream.read_position() - start;
            let created = self.initialize_symbol(stream, section_offset, sections)?;

            if let Some(symbol) = created {
                let symbols = section_mut(sections, ST_SYMBOL).as_symbols_mut()?;
                let position = symbols.len() as Word;
                symbols.push(symbol);

                self.refs.add_object_reference(
                    RefKey::SectionIndex(ST_SYMBOL, symbol_index + 1),
                    RefTarget::Element(ST_SYMBOL, position),
                )?;
                self.refs.add_object_reference(
                    RefKey::SectionOffset(ST_SYMBOL, section_offset),
                    RefTarget::Element(ST_SYMBOL, position),
                )?;
            }

            // The index counter advances even when no symbol is created.
            symbol_index += 1;
        }

        self.build_resource_table(sections)?;

        Ok(())
    }

    fn initialize_symbol(
        &mut self,
        stream: &mut BinaryStream,
        _section_offset: SectionOffset,
        sections: &mut [Section],
    ) -> Result<Option<SymbolElement>, Error> {
        let strtab_offset = stream.read_word()?;
        let symbol_type = stream.read_byte()?;
        let other = stream.read_byte()?;
        let description = stream.read_half_word()?;
        let value = stream.read_word()?;

        let name_ref = self.refs.bound(RefTarget::Chunk(ST_STRING, strtab_offset));

        let symbol_name =
            section_mut(sections, ST_STRING).chunk_to_string(strtab_offset).unwrap_or_default();

        let mut element = match symbol_type & !N_EXT {
            N_UNDF => {
                let mut element = SymbolElement::new(SymbolKind::NoType);
                element.section = Some(self.refs.reference(RefKey::Section(ST_NULL)));

                element
            }

            N_TEXT => {
                if self.header.text != 0 {
                    // A compilation-module start symbol begins a new
                    // operation-id scope.
                    if symbol_name == GCC_MODULE_START_SYMBOL_1 {
                        self.modules.push(CompilationModule {
                            start_address: value / AOUT_INSTRUCTION_SIZE,
                            resources: HashMap::new(),
                        });
                    }

                    let reference = self
                        .refs
                        .reference(RefKey::SectionOffset(ST_TEXT, value));

                    let mut element =
                        SymbolElement::new(SymbolKind::Code { reference: Some(reference), size: 0 });
                    element.section = Some(self.refs.reference(RefKey::Section(ST_TEXT)));

                    element
                } else {
                    let mut element = SymbolElement::new(SymbolKind::NoType);
                    element.section = Some(self.refs.reference(RefKey::Section(ST_NULL)));

                    element
                }
            }

            N_DATA | N_BSS => {
                let owner = (symbol_type & !N_EXT) as SectionId;
                let owner_start = match owner {
                    ST_DATA => self.header.text,
                    _ => self.header.text + self.header.data,
                };

                let reference = self
                    .refs
                    .reference(RefKey::SectionOffset(owner, value.saturating_sub(owner_start)));

                let mut element = SymbolElement::new(SymbolKind::Data {
                    reference: Some(reference),
                    // Every a.out data symbol announces one word.
                    size: 4,
                });
                element.section = Some(self.refs.reference(RefKey::Section(owner)));

                element
            }

            N_FN => {
                let mut element = SymbolElement::new(SymbolKind::File { value: 0 });
                element.section = Some(self.refs.reference(RefKey::Section(ST_NULL)));

                element
            }

            N_PRTAB => {
                match self.resolved_resources.get(&symbol_name) {
                    None => {
                        self.resolved_resources.insert(symbol_name, value);
                    }
                    Some(&resolved) if resolved != value => {
                        // The same operation name resolved differently in an
                        // earlier module; remap this module's uses.
                        if let Some(module) = self.modules.last_mut() {
                            module.resources.insert(value, resolved);
                        }
                    }
                    Some(_) => {}
                }

                return Ok(None);
            }

            N_ANN => {
                self.annotations.push((value / AOUT_INSTRUCTION_SIZE, symbol_name));

                return Ok(None);
            }

            // Everything else is debugger data, stored as stabs.
            _ => {
                let mut stab = DebugElement::stab(symbol_type, other, description, value);
                stab.string = Some(name_ref);

                section_mut(sections, ST_DEBUG).as_debug_mut()?.push(stab);

                return Ok(None);
            }
        };

        element.binding = if symbol_type & N_EXT != 0 {
            SymbolBinding::Global
        } else {
            SymbolBinding::Local
        };
        element.name = Some(name_ref);

        Ok(Some(element))
    }

    /// Writes the resource table out of the `N_PRTAB` entries collected
    /// from the symbol table, plus the universal resources every
    /// sequential program uses.
    fn build_resource_table(&mut self, sections: &mut [Section]) -> Result<(), Error> {
        let mut entries: Vec<ResourceElement> = Vec::new();

        for (name, &value) in &self.resolved_resources {
            let kind = if value > FIRST_FU_REGISTER {
                ResourceType::Operand
            } else if value == FIRST_FU_REGISTER {
                // The very first FU register of a.out is the
                // return-address special register.
                ResourceType::SpecialRegister
            } else {
                continue;
            };

            if value > HalfWord::MAX as Word {
                return Err(Error::UnexpectedValue(format!(
                    "operation id {value:#x} does not fit a resource id"
                )));
            }

            let name_chunk = section_mut(sections, ST_STRING).string_to_chunk(name)?;

            let mut resource = ResourceElement::new(value as HalfWord, kind);
            resource.name = Some(self.refs.bound(name_chunk));

            entries.push(resource);
        }

        let null_name = self.refs.bound(RefTarget::Chunk(ST_STRING, 0));

        for (id, kind) in [
            (ResourceElement::INT_RF, ResourceType::RegisterFile),
            (ResourceElement::FP_RF, ResourceType::RegisterFile),
            (ResourceElement::BOOL_RF, ResourceType::RegisterFile),
            (ResourceElement::UNIVERSAL_FU, ResourceType::Unit),
            (ResourceElement::UNIVERSAL_BUS, ResourceType::Bus),
        ] {
            let mut resource = ResourceElement::new(id, kind);
            resource.name = Some(null_name);

            entries.push(resource);
        }

        section_mut(sections, ST_MR).as_resources_mut()?.extend(entries);

        Ok(())
    }

    /// Removes reserved gcc marker symbols, converts compilation-unit code
    /// labels to file symbols and creates a procedure symbol for each code
    /// symbol.
    fn finalize_symbols(&mut self, sections: &mut [Section]) -> Result<(), Error> {
        let strings_snapshot: Vec<(Word, Option<String>)> = {
            let strings = section_by_id(sections, ST_STRING);
            let symbols = section_by_id(sections, ST_SYMBOL).as_symbols()?;

            symbols
                .iter()
                .enumerate()
                .map(|(index, symbol)| {
                    let name = self
                        .chunk_offset(symbol.name)
                        .and_then(|offset| strings.chunk_to_string(offset).ok());

                    (index as Word, name)
                })
                .collect()
        };

        let null_section = self.refs.reference(RefKey::Section(ST_NULL));
        let initial_count = strings_snapshot.len();

        let mut procedures: Vec<SymbolElement> = Vec::new();

        {
            let symbols = section_mut(sections, ST_SYMBOL).as_symbols_mut()?;

            for index in 0..initial_count {
                if symbols[index].symbol_type() != SymbolType::Code {
                    continue;
                }

                let name = strings_snapshot[index].1.clone().unwrap_or_default();

                // In a linked a.out a symbol naming the compilation module
                // precedes every module start marker; turn it into a file
                // symbol.
                if index > 1 && name == GCC_MODULE_START_SYMBOL_1 {
                    let previous = symbols[index - 1];

                    let mut file_symbol = SymbolElement::new(SymbolKind::File { value: 0 });
                    file_symbol.name = previous.name;
                    file_symbol.section = Some(null_section);
                    file_symbol.binding = previous.binding;

                    symbols[index - 1] = file_symbol;
                }

                if name == GCC_MODULE_START_SYMBOL_1 || name == GCC_MODULE_START_SYMBOL_2 {
                    let mut replacement = SymbolElement::new(SymbolKind::NoType);
                    replacement.name = symbols[index].name;
                    replacement.section = Some(null_section);

                    symbols[index] = replacement;
                } else {
                    let SymbolKind::Code { reference, size } = symbols[index].kind else {
                        unreachable!("only code symbols reach this branch");
                    };

                    let mut procedure =
                        SymbolElement::new(SymbolKind::Procedure { reference, size });
                    procedure.absolute = symbols[index].absolute;
                    procedure.binding = SymbolBinding::Local;
                    procedure.name = symbols[index].name;
                    procedure.section = symbols[index].section;

                    procedures.push(procedure);
                }
            }

            symbols.extend(procedures);
        }

        Ok(())
    }

    /// Rewrites universal-FU operand indices of each compilation unit
    /// according to the unit's remap table.
    fn apply_operation_remaps(&mut self, sections: &mut [Section]) -> Result<(), Error> {
        let code = section_mut(sections, ST_TEXT).as_code_mut()?;

        for position in 0..self.modules.len() {
            let last_address = if position + 1 < self.modules.len() {
                self.modules[position + 1].start_address
            } else {
                code.instruction_count()
            };

            let module = &self.modules[position];

            for instruction in module.start_address..last_address {
                let mut element_index = code.instruction_to_section_index(instruction)?;

                // The move of an instruction follows its inline immediate.
                if code.element(element_index)?.is_immediate() {
                    element_index += 1;
                }

                let Some(element) = code.element_mut(element_index)?.as_move_mut() else {
                    continue;
                };

                if element.source_type == MoveFieldType::Unit
                    && element.source_unit == ResourceElement::UNIVERSAL_FU as Byte
                {
                    if let Some(&replacement) =
                        module.resources.get(&(element.source_index as Word))
                    {
                        element.source_index = replacement as HalfWord;
                    }
                }

                if element.destination_type == MoveFieldType::Unit
                    && element.destination_unit == ResourceElement::UNIVERSAL_FU as Byte
                {
                    if let Some(&replacement) =
                        module.resources.get(&(element.destination_index as Word))
                    {
                        element.destination_index = replacement as HalfWord;
                    }
                }
            }
        }

        Ok(())
    }

    /// Attaches the `N_ANN` annotations to their target instructions.
    ///
    /// The first 10 characters of the stab string are the annotation id,
    /// terminated by a colon; the rest is the payload.
    fn attach_annotations(&mut self, sections: &mut [Section]) -> Result<(), Error> {
        let annotations = std::mem::take(&mut self.annotations);

        let code = section_mut(sections, ST_TEXT).as_code_mut()?;

        for (instruction, stab_string) in annotations {
            if stab_string.as_bytes().get(10) != Some(&b':') {
                return Err(Error::UnexpectedValue(
                    "the 11 first characters of an annotation stab must contain the \
                     annotation id ending with ':', e.g. '0x00011000:'"
                        .into(),
                ));
            }

            let id_text = &stab_string[..10];
            let id = parse_annotation_id(id_text).ok_or_else(|| {
                Error::UnexpectedValue(format!("bad annotation id `{id_text}`"))
            })?;

            let payload = stab_string[11..].as_bytes().to_vec();

            code.instruction_mut(instruction)?
                .annotations
                .push(InstructionAnnotation::new(id, payload));
        }

        Ok(())
    }

    fn read_relocations(
        &mut self,
        stream: &mut BinaryStream,
        sections: &mut [Section],
        referenced: SectionId,
        byte_count: Word,
    ) -> Result<(), Error> {
        let reloc_id = match referenced {
            ST_TEXT => ST_TEXT_RELOC,
            _ => ST_DATA_RELOC,
        };

        let count = byte_count / 8;
        let mut elements = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let address = stream.read_word()?;
            let _info = stream.read_word()?;

            // Relocation addresses are relative to their segment; text
            // relocations address the immediate field of an instruction
            // record.
            let location_offset = match referenced {
                ST_TEXT => address - address % AOUT_INSTRUCTION_SIZE,
                _ => address,
            };

            let mut element = RelocElement::new(RelocType::SelfRel);
            element.size = 32;
            element.location =
                Some(self.refs.reference(RefKey::SectionOffset(referenced, location_offset)));
            element.symbol = Some(self.refs.reference(RefKey::SectionIndex(ST_SYMBOL, 0)));

            // The destination address space depends on where the stored
            // address points; the destination element itself is recovered
            // by the shared relocation finalizer.
            let value = self.relocation_target_address(sections, referenced, location_offset)?;
            let aspace_index =
                if value < self.header.text { ASPACE_CODE } else { ASPACE_DATA };
            element.aspace = Some(self.aspace_ref(aspace_index));

            elements.push(element);
        }

        section_mut(sections, reloc_id).as_relocs_mut()?.elements.extend(elements);

        Ok(())
    }

    /// The address stored at a relocation location.
    fn relocation_target_address(
        &self,
        sections: &[Section],
        referenced: SectionId,
        offset: SectionOffset,
    ) -> Result<Word, Error> {
        match referenced {
            ST_TEXT => {
                let code = section_by_id(sections, ST_TEXT).as_code()?;
                let index =
                    code.instruction_to_section_index(offset / AOUT_INSTRUCTION_SIZE)?;
                let element = code.element(index)?;

                match element.as_immediate() {
                    Some(immediate) => Ok(immediate.word()?),
                    None => Err(Error::UnexpectedValue(
                        "text relocation does not address an immediate".into(),
                    )),
                }
            }
            _ => {
                let data = section_by_id(sections, ST_DATA);

                let mut value: Word = 0;
                for k in 0..4 {
                    value = (value << BYTE_BITWIDTH) | data.byte(offset + k)? as Word;
                }

                Ok(value)
            }
        }
    }

    fn name_sections(&mut self, sections: &mut [Section]) -> Result<(), Error> {
        let names: &[(SectionId, &str)] = &[
            (ST_SYMBOL, "Symbols"),
            (ST_MR, "Universal resources"),
            (ST_DATA, "Initialized data"),
            (ST_TEXT, "Code"),
            (ST_ADDRSP, "Address spaces"),
            (ST_NULL, "Null section"),
            (ST_UDATA, "Uninitilized data"),
            (ST_TEXT_RELOC, "Relocated immediates"),
            (ST_DATA_RELOC, "Relocated data"),
            (ST_STRING, "Strings of TPEF"),
            (ST_DEBUG, "A.out stabs"),
        ];

        for &(id, name) in names {
            let chunk = section_mut(sections, ST_STRING).string_to_chunk(name)?;
            let reference = self.refs.bound(chunk);
            section_mut(sections, id).name = Some(reference);
        }

        let aspace_names = [
            (ASPACE_UNDEF, ""),
            (ASPACE_CODE, AOUT_CODE_ASPACE_NAME),
            (ASPACE_DATA, AOUT_DATA_ASPACE_NAME),
        ];

        for (index, name) in aspace_names {
            let chunk = section_mut(sections, ST_STRING).string_to_chunk(name)?;
            let reference = self.refs.bound(chunk);

            section_mut(sections, ST_ADDRSP).as_aspaces_mut()?.elements
                [index as usize]
                .name = Some(reference);
        }

        Ok(())
    }

    fn chunk_offset(&self, reference: Option<SafeRef>) -> Option<SectionOffset> {
        match self.refs.target_of(reference?) {
            Some(RefTarget::Chunk(_, offset)) => Some(offset),
            _ => None,
        }
    }
}

/// Maps a universal register index of sequential code to a TPEF resource
/// reference.
fn universal_register(index: Word) -> Result<(MoveFieldType, Byte, HalfWord), Error> {
    let (field_type, unit, register) = if index < FIRST_FP_REGISTER {
        (MoveFieldType::RegisterFile, ResourceElement::INT_RF, index)
    } else if index < FIRST_BOOL_REGISTER {
        (MoveFieldType::RegisterFile, ResourceElement::FP_RF, index - FIRST_FP_REGISTER)
    } else if index < FIRST_BOOL_REGISTER + BOOL_REGISTERS {
        (MoveFieldType::RegisterFile, ResourceElement::BOOL_RF, index - FIRST_BOOL_REGISTER)
    } else {
        // Universal-FU operation registers keep their raw a.out id, so the
        // per-module remap tables can match them.
        (MoveFieldType::Unit, ResourceElement::UNIVERSAL_FU, index)
    };

    if register > HalfWord::MAX as Word {
        return Err(Error::UnexpectedValue(format!(
            "register index {register:#x} does not fit a move index field"
        )));
    }

    Ok((field_type, unit as Byte, register as HalfWord))
}

/// Parses the 10-character annotation id, `0x` prefix included.
fn parse_annotation_id(text: &str) -> Option<Word> {
    let hex = text.strip_prefix("0x")?;

    Word::from_str_radix(hex, 16).ok()
}

fn section_mut(sections: &mut [Section], id: SectionId) -> &mut Section {
    sections
        .iter_mut()
        .find(|section| section.id() == id)
        .expect("every synthesized section exists")
}

fn section_by_id(sections: &[Section], id: SectionId) -> &Section {
    sections.iter().find(|section| section.id() == id).expect("every synthesized section exists")
}
