//! The TPEF format reader.
//!
//! The reader walks the section header table first, creating section
//! skeletons under their file-assigned identification codes, then reads
//! every body through the per-section reader registry, resolves the
//! reference manager, and finally recovers relocation destinations from
//! the values stored at their locations.

use crate::base::*;
use crate::format::*;
use crate::instruction::*;
use crate::read::{Error, FormatReader};
use crate::refs::{RefKey, RefTarget, ReferenceManager, SafeRef};
use crate::section::*;
use crate::stream::{self, BinaryStream};
use crate::{
    ASpaceElement, Binary, DebugElement, FileArchitecture, FileType, LineNumProcedure,
    RelocElement, RelocType, ResourceElement, ResourceType, SymbolBinding, SymbolElement,
    SymbolKind, SymbolType,
};

/// Context threaded through the per-section readers.
pub struct ReadContext {
    /// The reference manager of this read.
    pub refs: ReferenceManager,
    /// Id of the binary-wide string section.
    pub strings_id: SectionId,
    /// Id of the address-space section.
    pub addrsp_id: SectionId,
}

/// A per-section body reader.
pub type SectionReaderFn =
    fn(&mut ReadContext, &mut BinaryStream, &SectionHeader, &mut Section) -> Result<(), Error>;

/// The explicit registry of per-section readers available in this build.
pub struct SectionReaders {
    table: Vec<(SectionType, SectionReaderFn)>,
}

impl SectionReaders {
    /// A registry listing every section reader of this build.
    pub fn with_default_readers() -> Self {
        Self {
            table: vec![
                (SectionType::Null, read_null_body as SectionReaderFn),
                (SectionType::Strings, read_raw_body),
                (SectionType::Data, read_raw_body),
                (SectionType::UData, read_udata_body),
                (SectionType::Code, read_code_body),
                (SectionType::Symbols, read_symbol_body),
                (SectionType::Reloc, read_reloc_body),
                (SectionType::AddressSpaces, read_aspace_body),
                (SectionType::Resources, read_resource_body),
                (SectionType::LineNumbers, read_lineno_body),
                (SectionType::Debug, read_debug_body),
            ],
        }
    }

    fn reader_for(&self, section_type: SectionType) -> Option<SectionReaderFn> {
        self.table
            .iter()
            .find_map(|&(candidate, reader)| (candidate == section_type).then_some(reader))
    }
}

/// The TPEF format reader.
pub struct TpefReader {
    section_readers: SectionReaders,
}

impl TpefReader {
    /// Creates a reader with the default per-section reader registry.
    pub fn new() -> Self {
        Self { section_readers: SectionReaders::with_default_readers() }
    }
}

impl Default for TpefReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatReader for TpefReader {
    fn is_my_stream_type(&self, stream: &mut BinaryStream) -> Result<bool, stream::Error> {
        let start = stream.read_position();

        if stream.size_of_file() < start + FILE_HEADER_SIZE {
            return Ok(false);
        }

        let mut magic = [0u8; 4];
        for byte in &mut magic {
            *byte = stream.read_byte()?;
        }

        stream.set_read_position(start);

        Ok(magic == MAGIC)
    }

    fn read_data(&self, stream: &mut BinaryStream) -> Result<Binary, Error> {
        // File header.
        for expected in MAGIC {
            if stream.read_byte()? != expected {
                return Err(Error::UnexpectedValue("bad magic".into()));
            }
        }

        let version = stream.read_byte()?;
        let file_type = FileType::from_byte(stream.read_byte()?)
            .ok_or_else(|| Error::UnexpectedValue("unknown file type".into()))?;
        let arch = FileArchitecture::from_byte(stream.read_byte()?)
            .ok_or_else(|| Error::UnexpectedValue("unknown file architecture".into()))?;
        stream.read_byte()?; // padding

        let section_count = stream.read_word()?;
        let header_table_offset = stream.read_word()?;
        let strings_id = stream.read_half_word()?;
        stream.read_half_word()?; // padding

        // Section header table.
        stream.set_read_position(header_table_offset);

        let mut headers = Vec::with_capacity(section_count as usize);
        for _ in 0..section_count {
            headers.push(read_section_header(stream)?);
        }

        let addrsp_id = headers
            .iter()
            .position(|header| header.section_type == SectionType::AddressSpaces as Byte)
            .ok_or_else(|| Error::UnexpectedValue("no address-space section".into()))?
            as SectionId;

        let mut context =
            ReadContext { refs: ReferenceManager::new(), strings_id, addrsp_id };

        // Section skeletons, under their positional identification codes.
        let mut sections = Vec::with_capacity(headers.len());
        for (position, header) in headers.iter().enumerate() {
            let id = position as SectionId;
            let mut section = new_section_skeleton(header)?;
            section.set_id(id);

            section.flags = SectionFlags::from_bits(header.flags)
                .map_err(|_| Error::UnexpectedValue("unknown section flags".into()))?;
            section.starting_address = header.starting_address;
            section.name = Some(
                context.refs.reference(RefKey::SectionOffset(strings_id, header.name_offset)),
            );
            section.aspace = Some(
                context
                    .refs
                    .reference(RefKey::SectionIndex(addrsp_id, header.aspace_index as Word)),
            );
            section.link = Some(context.refs.reference(RefKey::Section(header.link_id)));

            context.refs.add_object_reference(RefKey::Section(id), RefTarget::Section(id))?;

            sections.push(section);
        }

        // Section bodies.
        for (header, section) in headers.iter().zip(sections.iter_mut()) {
            let section_type = SectionType::from_byte(header.section_type)
                .expect("skeleton creation validated the tag");
            let reader = self
                .section_readers
                .reader_for(section_type)
                .ok_or_else(|| Error::UnexpectedValue("no reader for section type".into()))?;

            stream.set_read_position(header.body_offset);
            reader(&mut context, stream, header, section)?;
        }

        let mut binary = Binary::new();
        binary.version = version;
        binary.file_type = file_type;
        binary.arch = arch;

        for section in sections {
            binary.add_section(section);
        }

        binary.set_strings(strings_id);

        context.refs.resolve(binary.sections())?;
        finalize_relocations(&mut binary, &mut context.refs)?;

        binary.set_refs(context.refs.into_table());

        Ok(binary)
    }
}

fn read_section_header(stream: &mut BinaryStream) -> Result<SectionHeader, Error> {
    Ok(SectionHeader {
        section_type: stream.read_byte()?,
        flags: stream.read_byte()?,
        name_offset: stream.read_word()?,
        aspace_index: stream.read_half_word()?,
        link_id: stream.read_half_word()?,
        info: stream.read_word()?,
        starting_address: stream.read_word()?,
        body_offset: stream.read_word()?,
        body_length: stream.read_word()?,
        element_size: stream.read_word()?,
    })
}

fn new_section_skeleton(header: &SectionHeader) -> Result<Section, Error> {
    let section_type = SectionType::from_byte(header.section_type).ok_or_else(|| {
        Error::UnexpectedValue(format!("unknown section type {:#04x}", header.section_type))
    })?;

    let data = match section_type {
        SectionType::Null => SectionData::Null,
        SectionType::Strings => SectionData::Strings(Vec::new()),
        SectionType::Data => SectionData::Data(Vec::new()),
        SectionType::UData => SectionData::UData { length: 0 },
        SectionType::Code => SectionData::Code(Default::default()),
        SectionType::Symbols => SectionData::Symbols(Vec::new()),
        SectionType::Reloc => SectionData::Relocs(Default::default()),
        SectionType::AddressSpaces => SectionData::ASpaces(Default::default()),
        SectionType::Resources => SectionData::Resources(Vec::new()),
        SectionType::LineNumbers => SectionData::LineNumbers(Default::default()),
        SectionType::Debug => SectionData::Debug(Vec::new()),
    };

    Ok(Section::new(data))
}

fn read_null_body(
    _context: &mut ReadContext,
    _stream: &mut BinaryStream,
    _header: &SectionHeader,
    _section: &mut Section,
) -> Result<(), Error> {
    Ok(())
}

fn read_raw_body(
    _context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    if section.no_bits() {
        return Ok(());
    }

    for _ in 0..header.body_length {
        let byte = stream.read_byte()?;
        section.add_byte(byte)?;
    }

    Ok(())
}

fn read_udata_body(
    _context: &mut ReadContext,
    _stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    // No bits in the file; the header length is the logical length.
    section.set_data_length(header.body_length)?;

    Ok(())
}

fn read_code_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    if section.no_bits() {
        return Ok(());
    }

    let id = section.id();
    let code = section.as_code_mut()?;

    let mut next_is_beginning = true;
    let mut instruction_index: Word = 0;

    let end = header.body_offset + header.body_length;

    while stream.read_position() < end {
        let offset_key =
            RefKey::SectionOffset(id, stream.read_position() - header.body_offset);

        let attribute = stream.read_byte()?;

        let mut element = if attribute & IA_TYPE != 0 {
            let mut immediate = ImmediateElement {
                destination_unit: stream.read_byte()?,
                destination_index: stream.read_byte()?,
                bytes: Vec::new(),
            };

            let size = attribute >> IA_IMM_SIZE_SHIFT;
            for _ in 0..size {
                immediate.add_byte(stream.read_byte()?);
            }

            InstructionElement::from_immediate(immediate)
        } else {
            let mut element = MoveElement { bus: stream.read_byte()?, ..Default::default() };

            let field_types = stream.read_byte()?;

            if attribute & IA_EMPTY != 0 {
                element.empty = true;
            } else {
                element.source_type = match field_types & IE_SRC_TYPE_MASK {
                    MVS_RF => MoveFieldType::RegisterFile,
                    MVS_IMM => MoveFieldType::Immediate,
                    MVS_UNIT => MoveFieldType::Unit,
                    other => {
                        return Err(Error::UnexpectedValue(format!(
                            "bad source field type {other:#04x}"
                        )))
                    }
                };

                element.destination_type = match field_types & IE_DST_TYPE_MASK {
                    MVD_RF => MoveFieldType::RegisterFile,
                    MVD_UNIT => MoveFieldType::Unit,
                    other => {
                        return Err(Error::UnexpectedValue(format!(
                            "bad destination field type {other:#04x}"
                        )))
                    }
                };

                if attribute & IA_MGUARD != 0 {
                    element.guarded = true;
                    element.guard_type = match field_types & IE_GUARD_TYPE_MASK {
                        MVG_RF => MoveFieldType::RegisterFile,
                        MVG_UNIT => MoveFieldType::Unit,
                        other => {
                            return Err(Error::UnexpectedValue(format!(
                                "bad guard field type {other:#04x}"
                            )))
                        }
                    };
                }
            }

            element.source_unit = stream.read_byte()?;
            element.source_index = stream.read_half_word()?;
            element.destination_unit = stream.read_byte()?;
            element.destination_index = stream.read_half_word()?;
            element.guard_unit = stream.read_byte()?;
            element.guard_index = stream.read_half_word()?;
            element.guard_inverted = field_types & IE_GUARD_INV_MASK != 0;

            InstructionElement::from_move(element)
        };

        element.begin = next_is_beginning;
        next_is_beginning = attribute & IA_END != 0;

        if attribute & IA_ANNOTE != 0 {
            read_annotations(stream, &mut element)?;
        }

        let element_index = code.element_count();

        // References by instruction number, for relocation destinations.
        if element.begin {
            context.refs.add_object_reference(
                RefKey::SectionIndex(id, instruction_index),
                RefTarget::Element(id, element_index),
            )?;
            instruction_index += 1;
        }

        context
            .refs
            .add_object_reference(offset_key, RefTarget::Element(id, element_index))?;

        code.add_element(element);
    }

    Ok(())
}

fn read_annotations(
    stream: &mut BinaryStream,
    element: &mut InstructionElement,
) -> Result<(), Error> {
    let mut continuation = true;

    while continuation {
        let size_and_continuation = stream.read_byte()?;
        continuation = size_and_continuation & IANNOTE_CONTINUATION != 0;

        let payload_size = size_and_continuation & IANNOTE_SIZE;

        // 24-bit id, least significant byte first.
        let id = stream.read_byte()? as Word
            | (stream.read_byte()? as Word) << BYTE_BITWIDTH
            | (stream.read_byte()? as Word) << (BYTE_BITWIDTH * 2);

        let mut payload = Vec::with_capacity(payload_size as usize);
        for _ in 0..payload_size {
            payload.push(stream.read_byte()?);
        }

        element.annotations.push(InstructionAnnotation::new(id, payload));
    }

    Ok(())
}

fn read_symbol_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let id = section.id();
    let mut index: Word = 0;
    let mut undefined_symbol_seen = false;

    if !section.no_bits() && header.element_size != 0 {
        let mut element_start = header.body_offset;

        while element_start + header.element_size <= header.body_offset + header.body_length {
            let name_offset = stream.read_word()?;
            let value = stream.read_word()?;
            let size = stream.read_word()?;
            let info = stream.read_byte()?;
            let other = stream.read_byte()?;
            let owner_id = stream.read_half_word()?;

            let symbol_type = SymbolType::from_nibble(info & 0x0f)
                .ok_or_else(|| Error::UnexpectedValue("unknown symbol type".into()))?;
            let binding = SymbolBinding::from_nibble(info >> (BYTE_BITWIDTH / 2))
                .ok_or_else(|| Error::UnexpectedValue("unknown symbol binding".into()))?;

            let kind = create_symbol_kind(context, symbol_type, value, size, owner_id);

            let mut symbol = SymbolElement::new(kind);
            symbol.binding = binding;
            symbol.absolute = other & crate::symbol::STO_ABS != 0;
            symbol.name = Some(
                context.refs.reference(RefKey::SectionOffset(header.link_id, name_offset)),
            );
            symbol.section = Some(context.refs.reference(RefKey::Section(owner_id)));

            context.refs.add_object_reference(
                RefKey::SectionIndex(id, index),
                RefTarget::Element(id, index),
            )?;

            if index == 0 {
                if symbol.symbol_type() != SymbolType::NoType
                    || symbol.binding != SymbolBinding::Local
                    || !symbol.absolute
                    || name_offset != 0
                {
                    return Err(Error::UnexpectedValue(
                        "symbol table does not start with the undefined symbol".into(),
                    ));
                }

                undefined_symbol_seen = true;
            }

            section.as_symbols_mut()?.push(symbol);

            element_start += header.element_size;
            stream.set_read_position(element_start);
            index += 1;
        }
    }

    // Synthesize the undefined symbol for no-bits symbol tables.
    if !undefined_symbol_seen {
        let mut symbol = SymbolElement::undefined(None, None);
        symbol.name =
            Some(context.refs.reference(RefKey::SectionOffset(header.link_id, 0)));

        context
            .refs
            .add_object_reference(RefKey::SectionIndex(id, 0), RefTarget::Element(id, 0))?;

        section.as_symbols_mut()?.push(symbol);
    }

    Ok(())
}

fn create_symbol_kind(
    context: &mut ReadContext,
    symbol_type: SymbolType,
    value: Word,
    size: Word,
    owner_id: SectionId,
) -> SymbolKind {
    let code_reference = |context: &mut ReadContext| -> Option<SafeRef> {
        (owner_id != 0)
            .then(|| context.refs.reference(RefKey::SectionOffset(owner_id, value)))
    };

    match symbol_type {
        SymbolType::NoType => SymbolKind::NoType,
        SymbolType::Code => SymbolKind::Code { reference: code_reference(context), size },
        SymbolType::Procedure => {
            SymbolKind::Procedure { reference: code_reference(context), size }
        }
        SymbolType::Data => SymbolKind::Data { reference: code_reference(context), size },
        SymbolType::Section => SymbolKind::Section { value, size },
        SymbolType::File => SymbolKind::File { value },
    }
}

fn read_reloc_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let referenced_id = (header.info & 0xffff) as SectionId;

    let relocs = section.as_relocs_mut()?;
    relocs.referenced_section =
        Some(context.refs.reference(RefKey::Section(referenced_id)));

    let count = header.body_length / header.element_size.max(1);

    for _ in 0..count {
        let location_offset = stream.read_word()?;
        let symbol_index = stream.read_word()?;
        let type_byte = stream.read_byte()?;
        let aspace_index = stream.read_byte()?;
        let size = stream.read_byte()?;
        let bit_offset = stream.read_byte()?;

        let kind = RelocType::from_byte(type_byte)
            .ok_or_else(|| Error::UnexpectedValue("unknown relocation type".into()))?;

        let element = RelocElement {
            kind,
            size,
            bit_offset,
            location: Some(
                context
                    .refs
                    .reference(RefKey::SectionOffset(referenced_id, location_offset)),
            ),
            // Recovered from the value at the location once every body is
            // read.
            destination: None,
            aspace: Some(
                context
                    .refs
                    .reference(RefKey::SectionIndex(context.addrsp_id, aspace_index as Word)),
            ),
            symbol: Some(
                context.refs.reference(RefKey::SectionIndex(header.link_id, symbol_index)),
            ),
            chunked: type_byte & RelocElement::CHUNKED_MASK != 0,
        };

        relocs.elements.push(element);
    }

    Ok(())
}

fn read_aspace_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let id = section.id();
    let count = header.body_length / header.element_size.max(1);

    let aspaces = section.as_aspaces_mut()?;

    for index in 0..count {
        let mau = stream.read_byte()?;
        let align = stream.read_byte()?;
        let word_size = stream.read_byte()?;
        stream.read_byte()?; // padding
        let name_offset = stream.read_word()?;

        let element = ASpaceElement {
            mau,
            align,
            word_size,
            name: Some(
                context.refs.reference(RefKey::SectionOffset(header.link_id, name_offset)),
            ),
        };

        context
            .refs
            .add_object_reference(RefKey::SectionIndex(id, index), RefTarget::Element(id, index))?;

        aspaces.elements.push(element);
    }

    // The undefined address space is element 0 by convention.
    if !aspaces.elements.is_empty() {
        aspaces.undefined = Some(context.refs.bound(RefTarget::Element(id, 0)));
    }

    Ok(())
}

fn read_resource_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let count = header.body_length / header.element_size.max(1);

    for _ in 0..count {
        let id = stream.read_half_word()?;
        let kind = ResourceType::from_byte(stream.read_byte()?)
            .ok_or_else(|| Error::UnexpectedValue("unknown resource type".into()))?;
        stream.read_byte()?; // padding
        let name_offset = stream.read_word()?;
        let info = stream.read_word()?;

        let element = ResourceElement {
            id,
            kind,
            name: Some(
                context.refs.reference(RefKey::SectionOffset(header.link_id, name_offset)),
            ),
            info,
        };

        section.as_resources_mut()?.push(element);
    }

    Ok(())
}

fn read_lineno_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let code_id = (header.info & 0xffff) as SectionId;

    let linenos = section.as_line_numbers_mut()?;
    linenos.code_section = Some(context.refs.reference(RefKey::Section(code_id)));

    let count = header.body_length / header.element_size.max(1);

    for _ in 0..count {
        let value = stream.read_word()?;
        let line = stream.read_half_word()?;

        if line == LINENO_PROCEDURE_MARK {
            let procedure = LineNumProcedure {
                symbol: Some(
                    context.refs.reference(RefKey::SectionIndex(header.link_id, value)),
                ),
                lines: Vec::new(),
            };

            linenos.procedures.push(procedure);
        } else {
            let instruction =
                Some(context.refs.reference(RefKey::SectionOffset(code_id, value)));

            linenos
                .procedures
                .last_mut()
                .ok_or_else(|| {
                    Error::UnexpectedValue("line-number record before any procedure".into())
                })?
                .add_line(line, instruction);
        }
    }

    Ok(())
}

fn read_debug_body(
    context: &mut ReadContext,
    stream: &mut BinaryStream,
    header: &SectionHeader,
    section: &mut Section,
) -> Result<(), Error> {
    let end = header.body_offset + header.body_length;

    while stream.read_position() < end {
        let kind = stream.read_half_word()?;
        let string_offset = stream.read_word()?;
        let payload_length = stream.read_word()?;

        if kind != 0 || payload_length != 8 {
            return Err(Error::UnexpectedValue("unknown debug element shape".into()));
        }

        let stab_type = stream.read_byte()?;
        let other = stream.read_byte()?;
        let description = stream.read_half_word()?;
        let value = stream.read_word()?;

        let mut element = DebugElement::stab(stab_type, other, description, value);
        element.string =
            Some(context.refs.reference(RefKey::SectionOffset(header.link_id, string_offset)));

        section.as_debug_mut()?.push(element);
    }

    Ok(())
}

/// Recovers every relocation's destination from the value stored at its
/// location, interpreted as an address in the destination address space.
pub(crate) fn finalize_relocations(
    binary: &mut Binary,
    refs: &mut ReferenceManager,
) -> Result<(), Error> {
    let mut recovered: Vec<(SectionId, usize, RefTarget)> = Vec::new();

    for section in binary.sections() {
        let SectionData::Relocs(relocs) = &section.data else {
            continue;
        };

        for (position, element) in relocs.elements.iter().enumerate() {
            let Some(location) = element.location else {
                continue;
            };

            let Some(location_target) = refs.target_of(location) else {
                continue;
            };

            let address = relocation_value(binary, refs, location_target, element.size)?;

            let Some(aspace) = element.aspace else {
                continue;
            };

            let destination = destination_target(binary, refs, aspace, address)?;
            recovered.push((section.id(), position, destination));
        }
    }

    for (section_id, position, target) in recovered {
        let destination = Some(refs.bound(target));
        let section = binary
            .section_by_id_mut(section_id)
            .expect("recovered from an existing section");
        section.as_relocs_mut()?.elements[position].destination = destination;
    }

    Ok(())
}

/// Reads the value stored at a relocation location.
fn relocation_value(
    binary: &Binary,
    refs: &ReferenceManager,
    location: RefTarget,
    size_bits: Byte,
) -> Result<Word, Error> {
    match location {
        RefTarget::Chunk(section_id, offset) => {
            let section = binary
                .section_by_id(section_id)
                .ok_or_else(|| Error::UnexpectedValue("relocation into a ghost section".into()))?;

            let mau_bits = aspace_mau_bits(binary, refs, section).max(8);
            let bytes_per_mau = mau_bits.div_ceil(BYTE_BITWIDTH);
            let mau_count = (size_bits as u32).div_ceil(mau_bits);
            let mau_index = offset / bytes_per_mau;

            let mut value: Word = 0;
            for k in 0..mau_count {
                value = value
                    .checked_shl(mau_bits)
                    .unwrap_or(0)
                    | section.mau(mau_bits, mau_index + k)? as Word;
            }

            Ok(value)
        }
        RefTarget::Element(section_id, index) => {
            let section = binary
                .section_by_id(section_id)
                .ok_or_else(|| Error::UnexpectedValue("relocation into a ghost section".into()))?;
            let element = section.as_code()?.element(index)?;

            let immediate = element.as_immediate().ok_or_else(|| {
                Error::UnexpectedValue("relocation location is not an immediate".into())
            })?;

            Ok(immediate.word()?)
        }
        RefTarget::Section(_) => {
            Err(Error::UnexpectedValue("relocation location is a section".into()))
        }
    }
}

fn aspace_mau_bits(binary: &Binary, refs: &ReferenceManager, section: &Section) -> u32 {
    let Some(aspace) = section.aspace else {
        return 0;
    };

    let Some(RefTarget::Element(addrsp_id, index)) = refs.target_of(aspace) else {
        return 0;
    };

    binary
        .section_by_id(addrsp_id)
        .and_then(|addrsp| addrsp.as_aspaces().ok())
        .and_then(|aspaces| aspaces.elements.get(index as usize))
        .map(|element| element.mau as u32)
        .unwrap_or(0)
}

/// Finds the section covering `address` in the given address space and
/// produces the destination locator.
fn destination_target(
    binary: &Binary,
    refs: &ReferenceManager,
    aspace: SafeRef,
    address: Word,
) -> Result<RefTarget, Error> {
    let aspace_target = refs
        .target_of(aspace)
        .ok_or_else(|| Error::UnexpectedValue("relocation has no address space".into()))?;

    for section in binary.sections() {
        let Some(section_aspace) = section.aspace else {
            continue;
        };

        if refs.target_of(section_aspace) != Some(aspace_target) {
            continue;
        }

        if address < section.starting_address {
            continue;
        }

        let relative = address - section.starting_address;

        match &section.data {
            SectionData::Code(code) => {
                if relative < code.instruction_count() {
                    let element_index = code.instruction_to_section_index(relative)?;

                    return Ok(RefTarget::Element(section.id(), element_index));
                }
            }
            SectionData::Data(_) | SectionData::UData { .. } => {
                let mau_bits = aspace_mau_bits(binary, refs, section).max(8);
                let bytes_per_mau = mau_bits.div_ceil(BYTE_BITWIDTH);
                let length_in_maus = section.length()? / bytes_per_mau;

                if relative < length_in_maus {
                    return Ok(RefTarget::Chunk(section.id(), relative * bytes_per_mau));
                }
            }
            _ => {}
        }
    }

    Err(Error::UnexpectedValue(format!(
        "no section covers relocation destination address {address:#x}"
    )))
}
