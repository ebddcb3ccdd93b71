//! The TPEF binary writer.
//!
//! The writer orders sections deterministically, reassigns positional
//! section identification codes, precomputes the byte layout of code-section
//! bodies (so symbols and relocations can encode instruction references as
//! section offsets in a single pass), and patches body offset and length
//! placeholders in the section header table through the stream's write
//! cursor.

use std::collections::HashMap;

use tpef_errors::diagnostic_error;

use crate::base::*;
use crate::format::*;
use crate::instruction::*;
use crate::refs::{RefTarget, SafeRef};
use crate::section::*;
use crate::stream::BinaryStream;
use crate::{Binary, RelocElement, SymbolBinding, SymbolElement, SymbolKind, SymbolType};

diagnostic_error! {
    /// Errors raised while writing a binary.
    pub enum Error {
        [code: E006, help: "Every cross-reference must point into the binary being written."]
        #[error("cannot encode reference: {0}")]
        KeyNotFound(String),

        [code: E009, help: "The binary violates a structural invariant of the format."]
        #[error("unexpected value while writing: {0}")]
        UnexpectedValue(String),

        [code: E004, help: "Immediate payloads are limited to 15 bytes, annotations to 127."]
        #[error("out of range while writing: {0}")]
        OutOfRange(String),

        [transparent]
        Model(#[from] ModelError),
    }
}

/// Deterministic emission rank of a section type.
fn ordering_rank(section_type: SectionType) -> u8 {
    match section_type {
        SectionType::Null => 0,
        SectionType::AddressSpaces => 1,
        SectionType::Strings => 2,
        SectionType::Resources => 3,
        SectionType::Symbols => 4,
        SectionType::Reloc => 5,
        SectionType::Code => 6,
        SectionType::Data => 7,
        SectionType::UData => 8,
        SectionType::LineNumbers => 9,
        SectionType::Debug => 10,
    }
}

fn element_size_of(section_type: SectionType) -> Word {
    match section_type {
        SectionType::Symbols => SYMBOL_ELEMENT_SIZE,
        SectionType::Resources => RESOURCE_ELEMENT_SIZE,
        SectionType::AddressSpaces => ASPACE_ELEMENT_SIZE,
        SectionType::Reloc => RELOC_ELEMENT_SIZE,
        SectionType::LineNumbers => LINENO_ELEMENT_SIZE,
        _ => 0,
    }
}

/// Context threaded through the per-section writers.
pub struct WriteContext<'a> {
    binary: &'a Binary,
    new_ids: HashMap<SectionId, SectionId>,
    code_layouts: HashMap<SectionId, Vec<SectionOffset>>,
}

impl<'a> WriteContext<'a> {
    fn new(binary: &'a Binary, ordered: &[&Section]) -> Result<Self, Error> {
        let new_ids = ordered
            .iter()
            .enumerate()
            .map(|(position, section)| (section.id(), position as SectionId))
            .collect();

        let mut code_layouts = HashMap::new();
        for section in ordered {
            if let SectionData::Code(code) = &section.data {
                code_layouts.insert(section.id(), code_element_offsets(code.elements())?);
            }
        }

        Ok(Self { binary, new_ids, code_layouts })
    }

    /// The reassigned identification code of a section.
    fn new_id(&self, old_id: SectionId) -> Result<SectionId, Error> {
        self.new_ids
            .get(&old_id)
            .copied()
            .ok_or_else(|| Error::KeyNotFound(format!("section {old_id} is not being written")))
    }

    fn target(&self, reference: Option<SafeRef>) -> Option<RefTarget> {
        self.binary.target_opt(reference)
    }

    /// Encodes a section reference as its new identification code; absent
    /// references encode as the undefined section, 0.
    fn section_id_of(&self, reference: Option<SafeRef>) -> Result<SectionId, Error> {
        match self.target(reference) {
            None if reference.is_none() => Ok(0),
            Some(RefTarget::Section(old_id)) => self.new_id(old_id),
            other => Err(Error::KeyNotFound(format!("expected a section target, got {other:?}"))),
        }
    }

    /// Encodes a chunk reference as its section offset.
    fn chunk_offset_of(&self, reference: Option<SafeRef>) -> Result<SectionOffset, Error> {
        match self.target(reference) {
            None if reference.is_none() => Ok(0),
            Some(RefTarget::Chunk(_, offset)) => Ok(offset),
            other => Err(Error::KeyNotFound(format!("expected a chunk target, got {other:?}"))),
        }
    }

    /// Encodes an element reference into an address-space section as the
    /// element's index.
    fn aspace_index_of(&self, reference: Option<SafeRef>) -> Result<HalfWord, Error> {
        match self.target(reference) {
            None if reference.is_none() => Ok(0),
            Some(RefTarget::Element(_, index)) => Ok(index as HalfWord),
            other => {
                Err(Error::KeyNotFound(format!("expected an address-space target, got {other:?}")))
            }
        }
    }

    /// Encodes a symbol reference as the symbol's index in its table.
    fn symbol_index_of(&self, reference: Option<SafeRef>) -> Result<Word, Error> {
        match self.target(reference) {
            Some(RefTarget::Element(_, index)) => Ok(index),
            other => Err(Error::KeyNotFound(format!("expected a symbol target, got {other:?}"))),
        }
    }

    /// Encodes a location reference (chunk or instruction element) as a
    /// section offset in the section holding it.
    fn section_offset_of(&self, reference: Option<SafeRef>) -> Result<SectionOffset, Error> {
        match self.target(reference) {
            Some(RefTarget::Chunk(_, offset)) => Ok(offset),
            Some(RefTarget::Element(section_id, index)) => {
                let layout = self.code_layouts.get(&section_id).ok_or_else(|| {
                    Error::KeyNotFound(format!("section {section_id} has no element layout"))
                })?;

                layout.get(index as usize).copied().ok_or_else(|| {
                    Error::KeyNotFound(format!(
                        "element {index} is outside section {section_id}"
                    ))
                })
            }
            other => Err(Error::KeyNotFound(format!("expected an element target, got {other:?}"))),
        }
    }
}

/// A per-section body writer.
pub type SectionWriterFn =
    fn(&WriteContext, &mut BinaryStream, &Section) -> Result<(), Error>;

/// The explicit registry of per-section writers available in this build.
pub struct SectionWriters {
    table: Vec<(SectionType, SectionWriterFn)>,
}

impl SectionWriters {
    /// A registry listing every section writer of this build.
    pub fn with_default_writers() -> Self {
        Self {
            table: vec![
                (SectionType::Null, write_empty_body as SectionWriterFn),
                (SectionType::UData, write_empty_body),
                (SectionType::Strings, write_raw_body),
                (SectionType::Data, write_raw_body),
                (SectionType::Code, write_code_body),
                (SectionType::Symbols, write_symbol_body),
                (SectionType::Reloc, write_reloc_body),
                (SectionType::AddressSpaces, write_aspace_body),
                (SectionType::Resources, write_resource_body),
                (SectionType::LineNumbers, write_lineno_body),
                (SectionType::Debug, write_debug_body),
            ],
        }
    }

    fn writer_for(&self, section_type: SectionType) -> Option<SectionWriterFn> {
        self.table
            .iter()
            .find_map(|&(candidate, writer)| (candidate == section_type).then_some(writer))
    }
}

/// The TPEF format writer.
pub struct TpefWriter {
    section_writers: SectionWriters,
}

impl TpefWriter {
    /// Creates a writer with the default per-section writer registry.
    pub fn new() -> Self {
        Self { section_writers: SectionWriters::with_default_writers() }
    }

    /// Writes `binary` to `stream` at the current write position.
    pub fn write_binary(
        &self,
        stream: &mut BinaryStream,
        binary: &Binary,
    ) -> Result<(), Error> {
        let base = stream.write_position();

        // Deterministic order: section class rank, then insertion order.
        let mut ordered: Vec<&Section> = binary.sections().iter().collect();
        ordered.sort_by_key(|section| ordering_rank(section.section_type()));

        let context = WriteContext::new(binary, &ordered)?;

        // File header.
        for byte in MAGIC {
            stream.write_byte(byte);
        }
        stream.write_byte(binary.version);
        stream.write_byte(binary.file_type as Byte);
        stream.write_byte(binary.arch as Byte);
        stream.write_byte(0);
        stream.write_word(ordered.len() as Word);
        stream.write_word(base + FILE_HEADER_SIZE);
        match binary.strings_id() {
            Some(strings_id) => stream.write_half_word(context.new_id(strings_id)?),
            None => stream.write_half_word(0),
        }
        stream.write_half_word(0);

        // Section header table, with body offset and length placeholders.
        let mut size_fields = Vec::with_capacity(ordered.len());

        for section in &ordered {
            let section_type = section.section_type();

            stream.write_byte(section_type as Byte);
            stream.write_byte(section.flags.bits());
            stream.write_word(context.chunk_offset_of(section.name)?);
            stream.write_half_word(context.aspace_index_of(section.aspace)?);
            stream.write_half_word(context.section_id_of(section.link)?);
            stream.write_word(section_info(&context, section)?);
            stream.write_word(section.starting_address);

            size_fields.push(stream.write_position());
            stream.write_word(0); // body offset
            stream.write_word(0); // body length

            stream.write_word(element_size_of(section_type));
        }

        // Section bodies.
        let mut body_extents = Vec::with_capacity(ordered.len());

        for section in &ordered {
            let writer = self
                .section_writers
                .writer_for(section.section_type())
                .ok_or_else(|| {
                    Error::UnexpectedValue("no writer for section type".into())
                })?;

            let body_offset = stream.write_position();
            writer(&context, stream, section)?;

            // No-bits bodies occupy nothing in the file but keep their
            // logical length in the header.
            let body_length = if section.no_bits() {
                section.length().unwrap_or(0)
            } else {
                stream.write_position() - body_offset
            };

            body_extents.push((body_offset, body_length));
        }

        // Patch the recorded placeholders.
        let end = stream.write_position();

        for (field_position, (body_offset, body_length)) in
            size_fields.into_iter().zip(body_extents)
        {
            stream.set_write_position(field_position);
            stream.write_word(body_offset);
            stream.write_word(body_length);
        }

        stream.set_write_position(end);

        Ok(())
    }
}

impl Default for TpefWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn section_info(context: &WriteContext, section: &Section) -> Result<Word, Error> {
    match &section.data {
        SectionData::Relocs(relocs) => {
            Ok(context.section_id_of(relocs.referenced_section)? as Word)
        }
        SectionData::LineNumbers(linenos) => {
            Ok(context.section_id_of(linenos.code_section)? as Word)
        }
        _ => Ok(0),
    }
}

/// Byte offsets of every element of a code section's body, in the
/// instruction-stream encoding.
pub(crate) fn code_element_offsets(
    elements: &[InstructionElement],
) -> Result<Vec<SectionOffset>, Error> {
    let mut offsets = Vec::with_capacity(elements.len());
    let mut offset: SectionOffset = 0;

    for element in elements {
        offsets.push(offset);
        offset += encoded_element_size(element)? as SectionOffset;
    }

    Ok(offsets)
}

fn encoded_element_size(element: &InstructionElement) -> Result<usize, Error> {
    let body = match &element.body {
        InstructionBody::Move(_) => 12,
        InstructionBody::Immediate(immediate) => {
            if immediate.length() > 15 {
                return Err(Error::OutOfRange(format!(
                    "immediate payload of {} bytes",
                    immediate.length()
                )));
            }

            3 + immediate.length()
        }
    };

    let mut annotations = 0;
    for annotation in &element.annotations {
        if annotation.payload.len() > MAX_ANNOTATION_BYTES {
            return Err(Error::OutOfRange(format!(
                "annotation payload of {} bytes",
                annotation.payload.len()
            )));
        }

        annotations += 4 + annotation.payload.len();
    }

    Ok(body + annotations)
}

fn write_empty_body(
    _context: &WriteContext,
    _stream: &mut BinaryStream,
    _section: &Section,
) -> Result<(), Error> {
    Ok(())
}

fn write_raw_body(
    _context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    if section.no_bits() {
        return Ok(());
    }

    for offset in 0..section.length()? {
        stream.write_byte(section.byte(offset)?);
    }

    Ok(())
}

fn write_code_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    if section.no_bits() {
        return Ok(());
    }

    let code = section.as_code()?;
    let elements = code.elements();

    for (index, element) in elements.iter().enumerate() {
        let ends_instruction =
            elements.get(index + 1).map(|next| next.begin).unwrap_or(true);

        let mut attribute: Byte = 0;
        if ends_instruction {
            attribute |= IA_END;
        }
        if !element.annotations.is_empty() {
            attribute |= IA_ANNOTE;
        }

        match &element.body {
            InstructionBody::Immediate(immediate) => {
                if immediate.length() > 15 {
                    return Err(Error::OutOfRange(format!(
                        "immediate payload of {} bytes",
                        immediate.length()
                    )));
                }

                attribute |= IA_TYPE;
                attribute |= (immediate.length() as Byte) << IA_IMM_SIZE_SHIFT;

                stream.write_byte(attribute);
                stream.write_byte(immediate.destination_unit);
                stream.write_byte(immediate.destination_index);

                for &byte in &immediate.bytes {
                    stream.write_byte(byte);
                }
            }
            InstructionBody::Move(element) => {
                if element.empty {
                    attribute |= IA_EMPTY;
                }
                if element.guarded {
                    attribute |= IA_MGUARD;
                }

                stream.write_byte(attribute);
                stream.write_byte(element.bus);
                stream.write_byte(move_field_types(element)?);
                stream.write_byte(element.source_unit);
                stream.write_half_word(element.source_index);
                stream.write_byte(element.destination_unit);
                stream.write_half_word(element.destination_index);
                stream.write_byte(element.guard_unit);
                stream.write_half_word(element.guard_index);
            }
        }

        write_annotations(stream, &element.annotations)?;
    }

    Ok(())
}

fn move_field_types(element: &MoveElement) -> Result<Byte, Error> {
    if element.empty {
        return Ok(if element.guard_inverted { IE_GUARD_INV_MASK } else { 0 });
    }

    let mut field_types = match element.source_type {
        MoveFieldType::RegisterFile => MVS_RF,
        MoveFieldType::Immediate => MVS_IMM,
        MoveFieldType::Unit => MVS_UNIT,
        MoveFieldType::Null => {
            return Err(Error::UnexpectedValue("move without a source type".into()))
        }
    };

    field_types |= match element.destination_type {
        MoveFieldType::RegisterFile => MVD_RF,
        MoveFieldType::Unit => MVD_UNIT,
        _ => return Err(Error::UnexpectedValue("move without a destination type".into())),
    };

    if element.guarded {
        field_types |= match element.guard_type {
            MoveFieldType::RegisterFile => MVG_RF,
            MoveFieldType::Unit => MVG_UNIT,
            _ => return Err(Error::UnexpectedValue("guarded move without a guard type".into())),
        };
    }

    if element.guard_inverted {
        field_types |= IE_GUARD_INV_MASK;
    }

    Ok(field_types)
}

fn write_annotations(
    stream: &mut BinaryStream,
    annotations: &[InstructionAnnotation],
) -> Result<(), Error> {
    for (index, annotation) in annotations.iter().enumerate() {
        if annotation.payload.len() > MAX_ANNOTATION_BYTES {
            return Err(Error::OutOfRange(format!(
                "annotation payload of {} bytes",
                annotation.payload.len()
            )));
        }

        let mut size_and_continuation = annotation.payload.len() as Byte;
        if index + 1 < annotations.len() {
            size_and_continuation |= IANNOTE_CONTINUATION;
        }

        stream.write_byte(size_and_continuation);

        // 24-bit id, least significant byte first.
        stream.write_byte(annotation.id as Byte);
        stream.write_byte((annotation.id >> BYTE_BITWIDTH) as Byte);
        stream.write_byte((annotation.id >> (BYTE_BITWIDTH * 2)) as Byte);

        for &byte in &annotation.payload {
            stream.write_byte(byte);
        }
    }

    Ok(())
}

fn write_symbol_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    if section.no_bits() {
        return Ok(());
    }

    let symbols = section.as_symbols()?;

    // The first element must be the undefined symbol.
    let undefined = symbols.first().ok_or_else(|| {
        Error::UnexpectedValue("symbol table without the undefined symbol".into())
    })?;

    if undefined.symbol_type() != SymbolType::NoType
        || undefined.binding != SymbolBinding::Local
        || !undefined.absolute
        || context.chunk_offset_of(undefined.name)? != 0
    {
        return Err(Error::UnexpectedValue(
            "symbol table does not start with the undefined symbol".into(),
        ));
    }

    for symbol in symbols {
        write_symbol(context, stream, symbol)?;
    }

    Ok(())
}

fn write_symbol(
    context: &WriteContext,
    stream: &mut BinaryStream,
    symbol: &SymbolElement,
) -> Result<(), Error> {
    stream.write_word(context.chunk_offset_of(symbol.name)?);

    let (value, size) = match symbol.kind {
        SymbolKind::NoType => (0, 0),
        SymbolKind::Code { reference, size } | SymbolKind::Procedure { reference, size } => {
            let value = match reference {
                Some(_) => context.section_offset_of(reference)?,
                None => 0,
            };

            (value, size)
        }
        SymbolKind::Data { reference, size } => {
            let value = match reference {
                Some(_) => context.chunk_offset_of(reference)?,
                None => 0,
            };

            (value, size)
        }
        SymbolKind::Section { value, size } => (value, size),
        SymbolKind::File { value } => (value, 0),
    };

    stream.write_word(value);
    stream.write_word(size);

    stream.write_byte(
        ((symbol.binding as Byte) << (BYTE_BITWIDTH / 2)) | symbol.symbol_type() as Byte,
    );

    let mut other: Byte = 0;
    if symbol.absolute {
        other |= crate::symbol::STO_ABS;
    }
    stream.write_byte(other);

    // A symbol whose owning section is gone belongs to the undefined
    // section, 0.
    let owner = match context.target(symbol.section) {
        Some(RefTarget::Section(old_id)) => context.new_id(old_id)?,
        _ => 0,
    };
    stream.write_half_word(owner);

    Ok(())
}

fn write_reloc_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    let relocs = section.as_relocs()?;

    for element in &relocs.elements {
        write_reloc(context, stream, element)?;
    }

    Ok(())
}

fn write_reloc(
    context: &WriteContext,
    stream: &mut BinaryStream,
    element: &RelocElement,
) -> Result<(), Error> {
    if element.location.is_none() {
        return Err(Error::KeyNotFound("relocation without a location".into()));
    }

    stream.write_word(context.section_offset_of(element.location)?);
    stream.write_word(context.symbol_index_of(element.symbol)?);

    let mut type_byte = element.kind as Byte;
    if element.chunked {
        type_byte |= RelocElement::CHUNKED_MASK;
    }
    stream.write_byte(type_byte);

    stream.write_byte(context.aspace_index_of(element.aspace)? as Byte);
    stream.write_byte(element.size);
    stream.write_byte(element.bit_offset);

    Ok(())
}

fn write_aspace_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    let aspaces = section.as_aspaces()?;

    for element in &aspaces.elements {
        stream.write_byte(element.mau);
        stream.write_byte(element.align);
        stream.write_byte(element.word_size);
        stream.write_byte(0);
        stream.write_word(context.chunk_offset_of(element.name)?);
    }

    Ok(())
}

fn write_resource_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    for element in section.as_resources()? {
        stream.write_half_word(element.id);
        stream.write_byte(element.kind as Byte);
        stream.write_byte(0);
        stream.write_word(context.chunk_offset_of(element.name)?);
        stream.write_word(element.info);
    }

    Ok(())
}

fn write_lineno_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    let linenos = section.as_line_numbers()?;

    for procedure in &linenos.procedures {
        stream.write_word(context.symbol_index_of(procedure.symbol)?);
        stream.write_half_word(LINENO_PROCEDURE_MARK);

        for line in &procedure.lines {
            stream.write_word(context.section_offset_of(line.instruction)?);
            stream.write_half_word(line.line);
        }
    }

    Ok(())
}

fn write_debug_body(
    context: &WriteContext,
    stream: &mut BinaryStream,
    section: &Section,
) -> Result<(), Error> {
    for element in section.as_debug()? {
        stream.write_half_word(element.kind.tag());
        stream.write_word(context.chunk_offset_of(element.string)?);

        match element.kind {
            crate::DebugKind::Stab { stab_type, other, description, value } => {
                stream.write_word(8);
                stream.write_byte(stab_type);
                stream.write_byte(other);
                stream.write_half_word(description);
                stream.write_word(value);
            }
        }
    }

    Ok(())
}
