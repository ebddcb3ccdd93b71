use bstr::{BStr, ByteSlice};
use enumflags2::{bitflags, BitFlags};
use tpef_errors::diagnostic_error;

use crate::base::*;
use crate::refs::{RefTarget, SafeRef};
use crate::{
    ASpaceElement, CodeData, DebugElement, LineNumProcedure, RelocElement, ResourceElement,
    SymbolElement,
};

diagnostic_error! {
    /// Errors raised by object-model operations.
    pub enum ModelError {
        [code: E004, help: "Check the index or value against the section's declared sizes."]
        #[error("out of range: {0}")]
        OutOfRange(String),

        [code: E009, help: "The binary or the calling code violates a structural invariant."]
        #[error("unexpected value: {0}")]
        UnexpectedValue(String),

        [code: E010, help: "Only string, data and uninitialized-data sections are chunkable."]
        #[error("section of type {0:?} is not chunkable")]
        NotChunkable(SectionType),

        [code: E010, help: "Check the section's type tag before using shape-specific operations."]
        #[error("section of type {1:?} cannot {0}")]
        WrongSectionKind(&'static str, SectionType),
    }
}

/// Persisted section-type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionType {
    /// Placeholder; all "undefined" links point here.
    Null = 0x00,
    /// String pool of NUL-terminated byte runs.
    Strings = 0x01,
    /// Symbol table.
    Symbols = 0x02,
    /// Debug data (a.out stab elements).
    Debug = 0x03,
    /// Relocation table.
    Reloc = 0x04,
    /// Line-number info grouped into procedures.
    LineNumbers = 0x05,
    /// Address-space table.
    AddressSpaces = 0x07,
    /// Machine-resource table.
    Resources = 0x0a,
    /// Instruction stream.
    Code = 0x81,
    /// Initialized data.
    Data = 0x82,
    /// Uninitialized data; reserves address space but stores no bytes.
    UData = 0x83,
}

impl SectionType {
    /// Decodes a persisted type tag.
    pub fn from_byte(byte: Byte) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Null,
            0x01 => Self::Strings,
            0x02 => Self::Symbols,
            0x03 => Self::Debug,
            0x04 => Self::Reloc,
            0x05 => Self::LineNumbers,
            0x07 => Self::AddressSpaces,
            0x0a => Self::Resources,
            0x81 => Self::Code,
            0x82 => Self::Data,
            0x83 => Self::UData,
            _ => return None,
        })
    }
}

/// Section flag bits.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionFlag {
    /// The section contains variable-length elements.
    VLen = 0x40,
    /// The section reserves address-space bytes but stores no data in the
    /// file.
    NoBits = 0x80,
}

/// Section flags.
pub type SectionFlags = BitFlags<SectionFlag>;

/// Payload of a relocation section.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelocData {
    /// The section whose bytes are patched by these relocations.
    pub referenced_section: Option<SafeRef>,
    /// The relocation entries.
    pub elements: Vec<RelocElement>,
}

/// Payload of an address-space section.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ASpaceData {
    /// The distinguished undefined address space. Points at one of
    /// `elements`.
    pub undefined: Option<SafeRef>,
    /// The address-space elements.
    pub elements: Vec<ASpaceElement>,
}

/// Payload of a line-number section.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineNumData {
    /// The code section the line numbers describe.
    pub code_section: Option<SafeRef>,
    /// The procedures and their line entries.
    pub procedures: Vec<LineNumProcedure>,
}

/// The type-specific payload of a section: either ordered elements or a
/// chunkable byte buffer, never both.
#[derive(Debug, Clone)]
pub enum SectionData {
    /// No payload.
    Null,
    /// NUL-terminated string pool.
    Strings(Vec<u8>),
    /// Raw initialized bytes.
    Data(Vec<u8>),
    /// Uninitialized data: a logical length only.
    UData {
        /// Logical length in bytes.
        length: Word,
    },
    /// Instruction elements plus the instruction-start cache.
    Code(CodeData),
    /// Symbol elements.
    Symbols(Vec<SymbolElement>),
    /// Relocation elements plus the patched-section back-reference.
    Relocs(RelocData),
    /// Address-space elements plus the undefined-aspace designation.
    ASpaces(ASpaceData),
    /// Machine-resource elements.
    Resources(Vec<ResourceElement>),
    /// Line-number procedures.
    LineNumbers(LineNumData),
    /// Debug elements.
    Debug(Vec<DebugElement>),
}

/// One section of a [`crate::Binary`].
#[derive(Debug, Clone)]
pub struct Section {
    id: SectionId,
    /// `VLen` / `NoBits` flags.
    pub flags: SectionFlags,
    /// Starting address within the section's address space.
    pub starting_address: Word,
    /// The address space the section belongs to (an address-space element).
    pub aspace: Option<SafeRef>,
    /// Type-specific companion section (string table, symbol table, ...).
    pub link: Option<SafeRef>,
    /// Name of the section: a chunk in the binary's string section.
    pub name: Option<SafeRef>,
    /// The payload.
    pub data: SectionData,
}

impl Section {
    /// Creates a section with the default flags of its payload shape.
    pub fn new(data: SectionData) -> Self {
        let mut flags = SectionFlags::empty();

        match data {
            SectionData::Code(_) | SectionData::Debug(_) => flags |= SectionFlag::VLen,
            SectionData::UData { .. } => flags |= SectionFlag::NoBits,
            _ => {}
        }

        Self {
            id: 0,
            flags,
            starting_address: 0,
            aspace: None,
            link: None,
            name: None,
            data,
        }
    }

    /// The section's identification code within its binary.
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// Assigns the identification code. Readers use file-assigned codes;
    /// [`crate::Binary::add_section`] assigns fresh ones.
    pub fn set_id(&mut self, id: SectionId) {
        self.id = id;
    }

    /// The persisted type tag of this section.
    pub fn section_type(&self) -> SectionType {
        match self.data {
            SectionData::Null => SectionType::Null,
            SectionData::Strings(_) => SectionType::Strings,
            SectionData::Data(_) => SectionType::Data,
            SectionData::UData { .. } => SectionType::UData,
            SectionData::Code(_) => SectionType::Code,
            SectionData::Symbols(_) => SectionType::Symbols,
            SectionData::Relocs(_) => SectionType::Reloc,
            SectionData::ASpaces(_) => SectionType::AddressSpaces,
            SectionData::Resources(_) => SectionType::Resources,
            SectionData::LineNumbers(_) => SectionType::LineNumbers,
            SectionData::Debug(_) => SectionType::Debug,
        }
    }

    /// True if the section reserves address space without storing bytes.
    pub fn no_bits(&self) -> bool {
        self.flags.contains(SectionFlag::NoBits)
    }

    /// True for sections addressed by chunks.
    pub fn is_chunkable(&self) -> bool {
        matches!(
            self.data,
            SectionData::Strings(_) | SectionData::Data(_) | SectionData::UData { .. }
        )
    }

    /// Number of elements of an element-shaped section, 0 for the others.
    pub fn element_count(&self) -> Word {
        (match &self.data {
            SectionData::Code(code) => code.element_count() as usize,
            SectionData::Symbols(elements) => elements.len(),
            SectionData::Relocs(relocs) => relocs.elements.len(),
            SectionData::ASpaces(aspaces) => aspaces.elements.len(),
            SectionData::Resources(elements) => elements.len(),
            SectionData::LineNumbers(linenos) => linenos.procedures.len(),
            SectionData::Debug(elements) => elements.len(),
            _ => 0,
        }) as Word
    }

    // ------------------------------------------------------------------
    // Chunkable-section operations.
    // ------------------------------------------------------------------

    /// Length of the byte buffer (logical length for `NoBits` sections).
    pub fn length(&self) -> Result<Word, ModelError> {
        match &self.data {
            SectionData::Strings(bytes) | SectionData::Data(bytes) => Ok(bytes.len() as Word),
            SectionData::UData { length } => Ok(*length),
            _ => Err(ModelError::NotChunkable(self.section_type())),
        }
    }

    /// A chunk handle for `offset` inside this section.
    ///
    /// Chunks for the same offset in the same section are the same logical
    /// reference.
    pub fn chunk(&self, offset: SectionOffset) -> Result<RefTarget, ModelError> {
        if !self.is_chunkable() {
            return Err(ModelError::NotChunkable(self.section_type()));
        }

        if offset > self.length()? {
            return Err(ModelError::OutOfRange(format!(
                "chunk offset {offset} past section length {}",
                self.length()?
            )));
        }

        Ok(RefTarget::Chunk(self.id, offset))
    }

    fn bytes(&self) -> Result<&Vec<u8>, ModelError> {
        match &self.data {
            SectionData::Strings(bytes) | SectionData::Data(bytes) => Ok(bytes),
            _ => Err(ModelError::WrongSectionKind("access bytes", self.section_type())),
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut Vec<u8>, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Strings(bytes) | SectionData::Data(bytes) => Ok(bytes),
            _ => Err(ModelError::WrongSectionKind("access bytes", section_type)),
        }
    }

    /// One byte of the buffer.
    pub fn byte(&self, offset: SectionOffset) -> Result<Byte, ModelError> {
        self.bytes()?
            .get(offset as usize)
            .copied()
            .ok_or_else(|| ModelError::OutOfRange(format!("byte offset {offset}")))
    }

    /// Appends one byte to the buffer.
    pub fn add_byte(&mut self, byte: Byte) -> Result<(), ModelError> {
        self.bytes_mut()?.push(byte);

        Ok(())
    }

    /// Overwrites one byte of the buffer.
    pub fn set_byte(&mut self, offset: SectionOffset, byte: Byte) -> Result<(), ModelError> {
        let bytes = self.bytes_mut()?;

        match bytes.get_mut(offset as usize) {
            Some(slot) => {
                *slot = byte;
                Ok(())
            }
            None => Err(ModelError::OutOfRange(format!("byte offset {offset}"))),
        }
    }

    /// Grows the section to `length` bytes.
    ///
    /// Initialized data grows with zero bytes; uninitialized data only
    /// adjusts the logical length. Shrinking is rejected.
    pub fn set_data_length(&mut self, length: Word) -> Result<(), ModelError> {
        if length < self.length()? {
            return Err(ModelError::OutOfRange(format!(
                "cannot shrink section from {} to {length} bytes",
                self.length()?
            )));
        }

        match &mut self.data {
            SectionData::Strings(bytes) | SectionData::Data(bytes) => {
                bytes.resize(length as usize, 0);
            }
            SectionData::UData { length: logical } => *logical = length,
            _ => unreachable!("length() above rejects non-chunkable sections"),
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // MAU-granular data operations.
    // ------------------------------------------------------------------

    /// Number of buffer bytes occupied by `maus` minimum addressable units
    /// of `mau_bits` bits each.
    pub fn maus_to_bytes(mau_bits: u32, maus: Word) -> Word {
        let bytes_per_mau = mau_bits.div_ceil(BYTE_BITWIDTH);

        maus * bytes_per_mau
    }

    /// One MAU of the section, read big-endian from its buffer bytes.
    pub fn mau(&self, mau_bits: u32, index: Word) -> Result<MinimumAddressableUnit, ModelError> {
        let byte_offset = Self::maus_to_bytes(mau_bits, index);
        let mau_in_bytes = Self::maus_to_bytes(mau_bits, 1);

        let mut value: MinimumAddressableUnit = 0;
        for i in 0..mau_in_bytes {
            value = (value << BYTE_BITWIDTH) | self.byte(byte_offset + i)? as MinimumAddressableUnit;
        }

        Ok(value)
    }

    /// Appends one MAU to the end of the section.
    ///
    /// The value must fit `mau_bits` bits interpreted as unsigned or as
    /// two's complement signed.
    pub fn add_mau(
        &mut self,
        mau_bits: u32,
        value: MinimumAddressableUnit,
    ) -> Result<(), ModelError> {
        if required_bits(value as LongWord) > mau_bits
            && required_bits_signed(value as SWord as SLongWord) > mau_bits
        {
            return Err(ModelError::OutOfRange(format!(
                "value {value:#x} does not fit the {mau_bits}-bit MAU of the address space"
            )));
        }

        let mut bits = mau_bits as i64;

        // partial leading byte first
        let modulo = bits % BYTE_BITWIDTH as i64;
        if modulo != 0 {
            bits -= modulo;
            self.add_byte((value >> bits) as Byte)?;
        }

        bits -= BYTE_BITWIDTH as i64;
        while bits >= 0 {
            self.add_byte((value >> bits) as Byte)?;
            bits -= BYTE_BITWIDTH as i64;
        }

        Ok(())
    }

    fn write_mau_chunks(
        &mut self,
        mau_bits: u32,
        index: Word,
        mau_count: Word,
        mut next_mau: impl FnMut(u32) -> MinimumAddressableUnit,
    ) -> Result<(), ModelError> {
        let mau_in_bytes = Self::maus_to_bytes(mau_bits, 1);
        let mut shift = 0u32;

        // last MAU holds the least significant bits
        for i in (0..mau_count).rev() {
            let byte_offset = Self::maus_to_bytes(mau_bits, index + i);
            let mut current = next_mau(shift);
            shift += mau_bits;

            for j in (0..mau_in_bytes).rev() {
                self.set_byte(byte_offset + j, current as Byte)?;
                current >>= BYTE_BITWIDTH;
            }
        }

        Ok(())
    }

    /// Writes an unsigned value as `mau_count` big-endian MAUs starting at
    /// MAU `index`.
    pub fn write_value_unsigned(
        &mut self,
        mau_bits: u32,
        index: Word,
        mau_count: Word,
        value: LongWord,
    ) -> Result<(), ModelError> {
        if required_bits(value) > mau_bits * mau_count {
            return Err(ModelError::OutOfRange(format!(
                "value {value:#x} needs more than {} bits",
                mau_bits * mau_count
            )));
        }

        let mask = mau_mask(mau_bits);

        self.write_mau_chunks(mau_bits, index, mau_count, |shift| {
            if shift < LongWord::BITS {
                ((value >> shift) as MinimumAddressableUnit) & mask
            } else {
                0
            }
        })
    }

    /// Writes a signed value as `mau_count` big-endian MAUs starting at MAU
    /// `index`, sign-extending the high MAUs.
    pub fn write_value_signed(
        &mut self,
        mau_bits: u32,
        index: Word,
        mau_count: Word,
        value: SLongWord,
    ) -> Result<(), ModelError> {
        if required_bits_signed(value) > mau_bits * mau_count {
            return Err(ModelError::OutOfRange(format!(
                "value {value} needs more than {} bits",
                mau_bits * mau_count
            )));
        }

        let mask = mau_mask(mau_bits);

        self.write_mau_chunks(mau_bits, index, mau_count, |shift| {
            if shift < SLongWord::BITS {
                // arithmetic shift keeps the sign bits flowing into the
                // high MAUs
                ((value >> shift) as MinimumAddressableUnit) & mask
            } else if value < 0 {
                mask
            } else {
                0
            }
        })
    }

    // ------------------------------------------------------------------
    // String-section operations.
    // ------------------------------------------------------------------

    /// The NUL-terminated byte run starting at `offset`.
    pub fn chunk_string(&self, offset: SectionOffset) -> Result<&BStr, ModelError> {
        let SectionData::Strings(bytes) = &self.data else {
            return Err(ModelError::WrongSectionKind("resolve strings", self.section_type()));
        };

        let start = offset as usize;
        if start > bytes.len() {
            return Err(ModelError::OutOfRange(format!("string offset {offset}")));
        }

        match bytes[start..].find_byte(0) {
            Some(end) => Ok(bytes[start..start + end].as_bstr()),
            None => Err(ModelError::UnexpectedValue("no terminating zero found".into())),
        }
    }

    /// [`Self::chunk_string`] converted to an owned `String`.
    pub fn chunk_to_string(&self, offset: SectionOffset) -> Result<String, ModelError> {
        Ok(self.chunk_string(offset)?.to_string())
    }

    /// Interns `string` and returns a chunk pointing at its first
    /// occurrence (terminator included), appending it if absent.
    ///
    /// Chunk offset 0 always holds the empty string.
    pub fn string_to_chunk(&mut self, string: &str) -> Result<RefTarget, ModelError> {
        let id = self.id;

        let SectionData::Strings(bytes) = &mut self.data else {
            return Err(ModelError::WrongSectionKind("intern strings", self.section_type()));
        };

        if bytes.is_empty() {
            bytes.push(0);
        }

        let mut needle = string.as_bytes().to_vec();
        needle.push(0);

        if let Some(offset) = bytes.find(&needle) {
            return Ok(RefTarget::Chunk(id, offset as SectionOffset));
        }

        let offset = bytes.len() as SectionOffset;
        bytes.extend_from_slice(&needle);

        Ok(RefTarget::Chunk(id, offset))
    }

    // ------------------------------------------------------------------
    // Typed payload accessors.
    // ------------------------------------------------------------------

    /// The code payload of a code section.
    pub fn as_code(&self) -> Result<&CodeData, ModelError> {
        match &self.data {
            SectionData::Code(code) => Ok(code),
            _ => Err(ModelError::WrongSectionKind("hold instructions", self.section_type())),
        }
    }

    /// Mutable [`Self::as_code`].
    pub fn as_code_mut(&mut self) -> Result<&mut CodeData, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Code(code) => Ok(code),
            _ => Err(ModelError::WrongSectionKind("hold instructions", section_type)),
        }
    }

    /// The symbol elements of a symbol section.
    pub fn as_symbols(&self) -> Result<&Vec<SymbolElement>, ModelError> {
        match &self.data {
            SectionData::Symbols(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold symbols", self.section_type())),
        }
    }

    /// Mutable [`Self::as_symbols`].
    pub fn as_symbols_mut(&mut self) -> Result<&mut Vec<SymbolElement>, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Symbols(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold symbols", section_type)),
        }
    }

    /// The relocation payload of a relocation section.
    pub fn as_relocs(&self) -> Result<&RelocData, ModelError> {
        match &self.data {
            SectionData::Relocs(relocs) => Ok(relocs),
            _ => Err(ModelError::WrongSectionKind("hold relocations", self.section_type())),
        }
    }

    /// Mutable [`Self::as_relocs`].
    pub fn as_relocs_mut(&mut self) -> Result<&mut RelocData, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Relocs(relocs) => Ok(relocs),
            _ => Err(ModelError::WrongSectionKind("hold relocations", section_type)),
        }
    }

    /// The address-space payload of an address-space section.
    pub fn as_aspaces(&self) -> Result<&ASpaceData, ModelError> {
        match &self.data {
            SectionData::ASpaces(aspaces) => Ok(aspaces),
            _ => Err(ModelError::WrongSectionKind("hold address spaces", self.section_type())),
        }
    }

    /// Mutable [`Self::as_aspaces`].
    pub fn as_aspaces_mut(&mut self) -> Result<&mut ASpaceData, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::ASpaces(aspaces) => Ok(aspaces),
            _ => Err(ModelError::WrongSectionKind("hold address spaces", section_type)),
        }
    }

    /// The resource elements of a machine-resource section.
    pub fn as_resources(&self) -> Result<&Vec<ResourceElement>, ModelError> {
        match &self.data {
            SectionData::Resources(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold resources", self.section_type())),
        }
    }

    /// Mutable [`Self::as_resources`].
    pub fn as_resources_mut(&mut self) -> Result<&mut Vec<ResourceElement>, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Resources(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold resources", section_type)),
        }
    }

    /// The line-number payload of a line-number section.
    pub fn as_line_numbers(&self) -> Result<&LineNumData, ModelError> {
        match &self.data {
            SectionData::LineNumbers(linenos) => Ok(linenos),
            _ => Err(ModelError::WrongSectionKind("hold line numbers", self.section_type())),
        }
    }

    /// Mutable [`Self::as_line_numbers`].
    pub fn as_line_numbers_mut(&mut self) -> Result<&mut LineNumData, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::LineNumbers(linenos) => Ok(linenos),
            _ => Err(ModelError::WrongSectionKind("hold line numbers", section_type)),
        }
    }

    /// The debug elements of a debug section.
    pub fn as_debug(&self) -> Result<&Vec<DebugElement>, ModelError> {
        match &self.data {
            SectionData::Debug(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold debug data", self.section_type())),
        }
    }

    /// Mutable [`Self::as_debug`].
    pub fn as_debug_mut(&mut self) -> Result<&mut Vec<DebugElement>, ModelError> {
        let section_type = self.section_type();

        match &mut self.data {
            SectionData::Debug(elements) => Ok(elements),
            _ => Err(ModelError::WrongSectionKind("hold debug data", section_type)),
        }
    }
}

fn mau_mask(mau_bits: u32) -> MinimumAddressableUnit {
    if mau_bits >= MinimumAddressableUnit::BITS {
        MinimumAddressableUnit::MAX
    } else {
        (1 << mau_bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_section(bytes: Vec<u8>) -> Section {
        let mut section = Section::new(SectionData::Data(bytes));
        section.set_id(1);

        section
    }

    #[test]
    fn test_default_flags() {
        assert!(Section::new(SectionData::Code(CodeData::default()))
            .flags
            .contains(SectionFlag::VLen));
        assert!(Section::new(SectionData::UData { length: 0 }).no_bits());
        assert!(Section::new(SectionData::Data(Vec::new())).flags.is_empty());
    }

    #[test]
    fn test_byte_buffer_operations() {
        let mut section = data_section(vec![0x50, 0x60, 0x70]);

        assert_eq!(section.length().unwrap(), 3);
        assert_eq!(section.byte(0).unwrap(), 0x50);
        assert_eq!(section.byte(2).unwrap(), 0x70);
        assert!(section.byte(3).is_err());

        section.add_byte(0x80).unwrap();
        section.set_byte(0, 0x55).unwrap();
        assert_eq!(section.byte(0).unwrap(), 0x55);
        assert_eq!(section.length().unwrap(), 4);

        section.set_data_length(6).unwrap();
        assert_eq!(section.byte(5).unwrap(), 0);
        assert!(section.set_data_length(2).is_err());
    }

    #[test]
    fn test_chunks_are_positional() {
        let section = data_section(vec![1, 2, 3]);

        assert_eq!(section.chunk(1).unwrap(), section.chunk(1).unwrap());
        assert_ne!(section.chunk(1).unwrap(), section.chunk(2).unwrap());
        assert!(section.chunk(4).is_err());

        let code = Section::new(SectionData::Code(CodeData::default()));
        assert!(matches!(code.chunk(0), Err(ModelError::NotChunkable(SectionType::Code))));
    }

    #[test]
    fn test_write_value_unsigned_two_bit_maus() {
        // writeValue(0, 4, 3) with a 2-bit MAU stores 00 00 00 11, one MAU
        // per byte.
        let mut section = data_section(vec![0; 4]);
        section.write_value_unsigned(2, 0, 4, 3).unwrap();

        assert_eq!(section.bytes().unwrap(), &vec![0b00, 0b00, 0b00, 0b11]);
        assert_eq!(section.mau(2, 3).unwrap(), 0b11);
    }

    #[test]
    fn test_write_value_signed_sign_extends() {
        // writeValue(0, 4, -3) with a 2-bit MAU stores 11 11 11 01.
        let mut section = data_section(vec![0; 4]);
        section.write_value_signed(2, 0, 4, -3).unwrap();

        assert_eq!(section.bytes().unwrap(), &vec![0b11, 0b11, 0b11, 0b01]);
    }

    #[test]
    fn test_write_value_ten_bit_maus() {
        // A 10-bit MAU occupies two buffer bytes.
        let mut section = data_section(vec![0; 8]);
        section.write_value_signed(10, 0, 4, -3).unwrap();

        #[rustfmt::skip]
        assert_eq!(
            section.bytes().unwrap(),
            &vec![0x03, 0xff, 0x03, 0xff, 0x03, 0xff, 0x03, 0xfd],
        );
    }

    #[test]
    fn test_write_value_reconstructs_through_mau() {
        let mut section = data_section(vec![0; 8]);
        section.write_value_unsigned(8, 2, 4, 0x0102_0304).unwrap();

        for (k, expected) in [1, 2, 3, 4].into_iter().enumerate() {
            assert_eq!(section.mau(8, 2 + k as Word).unwrap(), expected);
        }
    }

    #[test]
    fn test_write_value_rejects_oversize() {
        let mut section = data_section(vec![0; 4]);

        assert!(section.write_value_unsigned(2, 0, 4, 256).is_err());
        assert!(section.write_value_signed(2, 0, 4, -200).is_err());
    }

    #[test]
    fn test_add_mau_width_check() {
        let mut section = data_section(Vec::new());

        section.add_mau(8, 0xff).unwrap();
        assert_eq!(section.byte(0).unwrap(), 0xff);

        // -1 fits any width as a signed value.
        section.add_mau(4, 0xffff_ffff).unwrap();
        assert!(section.add_mau(4, 0x10).is_err());
    }

    #[test]
    fn test_string_interning() {
        let mut section = Section::new(SectionData::Strings(Vec::new()));
        section.set_id(2);

        let empty = section.string_to_chunk("").unwrap();
        assert_eq!(empty, RefTarget::Chunk(2, 0));

        let first = section.string_to_chunk("sym01").unwrap();
        let again = section.string_to_chunk("sym01").unwrap();
        assert_eq!(first, again);

        let other = section.string_to_chunk("sym02").unwrap();
        assert_ne!(first, other);

        let RefTarget::Chunk(_, offset) = first else { unreachable!() };
        assert_eq!(section.chunk_to_string(offset).unwrap(), "sym01");
    }

    #[test]
    fn test_interning_matches_suffix_occurrence() {
        let mut section = Section::new(SectionData::Strings(Vec::new()));

        section.string_to_chunk("prefix_name").unwrap();

        // "name" terminates at the same NUL, so it is found inside the
        // existing run.
        let RefTarget::Chunk(_, offset) = section.string_to_chunk("name").unwrap() else {
            unreachable!()
        };

        assert_eq!(section.chunk_to_string(offset).unwrap(), "name");
        assert_eq!(offset, 8);
    }

    #[test]
    fn test_chunk_string_without_terminator() {
        let mut section = Section::new(SectionData::Strings(vec![0, b'a', b'b']));

        assert!(matches!(section.chunk_string(1), Err(ModelError::UnexpectedValue(_))));

        section.add_byte(0).unwrap();
        assert_eq!(section.chunk_to_string(1).unwrap(), "ab");
    }
}
