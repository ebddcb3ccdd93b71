use crate::base::*;
use crate::refs::SafeRef;

/// Machine-resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceType {
    /// Illegal undefined machine resource.
    Null = 0x00,
    /// Transport bus.
    Bus = 0x01,
    /// Function unit.
    Unit = 0x02,
    /// Register file.
    RegisterFile = 0x03,
    /// Operation operand or function unit register.
    Operand = 0x04,
    /// Immediate unit.
    ImmediateUnit = 0x05,
    /// Special register.
    SpecialRegister = 0x06,
    /// Function unit port.
    Port = 0x07,
}

impl ResourceType {
    /// Decodes a persisted resource-type tag.
    pub fn from_byte(byte: Byte) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Null,
            0x01 => Self::Bus,
            0x02 => Self::Unit,
            0x03 => Self::RegisterFile,
            0x04 => Self::Operand,
            0x05 => Self::ImmediateUnit,
            0x06 => Self::SpecialRegister,
            0x07 => Self::Port,
            _ => return None,
        })
    }
}

/// One entry of the machine-resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceElement {
    /// Identification code used to refer to the resource from moves.
    pub id: HalfWord,
    /// The resource type.
    pub kind: ResourceType,
    /// Name chunk in the linked string section.
    pub name: Option<SafeRef>,
    /// Additional info.
    pub info: Word,
}

impl ResourceElement {
    /// The universal bus.
    pub const UNIVERSAL_BUS: HalfWord = 0x00;
    /// The universal function unit.
    pub const UNIVERSAL_FU: HalfWord = 0x00;
    /// Illegal register file.
    pub const ILLEGAL_RF: HalfWord = 0x00;
    /// Universal integer register file.
    pub const INT_RF: HalfWord = 0x80;
    /// Universal boolean register file.
    pub const BOOL_RF: HalfWord = 0x81;
    /// Universal floating-point register file.
    pub const FP_RF: HalfWord = 0x82;
    /// Bit marking a register file as universal rather than real.
    pub const UNIVERSAL_RF_MASK: HalfWord = 0x80;
    /// The inline immediate unit.
    pub const INLINE_IMM: HalfWord = 0x00;

    /// Reserved name of the return-address special register.
    pub const RETURN_ADDRESS_NAME: &'static str = "return-address";

    /// Creates a resource entry.
    pub fn new(id: HalfWord, kind: ResourceType) -> Self {
        Self { id, kind, name: None, info: 0 }
    }
}
