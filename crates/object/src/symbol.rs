use crate::base::*;
use crate::refs::SafeRef;

/// Persisted symbol-type tags (the low nibble of the symbol info field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolType {
    /// Type is not defined.
    NoType = 0x0,
    /// Associated with a data object.
    Data = 0x1,
    /// Associated with executable code.
    Code = 0x2,
    /// Associated with a section.
    Section = 0x3,
    /// Name of the source file associated with this object file.
    File = 0x4,
    /// Start position of a procedure inside a code section.
    Procedure = 0x5,
}

impl SymbolType {
    /// Decodes a persisted symbol-type nibble.
    pub fn from_nibble(nibble: Byte) -> Option<Self> {
        Some(match nibble {
            0x0 => Self::NoType,
            0x1 => Self::Data,
            0x2 => Self::Code,
            0x3 => Self::Section,
            0x4 => Self::File,
            0x5 => Self::Procedure,
            _ => return None,
        })
    }
}

/// Symbol binding (the high nibble of the symbol info field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolBinding {
    /// Not visible outside the object file.
    Local = 0x0,
    /// Visible to all object files.
    Global = 0x1,
    /// Global scope with lower precedence.
    Weak = 0x2,
}

impl SymbolBinding {
    /// Decodes a persisted binding nibble.
    pub fn from_nibble(nibble: Byte) -> Option<Self> {
        Some(match nibble {
            0x0 => Self::Local,
            0x1 => Self::Global,
            0x2 => Self::Weak,
            _ => return None,
        })
    }
}

/// The `other` field bit marking an absolute symbol.
pub const STO_ABS: Byte = 0x80;

/// The per-type payload of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// No value attached.
    NoType,
    /// References one instruction element plus a size in MAUs.
    Code {
        /// The instruction element the symbol points at.
        reference: Option<SafeRef>,
        /// Size in MAUs.
        size: Word,
    },
    /// Like a code symbol, marking a procedure start.
    Procedure {
        /// The first instruction element of the procedure.
        reference: Option<SafeRef>,
        /// Size in MAUs.
        size: Word,
    },
    /// References one chunk plus a size in MAUs.
    Data {
        /// The chunk the symbol points at.
        reference: Option<SafeRef>,
        /// Size in MAUs.
        size: Word,
    },
    /// Carries a value and a size.
    Section {
        /// Symbol value.
        value: Word,
        /// Symbol size.
        size: Word,
    },
    /// Carries a value; the name is the source file name.
    File {
        /// Symbol value.
        value: Word,
    },
}

/// One entry of a symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolElement {
    /// Binding scope.
    pub binding: SymbolBinding,
    /// True for absolute (non-relocating) symbols.
    pub absolute: bool,
    /// Name chunk in the linked string section.
    pub name: Option<SafeRef>,
    /// The section the symbol belongs to.
    pub section: Option<SafeRef>,
    /// The typed payload.
    pub kind: SymbolKind,
}

impl SymbolElement {
    /// Creates a symbol of the given kind with local binding.
    pub fn new(kind: SymbolKind) -> Self {
        Self { binding: SymbolBinding::Local, absolute: false, name: None, section: None, kind }
    }

    /// The undefined symbol mandated at index 0 of every symbol table.
    pub fn undefined(name: Option<SafeRef>, section: Option<SafeRef>) -> Self {
        Self {
            binding: SymbolBinding::Local,
            absolute: true,
            name,
            section,
            kind: SymbolKind::NoType,
        }
    }

    /// The persisted type tag of this symbol.
    pub fn symbol_type(&self) -> SymbolType {
        match self.kind {
            SymbolKind::NoType => SymbolType::NoType,
            SymbolKind::Code { .. } => SymbolType::Code,
            SymbolKind::Procedure { .. } => SymbolType::Procedure,
            SymbolKind::Data { .. } => SymbolType::Data,
            SymbolKind::Section { .. } => SymbolType::Section,
            SymbolKind::File { .. } => SymbolType::File,
        }
    }
}
