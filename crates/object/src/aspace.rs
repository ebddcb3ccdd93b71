use crate::base::*;
use crate::refs::SafeRef;

/// One address space of the target machine.
///
/// The minimum addressable unit is given in bits; an all-zero element is the
/// distinguished *undefined* address space referenced by sections that do
/// not live in any address space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ASpaceElement {
    /// Minimum addressable unit in bits.
    pub mau: Byte,
    /// Alignment of the address space.
    pub align: Byte,
    /// Word size in MAUs.
    pub word_size: Byte,
    /// Name chunk in the binary's string section.
    pub name: Option<SafeRef>,
}

impl ASpaceElement {
    /// True for the undefined address-space sentinel.
    pub fn is_undefined(&self) -> bool {
        self.mau == 0 && self.align == 0 && self.word_size == 0
    }
}
