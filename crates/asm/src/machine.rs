//! A lightweight target-machine description.
//!
//! This carries exactly what the assembler needs to resolve symbolic
//! register, port and operation references: buses with widths, register
//! files, function units with ports and operations, immediate units, and
//! address spaces. [`Machine::universal`] describes the universal machine
//! sequential code is compiled against.

use crate::ast::UValue;

/// One transport bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    /// Bus name.
    pub name: String,
    /// Bus width in bits.
    pub width: u32,
}

/// One register file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    /// Register file name.
    pub name: String,
    /// Number of registers.
    pub registers: u32,
    /// Register width in bits.
    pub width: u32,
    /// The reserved TPEF resource id of a universal register file, if this
    /// is one.
    pub universal_id: Option<u16>,
}

/// One port of a function unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Port name.
    pub name: String,
    /// Port width in bits.
    pub width: u32,
}

/// One operation of a function unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Operation name.
    pub name: String,
    /// Number of operands.
    pub operands: u32,
}

/// One function unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUnit {
    /// Unit name.
    pub name: String,
    /// The unit's ports.
    pub ports: Vec<Port>,
    /// The operations the unit implements.
    pub operations: Vec<Operation>,
}

impl FunctionUnit {
    /// Looks up a port by name.
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|port| port.name == name)
    }

    /// Looks up an operation by name.
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|operation| operation.name == name)
    }
}

/// One immediate unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateUnit {
    /// Unit name.
    pub name: String,
    /// Number of registers.
    pub registers: u32,
    /// Register width in bits.
    pub width: u32,
}

/// One address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    /// Address space name.
    pub name: String,
    /// Minimum addressable unit in bits.
    pub mau_bits: u32,
    /// Alignment.
    pub align: u32,
    /// Word size in MAUs.
    pub word_size: u32,
    /// Highest address of the space.
    pub end: UValue,
}

/// The target machine the assembler compiles against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// Transport buses, in slot order.
    pub buses: Vec<Bus>,
    /// Register files.
    pub register_files: Vec<RegisterFile>,
    /// Function units.
    pub function_units: Vec<FunctionUnit>,
    /// Immediate units.
    pub immediate_units: Vec<ImmediateUnit>,
    /// Data address spaces.
    pub address_spaces: Vec<AddressSpace>,
    /// The instruction address space.
    pub code_space: AddressSpace,
    /// True for the universal machine: every instruction slot maps to the
    /// universal bus.
    pub universal: bool,
}

/// Width reported for the universal bus. The universal bus has no physical
/// width; 32 bits is the sentinel every width comparison uses.
pub const UNIVERSAL_BUS_WIDTH: u32 = 32;

impl Machine {
    /// The universal machine of sequential code: unlimited universal bus,
    /// the three universal register files, one universal immediate unit
    /// and the two conventional address spaces.
    pub fn universal() -> Self {
        Self {
            buses: vec![Bus { name: "universal_bus".into(), width: UNIVERSAL_BUS_WIDTH }],
            register_files: vec![
                RegisterFile {
                    name: "r".into(),
                    registers: 1024,
                    width: 32,
                    universal_id: Some(0x80),
                },
                RegisterFile {
                    name: "bool".into(),
                    registers: 1,
                    width: 1,
                    universal_id: Some(0x81),
                },
                RegisterFile {
                    name: "f".into(),
                    registers: 1024,
                    width: 32,
                    universal_id: Some(0x82),
                },
            ],
            function_units: Vec::new(),
            immediate_units: vec![ImmediateUnit {
                name: "imm".into(),
                registers: 1,
                width: 32,
            }],
            address_spaces: vec![AddressSpace {
                name: "universal_data".into(),
                mau_bits: 8,
                align: 4,
                word_size: 4,
                end: 0xffff_ffff,
            }],
            code_space: AddressSpace {
                name: "universal_instructions".into(),
                mau_bits: 8,
                align: 4,
                word_size: 4,
                end: 0xffff_ffff,
            },
            universal: true,
        }
    }

    /// Looks up a register file by name.
    pub fn register_file(&self, name: &str) -> Option<&RegisterFile> {
        self.register_files.iter().find(|rf| rf.name == name)
    }

    /// Looks up a function unit by name.
    pub fn function_unit(&self, name: &str) -> Option<&FunctionUnit> {
        self.function_units.iter().find(|fu| fu.name == name)
    }

    /// Looks up an immediate unit by name.
    pub fn immediate_unit(&self, name: &str) -> Option<&ImmediateUnit> {
        self.immediate_units.iter().find(|unit| unit.name == name)
    }

    /// Looks up a data address space by name.
    pub fn address_space(&self, name: &str) -> Option<&AddressSpace> {
        self.address_spaces.iter().find(|space| space.name == name)
    }

    /// The bus of an instruction slot, by slot number.
    pub fn bus(&self, slot: usize) -> Option<&Bus> {
        if self.universal {
            self.buses.first()
        } else {
            self.buses.get(slot)
        }
    }
}
