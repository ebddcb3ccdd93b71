//! The machine-resource manager.
//!
//! Maps symbolic register, port and operation references to TPEF resource
//! ids, materializing entries in the machine-resource section as they are
//! first used. The manager owns the binary under construction and its
//! reference manager; the creators and the label manager reach both
//! through it. After the first resolved reference, the binary contains a
//! valid skeleton: null section, address-space section, string section and
//! resource section.

use std::collections::HashMap;

use tpef_object::refs::{RefTarget, ReferenceManager, SafeRef};
use tpef_object::{
    ASpaceElement, Binary, MoveFieldType, ResourceElement, ResourceType, Section, SectionData,
    SectionId, Word,
};

use crate::ast::{RegisterTerm, UValue};
use crate::error::IllegalMachine;
use crate::machine::Machine;

/// Type of a resource-id request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Register or port for reading.
    Read,
    /// Register or port for writing.
    Write,
    /// Register or port guard.
    Guard,
    /// Inverted register or port guard.
    InvGuard,
}

/// Result of a resource-id request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceId {
    /// Resource field type.
    pub field_type: MoveFieldType,
    /// TPEF resource unit id.
    pub unit: UValue,
    /// TPEF operand id or register-file index.
    pub index: UValue,
    /// Width of the accessed resource in bits.
    pub width: UValue,
}

/// Provides all TPEF and machine resources needed by the section creators.
pub struct MachineResourceManager<'m> {
    machine: &'m Machine,
    binary: Binary,
    refs: ReferenceManager,

    null_id: SectionId,
    addrsp_id: SectionId,
    strings_id: SectionId,
    resources_id: SectionId,

    /// Requested data address spaces, name to element index.
    address_spaces: HashMap<String, Word>,
    /// The instruction address space element, once requested.
    code_aspace: Option<Word>,

    /// Memoized `(resource key, slot, request type)` lookups.
    resource_map: HashMap<(String, UValue, RequestType), ResourceId>,

    register_file_ids: HashMap<String, UValue>,
    last_register_file_id: UValue,
    function_unit_ids: HashMap<String, UValue>,
    last_function_unit_id: UValue,
    op_or_port_ids: HashMap<String, UValue>,
    last_op_or_port_id: UValue,
    immediate_unit_ids: HashMap<String, UValue>,
    last_immediate_unit_id: UValue,
}

impl<'m> MachineResourceManager<'m> {
    /// Creates the manager and the TPEF skeleton sections.
    pub fn new(machine: &'m Machine) -> Self {
        let mut binary = Binary::new();
        let refs = ReferenceManager::new();

        let null_id = binary.add_section(Section::new(SectionData::Null));

        let mut addrsp = Section::new(SectionData::ASpaces(Default::default()));
        let addrsp_data = addrsp.as_aspaces_mut().expect("freshly created address-space section");
        addrsp_data.elements.push(ASpaceElement::default());

        let addrsp_id = binary.add_section(addrsp);
        let strings_id = binary.add_section(Section::new(SectionData::Strings(vec![0])));
        let resources_id = binary.add_section(Section::new(SectionData::Resources(Vec::new())));

        binary.set_strings(strings_id);

        let mut manager = Self {
            machine,
            binary,
            refs,
            null_id,
            addrsp_id,
            strings_id,
            resources_id,
            address_spaces: HashMap::new(),
            code_aspace: None,
            resource_map: HashMap::new(),
            register_file_ids: HashMap::new(),
            last_register_file_id: 0,
            function_unit_ids: HashMap::new(),
            last_function_unit_id: 0,
            op_or_port_ids: HashMap::new(),
            last_op_or_port_id: 0,
            immediate_unit_ids: HashMap::new(),
            last_immediate_unit_id: 0,
        };

        manager.wire_skeleton();

        manager
    }

    fn wire_skeleton(&mut self) {
        let undefined = self.undefined_address_space();
        let null_ref = self.refs.bound(RefTarget::Section(self.null_id));
        let strings_ref = self.refs.bound(RefTarget::Section(self.strings_id));

        let empty_name = self
            .string_chunk_ref("")
            .expect("the string section interns the empty string");

        let ids = [self.null_id, self.addrsp_id, self.strings_id, self.resources_id];

        for id in ids {
            let section = self
                .binary
                .section_by_id_mut(id)
                .expect("the skeleton sections were just added");

            section.aspace = Some(undefined);
            section.name = Some(empty_name);
            section.link = Some(if id == self.null_id || id == self.strings_id {
                null_ref
            } else {
                strings_ref
            });
        }

        let addrsp = self
            .binary
            .section_by_id_mut(self.addrsp_id)
            .expect("the address-space section was just added");

        if let SectionData::ASpaces(aspaces) = &mut addrsp.data {
            aspaces.undefined = Some(undefined);
            aspaces.elements[0].name = Some(empty_name);
        }
    }

    /// The target machine.
    pub fn machine(&self) -> &Machine {
        self.machine
    }

    /// The binary under construction.
    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    /// Mutable [`Self::binary`].
    pub fn binary_mut(&mut self) -> &mut Binary {
        &mut self.binary
    }

    /// The reference manager of this assembly.
    pub fn refs(&self) -> &ReferenceManager {
        &self.refs
    }

    /// Mutable [`Self::refs`].
    pub fn refs_mut(&mut self) -> &mut ReferenceManager {
        &mut self.refs
    }

    /// Id of the null section.
    pub fn null_section(&self) -> SectionId {
        self.null_id
    }

    /// Id of the string section.
    pub fn string_section(&self) -> SectionId {
        self.strings_id
    }

    /// Id of the machine-resource section.
    pub fn resource_section(&self) -> SectionId {
        self.resources_id
    }

    /// Id of the address-space section.
    pub fn address_space_section(&self) -> SectionId {
        self.addrsp_id
    }

    /// Finishes the assembly: folds the reference manager into the binary.
    pub fn finish(mut self) -> Binary {
        let table = std::mem::take(&mut self.refs).into_table();
        self.binary.set_refs(table);

        self.binary
    }

    /// Interns a string and returns a chunk locator for it.
    pub fn string_to_chunk(
        &mut self,
        string: &str,
    ) -> Result<RefTarget, tpef_object::ModelError> {
        self.binary
            .section_by_id_mut(self.strings_id)
            .expect("the string section always exists")
            .string_to_chunk(string)
    }

    /// Interns a string and returns a bound safe reference to its chunk.
    pub fn string_chunk_ref(
        &mut self,
        string: &str,
    ) -> Result<SafeRef, tpef_object::ModelError> {
        let chunk = self.string_to_chunk(string)?;

        Ok(self.refs.bound(chunk))
    }

    /// A bound reference to the undefined address space.
    pub fn undefined_address_space(&mut self) -> SafeRef {
        self.refs.bound(RefTarget::Element(self.addrsp_id, 0))
    }

    /// Element index of the instruction address space, created on first
    /// use.
    pub fn code_address_space(&mut self) -> Result<Word, IllegalMachine> {
        if let Some(index) = self.code_aspace {
            return Ok(index);
        }

        let space = self.machine.code_space.clone();
        let index = self.add_address_space_element(&space);
        self.code_aspace = Some(index);

        Ok(index)
    }

    /// Element index of a data address space, by name.
    pub fn find_data_address_space(&mut self, name: &str) -> Result<Word, IllegalMachine> {
        if let Some(&index) = self.address_spaces.get(name) {
            return Ok(index);
        }

        if name == self.machine.code_space.name {
            return Err(IllegalMachine(format!(
                "can't write data to instruction memory `{name}`"
            )));
        }

        let space = self
            .machine
            .address_space(name)
            .ok_or_else(|| IllegalMachine(format!("no address space named `{name}`")))?
            .clone();

        let index = self.add_address_space_element(&space);
        self.address_spaces.insert(name.to_string(), index);

        Ok(index)
    }

    fn add_address_space_element(&mut self, space: &crate::machine::AddressSpace) -> Word {
        let name = self
            .string_chunk_ref(&space.name)
            .expect("the string section interns every name");

        let addrsp = self
            .binary
            .section_by_id_mut(self.addrsp_id)
            .expect("the address-space section always exists");

        let SectionData::ASpaces(aspaces) = &mut addrsp.data else {
            unreachable!("the address-space section holds address spaces");
        };

        aspaces.elements.push(ASpaceElement {
            mau: space.mau_bits as u8,
            align: space.align as u8,
            word_size: space.word_size as u8,
            name: Some(name),
        });

        (aspaces.elements.len() - 1) as Word
    }

    /// A locator for an address-space element.
    pub fn address_space_target(&self, index: Word) -> RefTarget {
        RefTarget::Element(self.addrsp_id, index)
    }

    /// MAU width in bits of an address-space element.
    pub fn address_space_mau(&self, index: Word) -> u32 {
        self.binary
            .section_by_id(self.addrsp_id)
            .and_then(|section| section.as_aspaces().ok())
            .and_then(|aspaces| aspaces.elements.get(index as usize))
            .map(|element| element.mau as u32)
            .unwrap_or(0)
    }

    /// Width of the bus carrying instruction slot `slot`, if the machine
    /// has one.
    pub fn find_bus_width(&self, slot: UValue) -> Option<u32> {
        self.machine.bus(slot as usize).map(|bus| bus.width)
    }

    /// Resolves a register term to TPEF resource ids.
    ///
    /// Lookups are memoized per `(term, slot, request type)`.
    pub fn resource_id(
        &mut self,
        term: &RegisterTerm,
        slot: UValue,
        request: RequestType,
    ) -> Result<ResourceId, IllegalMachine> {
        let key = (term.to_string(), slot, request);

        if let Some(&resolved) = self.resource_map.get(&key) {
            return Ok(resolved);
        }

        let resolved = match term {
            RegisterTerm::Bus(_) => {
                return Err(IllegalMachine(format!(
                    "bus register reference {term} is not supported"
                )))
            }
            RegisterTerm::Index(index_term) => self.index_resource(index_term)?,
            RegisterTerm::FunctionUnit(fu_term) => self.function_unit_port_resource(fu_term)?,
        };

        self.resource_map.insert(key, resolved);

        Ok(resolved)
    }

    /// Resolves `rf[.port].index`, `fu.operation.index` or
    /// `imm-unit.index`.
    fn index_resource(
        &mut self,
        term: &crate::ast::IndexTerm,
    ) -> Result<ResourceId, IllegalMachine> {
        if let Some(rf) = self.machine.register_file(&term.unit).cloned() {
            if term.index >= rf.registers as UValue {
                return Err(IllegalMachine(format!(
                    "register file `{}` has no register {}",
                    rf.name, term.index
                )));
            }

            let unit = self.register_file_id(&rf)?;

            return Ok(ResourceId {
                field_type: MoveFieldType::RegisterFile,
                unit,
                index: term.index,
                width: rf.width as UValue,
            });
        }

        if let Some(unit) = self.machine.immediate_unit(&term.unit).cloned() {
            if term.index >= unit.registers as UValue {
                return Err(IllegalMachine(format!(
                    "immediate unit `{}` has no register {}",
                    unit.name, term.index
                )));
            }

            let id = self.immediate_unit_id(&unit)?;

            return Ok(ResourceId {
                field_type: MoveFieldType::Immediate,
                unit: id,
                index: term.index,
                width: unit.width as UValue,
            });
        }

        if let Some(fu) = self.machine.function_unit(&term.unit).cloned() {
            let operation_name = term.port.as_deref().ok_or_else(|| {
                IllegalMachine(format!(
                    "operand reference to `{}` needs an operation name",
                    fu.name
                ))
            })?;

            let operation = fu.operation(operation_name).ok_or_else(|| {
                IllegalMachine(format!(
                    "function unit `{}` has no operation `{operation_name}`",
                    fu.name
                ))
            })?;

            if term.index > operation.operands as UValue {
                return Err(IllegalMachine(format!(
                    "operation `{operation_name}` has no operand {}",
                    term.index
                )));
            }

            let unit = self.function_unit_id(&fu.name)?;
            let index =
                self.op_or_port_id(&format!("{operation_name}.{}", term.index), ResourceType::Operand)?;
            let width = fu.ports.first().map(|port| port.width).unwrap_or(32);

            return Ok(ResourceId {
                field_type: MoveFieldType::Unit,
                unit,
                index,
                width: width as UValue,
            });
        }

        Err(IllegalMachine(format!(
            "`{}` names no register file, immediate unit or function unit",
            term.unit
        )))
    }

    /// Resolves `unit.port[.operation]`.
    fn function_unit_port_resource(
        &mut self,
        term: &crate::ast::FuTerm,
    ) -> Result<ResourceId, IllegalMachine> {
        let fu = self
            .machine
            .function_unit(&term.unit)
            .cloned()
            .ok_or_else(|| IllegalMachine(format!("no function unit named `{}`", term.unit)))?;

        let port = fu
            .port(&term.port)
            .ok_or_else(|| {
                IllegalMachine(format!(
                    "function unit `{}` has no port `{}`",
                    fu.name, term.port
                ))
            })?
            .clone();

        if let Some(operation) = &term.operation {
            if fu.operation(operation).is_none() {
                return Err(IllegalMachine(format!(
                    "function unit `{}` has no operation `{operation}`",
                    fu.name
                )));
            }
        }

        let unit = self.function_unit_id(&fu.name)?;

        let (key, kind) = match &term.operation {
            Some(operation) => {
                (format!("{}.{}.{operation}", fu.name, port.name), ResourceType::Operand)
            }
            None => (format!("{}.{}", fu.name, port.name), ResourceType::Port),
        };

        let index = self.op_or_port_id(&key, kind)?;

        Ok(ResourceId {
            field_type: MoveFieldType::Unit,
            unit,
            index,
            width: port.width as UValue,
        })
    }

    fn register_file_id(
        &mut self,
        rf: &crate::machine::RegisterFile,
    ) -> Result<UValue, IllegalMachine> {
        if let Some(&id) = self.register_file_ids.get(&rf.name) {
            return Ok(id);
        }

        let id = match rf.universal_id {
            Some(id) => id as UValue,
            None => {
                self.last_register_file_id += 1;
                self.last_register_file_id
            }
        };

        self.register_file_ids.insert(rf.name.clone(), id);
        self.add_resource_element(id, ResourceType::RegisterFile, &rf.name, rf.width)?;

        Ok(id)
    }

    fn function_unit_id(&mut self, name: &str) -> Result<UValue, IllegalMachine> {
        if let Some(&id) = self.function_unit_ids.get(name) {
            return Ok(id);
        }

        self.last_function_unit_id += 1;
        let id = self.last_function_unit_id;

        self.function_unit_ids.insert(name.to_string(), id);
        self.add_resource_element(id, ResourceType::Unit, name, 0)?;

        Ok(id)
    }

    fn immediate_unit_id(
        &mut self,
        unit: &crate::machine::ImmediateUnit,
    ) -> Result<UValue, IllegalMachine> {
        if let Some(&id) = self.immediate_unit_ids.get(&unit.name) {
            return Ok(id);
        }

        // Id 0 is the inline immediate unit.
        self.last_immediate_unit_id += 1;
        let id = self.last_immediate_unit_id;

        self.immediate_unit_ids.insert(unit.name.clone(), id);
        self.add_resource_element(id, ResourceType::ImmediateUnit, &unit.name, unit.width)?;

        Ok(id)
    }

    fn op_or_port_id(&mut self, key: &str, kind: ResourceType) -> Result<UValue, IllegalMachine> {
        if let Some(&id) = self.op_or_port_ids.get(key) {
            return Ok(id);
        }

        self.last_op_or_port_id += 1;
        let id = self.last_op_or_port_id;

        self.op_or_port_ids.insert(key.to_string(), id);
        self.add_resource_element(id, kind, key, 0)?;

        Ok(id)
    }

    fn add_resource_element(
        &mut self,
        id: UValue,
        kind: ResourceType,
        name: &str,
        info: u32,
    ) -> Result<(), IllegalMachine> {
        if id > u16::MAX as UValue {
            return Err(IllegalMachine(format!("resource id {id} overflows the id field")));
        }

        let name = self
            .string_chunk_ref(name)
            .map_err(|error| IllegalMachine(error.to_string()))?;

        let section = self
            .binary
            .section_by_id_mut(self.resources_id)
            .expect("the resource section always exists");

        let SectionData::Resources(elements) = &mut section.data else {
            unreachable!("the resource section holds resources");
        };

        let mut element = ResourceElement::new(id as u16, kind);
        element.name = Some(name);
        element.info = info;

        elements.push(element);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::IndexTerm;

    fn index_term(unit: &str, index: UValue) -> RegisterTerm {
        RegisterTerm::Index(IndexTerm { unit: unit.to_string(), port: None, index })
    }

    #[test]
    fn test_skeleton_sections() {
        let machine = Machine::universal();
        let resources = MachineResourceManager::new(&machine);
        let binary = resources.finish();

        assert_eq!(binary.section_count(), 4);
        assert!(binary.strings().is_some());
        assert_eq!(
            binary.section_count_of_type(tpef_object::SectionType::AddressSpaces),
            1
        );
    }

    #[test]
    fn test_universal_register_file_ids() {
        let machine = Machine::universal();
        let mut resources = MachineResourceManager::new(&machine);

        let resolved =
            resources.resource_id(&index_term("r", 5), 0, RequestType::Read).unwrap();

        assert_eq!(resolved.field_type, MoveFieldType::RegisterFile);
        assert_eq!(resolved.unit, 0x80);
        assert_eq!(resolved.index, 5);
        assert_eq!(resolved.width, 32);

        let boolean =
            resources.resource_id(&index_term("bool", 0), 0, RequestType::Guard).unwrap();
        assert_eq!(boolean.unit, 0x81);
        assert_eq!(boolean.width, 1);
    }

    #[test]
    fn test_memoization_is_per_request_type() {
        let machine = Machine::universal();
        let mut resources = MachineResourceManager::new(&machine);

        resources.resource_id(&index_term("r", 1), 0, RequestType::Read).unwrap();
        resources.resource_id(&index_term("r", 1), 0, RequestType::Write).unwrap();
        resources.resource_id(&index_term("r", 1), 0, RequestType::Read).unwrap();

        // One register file entry regardless of the number of lookups.
        let binary = resources.finish();
        let mr = binary.section_of_type(tpef_object::SectionType::Resources, 0).unwrap();
        assert_eq!(mr.as_resources().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_component() {
        let machine = Machine::universal();
        let mut resources = MachineResourceManager::new(&machine);

        assert!(resources.resource_id(&index_term("nosuch", 0), 0, RequestType::Read).is_err());
        assert!(resources.find_data_address_space("nowhere").is_err());
    }

    #[test]
    fn test_address_spaces_are_created_once() {
        let machine = Machine::universal();
        let mut resources = MachineResourceManager::new(&machine);

        let first = resources.find_data_address_space("universal_data").unwrap();
        let second = resources.find_data_address_space("universal_data").unwrap();
        let code = resources.code_address_space().unwrap();

        assert_eq!(first, second);
        assert_ne!(first, code);
        assert_eq!(resources.address_space_mau(first), 8);
    }
}
