//! The label manager.
//!
//! Accumulates labels, procedures, global-binding declarations and pending
//! relocations during parsing, and finalizes them into symbol and
//! relocation sections once the program sections exist. Relocations are
//! staged in an uncommitted set so a failing creator can roll its
//! additions back; `finalize` itself removes everything it added when it
//! fails, so the pipeline can be retried.

use std::collections::{BTreeMap, BTreeSet};

use tpef_object::refs::RefTarget;
use tpef_object::{
    RelocElement, RelocType, Section, SectionData, SectionId, SymbolElement, SymbolKind, Word,
};

use crate::ast::{LiteralOrExpression, UValue};
use crate::error::CompileError;
use crate::resources::MachineResourceManager;

#[derive(Debug, Clone)]
struct InternalLabel {
    /// Address-space element index of the label.
    aspace_index: Word,
    /// Name of the address space, for diagnostics and relocation sizing.
    space_name: String,
    /// Address value of the label.
    value: UValue,
}

/// A relocation pending until `finalize`.
#[derive(Debug, Clone)]
struct InternalRelocation {
    /// Section holding the patched element.
    location_section: SectionId,
    /// The patched element: a chunk or an instruction element.
    location: RefTarget,
    /// Address-space element index of the destination.
    dst_aspace_index: Word,
    /// Destination address.
    destination: UValue,
    /// Size of the relocated field in bits.
    bit_width: UValue,
}

/// Accumulates labels, procedures, globals and relocations, and builds the
/// symbol and relocation sections.
#[derive(Debug, Default)]
pub struct LabelManager {
    labels: BTreeMap<String, InternalLabel>,
    procedures: BTreeMap<String, UValue>,
    globals: BTreeSet<String>,
    relocs: Vec<InternalRelocation>,
    uncommitted_relocs: Vec<InternalRelocation>,
}

impl LabelManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a label by name.
    pub fn value(&self, name: &str) -> Result<UValue, CompileError> {
        self.labels
            .get(name)
            .map(|label| label.value)
            .ok_or_else(|| CompileError::new(0, format!("can't find value for label: {name}")))
    }

    /// Address-space element index of a label.
    pub fn aspace_index(&self, name: &str) -> Result<Word, CompileError> {
        self.labels.get(name).map(|label| label.aspace_index).ok_or_else(|| {
            CompileError::new(0, format!("can't find address space for label: {name}"))
        })
    }

    /// Name of the address space a label lives in.
    pub fn aspace_name(&self, name: &str) -> Result<&str, CompileError> {
        self.labels.get(name).map(|label| label.space_name.as_str()).ok_or_else(|| {
            CompileError::new(0, format!("can't find address space for label: {name}"))
        })
    }

    /// Adds a label. A label name may be defined once.
    pub fn add_label(
        &mut self,
        aspace_index: Word,
        space_name: &str,
        name: &str,
        value: UValue,
    ) -> Result<(), CompileError> {
        if self.labels.contains_key(name) {
            return Err(CompileError::new(0, format!("multiply defined label: {name}")));
        }

        self.labels.insert(
            name.to_string(),
            InternalLabel { aspace_index, space_name: space_name.to_string(), value },
        );

        Ok(())
    }

    /// Removes a label, for error cleanup.
    pub fn remove_label(&mut self, name: &str) {
        self.labels.remove(name);
    }

    /// Adds a procedure start.
    pub fn add_procedure(&mut self, name: &str, address: UValue) -> Result<(), CompileError> {
        if self.procedures.contains_key(name) {
            return Err(CompileError::new(0, format!("multiply defined procedure: {name}")));
        }

        self.procedures.insert(name.to_string(), address);

        Ok(())
    }

    /// Declares a label global.
    pub fn set_global(&mut self, name: &str) {
        self.globals.insert(name.to_string());
    }

    /// Stages a relocation of an immediate or data chunk.
    pub fn add_relocation(
        &mut self,
        location_section: SectionId,
        location: RefTarget,
        dst_aspace_index: Word,
        destination: UValue,
        bit_width: UValue,
    ) {
        self.uncommitted_relocs.push(InternalRelocation {
            location_section,
            location,
            dst_aspace_index,
            destination,
            bit_width,
        });
    }

    /// Drops relocations that were staged but not committed. Used for
    /// cleaning up in error cases.
    pub fn clear_last_relocations(&mut self) {
        self.uncommitted_relocs.clear();
    }

    /// Commits the staged relocations.
    pub fn commit_last_relocations(&mut self) {
        self.relocs.append(&mut self.uncommitted_relocs);
    }

    /// Resolves the value of a label expression, checking a spelled-out
    /// `=value` against the resolved one.
    pub fn resolve_expression_value(
        &self,
        line: u32,
        value: &LiteralOrExpression,
    ) -> Result<UValue, CompileError> {
        let LiteralOrExpression::Expression(expression) = value else {
            return Ok(value.literal_value());
        };

        let mut resolved = self.value(&expression.label).map_err(|mut error| {
            error.line = line;
            error
        })?;

        if let Some((minus, amount)) = expression.offset {
            if minus {
                resolved = resolved.wrapping_sub(amount);
            } else {
                resolved = resolved.wrapping_add(amount);
            }
        }

        if let Some(expected) = expression.value {
            if expected != resolved {
                return Err(CompileError::new(
                    line,
                    format!(
                        "defined expression value ({expected}) does not match with \
                         resolved ({resolved}) one"
                    ),
                ));
            }
        }

        Ok(resolved)
    }

    /// Creates the symbol and relocation tables for everything
    /// accumulated.
    ///
    /// All destinations must exist in the binary before this runs. On
    /// failure every section this method added is removed again, so it can
    /// be re-executed once the defect is fixed.
    pub fn finalize(&mut self, resources: &mut MachineResourceManager) -> Result<(), CompileError> {
        let mut added_sections: Vec<SectionId> = Vec::new();
        let mut consumed_globals: Vec<String> = Vec::new();

        let result =
            self.finalize_inner(resources, &mut added_sections, &mut consumed_globals);

        match result {
            Ok(()) => {
                self.labels.clear();
                self.procedures.clear();
                self.globals.clear();
                self.relocs.clear();
                self.uncommitted_relocs.clear();

                Ok(())
            }
            Err(error) => {
                for id in added_sections {
                    resources.binary_mut().remove_section(id);
                }
                self.globals.extend(consumed_globals);

                Err(error)
            }
        }
    }

    fn finalize_inner(
        &mut self,
        resources: &mut MachineResourceManager,
        added_sections: &mut Vec<SectionId>,
        consumed_globals: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        // The symbol section always exists, with the undefined symbol at
        // index 0.
        let undefined_aspace = resources.undefined_address_space();
        let strings_ref = {
            let strings_id = resources.string_section();
            resources.refs_mut().bound(RefTarget::Section(strings_id))
        };
        let null_target = RefTarget::Section(resources.null_section());
        let null_ref = resources.refs_mut().bound(null_target);
        let empty_name = resources
            .string_chunk_ref("")
            .map_err(|error| CompileError::new(0, error.to_string()))?;

        let mut symbols = Section::new(SectionData::Symbols(Vec::new()));
        symbols.aspace = Some(undefined_aspace);
        symbols.link = Some(strings_ref);
        symbols.name = Some(empty_name);

        let mut undefined = SymbolElement::undefined(Some(empty_name), Some(null_ref));
        undefined.absolute = true;

        symbols
            .as_symbols_mut()
            .expect("freshly created symbol section")
            .push(undefined);

        let symtab_id = resources.binary_mut().add_section(symbols);
        added_sections.push(symtab_id);

        let undefined_symbol_target = RefTarget::Element(symtab_id, 0);

        // Code and data labels.
        let labels: Vec<(String, InternalLabel)> =
            self.labels.iter().map(|(name, label)| (name.clone(), label.clone())).collect();

        for (name, label) in &labels {
            let owner = find_section_by_address(resources, label)
                .ok_or_else(|| {
                    CompileError::new(
                        0,
                        format!(
                            "label `{name}` points outside every section of address space \
                             `{}`",
                            label.space_name
                        ),
                    )
                })?;

            let kind = symbol_kind_for_label(resources, owner, label)?;

            let name_chunk = resources
                .string_chunk_ref(name)
                .map_err(|error| CompileError::new(0, error.to_string()))?;
            let owner_ref = resources.refs_mut().bound(RefTarget::Section(owner));

            let mut symbol = SymbolElement::new(kind);
            symbol.name = Some(name_chunk);
            symbol.section = Some(owner_ref);
            symbol.absolute = false;

            if self.globals.remove(name.as_str()) {
                consumed_globals.push(name.clone());
                symbol.binding = tpef_object::SymbolBinding::Global;
            }

            push_symbol(resources, symtab_id, symbol);
        }

        // A global declaration without a matching label is an error.
        if let Some(orphan) = self.globals.iter().next() {
            return Err(CompileError::new(
                0,
                format!("can't set label to be global: {orphan} is undefined"),
            ));
        }

        // Procedure symbols.
        let code_id = resources
            .binary()
            .section_of_type(tpef_object::SectionType::Code, 0)
            .map(|section| section.id());

        match code_id {
            Some(code_id) => {
                self.write_procedure_symbols(resources, code_id, symtab_id)?;
            }
            None => {
                if let Some((name, _)) = self.procedures.iter().next() {
                    return Err(CompileError::new(
                        0,
                        format!("invalid procedure declaration: {name}"),
                    ));
                }
            }
        }

        // Relocations.
        let relocs = std::mem::take(&mut self.relocs);
        let result = self.write_relocations(
            resources,
            &relocs,
            symtab_id,
            undefined_symbol_target,
            added_sections,
        );

        if result.is_err() {
            self.relocs = relocs;
        }

        result
    }

    fn write_procedure_symbols(
        &self,
        resources: &mut MachineResourceManager,
        code_id: SectionId,
        symtab_id: SectionId,
    ) -> Result<(), CompileError> {
        for (name, &address) in &self.procedures {
            let (start, instruction_count) = {
                let section = resources
                    .binary()
                    .section_by_id(code_id)
                    .expect("the code section id was just resolved");

                let code = section
                    .as_code()
                    .map_err(|error| CompileError::new(0, error.to_string()))?;

                (section.starting_address as UValue, code.instruction_count() as UValue)
            };

            if address >= start + instruction_count {
                return Err(CompileError::new(
                    0,
                    format!("invalid procedure declaration: {name}"),
                ));
            }

            let element_index = {
                let section = resources.binary().section_by_id(code_id).expect("resolved above");
                section
                    .as_code()
                    .expect("checked above")
                    .instruction_to_section_index((address - start) as Word)
                    .map_err(|error| CompileError::new(0, error.to_string()))?
            };

            let reference =
                resources.refs_mut().bound(RefTarget::Element(code_id, element_index));
            let name_chunk = resources
                .string_chunk_ref(name)
                .map_err(|error| CompileError::new(0, error.to_string()))?;
            let section_ref = resources.refs_mut().bound(RefTarget::Section(code_id));

            let mut symbol = SymbolElement::new(SymbolKind::Procedure {
                reference: Some(reference),
                size: 0,
            });
            symbol.name = Some(name_chunk);
            symbol.section = Some(section_ref);
            symbol.absolute = false;

            push_symbol(resources, symtab_id, symbol);
        }

        Ok(())
    }

    fn write_relocations(
        &self,
        resources: &mut MachineResourceManager,
        relocs: &[InternalRelocation],
        symtab_id: SectionId,
        undefined_symbol: RefTarget,
        added_sections: &mut Vec<SectionId>,
    ) -> Result<(), CompileError> {
        for reloc in relocs {
            let reloc_section_id = self.find_or_create_relocation_section(
                resources,
                reloc.location_section,
                symtab_id,
                added_sections,
            )?;

            let destination =
                find_relocation_destination(resources, reloc).ok_or_else(|| {
                    CompileError::new(
                        0,
                        format!(
                            "can't find destination section for address {} of address \
                             space element {}",
                            reloc.destination, reloc.dst_aspace_index
                        ),
                    )
                })?;

            let aspace_target = resources.address_space_target(reloc.dst_aspace_index);

            let location_ref = resources.refs_mut().bound(reloc.location);
            let destination_ref = resources.refs_mut().bound(destination);
            let aspace_ref = resources.refs_mut().bound(aspace_target);
            let symbol_ref = resources.refs_mut().bound(undefined_symbol);

            let element = RelocElement {
                kind: RelocType::SelfRel,
                size: reloc.bit_width as u8,
                bit_offset: 0,
                location: Some(location_ref),
                destination: Some(destination_ref),
                aspace: Some(aspace_ref),
                symbol: Some(symbol_ref),
                chunked: false,
            };

            let section = resources
                .binary_mut()
                .section_by_id_mut(reloc_section_id)
                .expect("the relocation section was just found or created");

            section
                .as_relocs_mut()
                .expect("relocation sections hold relocations")
                .elements
                .push(element);
        }

        Ok(())
    }

    fn find_or_create_relocation_section(
        &self,
        resources: &mut MachineResourceManager,
        location_section: SectionId,
        symtab_id: SectionId,
        added_sections: &mut Vec<SectionId>,
    ) -> Result<SectionId, CompileError> {
        // The reference table is folded only at the end of assembly, so
        // resolve through the live manager.
        let existing = resources.binary().sections().iter().find_map(|section| {
            let SectionData::Relocs(relocs) = &section.data else {
                return None;
            };

            let reference = relocs.referenced_section?;
            let referenced = resources.refs().target_of(reference)?;

            (referenced == RefTarget::Section(location_section)).then(|| section.id())
        });

        if let Some(id) = existing {
            return Ok(id);
        }

        let undefined_aspace = resources.undefined_address_space();
        let empty_name = resources
            .string_chunk_ref("")
            .map_err(|error| CompileError::new(0, error.to_string()))?;
        let referenced = resources.refs_mut().bound(RefTarget::Section(location_section));
        let symtab_ref = resources.refs_mut().bound(RefTarget::Section(symtab_id));

        let mut section = Section::new(SectionData::Relocs(Default::default()));
        section.aspace = Some(undefined_aspace);
        section.link = Some(symtab_ref);
        section.name = Some(empty_name);
        section
            .as_relocs_mut()
            .expect("freshly created relocation section")
            .referenced_section = Some(referenced);

        let id = resources.binary_mut().add_section(section);
        added_sections.push(id);

        Ok(id)
    }
}

/// The section containing the address stored in a label.
fn find_section_by_address(
    resources: &MachineResourceManager,
    label: &InternalLabel,
) -> Option<SectionId> {
    let aspace_target = resources.address_space_target(label.aspace_index);
    let mau_bits = resources.address_space_mau(label.aspace_index).max(8);
    let bytes_per_mau = mau_bits.div_ceil(8);

    for section in resources.binary().sections() {
        let Some(section_aspace) = section.aspace else {
            continue;
        };

        // References are still live in the manager at this point.
        if resources.refs().target_of(section_aspace) != Some(aspace_target) {
            continue;
        }

        let start = section.starting_address as UValue;
        if label.value < start {
            continue;
        }

        let relative = label.value - start;

        match &section.data {
            SectionData::Code(code) => {
                if relative < code.instruction_count() as UValue {
                    return Some(section.id());
                }
            }
            SectionData::Data(_) | SectionData::UData { .. } => {
                let length_in_maus =
                    section.length().unwrap_or(0) as UValue / bytes_per_mau as UValue;

                if relative < length_in_maus {
                    return Some(section.id());
                }
            }
            _ => {}
        }
    }

    None
}

fn symbol_kind_for_label(
    resources: &mut MachineResourceManager,
    owner: SectionId,
    label: &InternalLabel,
) -> Result<SymbolKind, CompileError> {
    let mau_bits = resources.address_space_mau(label.aspace_index).max(8);
    let bytes_per_mau = mau_bits.div_ceil(8);

    let (is_code, start) = {
        let section = resources.binary().section_by_id(owner).expect("owner was just found");

        (matches!(section.data, SectionData::Code(_)), section.starting_address as UValue)
    };

    let relative = (label.value - start) as Word;

    if is_code {
        let element_index = {
            let section = resources.binary().section_by_id(owner).expect("owner exists");
            section
                .as_code()
                .expect("code sections hold instructions")
                .instruction_to_section_index(relative)
                .map_err(|error| CompileError::new(0, error.to_string()))?
        };

        let reference = resources.refs_mut().bound(RefTarget::Element(owner, element_index));

        Ok(SymbolKind::Code { reference: Some(reference), size: 0 })
    } else {
        let offset = relative * bytes_per_mau;
        let reference = resources.refs_mut().bound(RefTarget::Chunk(owner, offset));

        Ok(SymbolKind::Data { reference: Some(reference), size: 0 })
    }
}

fn push_symbol(
    resources: &mut MachineResourceManager,
    symtab_id: SectionId,
    symbol: SymbolElement,
) {
    resources
        .binary_mut()
        .section_by_id_mut(symtab_id)
        .expect("the symbol section was just added")
        .as_symbols_mut()
        .expect("symbol sections hold symbols")
        .push(symbol);
}

/// The destination element of a relocation, found by address-space match
/// and address range.
fn find_relocation_destination(
    resources: &mut MachineResourceManager,
    reloc: &InternalRelocation,
) -> Option<RefTarget> {
    let label = InternalLabel {
        aspace_index: reloc.dst_aspace_index,
        space_name: String::new(),
        value: reloc.destination,
    };

    let owner = find_section_by_address(resources, &label)?;
    let mau_bits = resources.address_space_mau(reloc.dst_aspace_index).max(8);
    let bytes_per_mau = mau_bits.div_ceil(8);

    let section = resources.binary().section_by_id(owner)?;
    let relative = (reloc.destination - section.starting_address as UValue) as Word;

    match &section.data {
        SectionData::Code(code) => {
            let element_index = code.instruction_to_section_index(relative).ok()?;

            Some(RefTarget::Element(owner, element_index))
        }
        _ => Some(RefTarget::Chunk(owner, relative * bytes_per_mau)),
    }
}
