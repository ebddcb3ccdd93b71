//! The data-section creator.
//!
//! Groups parsed data lines into internal sections keyed by address space
//! and by initialized/uninitialized and fixed/flowing start addresses,
//! resolves the layout, and emits TPEF data and uninitialized-data
//! sections on `finalize`. Expression-bearing init fields register pending
//! relocations against the referred address space. A failing `finalize`
//! removes everything it added, so the creator can be retried.

use std::collections::HashMap;

use tpef_object::refs::RefTarget;
use tpef_object::{
    required_bits, required_bits_signed, Section, SectionData, SectionId, Word,
};

use crate::ast::{DataLine, LiteralOrExpression, SValue, UValue};
use crate::error::CompileError;
use crate::labels::LabelManager;
use crate::resources::MachineResourceManager;

#[derive(Debug, Default, Clone)]
struct InternalSection {
    initialized: bool,
    fixed_start_address: bool,
    start_address: UValue,
    address_space: String,
    /// Length in MAUs, resolved during finalize.
    length: UValue,
    lines: Vec<DataLine>,
}

/// Builds the data and uninitialized-data sections from parsed data lines.
#[derive(Debug, Default)]
pub struct DataSectionCreator {
    sections: Vec<InternalSection>,
    current_start_address: UValue,
    is_start_address_defined: bool,
}

impl DataSectionCreator {
    /// Creates an empty creator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a fixed address for the next data area definition.
    pub fn set_area_start_address(&mut self, address: UValue) {
        self.current_start_address = address;
        self.is_start_address_defined = true;
    }

    /// Adds a parsed data line.
    pub fn add_data_line(&mut self, line: DataLine) {
        // Reuse the last section of the same address space when the
        // initialized-ness matches and no fixed address is pending; a
        // fixed address always opens a new section.
        let fixed_pending = self.is_start_address_defined;

        let found = self
            .sections
            .iter_mut()
            .rev()
            .find(|section| section.address_space == line.data_space)
            .filter(|section| {
                section.initialized != line.init_data.is_empty() && !fixed_pending
            });

        match found {
            Some(section) => section.lines.push(line),
            None => {
                let section = InternalSection {
                    initialized: !line.init_data.is_empty(),
                    fixed_start_address: self.is_start_address_defined,
                    start_address: self.current_start_address,
                    address_space: line.data_space.clone(),
                    length: 0,
                    lines: vec![line],
                };

                self.sections.push(section);

                self.is_start_address_defined = false;
                self.current_start_address = 0;
            }
        }
    }

    /// Frees all internally allocated data.
    pub fn cleanup(&mut self) {
        self.sections.clear();
        self.current_start_address = 0;
        self.is_start_address_defined = false;
    }

    /// Writes the created sections to the binary.
    ///
    /// On error the creator restores the label manager and the binary to
    /// their pre-call state, so this method may be retried after the
    /// defect is fixed.
    pub fn finalize(
        &mut self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
    ) -> Result<(), CompileError> {
        let mut added_labels: Vec<String> = Vec::new();
        let mut added_sections: Vec<SectionId> = Vec::new();

        let result = self.finalize_inner(resources, labels, &mut added_labels, &mut added_sections);

        match result {
            Ok(()) => {
                labels.commit_last_relocations();
                self.cleanup();

                Ok(())
            }
            Err(error) => {
                labels.clear_last_relocations();

                for name in added_labels {
                    labels.remove_label(&name);
                }

                for id in added_sections {
                    resources.binary_mut().remove_section(id);
                }

                Err(error)
            }
        }
    }

    fn finalize_inner(
        &mut self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
        added_labels: &mut Vec<String>,
        added_sections: &mut Vec<SectionId>,
    ) -> Result<(), CompileError> {
        self.resolve_sizes_and_label_addresses(resources, labels, added_labels)?;

        let sections = self.sections.clone();

        for internal in &sections {
            let aspace_index = resources
                .find_data_address_space(&internal.address_space)
                .map_err(|error| {
                    let line = internal.lines.first().map(|l| l.line).unwrap_or(0);

                    error.into_compile_error(line)
                })?;

            let mau_bits = resources.address_space_mau(aspace_index).max(1);
            let byte_length =
                Section::maus_to_bytes(mau_bits, internal.length as Word);

            let aspace_ref = {
                let target = resources.address_space_target(aspace_index);
                resources.refs_mut().bound(target)
            };
            let null_ref = {
                let null_id = resources.null_section();
                resources.refs_mut().bound(RefTarget::Section(null_id))
            };
            let name_ref = resources
                .string_chunk_ref("")
                .map_err(|error| CompileError::new(0, error.to_string()))?;

            let data = if internal.initialized {
                SectionData::Data(vec![0; byte_length as usize])
            } else {
                SectionData::UData { length: byte_length }
            };

            let mut section = Section::new(data);
            section.aspace = Some(aspace_ref);
            section.link = Some(null_ref);
            section.name = Some(name_ref);
            section.starting_address = internal.start_address as Word;

            let section_id = resources.binary_mut().add_section(section);
            added_sections.push(section_id);

            if internal.initialized {
                let mut mau_index: UValue = 0;

                for line in &internal.lines {
                    mau_index += self.write_data_line(
                        resources,
                        labels,
                        section_id,
                        aspace_index,
                        mau_bits,
                        line,
                        mau_index,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Resolves data area sizes and addresses and registers data labels.
    fn resolve_sizes_and_label_addresses(
        &mut self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
        added_labels: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        let mut used_maus: HashMap<String, UValue> = HashMap::new();

        for section in &mut self.sections {
            let space_last_address =
                used_maus.get(&section.address_space).copied().unwrap_or(0);

            if section.fixed_start_address {
                if space_last_address > section.start_address {
                    let line = section.lines.first().map(|l| l.line).unwrap_or(0);

                    return Err(CompileError::new(
                        line,
                        format!(
                            "can't start data section from address {}; first unused \
                             address in address space {} is {space_last_address}",
                            section.start_address, section.address_space
                        ),
                    ));
                }
            } else {
                section.start_address = space_last_address;
            }

            section.fixed_start_address = true;

            let aspace_index = resources
                .find_data_address_space(&section.address_space)
                .map_err(|error| {
                    let line = section.lines.first().map(|l| l.line).unwrap_or(0);

                    error.into_compile_error(line)
                })?;

            let mut line_address = section.start_address;

            for line in &section.lines {
                for label in &line.labels {
                    labels
                        .add_label(aspace_index, &section.address_space, label, line_address)
                        .map_err(|mut error| {
                            error.line = line.line;
                            error
                        })?;

                    added_labels.push(label.clone());
                }

                line_address += line.width;
            }

            section.length = line_address - section.start_address;
            used_maus.insert(section.address_space.clone(), line_address);
        }

        Ok(())
    }

    /// Writes one data line into the section; returns the MAUs it
    /// reserved.
    #[allow(clippy::too_many_arguments)]
    fn write_data_line(
        &self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
        section_id: SectionId,
        aspace_index: Word,
        mau_bits: u32,
        line: &DataLine,
        mau_index: UValue,
    ) -> Result<UValue, CompileError> {
        let mut written_maus: UValue = 0;

        for field in &line.init_data {
            let (value, signed) = match &field.value {
                LiteralOrExpression::Literal { value, signed } => (*value, *signed),
                expression => (labels.resolve_expression_value(line.line, expression)?, false),
            };

            let mut used_maus = size_in_maus(value, mau_bits, signed);

            // An explicit width wins, as long as the value fits it.
            if field.width != 0 {
                if used_maus > field.width {
                    return Err(CompileError::new(
                        line.line,
                        format!(
                            "init field contains too long value; reserved MAUs: {} \
                             needed MAUs: {used_maus}",
                            field.width
                        ),
                    ));
                }

                used_maus = field.width;
            }

            if written_maus + used_maus > line.width {
                return Err(CompileError::new(
                    line.line,
                    format!(
                        "data line contains too much init data; reserved MAUs: {} \
                         already inited MAUs: {written_maus}",
                        line.width
                    ),
                ));
            }

            let section = resources
                .binary_mut()
                .section_by_id_mut(section_id)
                .expect("the data section was just added");

            let index = (mau_index + written_maus) as Word;
            let count = used_maus as Word;

            let write_result = if signed {
                section.write_value_signed(mau_bits, index, count, value as SValue)
            } else {
                section.write_value_unsigned(mau_bits, index, count, value)
            };

            write_result.map_err(|error| {
                CompileError::new(line.line, error.to_string()).with_cause(error)
            })?;

            if field.value.is_expression() {
                let offset = Section::maus_to_bytes(mau_bits, index);

                labels.add_relocation(
                    section_id,
                    RefTarget::Chunk(section_id, offset),
                    aspace_index,
                    value,
                    used_maus * mau_bits as UValue,
                );
            }

            written_maus += used_maus;
        }

        // An underfull line gets one explicit zero MAU; the rest of the
        // reservation is already zero-filled.
        if written_maus < line.width {
            let section = resources
                .binary_mut()
                .section_by_id_mut(section_id)
                .expect("the data section was just added");

            section
                .write_value_unsigned(mau_bits, (mau_index + written_maus) as Word, 1, 0)
                .map_err(|error| CompileError::new(line.line, error.to_string()))?;
        }

        Ok(line.width)
    }
}

/// Minimum number of MAUs of `mau_bits` bits needed to encode a value.
fn size_in_maus(value: UValue, mau_bits: u32, signed: bool) -> UValue {
    let needed_bits =
        if signed { required_bits_signed(value as SValue) } else { required_bits(value) };

    needed_bits.div_ceil(mau_bits) as UValue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_maus() {
        assert_eq!(size_in_maus(0, 8, false), 1);
        assert_eq!(size_in_maus(255, 8, false), 1);
        assert_eq!(size_in_maus(256, 8, false), 2);
        assert_eq!(size_in_maus(3, 2, false), 1);
        assert_eq!(size_in_maus(4, 2, false), 2);
        assert_eq!(size_in_maus((-1i64) as UValue, 8, true), 1);
        assert_eq!(size_in_maus((-129i64) as UValue, 8, true), 2);
    }
}
