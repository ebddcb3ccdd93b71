//! Read-side textual disassembly of code sections.
//!
//! Inline immediates are matched to their consuming move by destination
//! unit and index inside one bundle; long immediates get their own slot in
//! the output. The rendering follows the assembler's source syntax, so a
//! disassembled move reads back the way it was written.

use std::fmt::Write as _;

use crate::base::*;
use crate::instruction::*;
use crate::section::{ModelError, SectionData};
use crate::{Binary, ResourceElement, Section};

/// Disassembles one code section of a binary.
pub struct Disassembler<'a> {
    binary: &'a Binary,
    code: &'a Section,
}

impl<'a> Disassembler<'a> {
    /// Creates a disassembler over the given code section.
    pub fn new(binary: &'a Binary, code: &'a Section) -> Result<Self, ModelError> {
        code.as_code()?;

        Ok(Self { binary, code })
    }

    /// Creates a disassembler over the binary's first code section.
    pub fn first_code_section(binary: &'a Binary) -> Option<Self> {
        let code = binary
            .sections()
            .iter()
            .find(|section| matches!(section.data, SectionData::Code(_)))?;

        Some(Self { binary, code })
    }

    /// Number of instructions in the section.
    pub fn instruction_count(&self) -> Word {
        self.code.as_code().map(|code| code.instruction_count()).unwrap_or(0)
    }

    /// Renders instruction `index` as one line of assembly.
    pub fn instruction(&self, index: Word) -> Result<String, ModelError> {
        let code = self.code.as_code()?;

        let start = code.instruction_to_section_index(index)?;
        let mut end = start + 1;
        while end < code.element_count() && !code.element(end)?.begin {
            end += 1;
        }

        let bundle: Vec<&InstructionElement> =
            (start..end).map(|i| code.element(i)).collect::<Result<_, _>>()?;

        let mut slots: Vec<String> = Vec::new();
        let mut long_immediates: Vec<String> = Vec::new();

        for element in &bundle {
            match &element.body {
                InstructionBody::Move(element) => {
                    slots.push(self.render_move(element, &bundle)?);
                }
                InstructionBody::Immediate(immediate) => {
                    if immediate.destination_unit as HalfWord == ResourceElement::INLINE_IMM
                        && consumed_inline(immediate, &bundle)
                    {
                        // Rendered as the source of its consuming move.
                        continue;
                    }

                    long_immediates.push(format!(
                        "[imm{}.{}={:#x}]",
                        immediate.destination_unit,
                        immediate.destination_index,
                        immediate.word()?
                    ));
                }
            }
        }

        let mut line = String::new();

        if slots.is_empty() && long_immediates.is_empty() {
            line.push_str(". . .");
        } else {
            line.push_str(&slots.join(", "));
        }

        for immediate in long_immediates {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&immediate);
        }

        Ok(line)
    }

    fn render_move(
        &self,
        element: &MoveElement,
        bundle: &[&InstructionElement],
    ) -> Result<String, ModelError> {
        if element.empty {
            return Ok("...".to_string());
        }

        let mut text = String::new();

        if element.guarded {
            text.push(if element.guard_inverted { '!' } else { '?' });
            let term = self.render_term(
                element.guard_type,
                element.guard_unit,
                element.guard_index,
            );
            write!(text, "{term} ").expect("writing to a string cannot fail");
        }

        let source = if element.source_type == MoveFieldType::Immediate
            && element.source_unit as HalfWord == ResourceElement::INLINE_IMM
        {
            match inline_immediate(bundle, element.source_index) {
                Some(immediate) => format!("{:#x}", immediate.word()?),
                None => format!("imm{}.{}", element.source_unit, element.source_index),
            }
        } else {
            self.render_term(element.source_type, element.source_unit, element.source_index)
        };

        let destination = self.render_term(
            element.destination_type,
            element.destination_unit,
            element.destination_index,
        );

        write!(text, "{source} -> {destination}").expect("writing to a string cannot fail");

        Ok(text)
    }

    fn render_term(&self, field_type: MoveFieldType, unit: Byte, index: HalfWord) -> String {
        let kind = match field_type {
            MoveFieldType::RegisterFile => crate::ResourceType::RegisterFile,
            MoveFieldType::Unit => crate::ResourceType::Unit,
            MoveFieldType::Immediate => crate::ResourceType::ImmediateUnit,
            MoveFieldType::Null => return format!("null.{index}"),
        };

        // Prefer the machine-resource name when the binary carries one.
        match crate::tools::resource_name(self.binary, kind, unit as HalfWord) {
            Ok(name) if !name.is_empty() => format!("{name}.{index}"),
            _ => match field_type {
                MoveFieldType::RegisterFile => format!("rf{unit}.{index}"),
                MoveFieldType::Unit => format!("fu{unit}.{index}"),
                MoveFieldType::Immediate => format!("imm{unit}.{index}"),
                MoveFieldType::Null => unreachable!(),
            },
        }
    }
}

fn inline_immediate<'b>(
    bundle: &'b [&InstructionElement],
    index: HalfWord,
) -> Option<&'b ImmediateElement> {
    bundle.iter().find_map(|element| {
        let immediate = element.as_immediate()?;

        (immediate.destination_unit as HalfWord == ResourceElement::INLINE_IMM
            && immediate.destination_index as HalfWord == index)
            .then_some(immediate)
    })
}

fn consumed_inline(immediate: &ImmediateElement, bundle: &[&InstructionElement]) -> bool {
    bundle.iter().any(|element| {
        element.as_move().is_some_and(|m| {
            !m.empty
                && m.source_type == MoveFieldType::Immediate
                && m.source_unit == immediate.destination_unit
                && m.source_index == immediate.destination_index as HalfWord
        })
    })
}
