//! The code-section creator.
//!
//! Consumes parsed moves into an internal section, resolving machine
//! resources as it goes, and emits the TPEF code section on `finalize`.
//! Expression-bearing immediates register pending relocations against the
//! referred address space. A failing `finalize` removes everything it
//! added, so the creator can be retried after the defect is fixed.

use tpef_object::refs::RefTarget;
use tpef_object::{
    required_bits, Byte, HalfWord, ImmediateElement, InstructionAnnotation, InstructionElement,
    MoveElement, MoveFieldType, ResourceElement, Section, SectionData, Word,
};

use crate::ast::*;
use crate::diagnostics::AssemblyParserDiagnostic;
use crate::error::CompileError;
use crate::labels::LabelManager;
use crate::resources::{MachineResourceManager, RequestType};

/// Relocation width used when the referred address space's size is
/// unknown.
const CODE_RELOC_SIZE: UValue = 32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum InternalKind {
    #[default]
    Empty,
    Move,
    Immediate,
}

/// One move or immediate of the internal section.
#[derive(Debug, Default, Clone)]
struct InternalElement {
    kind: InternalKind,
    is_begin: bool,
    slot: UValue,
    line: u32,
    annotations: Vec<Annotation>,

    src_type: MoveFieldType,
    src_unit: UValue,
    src_index: UValue,
    dst_type: MoveFieldType,
    dst_unit: UValue,
    dst_index: UValue,
    guard_type: MoveFieldType,
    guard_unit: UValue,
    guard_index: UValue,
    guarded: bool,
    inverted: bool,

    imm_value: Option<LiteralOrExpression>,
}

/// Builds the code section from parsed moves.
#[derive(Debug, Default)]
pub struct CodeSectionCreator {
    start_address: UValue,
    elements: Vec<InternalElement>,
    slot_number: UValue,
    immediate_index: UValue,
}

impl CodeSectionCreator {
    /// Creates an empty creator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new code section from the given start address.
    ///
    /// Only one code section is supported; a second header restarts the
    /// address.
    pub fn new_section(&mut self, start_address: UValue) {
        self.start_address = start_address;
    }

    /// Start address of the section being built.
    pub fn start_address(&self) -> UValue {
        self.start_address
    }

    /// Adds a parsed move to the section.
    ///
    /// If an error is raised, the creator remains as it was before the
    /// call.
    pub fn add_move(
        &mut self,
        resources: &mut MachineResourceManager,
        diagnostics: &mut AssemblyParserDiagnostic,
        parsed: &ParserMove,
    ) -> Result<(), CompileError> {
        if parsed.is_begin {
            self.start_new_instruction();
        }

        match &parsed.body {
            ParserMoveBody::LongImmediate { destination, value } => {
                self.add_long_immediate(resources, parsed, destination, value)
            }
            ParserMoveBody::Empty => {
                let slot = self.slot_number();

                self.elements.push(InternalElement {
                    kind: InternalKind::Empty,
                    is_begin: parsed.is_begin,
                    slot,
                    line: parsed.line,
                    ..Default::default()
                });

                Ok(())
            }
            ParserMoveBody::Transport { guard, source, destination } => {
                self.add_transport(resources, diagnostics, parsed, guard, source, destination)
            }
        }
    }

    fn add_long_immediate(
        &mut self,
        resources: &mut MachineResourceManager,
        parsed: &ParserMove,
        destination: &RegisterTerm,
        value: &LiteralOrExpression,
    ) -> Result<(), CompileError> {
        let resolved = resources
            .resource_id(destination, self.slot_number, RequestType::Write)
            .map_err(|error| error.into_compile_error(parsed.line))?;

        if resolved.field_type != MoveFieldType::Immediate {
            return Err(CompileError::new(
                parsed.line,
                "long immediate destination must be immediate unit",
            ));
        }

        self.elements.push(InternalElement {
            kind: InternalKind::Immediate,
            is_begin: false,
            slot: 0,
            line: parsed.line,
            annotations: parsed.annotations.clone(),
            dst_type: resolved.field_type,
            dst_unit: resolved.unit,
            dst_index: resolved.index,
            imm_value: Some(value.clone()),
            ..Default::default()
        });

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_transport(
        &mut self,
        resources: &mut MachineResourceManager,
        diagnostics: &mut AssemblyParserDiagnostic,
        parsed: &ParserMove,
        guard: &Option<ParserGuard>,
        source: &ParserSource,
        destination: &RegisterTerm,
    ) -> Result<(), CompileError> {
        let slot = self.slot_number();

        let mut element = InternalElement {
            kind: InternalKind::Move,
            is_begin: parsed.is_begin,
            slot,
            line: parsed.line,
            annotations: parsed.annotations.clone(),
            ..Default::default()
        };

        let mut inline_immediate: Option<InternalElement> = None;
        let source_width;

        match source {
            ParserSource::Register(term) => {
                let resolved = resources
                    .resource_id(term, slot, RequestType::Read)
                    .map_err(|error| error.into_compile_error(parsed.line))?;

                element.src_type = resolved.field_type;
                element.src_unit = resolved.unit;
                element.src_index = resolved.index;
                source_width = resolved.width;
            }
            ParserSource::Immediate(value) => {
                let index = self.immediate_index();

                inline_immediate = Some(InternalElement {
                    kind: InternalKind::Immediate,
                    is_begin: false,
                    slot,
                    line: parsed.line,
                    dst_unit: ResourceElement::INLINE_IMM as UValue,
                    dst_index: index,
                    imm_value: Some(value.clone()),
                    ..Default::default()
                });

                element.src_type = MoveFieldType::Immediate;
                element.src_unit = ResourceElement::INLINE_IMM as UValue;
                element.src_index = index;
                source_width = value_bit_width(value.literal_value());
            }
        }

        let resolved = resources
            .resource_id(destination, slot, RequestType::Write)
            .map_err(|error| error.into_compile_error(parsed.line))?;

        element.dst_type = resolved.field_type;
        element.dst_unit = resolved.unit;
        element.dst_index = resolved.index;
        let destination_width = resolved.width;

        if let Some(guard) = guard {
            element.guarded = true;
            element.inverted = guard.inverted;

            let request =
                if guard.inverted { RequestType::InvGuard } else { RequestType::Guard };
            let resolved = resources
                .resource_id(&guard.term, slot, request)
                .map_err(|error| error.into_compile_error(parsed.line))?;

            element.guard_type = resolved.field_type;
            element.guard_unit = resolved.unit;
            element.guard_index = resolved.index;
        }

        if self.is_destination_already_written(&element) {
            diagnostics.add_warning(
                parsed.line,
                format!(
                    "move destination: {destination} is already written in current \
                     instruction"
                ),
            );
        }

        // Enough buses, wide enough, for all parsed moves.
        match resources.find_bus_width(slot) {
            Some(bus_width) => {
                if (bus_width as UValue) < source_width {
                    diagnostics.add_warning(parsed.line, "bus width is smaller than source");
                }
            }
            None => {
                return Err(CompileError::new(parsed.line, "too many bus slots used"));
            }
        }

        if destination_width < source_width {
            diagnostics.add_warning(parsed.line, "source is wider than destination");
        }

        self.elements.push(element);

        if let Some(immediate) = inline_immediate {
            self.elements.push(immediate);
        }

        Ok(())
    }

    /// Writes the created section and its relocations to the binary.
    ///
    /// On error the creator and the binary are restored to their pre-call
    /// state, so this method may be retried after the defect is fixed.
    pub fn finalize(
        &mut self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
    ) -> Result<(), CompileError> {
        if self.elements.is_empty() {
            self.cleanup();

            return Ok(());
        }

        let code_aspace = resources.code_address_space().map_err(|error| {
            CompileError::new(self.elements[0].line, "can't find code address space")
                .with_cause(error)
        })?;

        let aspace_ref = {
            let target = resources.address_space_target(code_aspace);
            resources.refs_mut().bound(target)
        };
        let link_ref = {
            let resource_id = resources.resource_section();
            resources.refs_mut().bound(RefTarget::Section(resource_id))
        };
        let name_ref = resources
            .string_chunk_ref("")
            .map_err(|error| CompileError::new(0, error.to_string()))?;

        let mut section = Section::new(SectionData::Code(Default::default()));
        section.aspace = Some(aspace_ref);
        section.link = Some(link_ref);
        section.name = Some(name_ref);
        section.starting_address = self.start_address as Word;

        let code_id = resources.binary_mut().add_section(section);

        let result = self.emit_elements(resources, labels, code_id);

        match result {
            Ok(()) => {
                labels.commit_last_relocations();
                self.cleanup();

                Ok(())
            }
            Err(error) => {
                labels.clear_last_relocations();
                resources.binary_mut().remove_section(code_id);

                Err(error)
            }
        }
    }

    fn emit_elements(
        &self,
        resources: &mut MachineResourceManager,
        labels: &mut LabelManager,
        code_id: tpef_object::SectionId,
    ) -> Result<(), CompileError> {
        for (position, internal) in self.elements.iter().enumerate() {
            let element_index = position as Word;

            let element = match internal.kind {
                InternalKind::Empty => InstructionElement::from_move(MoveElement {
                    empty: true,
                    bus: narrow_byte(internal.slot + 1, internal.line, "bus")?,
                    ..Default::default()
                }),

                InternalKind::Immediate => {
                    let value = match internal.imm_value.as_ref() {
                        Some(value) if value.is_expression() => {
                            let resolved = labels
                                .resolve_expression_value(internal.line, value)?;

                            let LiteralOrExpression::Expression(expression) = value else {
                                unreachable!("is_expression was just checked");
                            };

                            let aspace_index = labels
                                .aspace_index(&expression.label)
                                .map_err(|mut error| {
                                    error.line = internal.line;
                                    error
                                })?;

                            // The relocation width follows the highest
                            // address of the referred space.
                            let space_name = labels
                                .aspace_name(&expression.label)
                                .unwrap_or_default()
                                .to_string();
                            let reloc_size = relocation_size(resources, &space_name);

                            labels.add_relocation(
                                code_id,
                                RefTarget::Element(code_id, element_index),
                                aspace_index,
                                resolved,
                                reloc_size,
                            );

                            resolved
                        }
                        Some(value) => value.literal_value(),
                        None => 0,
                    };

                    if value > Word::MAX as UValue {
                        return Err(CompileError::new(
                            internal.line,
                            format!("immediate value {value:#x} does not fit 32 bits"),
                        ));
                    }

                    let mut immediate = ImmediateElement {
                        destination_unit: narrow_byte(
                            internal.dst_unit,
                            internal.line,
                            "immediate destination unit",
                        )?,
                        destination_index: narrow_byte(
                            internal.dst_index,
                            internal.line,
                            "immediate destination index",
                        )?,
                        bytes: Vec::new(),
                    };
                    immediate.set_word(value as Word);

                    InstructionElement::from_immediate(immediate)
                }

                InternalKind::Move => InstructionElement::from_move(MoveElement {
                    empty: false,
                    bus: narrow_byte(internal.slot + 1, internal.line, "bus")?,
                    source_type: internal.src_type,
                    source_unit: narrow_byte(internal.src_unit, internal.line, "source unit")?,
                    source_index: narrow_half_word(
                        internal.src_index,
                        internal.line,
                        "source index",
                    )?,
                    destination_type: internal.dst_type,
                    destination_unit: narrow_byte(
                        internal.dst_unit,
                        internal.line,
                        "destination unit",
                    )?,
                    destination_index: narrow_half_word(
                        internal.dst_index,
                        internal.line,
                        "destination index",
                    )?,
                    guarded: internal.guarded,
                    guard_inverted: internal.inverted,
                    guard_type: internal.guard_type,
                    guard_unit: narrow_byte(internal.guard_unit, internal.line, "guard unit")?,
                    guard_index: narrow_half_word(
                        internal.guard_index,
                        internal.line,
                        "guard index",
                    )?,
                }),
            };

            let mut element = element;
            element.begin = internal.is_begin;
            element.annotations = build_annotations(labels, internal)?;

            resources
                .binary_mut()
                .section_by_id_mut(code_id)
                .expect("the code section was just added")
                .as_code_mut()
                .expect("code sections hold instructions")
                .add_element(element);
        }

        Ok(())
    }

    /// True if an RF index or FU port is written twice in the same
    /// instruction.
    ///
    /// Two moves guarded by opposite polarities of the same register do
    /// not conflict; any other repetition does.
    fn is_destination_already_written(&self, element: &InternalElement) -> bool {
        if element.kind != InternalKind::Move || element.is_begin {
            return false;
        }

        let mut guarded_moves: Vec<&InternalElement> = Vec::new();

        // Walk the current instruction backwards; the begin element ends
        // it.
        for compare in self.elements.iter().rev() {
            if compare.is_begin {
                break;
            }

            if !same_destination(compare, element) {
                continue;
            }

            if check_conflict(compare, element, &mut guarded_moves) {
                return true;
            }
        }

        // Two opposite guards of the same register already cover every
        // polarity; a third write must collide.
        for (first_index, first) in guarded_moves.iter().enumerate() {
            for second in &guarded_moves[first_index + 1..] {
                if first.guard_type == second.guard_type
                    && first.guard_unit == second.guard_unit
                    && first.guard_index == second.guard_index
                    && first.inverted != second.inverted
                {
                    return true;
                }
            }
        }

        false
    }

    fn start_new_instruction(&mut self) {
        self.slot_number = 0;
        self.immediate_index = 0;
    }

    fn slot_number(&mut self) -> UValue {
        self.slot_number += 1;

        self.slot_number - 1
    }

    /// Next index for an inline immediate; 0 names the inline unit
    /// itself, so indices start at 1.
    fn immediate_index(&mut self) -> UValue {
        self.immediate_index += 1;

        self.immediate_index
    }

    /// Frees all internally allocated data.
    pub fn cleanup(&mut self) {
        self.elements.clear();
        self.slot_number = 0;
        self.immediate_index = 0;
    }
}

fn same_destination(first: &InternalElement, second: &InternalElement) -> bool {
    first.kind == second.kind
        && first.dst_type == second.dst_type
        && first.dst_unit == second.dst_unit
        && first.dst_index == second.dst_index
}

fn check_conflict<'e>(
    compare: &'e InternalElement,
    element: &InternalElement,
    guarded_moves: &mut Vec<&'e InternalElement>,
) -> bool {
    if !compare.guarded || !element.guarded {
        // Same destination and at most one of the moves is guarded.
        return true;
    }

    if compare.guard_type == element.guard_type
        && compare.guard_unit == element.guard_unit
        && compare.guard_index == element.guard_index
        && compare.inverted == element.inverted
    {
        // Same destination and the same guard.
        return true;
    }

    guarded_moves.push(compare);

    false
}

/// Number of significant bits of a value, 0 for 0.
fn value_bit_width(value: UValue) -> UValue {
    if value == 0 {
        0
    } else {
        required_bits(value) as UValue
    }
}

/// The relocation bit-width for a reference into the named address space:
/// enough bits for the space's highest address.
fn relocation_size(resources: &MachineResourceManager, space_name: &str) -> UValue {
    let machine = resources.machine();

    let end = if space_name == machine.code_space.name {
        Some(machine.code_space.end)
    } else {
        machine.address_space(space_name).map(|space| space.end)
    };

    match end {
        Some(end) => required_bits(end) as UValue,
        None => CODE_RELOC_SIZE,
    }
}

fn build_annotations(
    labels: &LabelManager,
    internal: &InternalElement,
) -> Result<Vec<InstructionAnnotation>, CompileError> {
    let mut annotations = Vec::with_capacity(internal.annotations.len());

    for annotation in &internal.annotations {
        if annotation.id > 0xff_ffff {
            return Err(CompileError::new(
                internal.line,
                format!("annotation id {:#x} does not fit 24 bits", annotation.id),
            ));
        }

        let mut payload: Vec<Byte> = Vec::new();

        for field in &annotation.payload {
            let value = labels.resolve_expression_value(internal.line, &field.value)?;
            let signed = matches!(
                field.value,
                LiteralOrExpression::Literal { signed: true, .. }
            );
            let width = field.width as usize;

            let mut bytes: Vec<Byte> = value.to_be_bytes().to_vec();

            // Trim extra leading ones of sign-extended values.
            if signed {
                while bytes.len() > width.max(1)
                    && bytes[0] == 0xff
                    && bytes[1] & 0x80 != 0
                {
                    bytes.remove(0);
                }
            }

            // Trim extra leading zeroes.
            while bytes.len() > width.max(1) && bytes[0] == 0 {
                bytes.remove(0);
            }

            // Pad to the declared width, with the sign when needed.
            while bytes.len() < width {
                let filler = if signed && bytes[0] & 0x80 != 0 { 0xff } else { 0 };
                bytes.insert(0, filler);
            }

            if width != 0 && bytes.len() > width {
                return Err(CompileError::new(
                    internal.line,
                    format!(
                        "annotation payload {field} is too big for defined field size"
                    ),
                ));
            }

            payload.extend(bytes);
        }

        annotations.push(InstructionAnnotation::new(annotation.id as Word, payload));
    }

    Ok(annotations)
}

fn narrow_byte(value: UValue, line: u32, what: &str) -> Result<Byte, CompileError> {
    Byte::try_from(value)
        .map_err(|_| CompileError::new(line, format!("{what} {value} does not fit 8 bits")))
}

fn narrow_half_word(value: UValue, line: u32, what: &str) -> Result<HalfWord, CompileError> {
    HalfWord::try_from(value)
        .map_err(|_| CompileError::new(line, format!("{what} {value} does not fit 16 bits")))
}
