//! The assembler driver.
//!
//! Reads the source, feeds the parsed statements into the section
//! creators, runs the finalize phases in order (data, code, labels) and
//! returns the finished binary. Every compile error is decorated with the
//! recovered source line before it reaches the caller.

use tpef_object::stream::BinaryStream;
use tpef_object::Binary;

use crate::ast::{DataLine, ParserMove, ParserMoveBody, UValue};
use crate::code::CodeSectionCreator;
use crate::data::DataSectionCreator;
use crate::diagnostics::AssemblyParserDiagnostic;
use crate::error::CompileError;
use crate::labels::LabelManager;
use crate::machine::Machine;
use crate::parser::{parse_program, Directive, Statement};
use crate::resources::MachineResourceManager;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Area {
    None,
    Code,
    Data(String),
}

/// Compiles TTA assembly into TPEF binaries against one target machine.
pub struct Assembler<'m> {
    machine: &'m Machine,
    diagnostics: AssemblyParserDiagnostic,
}

impl<'m> Assembler<'m> {
    /// Creates an assembler for the given target machine.
    pub fn new(machine: &'m Machine) -> Self {
        Self { machine, diagnostics: AssemblyParserDiagnostic::new() }
    }

    /// The diagnostics (warnings, errors) of the last compilation.
    pub fn diagnostics(&self) -> &AssemblyParserDiagnostic {
        &self.diagnostics
    }

    /// Reads the assembly source from a stream and compiles it.
    pub fn compile_stream(&mut self, stream: &mut BinaryStream) -> Result<Binary, CompileError> {
        let start = stream.read_position() as usize;
        let source = String::from_utf8_lossy(&stream.bytes()[start..]).into_owned();

        self.compile(&source)
    }

    /// Compiles assembly source text into a TPEF binary.
    ///
    /// On error the partial binary is dropped and the error carries the
    /// line number and the recovered source line.
    pub fn compile(&mut self, source: &str) -> Result<Binary, CompileError> {
        self.diagnostics.reset(source);

        let result = self.run_pipeline(source);

        result.map_err(|error| self.decorate(error))
    }

    fn run_pipeline(&mut self, source: &str) -> Result<Binary, CompileError> {
        let statements = parse_program(source)?;

        let mut resources = MachineResourceManager::new(self.machine);
        let mut code = CodeSectionCreator::new();
        let mut data = DataSectionCreator::new();
        let mut labels = LabelManager::new();

        let mut area = Area::None;
        let mut code_line_count: UValue = 0;

        for parsed in statements {
            let line = parsed.line;

            match parsed.statement {
                Statement::CodeHeader { start } => {
                    area = Area::Code;
                    code.new_section(start);
                }

                Statement::DataHeader { space, start } => {
                    area = Area::Data(space);
                    if let Some(start) = start {
                        data.set_area_start_address(start);
                    }
                }

                Statement::Directive(Directive::Procedure(name)) => {
                    labels.add_procedure(&name, code.start_address() + code_line_count).map_err(
                        |mut error| {
                            error.line = line;
                            error
                        },
                    )?;
                }

                Statement::Directive(Directive::Global(name)) => {
                    labels.set_global(&name);
                }

                Statement::CodeLine { labels: code_labels, slots, long_immediates } => {
                    if area != Area::Code {
                        return Err(CompileError::new(
                            line,
                            "instruction outside a CODE section",
                        ));
                    }

                    // Code labels resolve immediately: their value is the
                    // current instruction address.
                    if !code_labels.is_empty() {
                        let code_aspace = resources
                            .code_address_space()
                            .map_err(|error| error.into_compile_error(line))?;
                        let space_name = self.machine.code_space.name.clone();

                        for label in &code_labels {
                            labels
                                .add_label(
                                    code_aspace,
                                    &space_name,
                                    label,
                                    code.start_address() + code_line_count,
                                )
                                .map_err(|mut error| {
                                    error.line = line;
                                    error
                                })?;
                        }
                    }

                    if slots.is_empty() {
                        // The `. . .` empty instruction.
                        let empty = ParserMove {
                            body: ParserMoveBody::Empty,
                            is_begin: true,
                            line,
                            annotations: Vec::new(),
                        };

                        code.add_move(&mut resources, &mut self.diagnostics, &empty)?;
                    } else {
                        for (position, slot) in slots.into_iter().enumerate() {
                            let parsed_move = ParserMove {
                                body: slot.body,
                                is_begin: position == 0,
                                line,
                                annotations: slot.annotations,
                            };

                            code.add_move(&mut resources, &mut self.diagnostics, &parsed_move)?;
                        }
                    }

                    code_line_count += 1;

                    // Long immediates encoded in dedicated instruction
                    // slots.
                    for immediate in long_immediates {
                        let parsed_move = ParserMove {
                            body: ParserMoveBody::LongImmediate {
                                destination: immediate.destination,
                                value: immediate.value,
                            },
                            is_begin: false,
                            line,
                            annotations: immediate.annotations,
                        };

                        code.add_move(&mut resources, &mut self.diagnostics, &parsed_move)?;
                    }
                }

                Statement::DataLine { labels: data_labels, width, init_data } => {
                    let Area::Data(space) = &area else {
                        return Err(CompileError::new(
                            line,
                            "data definition outside a DATA section",
                        ));
                    };

                    data.add_data_line(DataLine {
                        width,
                        data_space: space.clone(),
                        init_data,
                        labels: data_labels,
                        line,
                    });
                }
            }
        }

        // Finalize order matters: data labels must exist before the code
        // creator resolves expression immediates, and every section must
        // exist before the label manager builds symbols and relocations.
        data.finalize(&mut resources, &mut labels)?;
        code.finalize(&mut resources, &mut labels)?;
        labels.finalize(&mut resources)?;

        Ok(resources.finish())
    }

    /// Fills in the recovered source line the way the diagnostics store
    /// recovers it.
    fn decorate(&self, mut error: CompileError) -> CompileError {
        if error.source_line.is_none() && error.line != 0 {
            error.source_line = Some(self.diagnostics.code_line(error.line));
        }

        error
    }
}

#[cfg(test)]
mod tests {
    use tpef_object::{SectionType, SymbolType};

    use super::*;

    fn compile(source: &str) -> Binary {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        assembler.compile(source).unwrap()
    }

    #[test]
    fn test_minimal_program() {
        let binary = compile("CODE ;\n:procedure main;\nmain: 0x5 -> r.0 ;\n. . . ;\n");

        let code = binary.section_of_type(SectionType::Code, 0).unwrap();
        let code_data = code.as_code().unwrap();

        // One move with its inline immediate, one empty move.
        assert_eq!(code_data.instruction_count(), 2);
        assert_eq!(code_data.element_count(), 3);
        assert!(code_data.element(0).unwrap().is_move());
        assert!(code_data.element(1).unwrap().is_immediate());
        assert!(code_data.element(2).unwrap().as_move().unwrap().empty);

        // The inline immediate carries the value.
        let immediate = code_data.element(1).unwrap().as_immediate().unwrap();
        assert_eq!(immediate.word().unwrap(), 5);

        // A procedure symbol and a code label symbol, next to the
        // undefined one.
        let symbols = binary.section_of_type(SectionType::Symbols, 0).unwrap();
        let elements = symbols.as_symbols().unwrap();

        assert_eq!(elements[0].symbol_type(), SymbolType::NoType);
        assert!(elements
            .iter()
            .any(|symbol| symbol.symbol_type() == SymbolType::Procedure));
        assert!(elements.iter().any(|symbol| symbol.symbol_type() == SymbolType::Code));

        // No relocations came out of a literal immediate.
        assert_eq!(binary.section_count_of_type(SectionType::Reloc), 0);
    }

    #[test]
    fn test_procedure_symbol_points_at_instruction() {
        let binary = compile("CODE ;\n:procedure main;\nmain: 0x5 -> r.0 ;\n. . . ;\n");

        let symbols = binary.section_of_type(SectionType::Symbols, 0).unwrap();
        let procedure = symbols
            .as_symbols()
            .unwrap()
            .iter()
            .find(|symbol| symbol.symbol_type() == SymbolType::Procedure)
            .copied()
            .unwrap();

        let tpef_object::SymbolKind::Procedure { reference, .. } = procedure.kind else {
            unreachable!("procedure symbols carry procedure payloads");
        };

        let (section, index) = binary.element_target(reference).unwrap();
        let code = binary.section_of_type(SectionType::Code, 0).unwrap();

        assert_eq!(section, code.id());
        assert_eq!(index, 0);
    }

    #[test]
    fn test_data_labels_and_relocation() {
        let source = "\
DATA universal_data ;
table: DA 4 1:0x12 0xff ;
CODE ;
start: table -> r.1 ;
";
        let binary = compile(source);

        // The data section carries the init bytes.
        let data = binary.section_of_type(SectionType::Data, 0).unwrap();
        assert_eq!(data.length().unwrap(), 4);
        assert_eq!(data.byte(0).unwrap(), 0x12);
        assert_eq!(data.byte(1).unwrap(), 0xff);

        // The expression immediate produced a relocation into the code
        // section.
        assert_eq!(binary.section_count_of_type(SectionType::Reloc), 1);

        let relocs = binary.section_of_type(SectionType::Reloc, 0).unwrap();
        let elements = &relocs.as_relocs().unwrap().elements;
        assert_eq!(elements.len(), 1);

        let code = binary.section_of_type(SectionType::Code, 0).unwrap();
        let (location_section, _) = binary.element_target(elements[0].location).unwrap();
        assert_eq!(location_section, code.id());

        // The relocation destination is the first byte of the data
        // section.
        let (destination_section, offset) =
            binary.chunk_target(elements[0].destination).unwrap();
        assert_eq!(destination_section, data.id());
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_duplicate_destination_warning() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        assembler
            .compile("CODE ;\n..., 0x1 -> r.1, 0x2 -> r.1 ;\n")
            .unwrap();

        assert!(assembler
            .diagnostics()
            .warnings()
            .any(|warning| warning.message.contains("already written")));
    }

    #[test]
    fn test_opposite_guards_do_not_conflict() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        assembler
            .compile("CODE ;\n..., ?bool.0 0x1 -> r.1, !bool.0 0x2 -> r.1 ;\n")
            .unwrap();

        assert!(!assembler
            .diagnostics()
            .warnings()
            .any(|warning| warning.message.contains("already written")));
    }

    #[test]
    fn test_unknown_register_file() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        let error = assembler.compile("CODE ;\n0x1 -> nowhere.0 ;\n").unwrap_err();

        assert_eq!(error.line, 2);
        assert!(error.source_line.is_some());
    }

    #[test]
    fn test_undefined_global() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        let error = assembler
            .compile("CODE ;\n:global nothing;\n0x1 -> r.0 ;\n")
            .unwrap_err();

        assert!(error.message.contains("nothing"));
    }

    #[test]
    fn test_duplicate_label() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        let error = assembler
            .compile("CODE ;\nmain: 0x1 -> r.0 ;\nmain: 0x2 -> r.0 ;\n")
            .unwrap_err();

        assert!(error.message.contains("multiply defined label"));
    }

    #[test]
    fn test_oversize_init_field() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        let error = assembler
            .compile("DATA universal_data ;\nx: DA 1 1:0x1ff ;\n")
            .unwrap_err();

        assert!(error.message.contains("too long value"));
    }

    #[test]
    fn test_expression_value_mismatch() {
        let machine = Machine::universal();
        let mut assembler = Assembler::new(&machine);

        let error = assembler
            .compile("DATA universal_data ;\nx: DA 1 1 ;\nCODE ;\nx=5 -> r.0 ;\n")
            .unwrap_err();

        assert!(error.message.contains("does not match"));
    }
}
