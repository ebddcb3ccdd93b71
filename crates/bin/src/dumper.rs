//! Textual dumping of TPEF binaries.
//!
//! In *logical* mode the dumper skips indices, identification codes and
//! file offsets, so two dumps of equivalent binaries diff equal even when
//! their sections were reordered.

use std::io::{self, Write};

use tpef_object::refs::RefTarget;
use tpef_object::{
    disasm::Disassembler, Binary, DebugKind, InstructionBody, RelocType, Section, SectionData,
    SymbolKind, Word,
};

/// Dumps one binary to a writer.
pub struct TpefDumper<'a, W> {
    binary: &'a Binary,
    out: W,
    only_logical: bool,
}

impl<'a, W> TpefDumper<'a, W>
where
    W: Write,
{
    /// Creates a dumper over a binary.
    pub fn new(binary: &'a Binary, out: W) -> Self {
        Self { binary, out, only_logical: false }
    }

    /// Print only logical information: skip indices so diffs survive
    /// reordering.
    pub fn set_only_logical(&mut self, only_logical: bool) {
        self.only_logical = only_logical;
    }

    fn section_name(&self, section: &Section) -> String {
        self.binary.section_name(section).unwrap_or_default()
    }

    fn chunk_string(&self, reference: Option<tpef_object::refs::SafeRef>) -> String {
        let Some((section_id, offset)) = self.binary.chunk_target(reference) else {
            return String::new();
        };

        self.binary
            .section_by_id(section_id)
            .and_then(|section| section.chunk_to_string(offset).ok())
            .unwrap_or_default()
    }

    /// Prints the file header fields.
    pub fn file_headers(&mut self) -> io::Result<()> {
        writeln!(self.out, "File type:         {:?}", self.binary.file_type)?;
        writeln!(self.out, "File architecture: {:?}", self.binary.arch)?;
        writeln!(self.out, "Format version:    {}", self.binary.version)?;
        writeln!(self.out, "Section count:     {}", self.binary.section_count())?;

        if let Some(strings) = self.binary.strings() {
            writeln!(self.out, "String section:    {}", self.section_name(strings))?;
        }

        writeln!(self.out)
    }

    /// Prints one header line per section.
    pub fn section_headers(&mut self) -> io::Result<()> {
        if !self.only_logical {
            writeln!(self.out, "index  id  type           addr        name")?;
        }

        for (index, section) in self.binary.sections().iter().enumerate() {
            let name = self.section_name(section);

            if self.only_logical {
                writeln!(
                    self.out,
                    "{:<14} addr {:<10} {}",
                    format!("{:?}", section.section_type()),
                    section.starting_address,
                    name,
                )?;
            } else {
                writeln!(
                    self.out,
                    "{index:<6} {:<3} {:<14} {:<11} {name}",
                    section.id(),
                    format!("{:?}", section.section_type()),
                    section.starting_address,
                )?;
            }
        }

        writeln!(self.out)
    }

    /// Prints every symbol table.
    pub fn symbol_tables(&mut self) -> io::Result<()> {
        for (position, section) in self.binary.sections().iter().enumerate() {
            let SectionData::Symbols(symbols) = &section.data else {
                continue;
            };

            if self.only_logical {
                writeln!(self.out, "Symbol table:")?;
            } else {
                writeln!(self.out, "Symbol table (section {position}):")?;
            }

            for (index, symbol) in symbols.iter().enumerate() {
                let name = self.chunk_string(symbol.name);
                let owner = self
                    .binary
                    .section_target(symbol.section)
                    .map(|owner| self.section_name(owner))
                    .unwrap_or_default();

                let value = match symbol.kind {
                    SymbolKind::NoType => String::new(),
                    SymbolKind::Code { reference, size }
                    | SymbolKind::Procedure { reference, size } => {
                        match self.binary.element_target(reference) {
                            Some((_, element)) if !self.only_logical => {
                                format!("element {element} size {size}")
                            }
                            _ => format!("size {size}"),
                        }
                    }
                    SymbolKind::Data { reference, size } => {
                        match self.binary.chunk_target(reference) {
                            Some((_, offset)) if !self.only_logical => {
                                format!("offset {offset} size {size}")
                            }
                            _ => format!("size {size}"),
                        }
                    }
                    SymbolKind::Section { value, size } => format!("value {value} size {size}"),
                    SymbolKind::File { value } => format!("value {value}"),
                };

                if self.only_logical {
                    writeln!(
                        self.out,
                        "  {:<10} {:<7} {name:<20} {owner:<16} {value}",
                        format!("{:?}", symbol.symbol_type()),
                        format!("{:?}", symbol.binding),
                    )?;
                } else {
                    writeln!(
                        self.out,
                        "  {index:<4} {:<10} {:<7} {name:<20} {owner:<16} {value}",
                        format!("{:?}", symbol.symbol_type()),
                        format!("{:?}", symbol.binding),
                    )?;
                }
            }

            writeln!(self.out)?;
        }

        Ok(())
    }

    /// Prints every relocation table.
    pub fn relocation_tables(&mut self) -> io::Result<()> {
        for (position, section) in self.binary.sections().iter().enumerate() {
            let SectionData::Relocs(relocs) = &section.data else {
                continue;
            };

            let referenced = self
                .binary
                .section_target(relocs.referenced_section)
                .map(|section| self.section_name(section))
                .unwrap_or_default();

            if self.only_logical {
                writeln!(self.out, "Relocations of section {referenced}:")?;
            } else {
                writeln!(
                    self.out,
                    "Relocation table (section {position}) of section {referenced}:"
                )?;
            }

            for element in &relocs.elements {
                let kind = match element.kind {
                    RelocType::NoRel => "NOREL",
                    RelocType::SelfRel => "SELF",
                    RelocType::Page => "PAGE",
                    RelocType::PcRel => "PCREL",
                };

                let location = self.render_target(self.binary.target_opt(element.location));
                let destination =
                    self.render_target(self.binary.target_opt(element.destination));

                writeln!(
                    self.out,
                    "  {kind:<6} size {:<3} location {location:<24} destination {destination}",
                    element.size,
                )?;
            }

            writeln!(self.out)?;
        }

        Ok(())
    }

    fn render_target(&self, target: Option<RefTarget>) -> String {
        match target {
            None => "-".to_string(),
            Some(RefTarget::Section(id)) => {
                let name = self
                    .binary
                    .section_by_id(id)
                    .map(|section| self.section_name(section))
                    .unwrap_or_default();

                if self.only_logical {
                    name
                } else {
                    format!("section {id} {name}")
                }
            }
            Some(RefTarget::Element(id, index)) => {
                if self.only_logical {
                    format!("element {index}")
                } else {
                    format!("section {id} element {index}")
                }
            }
            Some(RefTarget::Chunk(id, offset)) => {
                if self.only_logical {
                    format!("offset {offset}")
                } else {
                    format!("section {id} offset {offset}")
                }
            }
        }
    }

    /// Prints the elements of the section at the given table position.
    pub fn section(&mut self, index: Word) -> io::Result<bool> {
        let Some(section) = self.binary.section(index) else {
            writeln!(self.out, "No section with index {index}.")?;

            return Ok(false);
        };

        writeln!(
            self.out,
            "Section {index}: {:?} {}",
            section.section_type(),
            self.section_name(section),
        )?;

        match &section.data {
            SectionData::Null => {}

            SectionData::Strings(bytes) | SectionData::Data(bytes) => {
                for (offset, chunk) in bytes.chunks(16).enumerate() {
                    if self.only_logical {
                        write!(self.out, " ")?;
                    } else {
                        write!(self.out, "  {:06x}:", offset * 16)?;
                    }

                    for byte in chunk {
                        write!(self.out, " {byte:02x}")?;
                    }

                    writeln!(self.out)?;
                }
            }

            SectionData::UData { length } => {
                writeln!(self.out, "  {length} bytes of uninitialized data")?;
            }

            SectionData::Code(_) => {
                let disassembler = Disassembler::new(self.binary, section)
                    .expect("the section data is code");

                for instruction in 0..disassembler.instruction_count() {
                    let text = disassembler
                        .instruction(instruction)
                        .unwrap_or_else(|error| format!("<{error}>"));

                    if self.only_logical {
                        writeln!(self.out, "  {text} ;")?;
                    } else {
                        writeln!(self.out, "  {instruction:<6} {text} ;")?;
                    }
                }

                self.dump_annotations(section)?;
            }

            SectionData::Symbols(_) => {
                // Rendered in full by the symbol-table listing.
                writeln!(self.out, "  {} symbols", section.element_count())?;
            }

            SectionData::Relocs(_) => {
                writeln!(self.out, "  {} relocations", section.element_count())?;
            }

            SectionData::ASpaces(aspaces) => {
                for (index, element) in aspaces.elements.iter().enumerate() {
                    let name = self.chunk_string(element.name);

                    if self.only_logical {
                        writeln!(
                            self.out,
                            "  mau {:<3} align {:<3} word {:<3} {name}",
                            element.mau, element.align, element.word_size,
                        )?;
                    } else {
                        writeln!(
                            self.out,
                            "  {index:<4} mau {:<3} align {:<3} word {:<3} {name}",
                            element.mau, element.align, element.word_size,
                        )?;
                    }
                }
            }

            SectionData::Resources(resources) => {
                for element in resources {
                    let name = self.chunk_string(element.name);

                    if self.only_logical {
                        writeln!(
                            self.out,
                            "  {:<16} {name:<20} info {:#010x}",
                            format!("{:?}", element.kind),
                            element.info,
                        )?;
                    } else {
                        writeln!(
                            self.out,
                            "  {:<5} {:<16} {name:<20} info {:#010x}",
                            element.id,
                            format!("{:?}", element.kind),
                            element.info,
                        )?;
                    }
                }
            }

            SectionData::LineNumbers(linenos) => {
                for procedure in &linenos.procedures {
                    let symbol = self.render_target(self.binary.target_opt(procedure.symbol));
                    writeln!(self.out, "  procedure {symbol}:")?;

                    for line in &procedure.lines {
                        let instruction =
                            self.render_target(self.binary.target_opt(line.instruction));
                        writeln!(self.out, "    line {:<6} {instruction}", line.line)?;
                    }
                }
            }

            SectionData::Debug(elements) => {
                for element in elements {
                    let DebugKind::Stab { stab_type, other, description, value } = element.kind;
                    let string = self.chunk_string(element.string);

                    writeln!(
                        self.out,
                        "  stab {stab_type:#04x} other {other} desc {description} \
                         value {value:#010x} {string}",
                    )?;
                }
            }
        }

        writeln!(self.out)?;

        Ok(true)
    }

    fn dump_annotations(&mut self, section: &Section) -> io::Result<()> {
        let SectionData::Code(code) = &section.data else {
            return Ok(());
        };

        for (index, element) in code.elements().iter().enumerate() {
            for annotation in &element.annotations {
                let position = if self.only_logical {
                    String::new()
                } else {
                    format!("element {index} ")
                };

                let kind = match element.body {
                    InstructionBody::Move(_) => "move",
                    InstructionBody::Immediate(_) => "immediate",
                };

                writeln!(
                    self.out,
                    "  {position}{kind} annotation {:#08x}: {:02x?}",
                    annotation.id, annotation.payload,
                )?;
            }
        }

        Ok(())
    }
}
