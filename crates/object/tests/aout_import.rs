//! Importing legacy a.out objects and round-tripping them through TPEF.

use tpef_object::read::ReaderRegistry;
use tpef_object::stream::BinaryStream;
use tpef_object::write::TpefWriter;
use tpef_object::{
    Binary, MoveFieldType, SectionData, SectionType, SymbolBinding, SymbolKind, SymbolType,
};

const OMAGIC: u16 = 0x0107;

// a.out symbol types used by the fixtures.
const N_EXT: u8 = 0x01;
const N_TEXT: u8 = 0x04;
const N_DATA: u8 = 0x06;
const N_ANN: u8 = 0x26;
/// A plain stab type (source file name).
const N_SO: u8 = 0x64;

/// Builds an a.out byte image from its parts.
struct AOutBuilder {
    text: Vec<u8>,
    data: Vec<u8>,
    udata_size: u32,
    symbols: Vec<u8>,
    text_reloc: Vec<u8>,
    data_reloc: Vec<u8>,
    strings: Vec<u8>,
}

impl AOutBuilder {
    fn new() -> Self {
        Self {
            text: Vec::new(),
            data: Vec::new(),
            udata_size: 0,
            symbols: Vec::new(),
            text_reloc: Vec::new(),
            data_reloc: Vec::new(),
            strings: vec![0],
        }
    }

    /// Adds one 8-byte instruction record: source word, destination word.
    fn instruction(&mut self, source: u32, destination: u32) -> &mut Self {
        self.text.extend_from_slice(&source.to_be_bytes());
        self.text.extend_from_slice(&destination.to_be_bytes());

        self
    }

    /// Interns a string and returns its string-table offset.
    fn string(&mut self, text: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);

        offset
    }

    /// Adds a 12-byte symbol record.
    fn symbol(&mut self, name: &str, symbol_type: u8, value: u32) -> &mut Self {
        let name_offset = self.string(name);

        self.symbols.extend_from_slice(&name_offset.to_be_bytes());
        self.symbols.push(symbol_type);
        self.symbols.push(0); // other
        self.symbols.extend_from_slice(&0u16.to_be_bytes()); // description
        self.symbols.extend_from_slice(&value.to_be_bytes());

        self
    }

    fn build(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&OMAGIC.to_be_bytes());
        bytes.extend_from_slice(&(self.text.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.udata_size.to_be_bytes());
        bytes.extend_from_slice(&(self.symbols.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes()); // entry point
        bytes.extend_from_slice(&(self.text_reloc.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(self.data_reloc.len() as u32).to_be_bytes());

        bytes.extend_from_slice(&self.text);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.text_reloc);
        bytes.extend_from_slice(&self.data_reloc);
        bytes.extend_from_slice(&self.symbols);
        bytes.extend_from_slice(&self.strings);

        bytes
    }
}

fn import(bytes: Vec<u8>) -> Binary {
    let mut stream = BinaryStream::from_bytes(bytes);

    ReaderRegistry::with_default_readers().read_binary(&mut stream).unwrap()
}

fn symbol_name(binary: &Binary, symbol: &tpef_object::SymbolElement) -> String {
    let Some((strings_id, offset)) = binary.chunk_target(symbol.name) else {
        return String::new();
    };

    binary
        .section_by_id(strings_id)
        .and_then(|section| section.chunk_to_string(offset).ok())
        .unwrap_or_default()
}

#[test]
fn test_magic_detection() {
    let mut stream = BinaryStream::from_bytes(AOutBuilder::new().build());

    assert!(ReaderRegistry::with_default_readers().read_binary(&mut stream).is_ok());
}

#[test]
fn test_gcc_marker_annotation_and_code_symbol() {
    let mut builder = AOutBuilder::new();

    // Two instructions: an inline-immediate move and a register move.
    builder.instruction(0x8000_0005, 0); // #5 -> int r0
    builder.instruction(1, 2); // int r1 -> int r2

    builder.symbol("gcc2_compiled.", N_TEXT, 0);
    builder.symbol("foo", N_TEXT | N_EXT, 8);
    builder.symbol("0x00000001:hello", N_ANN, 0);

    let binary = import(builder.build());

    // The code section holds two instructions; the first one carries the
    // annotation.
    let code = binary.section_of_type(SectionType::Code, 0).unwrap();
    let code_data = code.as_code().unwrap();

    assert_eq!(code_data.instruction_count(), 2);

    let annotated = code_data.instruction(0).unwrap();
    assert_eq!(annotated.annotations.len(), 1);
    assert_eq!(annotated.annotations[0].id, 1);
    assert_eq!(annotated.annotations[0].payload, b"hello".to_vec());

    // The inline immediate feeds the move of instruction 0.
    assert!(annotated.is_immediate());
    assert_eq!(annotated.as_immediate().unwrap().word().unwrap(), 5);

    let consuming_move = code_data.element(1).unwrap().as_move().unwrap();
    assert_eq!(consuming_move.source_type, MoveFieldType::Immediate);

    // Symbols: undefined, the marker rewritten to no-type, the global
    // code symbol `foo` at instruction 1, and its procedure twin.
    let symtab = binary.section_of_type(SectionType::Symbols, 0).unwrap();
    let symbols = symtab.as_symbols().unwrap();

    assert_eq!(symbols[0].symbol_type(), SymbolType::NoType);

    let marker = &symbols[1];
    assert_eq!(symbol_name(&binary, marker), "gcc2_compiled.");
    assert_eq!(marker.symbol_type(), SymbolType::NoType);

    let foo = &symbols[2];
    assert_eq!(symbol_name(&binary, foo), "foo");
    assert_eq!(foo.symbol_type(), SymbolType::Code);
    assert_eq!(foo.binding, SymbolBinding::Global);

    let SymbolKind::Code { reference, .. } = foo.kind else {
        panic!("expected a code symbol");
    };

    let (section_id, element_index) = binary.element_target(reference).unwrap();
    assert_eq!(section_id, code.id());
    assert_eq!(element_index, code_data.instruction_to_section_index(1).unwrap());

    let procedure = symbols
        .iter()
        .find(|symbol| symbol.symbol_type() == SymbolType::Procedure)
        .expect("every code symbol gets a procedure twin");
    assert_eq!(symbol_name(&binary, procedure), "foo");
}

#[test]
fn test_universal_register_mapping() {
    let mut builder = AOutBuilder::new();

    // int r3 -> fp r2 (1024 + 2), then bool -> universal FU operand 2051.
    builder.instruction(3, 1026);
    builder.instruction(2048, 2051);

    let binary = import(builder.build());

    let code = binary.section_of_type(SectionType::Code, 0).unwrap();
    let code_data = code.as_code().unwrap();

    let first = code_data.instruction(0).unwrap().as_move().unwrap();
    assert_eq!(first.source_type, MoveFieldType::RegisterFile);
    assert_eq!(first.source_unit, 0x80);
    assert_eq!(first.source_index, 3);
    assert_eq!(first.destination_unit, 0x82);
    assert_eq!(first.destination_index, 2);

    let second = code_data.instruction(1).unwrap().as_move().unwrap();
    assert_eq!(second.source_unit, 0x81);
    assert_eq!(second.source_index, 0);
    assert_eq!(second.destination_type, MoveFieldType::Unit);
    assert_eq!(second.destination_unit, 0);
    assert_eq!(second.destination_index, 2051);

    // The resource table carries the universal resources.
    let resources = binary.section_of_type(SectionType::Resources, 0).unwrap();
    let elements = resources.as_resources().unwrap();

    for id in [0x80u16, 0x81, 0x82] {
        assert!(elements
            .iter()
            .any(|element| element.id == id
                && element.kind == tpef_object::ResourceType::RegisterFile));
    }
}

#[test]
fn test_data_and_stabs() {
    let mut builder = AOutBuilder::new();

    builder.instruction(0x8000_0001, 0);
    builder.data.extend_from_slice(&[0x11, 0x22, 0x33, 0x44]);
    builder.udata_size = 16;

    // A data symbol at the start of the data segment (address = text
    // size) and one debugger stab.
    builder.symbol("counter", N_DATA | N_EXT, 8);
    builder.symbol("main.c", N_SO, 0);

    let binary = import(builder.build());

    let data = binary.section_of_type(SectionType::Data, 0).unwrap();
    assert_eq!(data.length().unwrap(), 4);
    assert_eq!(data.starting_address, 8);

    let udata = binary.section_of_type(SectionType::UData, 0).unwrap();
    assert_eq!(udata.length().unwrap(), 16);
    assert_eq!(udata.starting_address, 12);

    let symtab = binary.section_of_type(SectionType::Symbols, 0).unwrap();
    let counter = symtab
        .as_symbols()
        .unwrap()
        .iter()
        .find(|symbol| symbol_name(&binary, symbol) == "counter")
        .copied()
        .expect("the data symbol survives the import");

    let SymbolKind::Data { reference, size } = counter.kind else {
        panic!("expected a data symbol");
    };
    assert_eq!(size, 4);

    let (section_id, offset) = binary.chunk_target(reference).unwrap();
    assert_eq!(section_id, data.id());
    assert_eq!(offset, 0);

    // The stab moved into the debug section with its string.
    let debug = binary.section_of_type(SectionType::Debug, 0).unwrap();
    let stabs = debug.as_debug().unwrap();
    assert_eq!(stabs.len(), 1);

    let tpef_object::DebugKind::Stab { stab_type, .. } = stabs[0].kind;
    assert_eq!(stab_type, N_SO);
}

#[test]
fn test_operation_id_remapping() {
    let mut builder = AOutBuilder::new();

    // Module 1: uses operation register 3000; module 2 starts at
    // instruction 1 and uses 3001 for the same operation name.
    builder.instruction(3000, 0);
    builder.instruction(3001, 1);

    builder.symbol("gcc2_compiled.", N_TEXT, 0);
    builder.symbol("add_op", 0x24, 3000); // N_PRTAB
    builder.symbol("gcc2_compiled.", N_TEXT, 8);
    builder.symbol("add_op", 0x24, 3001); // clashing id in module 2

    let binary = import(builder.build());

    let code = binary.section_of_type(SectionType::Code, 0).unwrap();
    let code_data = code.as_code().unwrap();

    // Module 2's use of 3001 was rewritten to module 1's 3000.
    let second = code_data.instruction(1).unwrap().as_move().unwrap();
    assert_eq!(second.source_index, 3000);

    // The resource table lists the operation once, under the resolved
    // id.
    let resources = binary.section_of_type(SectionType::Resources, 0).unwrap();
    let operations: Vec<_> = resources
        .as_resources()
        .unwrap()
        .iter()
        .filter(|element| element.kind == tpef_object::ResourceType::Operand)
        .collect();

    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].id, 3000);
}

#[test]
fn test_import_round_trips_through_tpef() {
    let mut builder = AOutBuilder::new();

    builder.instruction(0x8000_002a, 0);
    builder.instruction(5, 1029);
    builder.data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    builder.udata_size = 32;

    builder.symbol("gcc2_compiled.", N_TEXT, 0);
    builder.symbol("entry", N_TEXT | N_EXT, 0);
    builder.symbol("buffer", N_DATA | N_EXT, 12);
    builder.symbol("main.c", N_SO, 0);

    let imported = import(builder.build());

    // Write as TPEF and read it back: the images of two consecutive
    // writes must match.
    let mut stream = BinaryStream::new();
    TpefWriter::new().write_binary(&mut stream, &imported).unwrap();
    let first = stream.into_bytes();

    let mut stream = BinaryStream::from_bytes(first.clone());
    let reread = ReaderRegistry::with_default_readers().read_binary(&mut stream).unwrap();

    let mut stream = BinaryStream::new();
    TpefWriter::new().write_binary(&mut stream, &reread).unwrap();
    let second = stream.into_bytes();

    assert_eq!(first, second);

    // The re-read binary keeps the imported structure.
    assert_eq!(
        reread.section_count_of_type(SectionType::Code),
        imported.section_count_of_type(SectionType::Code)
    );
    assert_eq!(
        reread.section_count_of_type(SectionType::Symbols),
        imported.section_count_of_type(SectionType::Symbols)
    );

    let code = reread.section_of_type(SectionType::Code, 0).unwrap();
    assert_eq!(code.as_code().unwrap().instruction_count(), 2);

    let immediate = code.as_code().unwrap().instruction(0).unwrap();
    assert_eq!(immediate.as_immediate().unwrap().word().unwrap(), 0x2a);

    let data = reread.section_of_type(SectionType::Data, 0).unwrap();
    assert_eq!(data.length().unwrap(), 8);
    assert_eq!(data.byte(7).unwrap(), 8);
}
