//! Compiling assembly and reloading the result through the TPEF codec.

use tpef_asm::{Assembler, Machine};
use tpef_object::read::ReaderRegistry;
use tpef_object::stream::BinaryStream;
use tpef_object::write::TpefWriter;
use tpef_object::{Binary, SectionType, SymbolKind, SymbolType};

fn compile(source: &str) -> Binary {
    let machine = Machine::universal();
    let mut assembler = Assembler::new(&machine);

    assembler.compile(source).unwrap()
}

fn reload(binary: &Binary) -> Binary {
    let mut stream = BinaryStream::new();
    TpefWriter::new().write_binary(&mut stream, binary).unwrap();

    let first = stream.into_bytes();

    let mut stream = BinaryStream::from_bytes(first.clone());
    let reread = ReaderRegistry::with_default_readers().read_binary(&mut stream).unwrap();

    // The re-written image must not drift.
    let mut stream = BinaryStream::new();
    TpefWriter::new().write_binary(&mut stream, &reread).unwrap();
    assert_eq!(first, stream.into_bytes());

    reread
}

#[test]
fn test_compiled_program_survives_reload() {
    let binary = compile("CODE ;\n:procedure main;\nmain: 0x5 -> r.0 ;\n. . . ;\n");
    let reread = reload(&binary);

    let code = reread.section_of_type(SectionType::Code, 0).unwrap();
    let code_data = code.as_code().unwrap();

    assert_eq!(code_data.instruction_count(), 2);
    assert_eq!(code_data.element(1).unwrap().as_immediate().unwrap().word().unwrap(), 5);

    // The procedure symbol still points at instruction 0.
    let symtab = reread.section_of_type(SectionType::Symbols, 0).unwrap();
    let procedure = symtab
        .as_symbols()
        .unwrap()
        .iter()
        .find(|symbol| symbol.symbol_type() == SymbolType::Procedure)
        .copied()
        .unwrap();

    let SymbolKind::Procedure { reference, .. } = procedure.kind else {
        panic!("expected a procedure symbol");
    };

    let (section_id, element_index) = reread.element_target(reference).unwrap();
    assert_eq!(section_id, code.id());
    assert_eq!(element_index, code_data.instruction_to_section_index(0).unwrap());

    // No relocations came out of literal immediates.
    assert_eq!(reread.section_count_of_type(SectionType::Reloc), 0);
}

#[test]
fn test_data_references_survive_reload() {
    let source = "\
DATA universal_data ;
zero: DA 2 2:0 ;
table: DA 4 1:0x12 0x34 ;
CODE ;
:global start;
start: table -> r.1, ... ;
. . . ;
";
    let binary = compile(source);
    let reread = reload(&binary);

    // Labels: `zero` at MAU 0, `table` at MAU 2.
    let symtab = reread.section_of_type(SectionType::Symbols, 0).unwrap();
    let symbols = symtab.as_symbols().unwrap();

    let table = symbols
        .iter()
        .find(|symbol| {
            let Some((strings_id, offset)) = reread.chunk_target(symbol.name) else {
                return false;
            };

            reread
                .section_by_id(strings_id)
                .and_then(|section| section.chunk_to_string(offset).ok())
                .is_some_and(|name| name == "table")
        })
        .copied()
        .unwrap();

    let SymbolKind::Data { reference, .. } = table.kind else {
        panic!("expected a data symbol");
    };

    let (data_id, offset) = reread.chunk_target(reference).unwrap();
    assert_eq!(offset, 2);

    let data = reread.section_by_id(data_id).unwrap();
    assert_eq!(data.byte(2).unwrap(), 0x12);
    assert_eq!(data.byte(3).unwrap(), 0x34);

    // The expression immediate still relocates into the data section.
    let relocs = reread.section_of_type(SectionType::Reloc, 0).unwrap();
    let elements = &relocs.as_relocs().unwrap().elements;
    assert_eq!(elements.len(), 1);

    let (destination_section, destination_offset) =
        reread.chunk_target(elements[0].destination).unwrap();
    assert_eq!(destination_section, data_id);
    assert_eq!(destination_offset, 2);

    // The immediate payload carries the label's address.
    let code = reread.section_of_type(SectionType::Code, 0).unwrap();
    let (_, location_index) = reread.element_target(elements[0].location).unwrap();
    let location = code.as_code().unwrap().element(location_index).unwrap();
    assert_eq!(location.as_immediate().unwrap().word().unwrap(), 2);
}

#[test]
fn test_global_binding_survives_reload() {
    let source = "CODE ;\n:global start;\nstart: 0x1 -> r.0 ;\n";
    let reread = reload(&compile(source));

    let symtab = reread.section_of_type(SectionType::Symbols, 0).unwrap();
    let global = symtab
        .as_symbols()
        .unwrap()
        .iter()
        .find(|symbol| symbol.binding == tpef_object::SymbolBinding::Global)
        .copied();

    assert!(global.is_some(), "the global code symbol survives the round trip");
}
