//! Write-then-read round trips over programmatically built binaries.
//!
//! Every fixture is written to a stream, read back, and written again:
//! the two byte images must match, and the re-read object graph must
//! resolve its cross-references to the same logical targets.

use tpef_object::read::ReaderRegistry;
use tpef_object::refs::{RefTarget, ReferenceManager};
use tpef_object::stream::BinaryStream;
use tpef_object::write::TpefWriter;
use tpef_object::{
    ASpaceElement, Binary, DebugElement, ImmediateElement, InstructionAnnotation,
    InstructionElement, LineNumProcedure, MoveElement, MoveFieldType, RelocElement, RelocType,
    ResourceElement, ResourceType, Section, SectionData, SectionId, SymbolBinding,
    SymbolElement, SymbolKind, SymbolType,
};

/// Builder for test binaries: mandatory sections plus a reference
/// manager.
struct Fixture {
    binary: Binary,
    refs: ReferenceManager,
    null_id: SectionId,
    addrsp_id: SectionId,
    strings_id: SectionId,
}

impl Fixture {
    fn new() -> Self {
        let mut binary = Binary::new();
        let mut refs = ReferenceManager::new();

        let null_id = binary.add_section(Section::new(SectionData::Null));

        let mut addrsp = Section::new(SectionData::ASpaces(Default::default()));
        addrsp
            .as_aspaces_mut()
            .unwrap()
            .elements
            .push(ASpaceElement::default());
        let addrsp_id = binary.add_section(addrsp);

        let strings_id = binary.add_section(Section::new(SectionData::Strings(vec![0])));
        binary.set_strings(strings_id);

        let undefined = refs.bound(RefTarget::Element(addrsp_id, 0));
        binary.section_by_id_mut(addrsp_id).unwrap().as_aspaces_mut().unwrap().undefined =
            Some(undefined);

        Self { binary, refs, null_id, addrsp_id, strings_id }
    }

    /// Adds an address space element and returns its index.
    fn add_aspace(&mut self, mau: u8, align: u8, word_size: u8) -> u32 {
        let addrsp = self.binary.section_by_id_mut(self.addrsp_id).unwrap();
        let aspaces = addrsp.as_aspaces_mut().unwrap();

        aspaces.elements.push(ASpaceElement { mau, align, word_size, name: None });

        (aspaces.elements.len() - 1) as u32
    }

    fn aspace_ref(&mut self, index: u32) -> tpef_object::refs::SafeRef {
        self.refs.bound(RefTarget::Element(self.addrsp_id, index))
    }

    fn section_ref(&mut self, id: SectionId) -> tpef_object::refs::SafeRef {
        self.refs.bound(RefTarget::Section(id))
    }

    fn intern(&mut self, text: &str) -> tpef_object::refs::SafeRef {
        let chunk = self
            .binary
            .section_by_id_mut(self.strings_id)
            .unwrap()
            .string_to_chunk(text)
            .unwrap();

        self.refs.bound(chunk)
    }

    fn finish(mut self) -> Binary {
        self.binary.set_refs(self.refs.into_table());

        self.binary
    }
}

fn write_bytes(binary: &Binary) -> Vec<u8> {
    let mut stream = BinaryStream::new();
    TpefWriter::new().write_binary(&mut stream, binary).unwrap();

    stream.into_bytes()
}

fn read_back(bytes: &[u8]) -> Binary {
    let mut stream = BinaryStream::from_bytes(bytes.to_vec());

    ReaderRegistry::with_default_readers().read_binary(&mut stream).unwrap()
}

/// Writes, reads back and writes again; both images must be identical.
fn round_trip(binary: &Binary) -> Binary {
    let first = write_bytes(binary);
    let reread = read_back(&first);
    let second = write_bytes(&reread);

    assert_eq!(first, second, "the re-written image differs from the first one");

    reread
}

#[test]
fn test_empty_binary_round_trips_byte_for_byte() {
    let binary = Fixture::new().finish();

    let reread = round_trip(&binary);

    assert_eq!(reread.section_count(), 3);
    assert!(reread.strings().is_some());

    let addrsp = reread
        .section_of_type(tpef_object::SectionType::AddressSpaces, 0)
        .unwrap();
    let aspaces = addrsp.as_aspaces().unwrap();

    assert_eq!(aspaces.elements.len(), 1);
    assert!(aspaces.elements[0].is_undefined());
}

#[test]
fn test_minimal_data_section() {
    let mut fixture = Fixture::new();

    let aspace = fixture.add_aspace(8, 4, 4);
    let aspace_ref = fixture.aspace_ref(aspace);

    let mut data = Section::new(SectionData::Data(vec![0x50, 0x60, 0x70]));
    data.aspace = Some(aspace_ref);
    data.starting_address = 0;

    fixture.binary.add_section(data);
    let binary = fixture.finish();

    let reread = round_trip(&binary);

    let data = reread.section_of_type(tpef_object::SectionType::Data, 0).unwrap();

    assert_eq!(data.length().unwrap(), 3);
    assert_eq!(data.mau(8, 0).unwrap(), 0x50);
    assert_eq!(data.mau(8, 1).unwrap(), 0x60);
    assert_eq!(data.byte(2).unwrap(), 0x70);
}

#[test]
fn test_cross_referenced_symbol() {
    let mut fixture = Fixture::new();

    let aspace = fixture.add_aspace(8, 4, 4);
    let aspace_ref = fixture.aspace_ref(aspace);

    let empty_name = fixture.intern("");
    let sym01 = fixture.intern("sym01");
    let _sym02 = fixture.intern("sym02");

    // One-instruction code section holding an empty move on bus 1.
    let mut code = Section::new(SectionData::Code(Default::default()));
    code.aspace = Some(aspace_ref);

    let mut element =
        InstructionElement::from_move(MoveElement { empty: true, bus: 1, ..Default::default() });
    element.begin = true;
    code.as_code_mut().unwrap().add_element(element);

    let code_id = fixture.binary.add_section(code);

    // A symbol table: the undefined symbol, then a global code symbol
    // named `sym01` pointing at instruction 0.
    let null_ref = fixture.section_ref(fixture.null_id);
    let strings_ref = fixture.section_ref(fixture.strings_id);
    let code_ref = fixture.section_ref(code_id);
    let instruction_ref = fixture.refs.bound(RefTarget::Element(code_id, 0));

    let mut symtab = Section::new(SectionData::Symbols(Vec::new()));
    symtab.link = Some(strings_ref);

    let symbols = symtab.as_symbols_mut().unwrap();
    symbols.push(SymbolElement::undefined(Some(empty_name), Some(null_ref)));

    let mut code_symbol =
        SymbolElement::new(SymbolKind::Code { reference: Some(instruction_ref), size: 1 });
    code_symbol.binding = SymbolBinding::Global;
    code_symbol.name = Some(sym01);
    code_symbol.section = Some(code_ref);
    symbols.push(code_symbol);

    fixture.binary.add_section(symtab);
    let binary = fixture.finish();

    let reread = round_trip(&binary);

    let symtab = reread.section_of_type(tpef_object::SectionType::Symbols, 0).unwrap();
    let symbols = symtab.as_symbols().unwrap();

    assert_eq!(symbols.len(), 2);
    assert_eq!(symbols[0].symbol_type(), SymbolType::NoType);

    let symbol = &symbols[1];
    assert_eq!(symbol.symbol_type(), SymbolType::Code);
    assert_eq!(symbol.binding, SymbolBinding::Global);

    // The name chunk still resolves to "sym01".
    let (strings_id, offset) = reread.chunk_target(symbol.name).unwrap();
    let name = reread.section_by_id(strings_id).unwrap().chunk_to_string(offset).unwrap();
    assert_eq!(name, "sym01");

    // The instruction handle still points at the sole instruction.
    let SymbolKind::Code { reference, size } = symbol.kind else {
        panic!("expected a code symbol");
    };
    assert_eq!(size, 1);

    let (section_id, element_index) = reread.element_target(reference).unwrap();
    let code = reread.section_by_id(section_id).unwrap();
    let code_data = code.as_code().unwrap();

    assert_eq!(code_data.instruction_count(), 1);
    assert_eq!(element_index, code_data.instruction_to_section_index(0).unwrap());

    let first = code_data.element(element_index).unwrap();
    assert!(first.as_move().unwrap().empty);
    assert_eq!(first.as_move().unwrap().bus, 1);
}

#[test]
fn test_relocation_round_trip() {
    let mut fixture = Fixture::new();

    let aspace = fixture.add_aspace(8, 4, 4);
    let data_aspace_ref = fixture.aspace_ref(aspace);
    let code_aspace_ref = fixture.aspace_ref(aspace);

    // Four data bytes at starting address 0.
    let mut data = Section::new(SectionData::Data(vec![0, 0, 0, 0]));
    data.aspace = Some(data_aspace_ref);
    let data_id = fixture.binary.add_section(data);

    // One 4-byte immediate whose payload holds the destination address,
    // first byte of the data section.
    let mut code = Section::new(SectionData::Code(Default::default()));
    code.aspace = Some(code_aspace_ref);

    let mut immediate = ImmediateElement::default();
    immediate.set_word(0);

    let mut element = InstructionElement::from_immediate(immediate);
    element.begin = true;
    code.as_code_mut().unwrap().add_element(element);

    let code_id = fixture.binary.add_section(code);

    // A symbol table for the relocation's symbol pointer.
    let empty_name = fixture.intern("");
    let null_ref = fixture.section_ref(fixture.null_id);
    let strings_ref = fixture.section_ref(fixture.strings_id);

    let mut symtab = Section::new(SectionData::Symbols(Vec::new()));
    symtab.link = Some(strings_ref);
    symtab
        .as_symbols_mut()
        .unwrap()
        .push(SymbolElement::undefined(Some(empty_name), Some(null_ref)));
    let symtab_id = fixture.binary.add_section(symtab);

    // The relocation section referencing the code section.
    let code_ref = fixture.section_ref(code_id);
    let symtab_ref = fixture.section_ref(symtab_id);
    let location_ref = fixture.refs.bound(RefTarget::Element(code_id, 0));
    let destination_ref = fixture.refs.bound(RefTarget::Chunk(data_id, 0));
    let reloc_aspace_ref = fixture.aspace_ref(aspace);
    let symbol_ref = fixture.refs.bound(RefTarget::Element(symtab_id, 0));

    let mut relocs = Section::new(SectionData::Relocs(Default::default()));
    relocs.link = Some(symtab_ref);

    let reloc_data = relocs.as_relocs_mut().unwrap();
    reloc_data.referenced_section = Some(code_ref);
    reloc_data.elements.push(RelocElement {
        kind: RelocType::SelfRel,
        size: 32,
        bit_offset: 0,
        location: Some(location_ref),
        destination: Some(destination_ref),
        aspace: Some(reloc_aspace_ref),
        symbol: Some(symbol_ref),
        chunked: false,
    });

    fixture.binary.add_section(relocs);
    let binary = fixture.finish();

    let reread = round_trip(&binary);

    let relocs = reread.section_of_type(tpef_object::SectionType::Reloc, 0).unwrap();
    let reloc_data = relocs.as_relocs().unwrap();

    // The back-reference names the code section.
    let referenced = reread.section_target(reloc_data.referenced_section).unwrap();
    assert_eq!(referenced.section_type(), tpef_object::SectionType::Code);

    let element = &reloc_data.elements[0];
    assert_eq!(element.kind, RelocType::SelfRel);
    assert_eq!(element.size, 32);

    // Location: the immediate element of the code section.
    let (location_section, location_index) = reread.element_target(element.location).unwrap();
    assert_eq!(location_section, referenced.id());
    assert_eq!(location_index, 0);

    // Destination: the first byte of the data section.
    let (destination_section, destination_offset) =
        reread.chunk_target(element.destination).unwrap();
    let data = reread.section_by_id(destination_section).unwrap();
    assert_eq!(data.section_type(), tpef_object::SectionType::Data);
    assert_eq!(destination_offset, 0);
}

#[test]
fn test_class_hierarchy_round_trip() {
    let mut fixture = Fixture::new();

    let aspace = fixture.add_aspace(8, 1, 4);
    let narrow_aspace = fixture.add_aspace(4, 1, 2);

    // Data and uninitialized data.
    let data_aspace = fixture.aspace_ref(aspace);
    let mut data = Section::new(SectionData::Data((0x00..0x1d).collect()));
    data.aspace = Some(data_aspace);
    let data_id = fixture.binary.add_section(data);

    let udata_aspace = fixture.aspace_ref(narrow_aspace);
    let mut udata = Section::new(SectionData::UData { length: 1507 });
    udata.aspace = Some(udata_aspace);
    fixture.binary.add_section(udata);

    // A code section mixing moves, immediates and annotations.
    let code_aspace = fixture.aspace_ref(aspace);
    let mut code = Section::new(SectionData::Code(Default::default()));
    code.aspace = Some(code_aspace);

    {
        let elements = code.as_code_mut().unwrap();

        let immediate = ImmediateElement {
            destination_unit: 0,
            destination_index: 1,
            bytes: vec![b'F', b'i', b'r', b's'],
        };

        let mut first = InstructionElement::from_immediate(immediate);
        first.begin = true;
        first
            .annotations
            .push(InstructionAnnotation::new(10, vec![0]));
        elements.add_element(first);

        let mut transport = MoveElement {
            bus: 1,
            source_type: MoveFieldType::Immediate,
            source_unit: 0,
            source_index: 1,
            destination_type: MoveFieldType::RegisterFile,
            destination_unit: 0x80,
            destination_index: 4,
            ..Default::default()
        };
        transport.guarded = true;
        transport.guard_inverted = true;
        transport.guard_type = MoveFieldType::RegisterFile;
        transport.guard_unit = 0x81;
        transport.guard_index = 0;

        let mut second = InstructionElement::from_move(transport);
        second
            .annotations
            .push(InstructionAnnotation::new(3, vec![2, 3]));
        second
            .annotations
            .push(InstructionAnnotation::new(5, Vec::new()));
        elements.add_element(second);

        let mut third = InstructionElement::from_move(MoveElement {
            bus: 2,
            source_type: MoveFieldType::RegisterFile,
            source_unit: 0x80,
            source_index: 7,
            destination_type: MoveFieldType::Unit,
            destination_unit: 0,
            destination_index: 2051,
            ..Default::default()
        });
        third.begin = true;
        elements.add_element(third);
    }

    let code_id = fixture.binary.add_section(code);

    // The machine-resource table.
    let bus_name = fixture.intern("bus1");
    let rf_name = fixture.intern("rf");
    let op_name = fixture.intern("add.2");

    let strings_ref = fixture.section_ref(fixture.strings_id);
    let mut resources = Section::new(SectionData::Resources(Vec::new()));
    resources.link = Some(strings_ref);

    {
        let elements = resources.as_resources_mut().unwrap();

        let mut bus = ResourceElement::new(1, ResourceType::Bus);
        bus.name = Some(bus_name);
        bus.info = 1000;
        elements.push(bus);

        let mut rf = ResourceElement::new(0x80, ResourceType::RegisterFile);
        rf.name = Some(rf_name);
        elements.push(rf);

        let mut operation = ResourceElement::new(2051, ResourceType::Operand);
        operation.name = Some(op_name);
        elements.push(operation);
    }

    fixture.binary.add_section(resources);

    // Symbols of every kind.
    let empty_name = fixture.intern("");
    let names: Vec<_> = ["sym01", "sym02", "sym03", "sym04", "sym05"]
        .iter()
        .map(|name| fixture.intern(name))
        .collect();

    let null_ref = fixture.section_ref(fixture.null_id);
    let code_ref = fixture.section_ref(code_id);
    let data_ref = fixture.section_ref(data_id);
    let instruction0 = fixture.refs.bound(RefTarget::Element(code_id, 0));
    let instruction2 = fixture.refs.bound(RefTarget::Element(code_id, 2));
    let data_chunk = fixture.refs.bound(RefTarget::Chunk(data_id, 2));

    let mut symtab = Section::new(SectionData::Symbols(Vec::new()));
    symtab.link = Some(strings_ref);

    {
        let symbols = symtab.as_symbols_mut().unwrap();

        symbols.push(SymbolElement::undefined(Some(empty_name), Some(null_ref)));

        let mut code_symbol =
            SymbolElement::new(SymbolKind::Code { reference: Some(instruction0), size: 2 });
        code_symbol.binding = SymbolBinding::Global;
        code_symbol.name = Some(names[0]);
        code_symbol.section = Some(code_ref);
        symbols.push(code_symbol);

        let mut procedure =
            SymbolElement::new(SymbolKind::Procedure { reference: Some(instruction2), size: 1 });
        procedure.name = Some(names[1]);
        procedure.section = Some(code_ref);
        symbols.push(procedure);

        let mut data_symbol =
            SymbolElement::new(SymbolKind::Data { reference: Some(data_chunk), size: 4 });
        data_symbol.binding = SymbolBinding::Weak;
        data_symbol.name = Some(names[2]);
        data_symbol.section = Some(data_ref);
        symbols.push(data_symbol);

        let mut section_symbol =
            SymbolElement::new(SymbolKind::Section { value: 100, size: 200 });
        section_symbol.name = Some(names[3]);
        section_symbol.section = Some(code_ref);
        symbols.push(section_symbol);

        let mut file_symbol = SymbolElement::new(SymbolKind::File { value: 7 });
        file_symbol.name = Some(names[4]);
        file_symbol.section = Some(null_ref);
        symbols.push(file_symbol);
    }

    let symtab_id = fixture.binary.add_section(symtab);

    // Line numbers for the first procedure.
    let symtab_ref = fixture.section_ref(symtab_id);
    let code_section_ref = fixture.section_ref(code_id);
    let procedure_symbol = fixture.refs.bound(RefTarget::Element(symtab_id, 1));
    let line_instruction0 = fixture.refs.bound(RefTarget::Element(code_id, 0));
    let line_instruction2 = fixture.refs.bound(RefTarget::Element(code_id, 2));

    let mut linenos = Section::new(SectionData::LineNumbers(Default::default()));
    linenos.link = Some(symtab_ref);

    {
        let data = linenos.as_line_numbers_mut().unwrap();
        data.code_section = Some(code_section_ref);

        let mut procedure = LineNumProcedure { symbol: Some(procedure_symbol), lines: Vec::new() };
        procedure.add_line(1, Some(line_instruction0));
        procedure.add_line(3, Some(line_instruction2));
        data.procedures.push(procedure);
    }

    fixture.binary.add_section(linenos);

    // A stab in the debug section.
    let stab_string = fixture.intern("int:t1=r1");
    let mut debug = Section::new(SectionData::Debug(Vec::new()));
    debug.link = Some(strings_ref);

    {
        let mut stab = DebugElement::stab(0x80, 0, 3, 0x1234);
        stab.string = Some(stab_string);
        debug.as_debug_mut().unwrap().push(stab);
    }

    fixture.binary.add_section(debug);

    let binary = fixture.finish();
    let reread = round_trip(&binary);

    // Spot checks over the re-read graph.
    let code = reread.section_of_type(tpef_object::SectionType::Code, 0).unwrap();
    let code_data = code.as_code().unwrap();

    assert_eq!(code_data.instruction_count(), 2);
    assert_eq!(code_data.element_count(), 3);

    let first = code_data.element(0).unwrap();
    assert_eq!(first.annotations.len(), 1);
    assert_eq!(first.annotations[0].id, 10);

    let second = code_data.element(1).unwrap();
    assert_eq!(second.annotations.len(), 2);
    assert_eq!(second.annotations[1].payload.len(), 0);

    let transport = second.as_move().unwrap();
    assert!(transport.guarded);
    assert!(transport.guard_inverted);
    assert_eq!(transport.destination_index, 4);

    let third = code_data.element(2).unwrap().as_move().unwrap();
    assert_eq!(third.destination_index, 2051);

    // Symbols kept their kinds, bindings and targets.
    let symtab = reread.section_of_type(tpef_object::SectionType::Symbols, 0).unwrap();
    let symbols = symtab.as_symbols().unwrap();
    assert_eq!(symbols.len(), 6);

    assert_eq!(symbols[1].symbol_type(), SymbolType::Code);
    assert_eq!(symbols[2].symbol_type(), SymbolType::Procedure);
    assert_eq!(symbols[3].symbol_type(), SymbolType::Data);
    assert_eq!(symbols[4].symbol_type(), SymbolType::Section);
    assert_eq!(symbols[5].symbol_type(), SymbolType::File);

    let SymbolKind::Procedure { reference, .. } = symbols[2].kind else {
        panic!("expected a procedure symbol");
    };
    let (_, element_index) = reread.element_target(reference).unwrap();
    assert_eq!(element_index, 2);

    let SymbolKind::Data { reference, .. } = symbols[3].kind else {
        panic!("expected a data symbol");
    };
    let (_, offset) = reread.chunk_target(reference).unwrap();
    assert_eq!(offset, 2);

    let SymbolKind::Section { value, size } = symbols[4].kind else {
        panic!("expected a section symbol");
    };
    assert_eq!((value, size), (100, 200));

    // Line numbers reconnect to the procedure symbol and instructions.
    let linenos = reread
        .section_of_type(tpef_object::SectionType::LineNumbers, 0)
        .unwrap();
    let lineno_data = linenos.as_line_numbers().unwrap();

    assert_eq!(lineno_data.procedures.len(), 1);

    let procedure = &lineno_data.procedures[0];
    let (symtab_of_procedure, symbol_index) =
        reread.element_target(procedure.symbol).unwrap();
    assert_eq!(symtab_of_procedure, symtab.id());
    assert_eq!(symbol_index, 1);

    assert_eq!(procedure.lines.len(), 2);
    assert_eq!(procedure.lines[1].line, 3);
    let (_, instruction_element) = reread.element_target(procedure.lines[1].instruction).unwrap();
    assert_eq!(instruction_element, 2);

    // The stab survived with its string.
    let debug = reread.section_of_type(tpef_object::SectionType::Debug, 0).unwrap();
    let stabs = debug.as_debug().unwrap();
    assert_eq!(stabs.len(), 1);

    let (strings_id, offset) = reread.chunk_target(stabs[0].string).unwrap();
    let text = reread.section_by_id(strings_id).unwrap().chunk_to_string(offset).unwrap();
    assert_eq!(text, "int:t1=r1");

    // Uninitialized data kept its logical length with no stored bytes.
    let udata = reread.section_of_type(tpef_object::SectionType::UData, 0).unwrap();
    assert_eq!(udata.length().unwrap(), 1507);
}

#[test]
fn test_unresolved_reference_is_detected() {
    // A valid binary whose code symbol is patched, at the byte level, to
    // an offset where no instruction element starts.
    let mut fixture = Fixture::new();

    let aspace = fixture.add_aspace(8, 4, 4);
    let aspace_ref = fixture.aspace_ref(aspace);

    let mut code = Section::new(SectionData::Code(Default::default()));
    code.aspace = Some(aspace_ref);

    let mut element =
        InstructionElement::from_move(MoveElement { empty: true, bus: 1, ..Default::default() });
    element.begin = true;
    code.as_code_mut().unwrap().add_element(element);

    let code_id = fixture.binary.add_section(code);

    let empty_name = fixture.intern("");
    let null_ref = fixture.section_ref(fixture.null_id);
    let strings_ref = fixture.section_ref(fixture.strings_id);
    let code_ref = fixture.section_ref(code_id);
    let instruction_ref = fixture.refs.bound(RefTarget::Element(code_id, 0));

    let mut symtab = Section::new(SectionData::Symbols(Vec::new()));
    symtab.link = Some(strings_ref);

    let symbols = symtab.as_symbols_mut().unwrap();
    symbols.push(SymbolElement::undefined(Some(empty_name), Some(null_ref)));

    let mut code_symbol =
        SymbolElement::new(SymbolKind::Code { reference: Some(instruction_ref), size: 1 });
    code_symbol.name = Some(empty_name);
    code_symbol.section = Some(code_ref);
    symbols.push(code_symbol);

    fixture.binary.add_section(symtab);
    let binary = fixture.finish();

    let mut bytes = write_bytes(&binary);

    // Patch the symbol value field (bytes 4..8 of symbol record 1) to an
    // offset in the middle of the move's record.
    let record = find_symbol_record(&bytes, 1);
    bytes[record + 4..record + 8].copy_from_slice(&5u32.to_be_bytes());

    let mut stream = BinaryStream::from_bytes(bytes);
    let result = ReaderRegistry::with_default_readers().read_binary(&mut stream);

    assert!(result.is_err(), "a dangling instruction reference must not resolve");
}

/// File offset of symbol record `index`, located through the section
/// header table.
fn find_symbol_record(bytes: &[u8], index: usize) -> usize {
    let word = |offset: usize| {
        u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    };

    let section_count = word(8) as usize;
    let table = word(12) as usize;

    for position in 0..section_count {
        let header = table + position * 30;

        // A symbol section header starts with the type tag 0x02.
        if bytes[header] == 0x02 {
            let body_offset = word(header + 18) as usize;

            return body_offset + index * 16;
        }
    }

    panic!("no symbol section in the written image");
}
