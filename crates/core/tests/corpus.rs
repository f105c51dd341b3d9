mod common;

use common::*;
use kcfp_core::codec::Op;
use kcfp_core::corpus::{listing, SectionTable, SymbolTable};
use kcfp_core::model::FunctionId;
use kcfp_core::{CfpError, Corpus};

const SECTIONS: &str = "
vmlinux:     file format elf64-littleaarch64

Sections:
Idx Name          Size      VMA               LMA               File off  Algn
  0 .head.text    00001000  ffffff8008080000  0000000080080000  00010000  2**12
                  CONTENTS, ALLOC, LOAD, READONLY, CODE
  1 .text         00a00000  ffffff8008081000  0000000080081000  00011000  2**11
                  CONTENTS, ALLOC, LOAD, READONLY, CODE
  2 .rodata       00300000  ffffff8008a90000  0000000080a90000  00a20000  2**12
                  CONTENTS, ALLOC, LOAD, DATA
  3 .bss          00080000  ffffff8009000000  0000000081000000  00d20000  2**12
                  ALLOC
  4 .comment      0000002d  0000000000000000  0000000000000000  00d20000  2**0
                  CONTENTS, READONLY
";

#[test]
fn parses_section_headers_and_flags() {
    let table = SectionTable::parse(SECTIONS).expect("sections");
    assert_eq!(table.len(), 5);

    let text = table.get(table.index_of(".text").expect(".text")).expect("section");
    assert_eq!(text.address, 0xffff_ff80_0808_1000);
    assert_eq!(text.file_offset, 0x11000);
    assert_eq!(text.size, 0xa0_0000);
    assert!(text.flags.code && text.flags.alloc && !text.flags.data);

    let rodata = table.get(table.index_of(".rodata").expect(".rodata")).expect("section");
    assert!(rodata.flags.data && !rodata.is_code());

    let codes: Vec<&str> = table.code_sections().map(|s| s.name.as_str()).collect();
    assert_eq!(codes, vec![".head.text", ".text"]);

    assert_eq!(table.index_by_address(0xffff_ff80_0808_1004), table.index_of(".text"));
    // .comment is not allocated even though address 0 falls in its range.
    assert_eq!(table.index_by_address(0x10), None);
    assert_eq!(table.by_file_offset(0x11000).map(|s| s.name.as_str()), Some(".text"));
}

#[test]
fn section_row_without_flags_is_malformed() {
    let text = "  0 .text         00001000  ffffff8008081000  0000000080081000  00011000  2**11\n";
    assert!(matches!(SectionTable::parse(text), Err(CfpError::MalformedInput { line: 1, .. })));

    let back_to_back = "\
  0 .text         00001000  ffffff8008081000  0000000080081000  00011000  2**11
  1 .data         00001000  ffffff8008091000  0000000080091000  00021000  2**3
                  CONTENTS, ALLOC, LOAD, DATA
";
    assert!(matches!(SectionTable::parse(back_to_back), Err(CfpError::MalformedInput { .. })));
}

#[test]
fn section_row_with_bad_hex_is_malformed() {
    let text = "  0 .text         0000zz00  ffffff8008081000  0000000080081000  00011000  2**11\n\
                CONTENTS, ALLOC, LOAD, READONLY, CODE\n";
    match SectionTable::parse(text) {
        Err(CfpError::MalformedInput { reason, .. }) => assert!(reason.contains("size")),
        other => panic!("expected malformed input, got {other:?}"),
    }
}

#[test]
fn symbol_table_keeps_text_symbols() {
    let nm = "\
ffffff8008081000 T _text
ffffff8008081040 t local_helper
ffffff8009000000 B __bss_start
                 U printk
ffffff8008082000 T dup
ffffff8008081800 T dup
";
    let table = SymbolTable::parse(nm).expect("symbols");
    assert_eq!(table.address_of("_text"), Some(0xffff_ff80_0808_1000));
    assert_eq!(table.address_of("local_helper"), Some(0xffff_ff80_0808_1040));
    assert_eq!(table.address_of("__bss_start"), None);
    assert_eq!(table.address_of("printk"), None);
    assert_eq!(table.address_of("dup"), Some(0xffff_ff80_0808_2000));
    assert_eq!(table.len(), 3);
}

#[test]
fn truncated_symbol_row_is_malformed() {
    let nm = "ffffff8008081000 T _text\nffffff8008081040\n";
    assert!(matches!(SymbolTable::parse(nm), Err(CfpError::MalformedInput { line: 2, .. })));
    assert!(matches!(SymbolTable::parse("zz T broken\n"), Err(CfpError::MalformedInput { .. })));
}

#[test]
fn classifies_listing_lines() {
    assert_eq!(listing::section_marker("Disassembly of section .text:"), Some(".text"));
    assert_eq!(listing::section_marker("Disassembly of section .text"), None);

    assert_eq!(
        listing::function_label("ffffff8008081000 <__do_softirq>:"),
        Some((0xffff_ff80_0808_1000, "__do_softirq"))
    );
    assert_eq!(listing::function_label("ffffff8008081000 <>:"), None);
    assert_eq!(listing::function_label("vmlinux:     file format elf64-littleaarch64"), None);

    let line = "ffffff8008081004:\ta9be7bfd \tstp\tx29, x30, [sp, #-32]!";
    assert_eq!(listing::instruction_address(line), Some(0xffff_ff80_0808_1004));
    assert_eq!(listing::instruction_text(line), Some("stp\tx29, x30, [sp, #-32]!"));
    assert_eq!(listing::instruction_address("vmlinux:     file format"), None);
}

#[test]
fn indexes_functions_and_lines() {
    let fx = FixtureBuilder::new()
        .function("first", &[MOV_FP_SP, RET, NOP, NOP])
        .function("second", &framed())
        .build();
    let corpus = &fx.corpus;

    assert_eq!(corpus.function_count(), 2);
    assert!(corpus.is_function_label(fx.label_line("second")));
    assert!(!corpus.is_instruction(fx.label_line("second")));
    assert!(corpus.is_instruction(fx.line("second", 0)));

    let second = FunctionId::new("second", fx.label_line("second"));
    let lines: Vec<usize> = corpus.instructions_of(&second).collect();
    assert_eq!(lines.len(), framed().len());
    assert_eq!(lines[0], fx.line("second", 0));
    assert_eq!(corpus.function_end(&second), fx.line("second", 6));
    assert_eq!(corpus.label_address(&second), Some(fx.address("second", 0)));

    assert_eq!(corpus.address(fx.line("second", 2)), Some(fx.address("second", 2)));
    assert_eq!(corpus.file_offset(fx.line("second", 2)).expect("offset"), fx.offset("second", 2));
    assert_eq!(corpus.section_of(fx.line("second", 2)).map(|s| s.name.as_str()), Some(".text"));
    assert_eq!(corpus.enclosing_function(fx.line("first", 3)).map(|f| f.name.as_str()), Some("first"));

    assert_eq!(corpus.prev_instruction(fx.line("second", 0)), Some(fx.line("first", 3)));
    assert_eq!(corpus.next_instruction(fx.line("first", 3)), Some(fx.line("second", 0)));
    assert_eq!(corpus.prev_instruction(fx.line("first", 0)), None);

    assert_eq!(
        corpus.function_file_range(&second).expect("range"),
        Some((fx.offset("second", 0), fx.offset("second", 6) + 4))
    );
    assert_eq!(corpus.symbol_address("second"), Some(fx.address("second", 0)));
    assert_eq!(corpus.symbol_address("nowhere"), None);
}

#[test]
fn resolves_function_names() {
    let fx = FixtureBuilder::new().function("only", &[RET]).build();
    let id = fx.corpus.resolve_function("only", None).expect("resolve");
    assert_eq!(id, FunctionId::new("only", fx.label_line("only")));

    assert!(matches!(fx.corpus.resolve_function("absent", None), Err(CfpError::MissingSymbol(_))));
    assert!(matches!(
        fx.corpus.resolve_function("only", Some(fx.label_line("only") + 1)),
        Err(CfpError::MissingSymbol(_))
    ));
}

#[test]
fn decode_line_falls_back_to_listing_text() {
    let fx = FixtureBuilder::new().function("barrier", &[ISB, NOP, RET]).build();
    let line = fx.line("barrier", 0);

    let insn = fx.corpus.decode_line(line, ISB);
    assert!(matches!(&insn.op, Op::Unknown { text } if text.starts_with(".inst")));

    let blr_insn = fx.corpus.decode_line(fx.line("barrier", 1), blr(2));
    assert_eq!(blr_insn.op, Op::Blr { rn: 2 });
    assert_eq!(blr_insn.address, fx.address("barrier", 1));
}

#[test]
fn listing_mentioning_unknown_section_is_malformed() {
    let fx = FixtureBuilder::new().function("f", &[RET]).build();
    let listing = fx.disassembly.replace("section .text:", "section .init.text:");
    match Corpus::build(&listing, &fx.sections, &fx.symbols) {
        Err(CfpError::MalformedInput { reason, .. }) => assert!(reason.contains(".init.text")),
        other => panic!("expected malformed input, got {other:?}"),
    }
}

#[test]
fn instruction_outside_every_section_is_malformed() {
    let listing = "\
Disassembly of section .text:

0000000000000010 <stray>:
      10:\td65f03c0 \tret
";
    let fx = FixtureBuilder::new().function("f", &[RET]).build();
    assert!(matches!(
        Corpus::build(listing, &fx.sections, &fx.symbols),
        Err(CfpError::MalformedInput { line: 4, .. })
    ));
}
