//! Indexed model of a disassembled image.
//!
//! A [`Corpus`] is built once from the disassembly listing, the section-header
//! table and the symbol table, and is read-only afterwards. Lines are addressed
//! by their zero-based index in the listing.

pub mod listing;
pub mod sections;
pub mod symbols;

use std::collections::HashMap;

use tracing::debug;

use crate::codec::{self, Instruction};
use crate::error::{CfpError, CfpResult};
use crate::model::{DisassemblyLine, FunctionId, FunctionSymbol, Section, BYTES_PER_INSN};
pub use sections::SectionTable;
pub use symbols::SymbolTable;

#[derive(Debug, Clone)]
pub struct Corpus {
    sections: SectionTable,
    symbols: SymbolTable,
    lines: Vec<DisassemblyLine>,
    functions: HashMap<String, FunctionSymbol>,
    /// Every label definition, ordered by line.
    labels: Vec<(FunctionId, u64)>,
}

impl Corpus {
    /// Build from the three text inputs.
    pub fn build(disassembly: &str, sections: &str, symbols: &str) -> CfpResult<Self> {
        Self::from_parts(disassembly, SectionTable::parse(sections)?, SymbolTable::parse(symbols)?)
    }

    /// Build from a listing and already-parsed tables.
    pub fn from_parts(
        disassembly: &str,
        sections: SectionTable,
        symbols: SymbolTable,
    ) -> CfpResult<Self> {
        let mut lines = Vec::new();
        let mut functions: HashMap<String, FunctionSymbol> = HashMap::new();
        let mut labels = Vec::new();
        let mut current: Option<usize> = None;

        for (i, text) in disassembly.lines().enumerate() {
            let mut address = None;
            if let Some(name) = listing::section_marker(text) {
                current = Some(sections.index_of(name).ok_or_else(|| {
                    CfpError::malformed(i + 1, format!("unknown section {name}"))
                })?);
            } else if let Some((label_address, name)) = listing::function_label(text) {
                let id = FunctionId::new(name, i);
                functions
                    .entry(name.to_string())
                    .or_insert_with(|| FunctionSymbol {
                        name: name.to_string(),
                        address: label_address,
                        lines: Vec::new(),
                    })
                    .lines
                    .push(i);
                labels.push((id, label_address));
            } else if let Some(addr) = listing::instruction_address(text) {
                let in_current = current
                    .and_then(|idx| sections.get(idx))
                    .is_some_and(|s| s.contains_address(addr));
                if !in_current {
                    current = Some(sections.index_by_address(addr).ok_or_else(|| {
                        CfpError::malformed(i + 1, format!("address {addr:#x} is in no section"))
                    })?);
                }
                address = Some(addr);
            }
            lines.push(DisassemblyLine { text: text.to_string(), section: current, address });
        }

        debug!(
            lines = lines.len(),
            functions = labels.len(),
            sections = sections.len(),
            symbols = symbols.len(),
            "corpus built"
        );
        Ok(Self { sections, symbols, lines, functions, labels })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, i: usize) -> Option<&DisassemblyLine> {
        self.lines.get(i)
    }

    pub fn text(&self, i: usize) -> &str {
        self.lines.get(i).map(|l| l.text.as_str()).unwrap_or("")
    }

    pub fn address(&self, i: usize) -> Option<u64> {
        self.lines.get(i).and_then(|l| l.address)
    }

    pub fn section_of(&self, i: usize) -> Option<&Section> {
        self.lines.get(i).and_then(|l| l.section).and_then(|s| self.sections.get(s))
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn is_function_label(&self, i: usize) -> bool {
        self.labels.binary_search_by_key(&i, |(id, _)| id.line).is_ok()
    }

    pub fn is_instruction(&self, i: usize) -> bool {
        self.address(i).is_some()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.get(name)
    }

    /// Every function definition, ordered by label line.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionId> {
        self.labels.iter().map(|(id, _)| id)
    }

    pub fn function_count(&self) -> usize {
        self.labels.len()
    }

    /// Resolve a function name to one definition.
    ///
    /// A name defined more than once needs `line` to pick the definition.
    pub fn resolve_function(&self, name: &str, line: Option<usize>) -> CfpResult<FunctionId> {
        let symbol =
            self.functions.get(name).ok_or_else(|| CfpError::MissingSymbol(name.to_string()))?;
        match (line, symbol.lines.as_slice()) {
            (None, [only]) => Ok(FunctionId::new(name, *only)),
            (None, many) => Err(CfpError::AmbiguousSymbol {
                name: name.to_string(),
                lines: many.to_vec(),
            }),
            (Some(l), defs) if defs.contains(&l) => Ok(FunctionId::new(name, l)),
            (Some(l), _) => Err(CfpError::MissingSymbol(format!("{name} at line {l}"))),
        }
    }

    /// Address of the label of a function definition.
    pub fn label_address(&self, id: &FunctionId) -> Option<u64> {
        self.labels
            .binary_search_by_key(&id.line, |(l, _)| l.line)
            .ok()
            .map(|idx| self.labels[idx].1)
    }

    /// Last line of the contiguous run of instruction or label lines after a label.
    pub fn function_end(&self, id: &FunctionId) -> usize {
        let mut i = id.line + 1;
        while i < self.lines.len() && (self.is_instruction(i) || self.is_function_label(i)) {
            i += 1;
        }
        i - 1
    }

    /// The function whose label most closely precedes line `i`.
    pub fn enclosing_function(&self, i: usize) -> Option<&FunctionId> {
        let after = self.labels.partition_point(|(id, _)| id.line <= i);
        after.checked_sub(1).map(|idx| &self.labels[idx].0)
    }

    pub fn prev_instruction(&self, i: usize) -> Option<usize> {
        (0..i.min(self.lines.len())).rev().find(|&j| self.is_instruction(j))
    }

    pub fn next_instruction(&self, i: usize) -> Option<usize> {
        (i + 1..self.lines.len()).find(|&j| self.is_instruction(j))
    }

    /// Instruction lines of a function definition, in order, up to the next label.
    pub fn instructions_of(&self, id: &FunctionId) -> impl Iterator<Item = usize> + '_ {
        let end = self.function_end(id);
        (id.line + 1..=end)
            .take_while(move |&i| !self.is_function_label(i))
            .filter(move |&i| self.is_instruction(i))
    }

    /// Address of a symbol: function labels first, then text symbols.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.functions.get(name).map(|f| f.address).or_else(|| self.symbols.address_of(name))
    }

    /// Byte offset in the image file of instruction line `i`.
    pub fn file_offset(&self, i: usize) -> CfpResult<u64> {
        let address = self
            .address(i)
            .ok_or_else(|| CfpError::malformed(i + 1, "line has no instruction address"))?;
        let section = self
            .section_of(i)
            .ok_or_else(|| CfpError::malformed(i + 1, "line has no section"))?;
        Ok(section.file_offset + (address - section.address))
    }

    /// Byte range `[start, end)` in the image file covered by a function's instructions.
    pub fn function_file_range(&self, id: &FunctionId) -> CfpResult<Option<(u64, u64)>> {
        let mut insns = self.instructions_of(id);
        let Some(first) = insns.next() else {
            return Ok(None);
        };
        let last = insns.last().unwrap_or(first);
        Ok(Some((self.file_offset(first)?, self.file_offset(last)? + BYTES_PER_INSN)))
    }

    /// Decode `word` as the instruction on line `i`, using the listing text for
    /// words the codec does not recognize.
    pub fn decode_line(&self, i: usize, word: u32) -> Instruction {
        let address = self.address(i).unwrap_or_default();
        let insn = codec::decode(word, address);
        match listing::instruction_text(self.text(i)) {
            Some(text) if insn.is_unknown() => insn.with_text(text),
            _ => insn,
        }
    }
}
