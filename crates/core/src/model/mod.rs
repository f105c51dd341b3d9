//! Core data model for an instrumented image: sections, disassembly lines and
//! function symbols.
//!
//! These types are built once per run by the [`corpus`](crate::corpus) and are
//! read-only afterwards.

use serde::{Deserialize, Serialize};

/// Frame pointer.
pub const REG_FP: u8 = 29;
/// Link register.
pub const REG_LR: u8 = 30;
/// Stack pointer (or zero register, depending on the operand position).
pub const REG_SP: u8 = 31;

/// Default register that carries the masked return address.
pub const DEFAULT_MASK_REGISTER: u8 = 16;
/// Default register that holds the XOR key.
pub const DEFAULT_KEY_REGISTER: u8 = 17;

/// Every instruction is one 32-bit word.
pub const BYTES_PER_INSN: u64 = 4;

/// Prefix shared by all springboard functions.
pub const SPRINGBOARD_PREFIX: &str = "jopp_springboard_";

/// Name of the springboard that dispatches `blr x<register>`.
pub fn springboard_for(register: u8) -> String {
    format!("{SPRINGBOARD_PREFIX}blr_x{register}")
}

/// Kind flags of a section, as reported by the section-header table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFlags {
    pub code: bool,
    pub data: bool,
    pub alloc: bool,
}

impl SectionFlags {
    /// Parse the flags row of `objdump -h` (e.g. `CONTENTS, ALLOC, LOAD, READONLY, CODE`).
    pub fn parse(row: &str) -> Self {
        let mut flags = Self::default();
        for flag in row.split(',').map(str::trim) {
            match flag {
                "CODE" => flags.code = true,
                "DATA" => flags.data = true,
                "ALLOC" => flags.alloc = true,
                _ => {}
            }
        }
        flags
    }
}

/// One entry of the section-header table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub flags: SectionFlags,
    /// Virtual address of the first byte.
    pub address: u64,
    /// Offset of the first byte in the image file.
    pub file_offset: u64,
    pub size: u64,
}

impl Section {
    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }

    pub fn contains_file_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset - self.file_offset < self.size
    }

    pub fn is_code(&self) -> bool {
        self.flags.code
    }
}

/// One line of disassembly output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyLine {
    pub text: String,
    /// Index into the corpus section table of the section this line belongs to.
    pub section: Option<usize>,
    /// Virtual address, present only on instruction lines.
    pub address: Option<u64>,
}

/// A function label seen in the disassembly.
///
/// The same name may be defined several times (static functions in different
/// translation units); each definition is one entry in `lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub address: u64,
    pub lines: Vec<usize>,
}

/// A single definition of a function: its name and the line of its label.
///
/// Two definitions with the same name are distinct functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    pub name: String,
    pub line: usize,
}

impl FunctionId {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self { name: name.into(), line }
    }
}
