//! Synthetic kernel images for integration tests.
//!
//! A fixture lays functions out back to back in a `.text` section, writes the
//! raw image to a temp dir and renders matching `objdump -d`, `objdump -h` and
//! `nm` text, so corpus, image and engine all agree on addresses and offsets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kcfp_core::codec;
use kcfp_core::{Corpus, ProtectionConfig};
use tempfile::TempDir;

pub const TEXT_ADDR: u64 = 0xffff_ffc0_0008_1000;
pub const TEXT_OFFSET: u64 = 0x1000;
pub const DATA_ADDR: u64 = 0xffff_ffc0_0100_0000;
pub const DATA_SIZE: u64 = 0x40;

pub const NOP: u32 = 0xd503_201f;
pub const RET: u32 = 0xd65f_03c0;
/// `stp x29, x30, [sp, #-32]!`
pub const STP_FRAME_PRE: u32 = 0xa9be_7bfd;
/// `ldp x29, x30, [sp], #32`
pub const LDP_FRAME_POST: u32 = 0xa8c2_7bfd;
/// `stp x29, x30, [sp, #16]`
pub const STP_FRAME_OFFSET: u32 = 0xa901_7bfd;
/// `ldp x29, x30, [sp, #16]`
pub const LDP_FRAME_OFFSET: u32 = 0xa941_7bfd;
/// `stp x29, x30, [sp], #32`
pub const STP_FRAME_POST: u32 = 0xa882_7bfd;
/// `mov x29, sp`
pub const MOV_FP_SP: u32 = 0x9100_03fd;
/// `mov x19, x30`
pub const MOV_X19_LR: u32 = 0xaa1e_03f3;
/// `isb`, which the codec does not recognize.
pub const ISB: u32 = 0xd503_3fdf;
pub const MAGIC: u32 = 0xaaaa_5555;

pub fn blr(rn: u8) -> u32 {
    0xd63f_0000 | (rn as u32) << 5
}

pub fn br(rn: u8) -> u32 {
    0xd61f_0000 | (rn as u32) << 5
}

pub fn ret_via(rn: u8) -> u32 {
    0xd65f_0000 | (rn as u32) << 5
}

/// A function with a maskable frame: `nop; stp; mov; ldp; nop; nop; ret`.
pub fn framed() -> Vec<u32> {
    vec![NOP, STP_FRAME_PRE, MOV_FP_SP, LDP_FRAME_POST, NOP, NOP, RET]
}

pub fn ropp() -> ProtectionConfig {
    ProtectionConfig { ropp: true, ..ProtectionConfig::default() }
}

pub fn jopp() -> ProtectionConfig {
    ProtectionConfig { jopp: true, jopp_magic: Some(MAGIC), ..ProtectionConfig::default() }
}

#[derive(Debug, Default)]
pub struct FixtureBuilder {
    functions: Vec<(String, Vec<u32>)>,
    extra_symbols: Vec<(String, u64)>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, name: &str, words: &[u32]) -> Self {
        self.functions.push((name.to_string(), words.to_vec()));
        self
    }

    /// A text symbol that has no label in the listing.
    pub fn symbol(mut self, name: &str, address: u64) -> Self {
        self.extra_symbols.push((name.to_string(), address));
        self
    }

    pub fn build(self) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut listing = vec![
            String::new(),
            "vmlinux:     file format elf64-littleaarch64".to_string(),
            String::new(),
            String::new(),
            "Disassembly of section .text:".to_string(),
        ];
        let mut text = Vec::new();
        let mut placed: HashMap<String, Vec<Placed>> = HashMap::new();
        let mut symbols = String::new();
        let mut address = TEXT_ADDR;

        for (name, words) in &self.functions {
            listing.push(String::new());
            let label_line = listing.len();
            listing.push(format!("{address:016x} <{name}>:"));
            symbols.push_str(&format!("{address:016x} T {name}\n"));
            let mut lines = Vec::new();
            for &word in words {
                let insn = codec::decode(word, address);
                lines.push((listing.len(), address));
                listing.push(format!("{address:16x}:\t{word:08x} \t{insn}"));
                text.extend_from_slice(&word.to_le_bytes());
                address += 4;
            }
            placed.entry(name.clone()).or_default().push(Placed { label_line, lines });
        }
        for (name, addr) in &self.extra_symbols {
            symbols.push_str(&format!("{addr:016x} T {name}\n"));
        }
        symbols.push_str(&format!("{DATA_ADDR:016x} D jiffies\n"));
        symbols.push_str("                 U printk\n");

        let text_size = text.len() as u64;
        let data_offset = TEXT_OFFSET + text_size;
        let sections = format!(
            "\nvmlinux:     file format elf64-littleaarch64\n\n\
             Sections:\n\
             Idx Name          Size      VMA               LMA               File off  Algn\n  \
             0 .text         {text_size:08x}  {TEXT_ADDR:016x}  {:016x}  {TEXT_OFFSET:08x}  2**12\n                  \
             CONTENTS, ALLOC, LOAD, READONLY, CODE\n  \
             1 .data         {DATA_SIZE:08x}  {DATA_ADDR:016x}  {:016x}  {data_offset:08x}  2**3\n                  \
             CONTENTS, ALLOC, LOAD, DATA\n",
            TEXT_ADDR & 0xffff_ffff,
            DATA_ADDR & 0xffff_ffff,
        );

        let mut bytes = vec![0u8; TEXT_OFFSET as usize];
        bytes[..4].copy_from_slice(b"\x7fKRN");
        bytes.extend_from_slice(&text);
        bytes.extend(std::iter::repeat(0xee).take(DATA_SIZE as usize));

        let image = dir.path().join("vmlinux");
        fs::write(&image, &bytes).expect("write image");
        let disassembly = listing.join("\n") + "\n";
        let paths = InputPaths {
            disassembly: dir.path().join("vmlinux.dis"),
            sections: dir.path().join("vmlinux.sec"),
            symbols: dir.path().join("System.map"),
        };
        fs::write(&paths.disassembly, &disassembly).expect("write disassembly");
        fs::write(&paths.sections, &sections).expect("write sections");
        fs::write(&paths.symbols, &symbols).expect("write symbols");

        let corpus = Corpus::build(&disassembly, &sections, &symbols).expect("corpus");
        Fixture { dir, image, paths, disassembly, sections, symbols, corpus, placed, data_offset }
    }
}

#[derive(Debug, Clone)]
struct Placed {
    label_line: usize,
    lines: Vec<(usize, u64)>,
}

#[derive(Debug, Clone)]
pub struct InputPaths {
    pub disassembly: PathBuf,
    pub sections: PathBuf,
    pub symbols: PathBuf,
}

pub struct Fixture {
    pub dir: TempDir,
    pub image: PathBuf,
    pub paths: InputPaths,
    pub disassembly: String,
    pub sections: String,
    pub symbols: String,
    pub corpus: Corpus,
    placed: HashMap<String, Vec<Placed>>,
    pub data_offset: u64,
}

impl Fixture {
    fn first(&self, name: &str) -> &Placed {
        &self.placed.get(name).unwrap_or_else(|| panic!("no function {name}"))[0]
    }

    /// Listing line of a function's label.
    pub fn label_line(&self, name: &str) -> usize {
        self.first(name).label_line
    }

    /// Label lines of every definition of `name`.
    pub fn label_lines(&self, name: &str) -> Vec<usize> {
        self.placed[name].iter().map(|p| p.label_line).collect()
    }

    /// Listing line of the `index`th instruction of `name`.
    pub fn line(&self, name: &str, index: usize) -> usize {
        self.first(name).lines[index].0
    }

    pub fn address(&self, name: &str, index: usize) -> u64 {
        self.first(name).lines[index].1
    }

    pub fn offset(&self, name: &str, index: usize) -> u64 {
        TEXT_OFFSET + (self.address(name, index) - TEXT_ADDR)
    }

    /// Word of the `index`th instruction of `name` in the image at `path`.
    pub fn word_in(&self, path: &Path, name: &str, index: usize) -> u32 {
        let bytes = fs::read(path).expect("read image");
        let at = self.offset(name, index) as usize;
        u32::from_le_bytes(bytes[at..at + 4].try_into().expect("word"))
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }
}
