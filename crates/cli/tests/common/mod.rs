//! On-disk image, listing, section table and symbol map for CLI runs.

#![allow(dead_code)]

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use kcfp_core::codec;
use tempfile::TempDir;

pub const TEXT_ADDR: u64 = 0xffff_ffc0_0008_1000;
pub const TEXT_OFFSET: u64 = 0x1000;

pub const NOP: u32 = 0xd503_201f;
pub const RET: u32 = 0xd65f_03c0;
pub const STP_FRAME_PRE: u32 = 0xa9be_7bfd;
pub const LDP_FRAME_POST: u32 = 0xa8c2_7bfd;
pub const MOV_FP_SP: u32 = 0x9100_03fd;
pub const MAGIC: u32 = 0xaaaa_5555;

pub const ROPP_CONFIG: &str = "CONFIG_RKP_CFP_ROPP=y\n# CONFIG_RKP_CFP_JOPP is not set\n";
pub const BOTH_CONFIG: &str =
    "CONFIG_RKP_CFP_ROPP=y\nCONFIG_RKP_CFP_JOPP=y\nCONFIG_RKP_CFP_JOPP_MAGIC=0xAAAA5555\n";

pub fn framed() -> Vec<u32> {
    vec![NOP, STP_FRAME_PRE, MOV_FP_SP, LDP_FRAME_POST, NOP, NOP, RET]
}

pub struct Workspace {
    pub dir: TempDir,
    /// `(name, first instruction offset in the image)`
    pub offsets: Vec<(String, u64)>,
}

impl Workspace {
    pub fn new(functions: &[(&str, Vec<u32>)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut listing = String::from("\nvmlinux:     file format elf64-littleaarch64\n\n\nDisassembly of section .text:\n");
        let mut symbols = String::new();
        let mut text = Vec::new();
        let mut offsets = Vec::new();
        let mut address = TEXT_ADDR;

        for (name, words) in functions {
            listing.push_str(&format!("\n{address:016x} <{name}>:\n"));
            symbols.push_str(&format!("{address:016x} T {name}\n"));
            offsets.push((name.to_string(), TEXT_OFFSET + (address - TEXT_ADDR)));
            for &word in words {
                let insn = codec::decode(word, address);
                listing.push_str(&format!("{address:16x}:\t{word:08x} \t{insn}\n"));
                text.extend_from_slice(&word.to_le_bytes());
                address += 4;
            }
        }

        let sections = format!(
            "Idx Name          Size      VMA               LMA               File off  Algn\n  \
             0 .text         {:08x}  {TEXT_ADDR:016x}  {:016x}  {TEXT_OFFSET:08x}  2**12\n                  \
             CONTENTS, ALLOC, LOAD, READONLY, CODE\n",
            text.len(),
            TEXT_ADDR & 0xffff_ffff,
        );

        let mut image = vec![0u8; TEXT_OFFSET as usize];
        image.extend_from_slice(&text);
        fs::write(dir.path().join("vmlinux"), image).expect("write image");
        fs::write(dir.path().join("vmlinux.dis"), listing).expect("write listing");
        fs::write(dir.path().join("vmlinux.sec"), sections).expect("write sections");
        fs::write(dir.path().join("System.map"), symbols).expect("write symbols");
        Self { dir, offsets }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write_config(&self, body: &str) -> PathBuf {
        let path = self.path(".config");
        fs::write(&path, body).expect("write config");
        path
    }

    pub fn corpus_args(&self) -> Vec<OsString> {
        vec![
            "--disassembly".into(),
            self.path("vmlinux.dis").into_os_string(),
            "--sections".into(),
            self.path("vmlinux.sec").into_os_string(),
            "--symbols".into(),
            self.path("System.map").into_os_string(),
        ]
    }

    /// Word `index` of function `name` in the file `file`.
    pub fn word(&self, file: &str, name: &str, index: usize) -> u32 {
        let bytes = fs::read(self.path(file)).expect("read image");
        let base = self.offsets.iter().find(|(n, _)| n == name).expect("function").1;
        let at = (base + 4 * index as u64) as usize;
        u32::from_le_bytes(bytes[at..at + 4].try_into().expect("word"))
    }
}
