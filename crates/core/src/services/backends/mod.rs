//! Sources of the disassembly, section table and symbol table a [`Corpus`] is
//! built from.

#[cfg(feature = "elf-sections")]
pub mod elf;
pub mod toolchain;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::corpus::{Corpus, SectionTable, SymbolTable};
use crate::error::{CfpError, CfpResult};

#[cfg(feature = "elf-sections")]
pub use elf::{compare_sections, sections_from_elf};
pub use toolchain::ToolchainBackend;

/// Produces the corpus of an image.
pub trait CorpusBackend: Send + Sync {
    fn build_corpus(&self, image: &Path) -> CfpResult<Corpus>;
    fn name(&self) -> &'static str;
}

/// Pre-generated `objdump -d`, `objdump -h` and `nm` output files.
///
/// Without a section file the section table is read from the image itself.
#[derive(Debug, Clone)]
pub struct TextFilesBackend {
    pub disassembly: PathBuf,
    pub sections: Option<PathBuf>,
    pub symbols: PathBuf,
}

impl CorpusBackend for TextFilesBackend {
    fn build_corpus(&self, image: &Path) -> CfpResult<Corpus> {
        let disassembly = read_text(&self.disassembly)?;
        let symbols = SymbolTable::parse(&read_text(&self.symbols)?)?;
        let sections = match &self.sections {
            Some(path) => {
                let table = SectionTable::parse(&read_text(path)?)?;
                cross_check(image, &table);
                table
            }
            None => elf_sections(image)?,
        };
        info!(backend = self.name(), disassembly = %self.disassembly.display(), "building corpus");
        Corpus::from_parts(&disassembly, sections, symbols)
    }

    fn name(&self) -> &'static str {
        "text-files"
    }
}

pub(crate) fn read_text(path: &Path) -> CfpResult<String> {
    fs::read_to_string(path).map_err(|e| CfpError::io(path, e))
}

#[cfg(feature = "elf-sections")]
fn elf_sections(image: &Path) -> CfpResult<SectionTable> {
    let bytes = fs::read(image).map_err(|e| CfpError::io(image, e))?;
    sections_from_elf(&bytes)
}

#[cfg(not(feature = "elf-sections"))]
fn elf_sections(_image: &Path) -> CfpResult<SectionTable> {
    Err(CfpError::Toolchain(
        "no section table supplied and ELF section reading is disabled".to_string(),
    ))
}

/// Log where a supplied section table disagrees with the image's own headers.
#[cfg(feature = "elf-sections")]
fn cross_check(image: &Path, table: &SectionTable) {
    let Ok(elf_table) = elf_sections(image) else {
        return;
    };
    for mismatch in compare_sections(table, &elf_table) {
        warn!(image = %image.display(), "{mismatch}");
    }
}

#[cfg(not(feature = "elf-sections"))]
fn cross_check(_image: &Path, _table: &SectionTable) {}
