use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHT_NOBITS, SHT_NULL, SHT_PROGBITS};
use goblin::elf::Elf;

use crate::corpus::SectionTable;
use crate::error::{CfpError, CfpResult};
use crate::model::{Section, SectionFlags};

/// Read the section-header table straight from an ELF image.
pub fn sections_from_elf(bytes: &[u8]) -> CfpResult<SectionTable> {
    let elf = Elf::parse(bytes).map_err(|e| CfpError::malformed(0, format!("ELF parse failed: {e}")))?;
    let mut sections = Vec::new();
    for shdr in &elf.section_headers {
        if shdr.sh_type == SHT_NULL {
            continue;
        }
        let name = elf.shdr_strtab.get_at(shdr.sh_name).unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        let alloc = shdr.sh_flags & u64::from(SHF_ALLOC) != 0;
        let code = shdr.sh_flags & u64::from(SHF_EXECINSTR) != 0;
        sections.push(Section {
            name,
            flags: SectionFlags { code, data: alloc && !code && shdr.sh_type == SHT_PROGBITS, alloc },
            address: shdr.sh_addr,
            file_offset: shdr.sh_offset,
            size: if shdr.sh_type == SHT_NOBITS { 0 } else { shdr.sh_size },
        });
    }
    Ok(SectionTable::new(sections))
}

/// Differences in address, offset, size or code flag between two tables.
pub fn compare_sections(listed: &SectionTable, elf: &SectionTable) -> Vec<String> {
    let mut mismatches = Vec::new();
    for section in listed.iter() {
        let Some(other) = elf.index_of(&section.name).and_then(|i| elf.get(i)) else {
            mismatches.push(format!("section {} is not in the ELF headers", section.name));
            continue;
        };
        if section.address != other.address
            || section.file_offset != other.file_offset
            || section.flags.code != other.flags.code
            || (section.size != other.size && other.size != 0)
        {
            mismatches.push(format!(
                "section {} differs: listed {:#x}+{:#x} @ {:#x}, ELF {:#x}+{:#x} @ {:#x}",
                section.name,
                section.address,
                section.size,
                section.file_offset,
                other.address,
                other.size,
                other.file_offset
            ));
        }
    }
    mismatches
}
