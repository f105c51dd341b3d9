//! Section-header table parsing (`objdump -h` layout).

use std::collections::HashMap;

use crate::error::{CfpError, CfpResult};
use crate::model::{Section, SectionFlags};

/// Sections of an image with a name lookup.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
    by_name: HashMap<String, usize>,
}

impl SectionTable {
    pub fn new(sections: Vec<Section>) -> Self {
        let by_name = sections.iter().enumerate().map(|(i, s)| (s.name.clone(), i)).collect();
        Self { sections, by_name }
    }

    /// Parse `objdump -h` output.
    ///
    /// ```text
    /// Idx Name          Size      VMA               LMA               File off  Algn
    ///   0 .head.text    00001000  ffffff8008080000  0000000080080000  00010000  2**12
    ///                   CONTENTS, ALLOC, LOAD, READONLY, CODE
    /// ```
    pub fn parse(text: &str) -> CfpResult<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let mut sections = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let Some(mut section) = parse_header_row(lines[i], i + 1)? else {
                i += 1;
                continue;
            };
            let flags_row = lines.get(i + 1).copied().unwrap_or("");
            if flags_row.trim().is_empty() || parse_header_row(flags_row, i + 2)?.is_some() {
                return Err(CfpError::malformed(
                    i + 1,
                    format!("section {} has no flags row", section.name),
                ));
            }
            section.flags = SectionFlags::parse(flags_row);
            sections.push(section);
            i += 2;
        }
        Ok(Self::new(sections))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Index of the allocated section whose address range holds `address`.
    pub fn index_by_address(&self, address: u64) -> Option<usize> {
        self.sections.iter().position(|s| s.flags.alloc && s.contains_address(address))
    }

    /// Section whose file range holds `offset`.
    pub fn by_file_offset(&self, offset: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.size > 0 && s.contains_file_offset(offset))
    }

    pub fn code_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_code())
    }
}

/// Returns `Ok(None)` for lines that are not section rows.
fn parse_header_row(row: &str, line: usize) -> CfpResult<Option<Section>> {
    let cols: Vec<&str> = row.split_whitespace().collect();
    if cols.len() != 7 || !cols[0].bytes().all(|b| b.is_ascii_digit()) || !cols[6].starts_with("2**")
    {
        return Ok(None);
    }
    let hex = |col: &str, what: &str| {
        u64::from_str_radix(col, 16)
            .map_err(|_| CfpError::malformed(line, format!("bad {what} {col:?} in section row")))
    };
    Ok(Some(Section {
        name: cols[1].to_string(),
        flags: SectionFlags::default(),
        size: hex(cols[2], "size")?,
        address: hex(cols[3], "VMA")?,
        file_offset: hex(cols[5], "file offset")?,
    }))
}
