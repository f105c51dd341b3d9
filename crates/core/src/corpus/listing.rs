//! Line classifiers for `objdump -d` output.
//!
//! ```text
//! Disassembly of section .text:
//!
//! ffffffc000081000 <foo>:
//! ffffffc000081000:	d503201f 	nop
//! ```

const SECTION_MARKER: &str = "Disassembly of section ";

/// Name of the section announced by a `Disassembly of section X:` line.
pub fn section_marker(line: &str) -> Option<&str> {
    line.trim().strip_prefix(SECTION_MARKER)?.strip_suffix(':')
}

/// Address and name of a function label line (`<hex> <name>:`).
pub fn function_label(line: &str) -> Option<(u64, &str)> {
    let (addr, rest) = line.trim().split_once(' ')?;
    let name = rest.trim().strip_prefix('<')?.strip_suffix(">:")?;
    if name.is_empty() {
        return None;
    }
    Some((parse_hex(addr)?, name))
}

/// Address of an instruction line (leading `hex:`).
pub fn instruction_address(line: &str) -> Option<u64> {
    let (addr, _) = line.trim_start().split_once(':')?;
    parse_hex(addr)
}

/// The mnemonic and operands of an instruction line, without address and word.
pub fn instruction_text(line: &str) -> Option<&str> {
    let (_, rest) = line.trim_start().split_once(':')?;
    let rest = rest.trim_start();
    let word_end = rest.find(char::is_whitespace)?;
    Some(rest[word_end..].trim())
}

fn parse_hex(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}
