use anyhow::{anyhow, Result};
use kcfp_core::codec::{self, Instruction};
use serde::Serialize;

use crate::commands::parse_hex;

#[derive(Debug, Serialize)]
struct DecodedWord {
    #[serde(flatten)]
    insn: Instruction,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    capstone_agrees: Option<bool>,
}

/// Decode raw instruction words, as they would appear at `address` onward.
pub fn decode_command(words: &[String], address: &str, json: bool) -> Result<()> {
    if words.is_empty() {
        return Err(anyhow!("no instruction words given"));
    }
    let base = parse_hex(address)?;
    let mut decoded = Vec::with_capacity(words.len());
    for (i, raw) in words.iter().enumerate() {
        let word = u32::try_from(parse_hex(raw)?)
            .map_err(|_| anyhow!("{raw} does not fit in a 32-bit instruction word"))?;
        let insn = codec::decode(word, base.wrapping_add(4 * i as u64));
        decoded.push(DecodedWord { text: insn.to_string(), capstone_agrees: crosscheck(&insn)?, insn });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
        return Ok(());
    }
    for d in &decoded {
        let marker = match d.capstone_agrees {
            Some(false) => "  ; capstone disagrees",
            _ => "",
        };
        println!("{:>16x}:\t{:08x}\t{}{marker}", d.insn.address, d.insn.word, d.text);
    }
    Ok(())
}

#[cfg(feature = "capstone-crosscheck")]
fn crosscheck(insn: &Instruction) -> Result<Option<bool>> {
    Ok(Some(codec::crosscheck::agrees(insn)?))
}

#[cfg(not(feature = "capstone-crosscheck"))]
fn crosscheck(_insn: &Instruction) -> Result<Option<bool>> {
    Ok(None)
}
