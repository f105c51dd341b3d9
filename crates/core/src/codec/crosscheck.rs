//! Compare the codec's classification against capstone's.

use capstone::prelude::*;

use super::{Instruction, MoveWideKind, Op};
use crate::error::{CfpError, CfpResult};

fn arm64() -> CfpResult<Capstone> {
    Capstone::new()
        .arm64()
        .mode(arch::arm64::ArchMode::Arm)
        .build()
        .map_err(|e| CfpError::Toolchain(format!("capstone init failed: {e}")))
}

/// Capstone's mnemonic for `word`, or `None` if it cannot decode it.
pub fn capstone_mnemonic(word: u32, address: u64) -> CfpResult<Option<String>> {
    let cs = arm64()?;
    let insns = cs
        .disasm_count(&word.to_le_bytes(), address, 1)
        .map_err(|e| CfpError::Toolchain(format!("capstone disassembly failed: {e}")))?;
    let mnemonic = insns.iter().next().and_then(|i| i.mnemonic().map(str::to_string));
    Ok(mnemonic)
}

/// Mnemonics capstone may print for an operand kind, aliases included.
fn accepted(op: &Op) -> &'static [&'static str] {
    match op {
        Op::Bl { .. } => &["bl"],
        Op::Blr { .. } => &["blr"],
        Op::Br { .. } => &["br"],
        Op::Ret { .. } => &["ret"],
        Op::Stp(_) => &["stp"],
        Op::Ldp(_) => &["ldp"],
        Op::Adrp { .. } => &["adrp"],
        Op::AddImm { .. } => &["add", "mov"],
        Op::MoveWide { wide: MoveWideKind::Movz, .. } => &["movz", "mov"],
        Op::MoveWide { wide: MoveWideKind::Movn, .. } => &["movn", "mov"],
        Op::MoveWide { wide: MoveWideKind::Movk, .. } => &["movk"],
        Op::MovReg { .. } => &["mov", "orr"],
        Op::Nop => &["nop", "hint"],
        Op::Eor { .. } | Op::EorImm { .. } => &["eor"],
        Op::Unknown { .. } => &[],
    }
}

/// Whether capstone agrees with the codec about a recognized instruction.
///
/// Unknown instructions always agree.
pub fn agrees(insn: &Instruction) -> CfpResult<bool> {
    if insn.is_unknown() {
        return Ok(true);
    }
    let Some(mnemonic) = capstone_mnemonic(insn.word, insn.address)? else {
        return Ok(false);
    };
    Ok(accepted(&insn.op).contains(&mnemonic.as_str()))
}
