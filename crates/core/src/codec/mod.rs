//! AArch64 instruction codec for the instruction classes the rewrite passes
//! recognize.
//!
//! [`decode`] turns a raw word into an [`Instruction`]; [`encode`] is its
//! inverse. Two synthetic kinds ([`Op::Eor`], [`Op::EorImm`]) only exist on the
//! encode side and decode back to [`Op::Unknown`].

#[cfg(feature = "capstone-crosscheck")]
pub mod crosscheck;
pub mod fields;

use std::fmt;

use serde::Serialize;

use crate::error::{CfpError, CfpResult};
use fields::*;

/// Addressing mode of a load/store pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairMode {
    PostIndex,
    SignedOffset,
    PreIndex,
}

impl PairMode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b01 => Some(Self::PostIndex),
            0b10 => Some(Self::SignedOffset),
            0b11 => Some(Self::PreIndex),
            _ => None,
        }
    }

    fn bits(self) -> i64 {
        match self {
            Self::PostIndex => 0b01,
            Self::SignedOffset => 0b10,
            Self::PreIndex => 0b11,
        }
    }
}

/// Operands shared by `stp` and `ldp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairOperands {
    /// 64-bit (`x`) registers when set, 32-bit (`w`) otherwise.
    pub size64: bool,
    pub mode: PairMode,
    pub rt: u8,
    pub rt2: u8,
    pub rn: u8,
    /// Byte offset, already scaled.
    pub offset: i64,
}

impl PairOperands {
    fn scale(self) -> u32 {
        if self.size64 {
            3
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveWideKind {
    Movn,
    Movz,
    Movk,
}

impl MoveWideKind {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(Self::Movn),
            0b10 => Some(Self::Movz),
            0b11 => Some(Self::Movk),
            _ => None,
        }
    }

    fn bits(self) -> i64 {
        match self {
            Self::Movn => 0b00,
            Self::Movz => 0b10,
            Self::Movk => 0b11,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Self::Movn => "movn",
            Self::Movz => "movz",
            Self::Movk => "movk",
        }
    }
}

/// Kind-specific operands of a decoded or synthesized instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Op {
    /// Branch with link; `offset` is relative to the instruction address.
    Bl { offset: i64 },
    Blr { rn: u8 },
    Br { rn: u8 },
    Ret { rn: u8 },
    Stp(PairOperands),
    Ldp(PairOperands),
    /// `offset` is relative to the 4 KiB page of the instruction.
    Adrp { rd: u8, offset: i64 },
    AddImm { sf64: bool, rd: u8, rn: u8, imm12: u16, shift12: bool },
    MoveWide { wide: MoveWideKind, sf64: bool, rd: u8, imm16: u16, shift: u8 },
    /// `mov Xd, Xm` (alias of `orr Xd, xzr, Xm`).
    MovReg { rd: u8, rm: u8 },
    Nop,
    /// `eor Xd, Xn, Xm`. Encode only.
    Eor { rd: u8, rn: u8, rm: u8 },
    /// `eor Xd, Xn, #EOR_IMM_VALUE`. Encode only.
    EorImm { rd: u8, rn: u8 },
    Unknown { text: String },
}

/// The bitmask immediate carried by [`Op::EorImm`].
pub const EOR_IMM_VALUE: u64 = 1 << 47;

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Bl { .. } => "bl",
            Op::Blr { .. } => "blr",
            Op::Br { .. } => "br",
            Op::Ret { .. } => "ret",
            Op::Stp(_) => "stp",
            Op::Ldp(_) => "ldp",
            Op::Adrp { .. } => "adrp",
            Op::AddImm { .. } => "add",
            Op::MoveWide { wide, .. } => wide.mnemonic(),
            Op::MovReg { .. } => "mov",
            Op::Nop => "nop",
            Op::Eor { .. } => "eor",
            Op::EorImm { .. } => "eor_imm",
            Op::Unknown { .. } => "unknown",
        }
    }
}

/// A single instruction: its address, raw word and decoded operands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub address: u64,
    pub word: u32,
    pub op: Op,
}

impl Instruction {
    /// Build an instruction from operands, encoding its word.
    pub fn synthesize(address: u64, op: Op) -> CfpResult<Self> {
        let word = encode_op(&op)?;
        Ok(Self { address, word, op })
    }

    /// Replace the placeholder text of an unknown instruction.
    pub fn with_text(mut self, text: &str) -> Self {
        if let Op::Unknown { text: slot } = &mut self.op {
            *slot = text.trim().to_string();
        }
        self
    }

    pub fn is_nop(&self) -> bool {
        self.op == Op::Nop
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.op, Op::Unknown { .. })
    }

    /// Absolute target of a `bl`.
    pub fn branch_target(&self) -> Option<u64> {
        match self.op {
            Op::Bl { offset } => Some(self.address.wrapping_add(offset as u64)),
            _ => None,
        }
    }
}

/// Decode `word` found at `address`.
pub fn decode(word: u32, address: u64) -> Instruction {
    Instruction { address, word, op: decode_op(word) }
}

fn decode_op(word: u32) -> Op {
    if NOP.matches(word) {
        return Op::Nop;
    }
    if BL.matches(word) {
        return Op::Bl { offset: BRANCH_IMM26.get(word) << 2 };
    }
    if BLR.matches(word) {
        return Op::Blr { rn: RN.get_u8(word) };
    }
    if BR.matches(word) {
        return Op::Br { rn: RN.get_u8(word) };
    }
    if RET.matches(word) {
        return Op::Ret { rn: RN.get_u8(word) };
    }
    if PAIR.matches(word) {
        if let Some(op) = decode_pair(word) {
            return op;
        }
    }
    if ADRP.matches(word) {
        let imm = (ADRP_IMMHI.get(word) << 2) | ADRP_IMMLO.get(word);
        return Op::Adrp { rd: RD.get_u8(word), offset: imm << PAGE_SHIFT };
    }
    if ADD_IMM.matches(word) {
        return Op::AddImm {
            sf64: SF.get(word) == 1,
            rd: RD.get_u8(word),
            rn: RN.get_u8(word),
            imm12: ADD_IMM12.get(word) as u16,
            shift12: ADD_SH.get(word) == 1,
        };
    }
    if MOV_REG.matches(word) {
        return Op::MovReg { rd: RD.get_u8(word), rm: RM.get_u8(word) };
    }
    if MOV_WIDE.matches(word) {
        if let Some(op) = decode_move_wide(word) {
            return op;
        }
    }
    unknown(word)
}

fn decode_pair(word: u32) -> Option<Op> {
    let size64 = match PAIR_OPC.get_u8(word) {
        PAIR_OPC_32 => false,
        PAIR_OPC_64 => true,
        _ => return None,
    };
    let mode = PairMode::from_bits(PAIR_MODE.get_u8(word))?;
    let mut pair = PairOperands {
        size64,
        mode,
        rt: RT.get_u8(word),
        rt2: RT2.get_u8(word),
        rn: RN.get_u8(word),
        offset: 0,
    };
    pair.offset = PAIR_IMM7.get(word) << pair.scale();
    if PAIR_LOAD.get(word) == 1 {
        Some(Op::Ldp(pair))
    } else {
        Some(Op::Stp(pair))
    }
}

fn decode_move_wide(word: u32) -> Option<Op> {
    let wide = MoveWideKind::from_bits(MOV_OPC.get_u8(word))?;
    let sf64 = SF.get(word) == 1;
    let hw = MOV_HW.get_u8(word);
    if !sf64 && hw > 1 {
        return None;
    }
    Some(Op::MoveWide {
        wide,
        sf64,
        rd: RD.get_u8(word),
        imm16: MOV_IMM16.get(word) as u16,
        shift: hw * 16,
    })
}

fn unknown(word: u32) -> Op {
    Op::Unknown { text: format!(".inst\t{word:#010x}") }
}

/// Encode an instruction back into its 32-bit word.
///
/// Unknown instructions re-emit their original word.
pub fn encode(insn: &Instruction) -> CfpResult<u32> {
    match insn.op {
        Op::Unknown { .. } => Ok(insn.word),
        ref op => encode_op(op),
    }
}

/// Encode bare operands.
pub fn encode_op(op: &Op) -> CfpResult<u32> {
    let kind = op.kind();
    match *op {
        Op::Bl { offset } => {
            let imm = scaled(kind, offset, 2, "branch offset")?;
            Ok(BL.value | put(kind, BRANCH_IMM26, imm, "branch offset")?)
        }
        Op::Blr { rn } => Ok(BLR.value | reg(kind, RN, rn)?),
        Op::Br { rn } => Ok(BR.value | reg(kind, RN, rn)?),
        Op::Ret { rn } => Ok(RET.value | reg(kind, RN, rn)?),
        Op::Stp(pair) => encode_pair(kind, pair, false),
        Op::Ldp(pair) => encode_pair(kind, pair, true),
        Op::Adrp { rd, offset } => {
            let pages = scaled(kind, offset, PAGE_SHIFT, "page offset")?;
            let (min, max) = (-(1i64 << 20), (1i64 << 20) - 1);
            if pages < min || pages > max {
                return Err(CfpError::unsupported(
                    kind,
                    format!("page offset {offset:#x} outside +/-4 GiB"),
                ));
            }
            Ok(ADRP.value
                | put(kind, ADRP_IMMLO, pages & 0b11, "immlo")?
                | put(kind, ADRP_IMMHI, pages >> 2, "immhi")?
                | reg(kind, RD, rd)?)
        }
        Op::AddImm { sf64, rd, rn, imm12, shift12 } => {
            if !sf64 {
                return Err(CfpError::unsupported(kind, "32-bit add is not supported"));
            }
            Ok(ADD_IMM.value
                | put(kind, SF, 1, "sf")?
                | put(kind, ADD_SH, shift12 as i64, "shift")?
                | put(kind, ADD_IMM12, imm12 as i64, "immediate")?
                | reg(kind, RN, rn)?
                | reg(kind, RD, rd)?)
        }
        Op::MoveWide { wide, sf64, rd, imm16, shift } => {
            let limit = if sf64 { 48 } else { 16 };
            if shift % 16 != 0 || shift > limit {
                return Err(CfpError::unsupported(
                    kind,
                    format!("shift {shift} not in {{0, 16, 32, 48}} for this width"),
                ));
            }
            Ok(MOV_WIDE.value
                | put(kind, SF, sf64 as i64, "sf")?
                | put(kind, MOV_OPC, wide.bits(), "opc")?
                | put(kind, MOV_HW, (shift / 16) as i64, "hw")?
                | put(kind, MOV_IMM16, imm16 as i64, "immediate")?
                | reg(kind, RD, rd)?)
        }
        Op::MovReg { rd, rm } => Ok(MOV_REG.value | reg(kind, RM, rm)? | reg(kind, RD, rd)?),
        Op::Nop => Ok(NOP.value),
        Op::Eor { rd, rn, rm } => {
            Ok(EOR_REG | reg(kind, RM, rm)? | reg(kind, RN, rn)? | reg(kind, RD, rd)?)
        }
        Op::EorImm { rd, rn } => Ok(EOR_IMM | reg(kind, RN, rn)? | reg(kind, RD, rd)?),
        Op::Unknown { .. } => {
            Err(CfpError::unsupported(kind, "unknown instructions carry no operands"))
        }
    }
}

fn encode_pair(kind: &'static str, pair: PairOperands, load: bool) -> CfpResult<u32> {
    if !pair.size64 {
        return Err(CfpError::unsupported(kind, "only 64-bit register pairs are supported"));
    }
    let imm = scaled(kind, pair.offset, pair.scale(), "pair offset")?;
    Ok(PAIR.value
        | put(kind, PAIR_OPC, PAIR_OPC_64 as i64, "opc")?
        | put(kind, PAIR_MODE, pair.mode.bits(), "mode")?
        | put(kind, PAIR_LOAD, load as i64, "load")?
        | put(kind, PAIR_IMM7, imm, "pair offset")?
        | reg(kind, RT2, pair.rt2)?
        | reg(kind, RN, pair.rn)?
        | reg(kind, RT, pair.rt)?)
}

fn reg(kind: &'static str, field: BitField, register: u8) -> CfpResult<u32> {
    if register > 31 {
        return Err(CfpError::unsupported(kind, format!("register {register} out of range")));
    }
    Ok((register as u32) << field.lsb)
}

fn put(kind: &'static str, field: BitField, value: i64, what: &str) -> CfpResult<u32> {
    field.put(value).ok_or_else(|| {
        let (min, max) = field.range();
        CfpError::unsupported(kind, format!("{what} {value} outside [{min}, {max}]"))
    })
}

fn scaled(kind: &'static str, value: i64, shift: u32, what: &str) -> CfpResult<i64> {
    if value & ((1i64 << shift) - 1) != 0 {
        return Err(CfpError::unsupported(
            kind,
            format!("{what} {value} is not a multiple of {}", 1u64 << shift),
        ));
    }
    Ok(value >> shift)
}

fn xreg(register: u8, sf64: bool, sp: bool) -> String {
    match (register, sf64, sp) {
        (31, true, true) => "sp".to_string(),
        (31, false, true) => "wsp".to_string(),
        (31, true, false) => "xzr".to_string(),
        (31, false, false) => "wzr".to_string(),
        (r, true, _) => format!("x{r}"),
        (r, false, _) => format!("w{r}"),
    }
}

fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{value:#x}")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Op::Bl { .. } => write!(f, "bl\t{:x}", self.branch_target().unwrap_or_default()),
            Op::Blr { rn } => write!(f, "blr\t{}", xreg(*rn, true, false)),
            Op::Br { rn } => write!(f, "br\t{}", xreg(*rn, true, false)),
            Op::Ret { rn: 30 } => write!(f, "ret"),
            Op::Ret { rn } => write!(f, "ret\t{}", xreg(*rn, true, false)),
            Op::Stp(pair) | Op::Ldp(pair) => {
                let rt = xreg(pair.rt, pair.size64, false);
                let rt2 = xreg(pair.rt2, pair.size64, false);
                let base = xreg(pair.rn, true, true);
                write!(f, "{}\t{rt}, {rt2}, ", self.op.kind())?;
                match (pair.mode, pair.offset) {
                    (PairMode::SignedOffset, 0) => write!(f, "[{base}]"),
                    (PairMode::SignedOffset, off) => write!(f, "[{base}, #{off}]"),
                    (PairMode::PreIndex, off) => write!(f, "[{base}, #{off}]!"),
                    (PairMode::PostIndex, off) => write!(f, "[{base}], #{off}"),
                }
            }
            Op::Adrp { rd, offset } => {
                let page = (self.address & !0xfff).wrapping_add(*offset as u64);
                write!(f, "adrp\t{}, {page:x}", xreg(*rd, true, false))
            }
            Op::AddImm { sf64, rd, rn, imm12, shift12 } => {
                write!(
                    f,
                    "add\t{}, {}, #{imm12:#x}",
                    xreg(*rd, *sf64, true),
                    xreg(*rn, *sf64, true)
                )?;
                if *shift12 {
                    write!(f, ", lsl #12")?;
                }
                Ok(())
            }
            Op::MoveWide { wide, sf64, rd, imm16, shift } => {
                write!(f, "{}\t{}, #{imm16:#x}", wide.mnemonic(), xreg(*rd, *sf64, false))?;
                if *shift != 0 {
                    write!(f, ", lsl #{shift}")?;
                }
                Ok(())
            }
            Op::MovReg { rd, rm } => {
                write!(f, "mov\t{}, {}", xreg(*rd, true, false), xreg(*rm, true, false))
            }
            Op::Nop => write!(f, "nop"),
            Op::Eor { rd, rn, rm } => write!(
                f,
                "eor\t{}, {}, {}",
                xreg(*rd, true, false),
                xreg(*rn, true, false),
                xreg(*rm, true, false)
            ),
            Op::EorImm { rd, rn } => write!(
                f,
                "eor\t{}, {}, #{}",
                xreg(*rd, true, true),
                xreg(*rn, true, false),
                signed_hex(EOR_IMM_VALUE as i64)
            ),
            Op::Unknown { text } => f.write_str(text),
        }
    }
}
