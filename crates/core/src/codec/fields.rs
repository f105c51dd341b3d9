//! Named bit-field descriptors for the recognized instruction classes.
//!
//! Decode and encode for a kind read and write the same descriptors, so the
//! two directions cannot drift apart.

/// A contiguous field of a 32-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Position of the least significant bit.
    pub lsb: u32,
    pub width: u32,
    /// Whether the field holds a two's-complement value.
    pub signed: bool,
}

impl BitField {
    pub const fn unsigned(lsb: u32, width: u32) -> Self {
        Self { lsb, width, signed: false }
    }

    pub const fn signed(lsb: u32, width: u32) -> Self {
        Self { lsb, width, signed: true }
    }

    /// Mask of the field in place.
    pub const fn mask(self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.lsb
    }

    /// Extract the field, sign-extending when the descriptor is signed.
    pub fn get(self, word: u32) -> i64 {
        let raw = ((word & self.mask()) >> self.lsb) as i64;
        if self.signed && raw & (1 << (self.width - 1)) != 0 {
            raw - (1 << self.width)
        } else {
            raw
        }
    }

    /// Extract a register number or other small unsigned field.
    pub fn get_u8(self, word: u32) -> u8 {
        debug_assert!(!self.signed && self.width <= 8);
        ((word & self.mask()) >> self.lsb) as u8
    }

    /// Place `value` into the field, or `None` if it does not fit.
    pub fn put(self, value: i64) -> Option<u32> {
        let (min, max) = self.range();
        if value < min || value > max {
            return None;
        }
        let bits = (value as u64) & ((1u64 << self.width) - 1);
        Some((bits as u32) << self.lsb)
    }

    /// Inclusive range of values the field can hold.
    pub fn range(self) -> (i64, i64) {
        if self.signed {
            (-(1i64 << (self.width - 1)), (1i64 << (self.width - 1)) - 1)
        } else {
            (0, (1i64 << self.width) - 1)
        }
    }
}

/// Fixed opcode bits identifying an instruction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub mask: u32,
    pub value: u32,
}

impl Pattern {
    pub const fn new(mask: u32, value: u32) -> Self {
        Self { mask, value }
    }

    pub fn matches(self, word: u32) -> bool {
        word & self.mask == self.value
    }
}

pub const RD: BitField = BitField::unsigned(0, 5);
pub const RT: BitField = RD;
pub const RN: BitField = BitField::unsigned(5, 5);
pub const RT2: BitField = BitField::unsigned(10, 5);
pub const RM: BitField = BitField::unsigned(16, 5);
pub const SF: BitField = BitField::unsigned(31, 1);

// BL: 100101 imm26
pub const BL: Pattern = Pattern::new(0xfc00_0000, 0x9400_0000);
pub const BRANCH_IMM26: BitField = BitField::signed(0, 26);

// BR/BLR/RET: 1101011 0 0 op 11111 000000 Rn 00000
pub const BR: Pattern = Pattern::new(0xffff_fc1f, 0xd61f_0000);
pub const BLR: Pattern = Pattern::new(0xffff_fc1f, 0xd63f_0000);
pub const RET: Pattern = Pattern::new(0xffff_fc1f, 0xd65f_0000);

pub const NOP: Pattern = Pattern::new(0xffff_ffff, 0xd503_201f);

// Load/store pair (integer): opc 101 0 0 mode L imm7 Rt2 Rn Rt
pub const PAIR: Pattern = Pattern::new(0x3e00_0000, 0x2800_0000);
pub const PAIR_OPC: BitField = BitField::unsigned(30, 2);
pub const PAIR_MODE: BitField = BitField::unsigned(23, 2);
pub const PAIR_LOAD: BitField = BitField::unsigned(22, 1);
pub const PAIR_IMM7: BitField = BitField::signed(15, 7);
pub const PAIR_OPC_32: u8 = 0b00;
pub const PAIR_OPC_64: u8 = 0b10;

// ADRP: 1 immlo 10000 immhi Rd
pub const ADRP: Pattern = Pattern::new(0x9f00_0000, 0x9000_0000);
pub const ADRP_IMMLO: BitField = BitField::unsigned(29, 2);
pub const ADRP_IMMHI: BitField = BitField::signed(5, 19);
pub const PAGE_SHIFT: u32 = 12;

// ADD (immediate): sf 0 0 100010 sh imm12 Rn Rd
pub const ADD_IMM: Pattern = Pattern::new(0x7f80_0000, 0x1100_0000);
pub const ADD_SH: BitField = BitField::unsigned(22, 1);
pub const ADD_IMM12: BitField = BitField::unsigned(10, 12);

// Move wide: sf opc 100101 hw imm16 Rd
pub const MOV_WIDE: Pattern = Pattern::new(0x1f80_0000, 0x1280_0000);
pub const MOV_OPC: BitField = BitField::unsigned(29, 2);
pub const MOV_HW: BitField = BitField::unsigned(21, 2);
pub const MOV_IMM16: BitField = BitField::unsigned(5, 16);

// MOV Xd, Xm is ORR Xd, XZR, Xm (shifted register, no shift).
pub const MOV_REG: Pattern = Pattern::new(0xffe0_ffe0, 0xaa00_03e0);

// EOR Xd, Xn, Xm (shifted register, no shift).
pub const EOR_REG: u32 = 0xca00_0000;
// EOR Xd, Xn, #imm with N=1 immr=17 imms=0.
pub const EOR_IMM: u32 = 0xd240_0000 | (0b010001 << 16);
