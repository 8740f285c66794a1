//! A32 instruction encoding.
//!
//! Pure functions from validated operands to 32-bit instruction words. They
//! never touch a buffer; the assembler appends what they return. Branch
//! helpers at the bottom are shared by emission and fixup patching.

use crate::buffer::CodeOffset;
use crate::errors::AsmErrorKind;
use crate::operand::{AddrMode, BlockMode, Condition, MemOperand, Operand, PsrFields, RegList, Register};

/// Data-processing opcodes (bits `[24:21]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DataOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Tst = 0x8,
    Cmp = 0xA,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl DataOp {
    /// Opcode field value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Compare/test forms write no destination and always set flags.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Tst | Self::Cmp)
    }

    /// Move forms take no first operand register.
    #[must_use]
    pub const fn is_move(self) -> bool {
        matches!(self, Self::Mov | Self::Mvn)
    }

    /// Lower-case mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Eor => "eor",
            Self::Sub => "sub",
            Self::Rsb => "rsb",
            Self::Add => "add",
            Self::Tst => "tst",
            Self::Cmp => "cmp",
            Self::Orr => "orr",
            Self::Mov => "mov",
            Self::Bic => "bic",
            Self::Mvn => "mvn",
        }
    }
}

/// Canonical A32 no-op (`mov r0, r0`).
pub const NOP_WORD: u32 = 0xE1A0_0000;

/// Largest magnitude of a single-transfer immediate offset.
pub const MAX_TRANSFER_OFFSET: u32 = 4095;

/// Branch displacement range in bytes, relative to the branch address + 8.
pub const BRANCH_RANGE: std::ops::RangeInclusive<i64> = -(1 << 25)..=((1 << 25) - 4);

const fn reject_pc(reg: Register, role: &'static str) -> Result<(), AsmErrorKind> {
    if reg.code() == Register::PC.code() {
        Err(AsmErrorKind::RegisterNotAllowed { reg, role })
    } else {
        Ok(())
    }
}

const fn cond_bits(cond: Condition) -> u32 {
    cond.bits() << 28
}

/// Encodes `value` as an A32 modified immediate (`rotate:imm8`).
///
/// Returns `None` when no even rotation of an 8-bit value produces `value`.
#[must_use]
pub const fn encode_modified_immediate(value: u32) -> Option<u32> {
    let mut rot = 0;
    while rot < 16 {
        let unrotated = value.rotate_left(rot * 2);
        if unrotated <= 0xFF {
            return Some((rot << 8) | unrotated);
        }
        rot += 1;
    }
    None
}

/// Splits `value` into modified-immediate chunks whose sum is `value`.
///
/// Every chunk is an 8-bit field at an even bit position, so each one is
/// encodable on its own. Zero yields no chunks.
#[must_use]
pub fn split_modified_immediates(value: u32) -> Vec<u32> {
    let mut chunks = Vec::new();
    let mut rest = value;
    while rest != 0 {
        let start = rest.trailing_zeros() & !1;
        let chunk = rest & (0xFF_u32 << start);
        chunks.push(chunk);
        rest &= !chunk;
    }
    chunks
}

fn shifted_register_bits(reg: Register, operand: Operand) -> Result<u32, AsmErrorKind> {
    match operand {
        Operand::Shifted { shift, .. } => {
            let (kind, amount) = shift.fields()?;
            Ok((amount << 7) | (kind << 5) | u32::from(reg.code()))
        }
        _ => Ok(u32::from(reg.code())),
    }
}

/// Encodes the flexible second operand, returning `(I bit, bits [11:0])`.
///
/// # Errors
///
/// Returns [`AsmErrorKind::ImmediateNotEncodable`] for immediates that are not
/// modified immediates, or [`AsmErrorKind::ShiftOutOfRange`].
#[allow(clippy::cast_sign_loss)]
pub fn encode_operand2(operand: Operand) -> Result<(u32, u32), AsmErrorKind> {
    match operand {
        Operand::Imm(value) => {
            let value = value as u32;
            encode_modified_immediate(value)
                .map(|bits| (1, bits))
                .ok_or(AsmErrorKind::ImmediateNotEncodable(value))
        }
        Operand::Reg(reg) | Operand::Shifted { reg, .. } => {
            Ok((0, shifted_register_bits(reg, operand)?))
        }
    }
}

/// Encodes a data-processing instruction.
///
/// Comparisons ignore `rd` and force the S bit; moves ignore `rn`.
///
/// # Errors
///
/// Returns an error when `rd` is `pc` for a flag-setting form or the second
/// operand cannot be encoded.
pub fn encode_data_processing(
    cond: Condition,
    op: DataOp,
    set_flags: bool,
    rd: Register,
    rn: Register,
    operand: Operand,
) -> Result<u32, AsmErrorKind> {
    let set_flags = set_flags || op.is_comparison();
    let rd = if op.is_comparison() { Register::R0 } else { rd };
    let rn = if op.is_move() { Register::R0 } else { rn };
    if set_flags && !op.is_comparison() {
        reject_pc(rd, "flag-setting destination")?;
    }
    let (imm_bit, op2) = encode_operand2(operand)?;
    Ok(cond_bits(cond)
        | (imm_bit << 25)
        | (op.bits() << 21)
        | (u32::from(set_flags) << 20)
        | (u32::from(rn.code()) << 16)
        | (u32::from(rd.code()) << 12)
        | op2)
}

/// Encodes `movw` (`top = false`) or `movt` (`top = true`).
///
/// # Errors
///
/// Returns [`AsmErrorKind::RegisterNotAllowed`] for `pc`.
pub fn encode_move_wide(
    cond: Condition,
    top: bool,
    rd: Register,
    imm16: u16,
) -> Result<u32, AsmErrorKind> {
    reject_pc(rd, "move-wide destination")?;
    let imm = u32::from(imm16);
    let base = if top { 0x0340_0000 } else { 0x0300_0000 };
    Ok(cond_bits(cond)
        | base
        | ((imm >> 12) << 16)
        | (u32::from(rd.code()) << 12)
        | (imm & 0xFFF))
}

/// Encodes a single-register `ldr`/`str`.
///
/// # Errors
///
/// Returns an error for out-of-range immediate offsets, `pc` as a register
/// offset, writeback to `pc`, or writeback where base and transfer register
/// coincide.
pub fn encode_single_transfer(
    cond: Condition,
    load: bool,
    rt: Register,
    mem: &MemOperand,
) -> Result<u32, AsmErrorKind> {
    let base = mem.base();
    let writes_back = mem.writeback() || mem.mode() == AddrMode::PostIndex;
    if writes_back {
        reject_pc(base, "writeback base")?;
        if base == rt {
            return Err(AsmErrorKind::InvalidAddressingMode(
                "writeback base equals transfer register",
            ));
        }
    }
    if !load {
        reject_pc(rt, "stored register")?;
    }

    let pre = u32::from(mem.mode() != AddrMode::PostIndex);
    let w = u32::from(mem.mode() == AddrMode::PreIndex && mem.writeback());

    let (reg_bit, up, low) = match mem.offset_operand() {
        Operand::Imm(value) => {
            let magnitude = value.unsigned_abs();
            if magnitude > MAX_TRANSFER_OFFSET {
                return Err(AsmErrorKind::OffsetOutOfRange(value));
            }
            (0, u32::from(value >= 0), magnitude)
        }
        operand @ (Operand::Reg(rm) | Operand::Shifted { reg: rm, .. }) => {
            reject_pc(rm, "offset register")?;
            (1, 1, shifted_register_bits(rm, operand)?)
        }
    };

    Ok(cond_bits(cond)
        | (0b01 << 26)
        | (reg_bit << 25)
        | (pre << 24)
        | (up << 23)
        | (w << 21)
        | (u32::from(load) << 20)
        | (u32::from(base.code()) << 16)
        | (u32::from(rt.code()) << 12)
        | low)
}

/// Encodes `ldm`/`stm`.
///
/// # Errors
///
/// Returns an error for an empty list, `pc` as base, or writeback with the
/// base register inside the list.
pub fn encode_block_transfer(
    cond: Condition,
    load: bool,
    mode: BlockMode,
    base: Register,
    writeback: bool,
    list: RegList,
) -> Result<u32, AsmErrorKind> {
    if list.is_empty() {
        return Err(AsmErrorKind::EmptyRegisterList);
    }
    reject_pc(base, "block transfer base")?;
    if writeback && list.contains(base) {
        return Err(AsmErrorKind::InvalidAddressingMode(
            "writeback base inside register list",
        ));
    }
    let (p, u) = mode.pu_bits();
    Ok(cond_bits(cond)
        | (0b100 << 25)
        | (p << 24)
        | (u << 23)
        | (u32::from(writeback) << 21)
        | (u32::from(load) << 20)
        | (u32::from(base.code()) << 16)
        | u32::from(list.bits()))
}

/// Encodes `mrs rd, cpsr`.
///
/// # Errors
///
/// Returns [`AsmErrorKind::RegisterNotAllowed`] for `pc`.
pub fn encode_mrs(cond: Condition, rd: Register) -> Result<u32, AsmErrorKind> {
    reject_pc(rd, "status destination")?;
    Ok(cond_bits(cond) | 0x010F_0000 | (u32::from(rd.code()) << 12))
}

/// Encodes `msr cpsr_<fields>, <operand>`.
///
/// # Errors
///
/// Returns an error for an empty field mask, `pc` as source, a shifted
/// register, or an unencodable immediate.
#[allow(clippy::cast_sign_loss)]
pub fn encode_msr(cond: Condition, fields: PsrFields, operand: Operand) -> Result<u32, AsmErrorKind> {
    if fields.is_empty() {
        return Err(AsmErrorKind::InvalidOperand("empty status field mask"));
    }
    let mask = fields.bits() << 16;
    match operand {
        Operand::Reg(rm) => {
            reject_pc(rm, "status source")?;
            Ok(cond_bits(cond) | 0x0120_F000 | mask | u32::from(rm.code()))
        }
        Operand::Imm(value) => {
            let value = value as u32;
            let bits = encode_modified_immediate(value)
                .ok_or(AsmErrorKind::ImmediateNotEncodable(value))?;
            Ok(cond_bits(cond) | 0x0320_F000 | mask | bits)
        }
        Operand::Shifted { .. } => Err(AsmErrorKind::InvalidOperand("shifted status source")),
    }
}

/// Encodes `bx rm` or `blx rm`.
///
/// # Errors
///
/// Returns [`AsmErrorKind::RegisterNotAllowed`] for `pc`.
pub fn encode_branch_exchange(cond: Condition, link: bool, rm: Register) -> Result<u32, AsmErrorKind> {
    reject_pc(rm, "branch target register")?;
    let base = if link { 0x012F_FF30 } else { 0x012F_FF10 };
    Ok(cond_bits(cond) | base | u32::from(rm.code()))
}

/// Displacement a branch at `at` needs to reach `target`.
#[must_use]
pub fn branch_displacement(at: CodeOffset, target: CodeOffset) -> i64 {
    i64::from(target) - (i64::from(at) + 8)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn displacement_field(displacement: i64) -> Result<u32, AsmErrorKind> {
    if displacement % 4 != 0 || !BRANCH_RANGE.contains(&displacement) {
        return Err(AsmErrorKind::BranchOutOfRange(displacement));
    }
    Ok(((displacement >> 2) as u32) & 0x00FF_FFFF)
}

/// Encodes `b`/`bl` with a byte displacement relative to the branch + 8.
///
/// # Errors
///
/// Returns [`AsmErrorKind::BranchOutOfRange`] when the displacement is not a
/// word multiple within ±32 MiB.
pub fn encode_branch(cond: Condition, link: bool, displacement: i64) -> Result<u32, AsmErrorKind> {
    Ok(cond_bits(cond) | (0b101 << 25) | (u32::from(link) << 24) | displacement_field(displacement)?)
}

/// Rewrites the displacement field of an emitted branch, keeping its
/// condition and link bits.
///
/// # Errors
///
/// Returns [`AsmErrorKind::BranchOutOfRange`] like [`encode_branch`], or
/// [`AsmErrorKind::InvalidOperand`] if `word` is not a branch.
pub fn patch_branch(word: u32, displacement: i64) -> Result<u32, AsmErrorKind> {
    if !is_branch(word) {
        return Err(AsmErrorKind::InvalidOperand("fixup site is not a branch"));
    }
    Ok((word & 0xFF00_0000) | displacement_field(displacement)?)
}

/// Returns `true` for `b`/`bl` words.
#[must_use]
pub const fn is_branch(word: u32) -> bool {
    (word >> 25) & 0b111 == 0b101 && word >> 28 != 0xF
}

/// Absolute target of the branch `word` located at `at`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn decode_branch_target(word: u32, at: CodeOffset) -> Option<CodeOffset> {
    if !is_branch(word) {
        return None;
    }
    let displacement = (((word << 8) as i32) >> 6) as i64;
    let target = i64::from(at) + 8 + displacement;
    CodeOffset::try_from(target).ok()
}
