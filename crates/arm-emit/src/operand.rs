//! Registers, operands and addressing modes accepted by the emitters.
//!
//! These are plain value types. Constructors that can be misused return
//! [`AsmErrorKind`] so the assembler can attach the failing operation and
//! offset before handing the error to the driver.

use std::fmt;
use std::ops::BitOr;

use crate::errors::AsmErrorKind;

/// Number of architectural core registers (`r0..r15`).
pub const REGISTER_COUNT: u8 = 16;

/// First register code reserved for a fixed role that a trampoline may not
/// take as a probe argument (`sp`).
pub const FIRST_RESERVED_CODE: u8 = 13;

/// A32 core register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register(u8);

#[allow(missing_docs)]
impl Register {
    pub const R0: Self = Self(0);
    pub const R1: Self = Self(1);
    pub const R2: Self = Self(2);
    pub const R3: Self = Self(3);
    pub const R4: Self = Self(4);
    pub const R5: Self = Self(5);
    pub const R6: Self = Self(6);
    pub const R7: Self = Self(7);
    pub const R8: Self = Self(8);
    pub const R9: Self = Self(9);
    pub const R10: Self = Self(10);
    pub const R11: Self = Self(11);
    pub const R12: Self = Self(12);
    pub const SP: Self = Self(13);
    pub const LR: Self = Self(14);
    pub const PC: Self = Self(15);
    pub const FP: Self = Self::R11;
    pub const IP: Self = Self::R12;
}

impl Register {
    /// Validates a raw register code.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidRegister`] for codes above 15.
    pub const fn new(code: u8) -> Result<Self, AsmErrorKind> {
        if code < REGISTER_COUNT {
            Ok(Self(code))
        } else {
            Err(AsmErrorKind::InvalidRegister(code))
        }
    }

    /// Returns the 4-bit register code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Returns the register's bit in a block-transfer register list.
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << self.0
    }

    /// Returns `true` for `r0..r12`, the registers a probe may read and
    /// restore without touching `sp`, `lr` or `pc`.
    #[must_use]
    pub const fn is_probe_preservable(self) -> bool {
        self.0 < FIRST_RESERVED_CODE
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            11 => f.write_str("fp"),
            12 => f.write_str("ip"),
            13 => f.write_str("sp"),
            14 => f.write_str("lr"),
            15 => f.write_str("pc"),
            n => write!(f, "r{n}"),
        }
    }
}

impl std::str::FromStr for Register {
    type Err = AsmErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "fp" => Ok(Self::FP),
            "ip" => Ok(Self::IP),
            "sp" => Ok(Self::SP),
            "lr" => Ok(Self::LR),
            "pc" => Ok(Self::PC),
            other => other
                .strip_prefix('r')
                .and_then(|n| n.parse::<u8>().ok())
                .map_or(Err(AsmErrorKind::InvalidOperand("register name")), Self::new),
        }
    }
}

/// Set of core registers, as used by block data transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegList(u16);

impl RegList {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Builds a set from raw list bits (bit `n` = `rn`).
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Builds a set from registers; duplicates collapse.
    #[must_use]
    pub fn of(regs: &[Register]) -> Self {
        regs.iter().copied().collect()
    }

    /// Raw list bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Adds a register.
    pub const fn insert(&mut self, reg: Register) {
        self.0 |= reg.bit();
    }

    /// Returns `true` when `reg` is in the set.
    #[must_use]
    pub const fn contains(self, reg: Register) -> bool {
        self.0 & reg.bit() != 0
    }

    /// Number of registers in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns `true` when the set holds no registers.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set union.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Registers in `self` but not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `true` when the two sets share no register.
    #[must_use]
    pub const fn is_disjoint(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }

    /// Size in bytes of the memory block a transfer of this set occupies.
    #[must_use]
    pub const fn byte_size(self) -> u32 {
        self.0.count_ones() * 4
    }

    /// Index of `reg` among the set's members in ascending order, which is
    /// also its word slot in memory after a block store.
    #[must_use]
    pub const fn slot_of(self, reg: Register) -> Option<usize> {
        if !self.contains(reg) {
            return None;
        }
        let below = self.0 & (reg.bit() - 1);
        Some(below.count_ones() as usize)
    }

    /// Members in ascending register order.
    pub fn iter(self) -> impl Iterator<Item = Register> {
        (0..REGISTER_COUNT)
            .filter(move |code| self.0 & (1 << code) != 0)
            .map(Register)
    }
}

impl FromIterator<Register> for RegList {
    fn from_iter<T: IntoIterator<Item = Register>>(iter: T) -> Self {
        let mut list = Self::new();
        for reg in iter {
            list.insert(reg);
        }
        list
    }
}

impl fmt::Display for RegList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, reg) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{reg}")?;
        }
        f.write_str("}")
    }
}

/// Immediate shift applied to a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shift {
    /// Logical shift left, `0..=31`.
    Lsl(u8),
    /// Logical shift right, `1..=32`.
    Lsr(u8),
    /// Arithmetic shift right, `1..=32`.
    Asr(u8),
    /// Rotate right, `1..=31`.
    Ror(u8),
}

impl Shift {
    /// Returns the `(type, imm5)` field pair for this shift.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ShiftOutOfRange`] when the amount does not fit
    /// the shift type.
    pub const fn fields(self) -> Result<(u32, u32), AsmErrorKind> {
        match self {
            Self::Lsl(n) if n <= 31 => Ok((0b00, n as u32)),
            Self::Lsr(n) if n >= 1 && n <= 32 => Ok((0b01, (n as u32) & 31)),
            Self::Asr(n) if n >= 1 && n <= 32 => Ok((0b10, (n as u32) & 31)),
            Self::Ror(n) if n >= 1 && n <= 31 => Ok((0b11, n as u32)),
            Self::Lsl(n) | Self::Lsr(n) | Self::Asr(n) | Self::Ror(n) => {
                Err(AsmErrorKind::ShiftOutOfRange(n))
            }
        }
    }
}

/// Flexible second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Immediate value.
    Imm(i32),
    /// Plain register.
    Reg(Register),
    /// Register with an immediate shift.
    Shifted {
        /// Source register.
        reg: Register,
        /// Shift applied before use.
        shift: Shift,
    },
}

impl Operand {
    /// Immediate operand.
    #[must_use]
    pub const fn imm(value: i32) -> Self {
        Self::Imm(value)
    }

    /// Immediate from an unsigned bit pattern.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn imm_u32(value: u32) -> Self {
        Self::Imm(value as i32)
    }

    /// Register shifted by an immediate amount.
    #[must_use]
    pub const fn shifted(reg: Register, shift: Shift) -> Self {
        Self::Shifted { reg, shift }
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Self::Reg(reg)
    }
}

/// Index mode of a single memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddrMode {
    /// `[base, offset]`; base unchanged.
    #[default]
    Offset,
    /// `[base, offset]!`; address computed before access.
    PreIndex,
    /// `[base], offset`; base updated after access.
    PostIndex,
}

/// One memory access description for `ldr`/`str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOperand {
    base: Register,
    offset: Operand,
    mode: AddrMode,
    writeback: bool,
}

impl MemOperand {
    /// Builds a memory operand, rejecting illegal mode/writeback pairs.
    ///
    /// Writeback is meaningless for [`AddrMode::Offset`], and a post-indexed
    /// access always writes back.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidAddressingMode`] for those combinations.
    pub const fn new(
        base: Register,
        offset: Operand,
        mode: AddrMode,
        writeback: bool,
    ) -> Result<Self, AsmErrorKind> {
        match (mode, writeback) {
            (AddrMode::Offset, true) => Err(AsmErrorKind::InvalidAddressingMode(
                "writeback requires pre- or post-indexing",
            )),
            (AddrMode::PostIndex, false) => Err(AsmErrorKind::InvalidAddressingMode(
                "post-indexed access always writes back",
            )),
            _ => Ok(Self {
                base,
                offset,
                mode,
                writeback,
            }),
        }
    }

    /// `[base, #offset]`.
    #[must_use]
    pub const fn offset(base: Register, offset: i32) -> Self {
        Self {
            base,
            offset: Operand::Imm(offset),
            mode: AddrMode::Offset,
            writeback: false,
        }
    }

    /// `[base, #offset]!`.
    #[must_use]
    pub const fn pre_index(base: Register, offset: i32) -> Self {
        Self {
            base,
            offset: Operand::Imm(offset),
            mode: AddrMode::PreIndex,
            writeback: true,
        }
    }

    /// `[base], #offset`.
    #[must_use]
    pub const fn post_index(base: Register, offset: i32) -> Self {
        Self {
            base,
            offset: Operand::Imm(offset),
            mode: AddrMode::PostIndex,
            writeback: true,
        }
    }

    /// Base register.
    #[must_use]
    pub const fn base(&self) -> Register {
        self.base
    }

    /// Offset operand.
    #[must_use]
    pub const fn offset_operand(&self) -> Operand {
        self.offset
    }

    /// Index mode.
    #[must_use]
    pub const fn mode(&self) -> AddrMode {
        self.mode
    }

    /// Whether the base register is updated.
    #[must_use]
    pub const fn writeback(&self) -> bool {
        self.writeback
    }
}

/// Direction and timing of a block data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// `ia`: increment after (pop).
    IncrementAfter,
    /// `ib`: increment before.
    IncrementBefore,
    /// `da`: decrement after.
    DecrementAfter,
    /// `db`: decrement before (push).
    DecrementBefore,
}

impl BlockMode {
    /// Returns the `(P, U)` bit pair.
    #[must_use]
    pub const fn pu_bits(self) -> (u32, u32) {
        match self {
            Self::IncrementAfter => (0, 1),
            Self::IncrementBefore => (1, 1),
            Self::DecrementAfter => (0, 0),
            Self::DecrementBefore => (1, 0),
        }
    }
}

/// Condition field of an A32 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Condition {
    Eq = 0x0,
    Ne = 0x1,
    Cs = 0x2,
    Cc = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    #[default]
    Al = 0xE,
}

impl Condition {
    /// 4-bit field value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// The condition that holds exactly when `self` does not.
    ///
    /// `Al` has no inverse in A32 and maps to itself.
    #[must_use]
    pub const fn invert(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Cs => Self::Cc,
            Self::Cc => Self::Cs,
            Self::Mi => Self::Pl,
            Self::Pl => Self::Mi,
            Self::Vs => Self::Vc,
            Self::Vc => Self::Vs,
            Self::Hi => Self::Ls,
            Self::Ls => Self::Hi,
            Self::Ge => Self::Lt,
            Self::Lt => Self::Ge,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Al => Self::Al,
        }
    }
}

/// Byte fields of the program status register written by `msr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsrFields(u8);

impl PsrFields {
    /// `c`: bits `[7:0]`.
    pub const CONTROL: Self = Self(0b0001);
    /// `x`: bits `[15:8]`.
    pub const EXTENSION: Self = Self(0b0010);
    /// `s`: bits `[23:16]`, holding the GE flags.
    pub const STATUS: Self = Self(0b0100);
    /// `f`: bits `[31:24]`, holding NZCVQ.
    pub const FLAGS: Self = Self(0b1000);
    /// `APSR_nzcvqg`: everything unprivileged code can restore.
    pub const APSR: Self = Self(0b1100);

    /// 4-bit mask field value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0 as u32
    }

    /// Returns `true` when no field is selected.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PsrFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn register_codes_are_validated() {
        for code in 0..REGISTER_COUNT {
            assert_eq!(Register::new(code).unwrap().code(), code);
        }
        assert_eq!(Register::new(16), Err(AsmErrorKind::InvalidRegister(16)));
    }

    #[rstest]
    #[case("r0", Register::R0)]
    #[case("R7", Register::R7)]
    #[case("fp", Register::FP)]
    #[case("ip", Register::IP)]
    #[case("sp", Register::SP)]
    #[case("lr", Register::LR)]
    #[case("pc", Register::PC)]
    #[case("r15", Register::PC)]
    fn register_names_parse(#[case] name: &str, #[case] expected: Register) {
        assert_eq!(name.parse::<Register>(), Ok(expected));
    }

    #[test]
    fn register_name_rejects_out_of_range_code() {
        assert_eq!("r16".parse::<Register>(), Err(AsmErrorKind::InvalidRegister(16)));
        assert!("x3".parse::<Register>().is_err());
    }

    #[test]
    fn preservable_range_stops_before_sp() {
        assert!(Register::R12.is_probe_preservable());
        assert!(!Register::SP.is_probe_preservable());
        assert!(!Register::LR.is_probe_preservable());
        assert!(!Register::PC.is_probe_preservable());
    }

    #[test]
    fn reglist_slots_follow_ascending_order() {
        let list = RegList::of(&[Register::LR, Register::R2, Register::R0, Register::R2]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.slot_of(Register::R0), Some(0));
        assert_eq!(list.slot_of(Register::R2), Some(1));
        assert_eq!(list.slot_of(Register::LR), Some(2));
        assert_eq!(list.slot_of(Register::R1), None);
        assert_eq!(list.byte_size(), 12);
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![Register::R0, Register::R2, Register::LR]
        );
        assert_eq!(list.to_string(), "{r0, r2, lr}");
    }

    #[test]
    fn reglist_set_algebra() {
        let a = RegList::of(&[Register::R0, Register::R1]);
        let b = RegList::of(&[Register::R1, Register::R2]);
        assert_eq!(a.union(b).bits(), 0b111);
        assert_eq!(a.difference(b).bits(), 0b001);
        assert!(!a.is_disjoint(b));
        assert!(a.is_disjoint(RegList::of(&[Register::R5])));
    }

    #[rstest]
    #[case(Shift::Lsl(0), Ok((0, 0)))]
    #[case(Shift::Lsl(31), Ok((0, 31)))]
    #[case(Shift::Lsl(32), Err(AsmErrorKind::ShiftOutOfRange(32)))]
    #[case(Shift::Lsr(32), Ok((1, 0)))]
    #[case(Shift::Lsr(0), Err(AsmErrorKind::ShiftOutOfRange(0)))]
    #[case(Shift::Asr(5), Ok((2, 5)))]
    #[case(Shift::Ror(0), Err(AsmErrorKind::ShiftOutOfRange(0)))]
    fn shift_fields(#[case] shift: Shift, #[case] expected: Result<(u32, u32), AsmErrorKind>) {
        assert_eq!(shift.fields(), expected);
    }

    #[test]
    fn writeback_requires_indexing() {
        let err = MemOperand::new(Register::R0, Operand::Imm(4), AddrMode::Offset, true);
        assert!(matches!(err, Err(AsmErrorKind::InvalidAddressingMode(_))));

        let err = MemOperand::new(Register::R0, Operand::Imm(4), AddrMode::PostIndex, false);
        assert!(matches!(err, Err(AsmErrorKind::InvalidAddressingMode(_))));

        let ok = MemOperand::new(Register::R0, Operand::Imm(4), AddrMode::PreIndex, false)
            .expect("pre-index without writeback is a plain offset");
        assert!(!ok.writeback());
    }

    #[test]
    fn condition_inverse_is_involution() {
        for cond in [
            Condition::Eq,
            Condition::Cs,
            Condition::Mi,
            Condition::Vs,
            Condition::Hi,
            Condition::Ge,
            Condition::Gt,
        ] {
            assert_ne!(cond, cond.invert());
            assert_eq!(cond, cond.invert().invert());
        }
    }

    #[test]
    fn psr_field_union() {
        assert_eq!((PsrFields::FLAGS | PsrFields::STATUS), PsrFields::APSR);
        assert_eq!(PsrFields::APSR.bits(), 0b1100);
    }
}
