//! `APSR` update behaviors for different instruction classes.

#![allow(clippy::cast_lossless)]

use crate::state::{ArchState, CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

/// Describes how the `APSR` changes after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change.
    #[default]
    None,
    /// Logical result: `N`, `Z` and shifter carry; `V` unchanged.
    Nzc {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
    },
    /// Arithmetic result: all four condition flags.
    Nzcv {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
        /// Overflow flag.
        overflow: bool,
    },
    /// `MSR` write of the selected bits.
    Apsr {
        /// Source value.
        value: u32,
        /// Byte mask selected by the field specifier.
        mask: u32,
    },
}

impl FlagsUpdate {
    /// Flags for a logical result.
    #[must_use]
    pub const fn logical(result: u32, carry: bool) -> Self {
        Self::Nzc {
            negative: result >> 31 != 0,
            zero: result == 0,
            carry,
        }
    }

    /// Flags for an arithmetic result.
    #[must_use]
    pub const fn arithmetic(result: u32, carry: bool, overflow: bool) -> Self {
        Self::Nzcv {
            negative: result >> 31 != 0,
            zero: result == 0,
            carry,
            overflow,
        }
    }

    /// Applies the update to `state`.
    pub const fn apply(self, state: &mut ArchState) {
        match self {
            Self::None => {}
            Self::Nzc {
                negative,
                zero,
                carry,
            } => {
                state.set_flag(CPSR_N, negative);
                state.set_flag(CPSR_Z, zero);
                state.set_flag(CPSR_C, carry);
            }
            Self::Nzcv {
                negative,
                zero,
                carry,
                overflow,
            } => {
                state.set_flag(CPSR_N, negative);
                state.set_flag(CPSR_Z, zero);
                state.set_flag(CPSR_C, carry);
                state.set_flag(CPSR_V, overflow);
            }
            Self::Apsr { value, mask } => state.write_apsr(value, mask),
        }
    }
}

/// `x + y + carry_in` with carry-out and signed overflow.
#[must_use]
pub const fn add_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    let (partial, carry_a) = x.overflowing_add(y);
    let (result, carry_b) = partial.overflowing_add(carry_in as u32);
    let overflow = ((x ^ result) & (y ^ result)) >> 31 != 0;
    (result, carry_a || carry_b, overflow)
}

#[cfg(test)]
mod tests {
    use super::{add_with_carry, FlagsUpdate};
    use crate::state::{ArchState, CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

    #[test]
    fn add_with_carry_reports_carry_and_overflow() {
        assert_eq!(add_with_carry(1, 2, false), (3, false, false));
        assert_eq!(add_with_carry(u32::MAX, 1, false), (0, true, false));
        assert_eq!(add_with_carry(0x7FFF_FFFF, 1, false), (0x8000_0000, false, true));
        // 5 - 5 as 5 + !5 + 1.
        assert_eq!(add_with_carry(5, !5, true), (0, true, false));
        // 3 - 5 borrows.
        assert_eq!(add_with_carry(3, !5, true), (0xFFFF_FFFE, false, false));
    }

    #[test]
    fn logical_update_leaves_overflow_alone() {
        let mut state = ArchState::default();
        state.set_flag(CPSR_V, true);
        FlagsUpdate::logical(0, true).apply(&mut state);
        assert!(state.flag_is_set(CPSR_Z));
        assert!(state.flag_is_set(CPSR_C));
        assert!(state.flag_is_set(CPSR_V));
        assert!(!state.flag_is_set(CPSR_N));
    }

    #[test]
    fn apsr_update_is_masked() {
        let mut state = ArchState::default();
        FlagsUpdate::Apsr {
            value: u32::MAX,
            mask: 0xFF00_0000,
        }
        .apply(&mut state);
        assert_eq!(state.apsr(), 0xF800_0000);
        FlagsUpdate::arithmetic(0x8000_0000, false, false).apply(&mut state);
        assert!(state.flag_is_set(CPSR_N));
        assert!(!state.flag_is_set(CPSR_C));
    }
}
