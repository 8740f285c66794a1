/// Number of A32 core registers (`r0..r15`).
pub const CORE_REGISTER_COUNT: usize = 16;
/// `CPSR` negative flag.
pub const CPSR_N: u32 = 1 << 31;
/// `CPSR` zero flag.
pub const CPSR_Z: u32 = 1 << 30;
/// `CPSR` carry flag.
pub const CPSR_C: u32 = 1 << 29;
/// `CPSR` overflow flag.
pub const CPSR_V: u32 = 1 << 28;
/// `CPSR` sticky saturation flag.
pub const CPSR_Q: u32 = 1 << 27;
/// `CPSR` greater-than-or-equal flags `GE[3:0]`.
pub const CPSR_GE_MASK: u32 = 0x000F_0000;
/// Condition flags `NZCV`.
pub const CPSR_NZCV_MASK: u32 = CPSR_N | CPSR_Z | CPSR_C | CPSR_V;
/// Bits user-mode code can observe and restore (`NZCVQ` and `GE`).
pub const APSR_MASK: u32 = CPSR_NZCV_MASK | CPSR_Q | CPSR_GE_MASK;
/// Mode field value for user mode.
pub const CPSR_MODE_USER: u32 = 0x10;

/// A32 core register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CoreRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    Sp = 13,
    Lr = 14,
    Pc = 15,
}

impl CoreRegister {
    /// Ordered list of all core registers.
    pub const ALL: [Self; CORE_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::Sp,
        Self::Lr,
        Self::Pc,
    ];

    /// Array index for this register (`0..=15`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 4-bit register field.
    #[must_use]
    pub const fn from_u4(bits: u8) -> Option<Self> {
        if (bits as usize) < CORE_REGISTER_COUNT {
            Some(Self::ALL[bits as usize])
        } else {
            None
        }
    }
}

/// User-mode A32 register file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArchState {
    regs: [u32; CORE_REGISTER_COUNT],
    cpsr: u32,
}

impl Default for ArchState {
    fn default() -> Self {
        Self {
            regs: [0; CORE_REGISTER_COUNT],
            cpsr: CPSR_MODE_USER,
        }
    }
}

impl ArchState {
    /// Reads a core register. `pc` reads return the raw stored value.
    #[must_use]
    pub const fn reg(&self, reg: CoreRegister) -> u32 {
        self.regs[reg.index()]
    }

    /// Writes a core register.
    pub const fn set_reg(&mut self, reg: CoreRegister, value: u32) {
        self.regs[reg.index()] = value;
    }

    /// All sixteen registers, `r0` first.
    #[must_use]
    pub const fn regs(&self) -> &[u32; CORE_REGISTER_COUNT] {
        &self.regs
    }

    /// Reads `pc`.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.regs[CoreRegister::Pc.index()]
    }

    /// Writes `pc`.
    pub const fn set_pc(&mut self, value: u32) {
        self.regs[CoreRegister::Pc.index()] = value;
    }

    /// Reads `sp`.
    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.regs[CoreRegister::Sp.index()]
    }

    /// Writes `sp`.
    pub const fn set_sp(&mut self, value: u32) {
        self.regs[CoreRegister::Sp.index()] = value;
    }

    /// Reads `lr`.
    #[must_use]
    pub const fn lr(&self) -> u32 {
        self.regs[CoreRegister::Lr.index()]
    }

    /// Writes `lr`.
    pub const fn set_lr(&mut self, value: u32) {
        self.regs[CoreRegister::Lr.index()] = value;
    }

    /// Reads the full `CPSR`.
    #[must_use]
    pub const fn cpsr(&self) -> u32 {
        self.cpsr
    }

    /// User-visible part of `CPSR`.
    #[must_use]
    pub const fn apsr(&self) -> u32 {
        self.cpsr & APSR_MASK
    }

    /// Writes the `APSR` bits selected by `mask`; all other `CPSR` bits are
    /// preserved.
    pub const fn write_apsr(&mut self, value: u32, mask: u32) {
        let mask = mask & APSR_MASK;
        self.cpsr = (self.cpsr & !mask) | (value & mask);
    }

    /// Returns `true` when a `CPSR` bit is set.
    #[must_use]
    pub const fn flag_is_set(&self, flag: u32) -> bool {
        (self.cpsr & flag) != 0
    }

    /// Sets or clears an `APSR` flag bit.
    pub const fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.cpsr |= flag & APSR_MASK;
        } else {
            self.cpsr &= !(flag & APSR_MASK);
        }
    }
}
