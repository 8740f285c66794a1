use thiserror::Error;

/// Fault classes used to group faults in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Decoder rejected an instruction encoding.
    Decode,
    /// Fetch or data access violated the region policy.
    Memory,
    /// Host bus rejected or failed a call.
    Host,
    /// Step limit reached.
    Budget,
}

/// Stable fault taxonomy raised by decode, execute and host dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Encoding outside the supported A32 subset.
    #[error("illegal instruction encoding")]
    IllegalEncoding = 0x01,
    /// Fetch attempted from a region that is not executable.
    #[error("instruction fetch from non-executable region")]
    NonExecutableFetch = 0x02,
    /// Fetch landed inside an inline data span.
    #[error("instruction fetch from inline data")]
    DataRegionFetch = 0x03,
    /// Data access targeted an unmapped or read-only location.
    #[error("memory access to unmapped or read-only region")]
    IllegalMemoryAccess = 0x04,
    /// Word access at an address that is not a multiple of four.
    #[error("unaligned word access")]
    UnalignedAccess = 0x05,
    /// Branch into the host region at an address the bus does not serve.
    #[error("branch to unknown host routine")]
    UnknownHostTarget = 0x06,
    /// Run loop exhausted its step budget.
    #[error("step limit exceeded")]
    StepLimitExceeded = 0x07,
    /// Host routine reported a failure.
    #[error("host routine failed")]
    HostFailure = 0x08,
}

impl FaultCode {
    /// Stable one-byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable one-byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalEncoding),
            0x02 => Some(Self::NonExecutableFetch),
            0x03 => Some(Self::DataRegionFetch),
            0x04 => Some(Self::IllegalMemoryAccess),
            0x05 => Some(Self::UnalignedAccess),
            0x06 => Some(Self::UnknownHostTarget),
            0x07 => Some(Self::StepLimitExceeded),
            0x08 => Some(Self::HostFailure),
            _ => None,
        }
    }

    /// Returns the fault class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::IllegalEncoding => FaultClass::Decode,
            Self::NonExecutableFetch
            | Self::DataRegionFetch
            | Self::IllegalMemoryAccess
            | Self::UnalignedAccess => FaultClass::Memory,
            Self::UnknownHostTarget | Self::HostFailure => FaultClass::Host,
            Self::StepLimitExceeded => FaultClass::Budget,
        }
    }
}
