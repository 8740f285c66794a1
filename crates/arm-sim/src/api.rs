//! Host-facing machine API: configuration, host-call bus and the step loop.

use std::ops::Range;

use log::{debug, trace};
use thiserror::Error;

use crate::decoder::{Decoder, Instruction};
use crate::execute::{commit_execution, execute_instruction};
use crate::memory::{decode_memory_region, Memory, MemoryRegion, CODE_START, STACK_END};
use crate::state::ArchState;
use crate::FaultCode;

/// Default number of steps before a run is cut off.
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

/// Default initial `sp`: one past the top of the stack region.
pub const DEFAULT_STACK_TOP: u32 = STACK_END + 1;

/// Machine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SimConfig {
    /// Maximum retired steps (instructions and host calls) per machine.
    pub step_limit: u64,
    /// Load address of the code image and initial `pc`.
    pub code_base: u32,
    /// Initial `sp`.
    pub stack_top: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_STEP_LIMIT,
            code_base: CODE_START,
            stack_top: DEFAULT_STACK_TOP,
        }
    }
}

/// Failure reported by a host routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Nothing is registered at the branch target.
    #[error("no host routine at {0:#010x}")]
    UnknownTarget(u32),
    /// The routine ran and failed.
    #[error("host routine failed: {0}")]
    Failed(String),
}

impl HostError {
    /// Fault raised on the machine for this error.
    #[must_use]
    pub const fn fault_code(&self) -> FaultCode {
        match self {
            Self::UnknownTarget(_) => FaultCode::UnknownHostTarget,
            Self::Failed(_) => FaultCode::HostFailure,
        }
    }
}

/// Routines reachable by branching into the host region.
///
/// The machine captures `lr` before the call and resumes there afterwards.
/// A routine may freely change the caller-saved registers (`r0`-`r3`, `ip`)
/// and the `APSR`.
pub trait HostBus {
    /// Runs the routine at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::UnknownTarget`] when nothing is registered at
    /// `target`, or [`HostError::Failed`] when the routine fails.
    fn call(&mut self, target: u32, state: &mut ArchState, memory: &Memory)
        -> Result<(), HostError>;
}

/// Result of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StepOutcome {
    /// One instruction retired.
    Retired,
    /// A host routine ran and control returned to `lr`.
    HostCall {
        /// Host-region address that was called.
        target: u32,
    },
    /// The step faulted. The fault stays latched.
    Fault {
        /// Fault cause.
        cause: FaultCode,
    },
}

/// Result of [`Machine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Steps retired during this call.
    pub steps: u64,
    /// Last step observed; `Retired` or `HostCall` when the stop address
    /// was reached.
    pub final_step: StepOutcome,
}

impl RunOutcome {
    /// Fault that ended the run, if any.
    #[must_use]
    pub const fn fault(&self) -> Option<FaultCode> {
        match self.final_step {
            StepOutcome::Fault { cause } => Some(cause),
            StepOutcome::Retired | StepOutcome::HostCall { .. } => None,
        }
    }
}

/// User-mode A32 machine with a fixed memory map and a host-call region.
#[derive(Debug, Clone)]
pub struct Machine {
    state: ArchState,
    memory: Memory,
    config: SimConfig,
    data_regions: Vec<Range<u32>>,
    steps: u64,
    latched_fault: Option<FaultCode>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Machine {
    /// Fresh machine: zeroed memory, `pc` at the code base, `sp` at the
    /// configured stack top.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let mut state = ArchState::default();
        state.set_pc(config.code_base);
        state.set_sp(config.stack_top);
        Self {
            state,
            memory: Memory::new(),
            config,
            data_regions: Vec::new(),
            steps: 0,
            latched_fault: None,
        }
    }

    /// Copies a code image to the code base and records its inline data
    /// spans, given as offsets from the start of the image.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::IllegalMemoryAccess`] when the image does not fit
    /// inside the code region.
    pub fn load_code<I>(&mut self, bytes: &[u8], data: I) -> Result<(), FaultCode>
    where
        I: IntoIterator<Item = Range<u32>>,
    {
        let base = self.config.code_base;
        let len = u32::try_from(bytes.len()).map_err(|_| FaultCode::IllegalMemoryAccess)?;
        if !bytes.is_empty() {
            let last = base
                .checked_add(len - 1)
                .ok_or(FaultCode::IllegalMemoryAccess)?;
            if !MemoryRegion::Code.contains(base) || !MemoryRegion::Code.contains(last) {
                return Err(FaultCode::IllegalMemoryAccess);
            }
        }

        self.memory.load(base, bytes)?;
        self.data_regions = data
            .into_iter()
            .map(|range| base.wrapping_add(range.start)..base.wrapping_add(range.end))
            .collect();
        debug!(
            "loaded {len} bytes at {base:#010x} with {} data spans",
            self.data_regions.len()
        );
        Ok(())
    }

    /// Architectural state.
    #[must_use]
    pub const fn state(&self) -> &ArchState {
        &self.state
    }

    /// Mutable architectural state, for seeding registers.
    pub const fn state_mut(&mut self) -> &mut ArchState {
        &mut self.state
    }

    /// Memory.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable memory, for seeding the stack.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Steps retired so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Latched fault, if the machine has faulted.
    #[must_use]
    pub const fn latched_fault(&self) -> Option<FaultCode> {
        self.latched_fault
    }

    /// Absolute inline-data spans.
    #[must_use]
    pub fn data_regions(&self) -> &[Range<u32>] {
        &self.data_regions
    }

    /// `true` when `addr` falls inside an inline-data span.
    #[must_use]
    pub fn is_data_address(&self, addr: u32) -> bool {
        self.data_regions.iter().any(|range| range.contains(&addr))
    }

    fn fault(&mut self, cause: FaultCode) -> StepOutcome {
        debug!("fault {cause:?} at pc={:#010x}", self.state.pc());
        self.latched_fault = Some(cause);
        StepOutcome::Fault { cause }
    }

    /// Executes one instruction, or one host call when `pc` is in the host
    /// region.
    pub fn step<B: HostBus + ?Sized>(&mut self, bus: &mut B) -> StepOutcome {
        if let Some(cause) = self.latched_fault {
            return StepOutcome::Fault { cause };
        }
        if self.steps >= self.config.step_limit {
            return self.fault(FaultCode::StepLimitExceeded);
        }

        let pc = self.state.pc();
        if decode_memory_region(pc) == MemoryRegion::Host {
            let return_to = self.state.lr();
            trace!("host call {pc:#010x}, returning to {return_to:#010x}");
            if let Err(err) = bus.call(pc, &mut self.state, &self.memory) {
                debug!("host call {pc:#010x} failed: {err}");
                return self.fault(err.fault_code());
            }
            self.state.set_pc(return_to);
            self.steps += 1;
            return StepOutcome::HostCall { target: pc };
        }

        if self.is_data_address(pc) {
            return self.fault(FaultCode::DataRegionFetch);
        }

        let word = match self.memory.fetch_u32(pc) {
            Ok(word) => word,
            Err(cause) => return self.fault(cause),
        };
        let decoded: Result<Instruction, FaultCode> = Decoder::decode(word).into();
        let instr = match decoded {
            Ok(instr) => instr,
            Err(cause) => return self.fault(cause),
        };
        trace!("{pc:#010x}: {word:08x} {instr:?}");

        let effects = match execute_instruction(&instr, &self.state, &self.memory) {
            Ok(effects) => effects,
            Err(cause) => return self.fault(cause),
        };
        if let Err(cause) = commit_execution(effects, &mut self.state, &mut self.memory) {
            return self.fault(cause);
        }
        self.steps += 1;
        StepOutcome::Retired
    }

    /// Steps until `pc == stop_pc` or a fault. The step limit bounds the
    /// loop.
    pub fn run<B: HostBus + ?Sized>(&mut self, bus: &mut B, stop_pc: u32) -> RunOutcome {
        let start = self.steps;
        let mut final_step = StepOutcome::Retired;
        while self.state.pc() != stop_pc {
            final_step = self.step(bus);
            if matches!(final_step, StepOutcome::Fault { .. }) {
                break;
            }
        }
        RunOutcome {
            steps: self.steps - start,
            final_step,
        }
    }
}
