use crate::architecture::arm::memory::RomTableError;
use crate::architecture::arm::ArmError;
use crate::config::RegistryError;
use crate::core::CoreStatus;
use crate::memory::MemoryNotAlignedError;
use crate::probe::{DebugProbeError, DebugProbeInfo};

/// The overarching error type of the library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error with the usage of the probe occurred.
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),

    /// An ARM specific error occurred.
    #[error("An ARM specific error occurred.")]
    Arm(#[from] ArmError),

    /// The ROM table could not be read.
    #[error(transparent)]
    RomTable(#[from] RomTableError),

    /// The target description could not be loaded.
    #[error("Unable to load specification for chip")]
    Registry(#[from] RegistryError),

    /// The operation is not possible while the core is in this state.
    #[error("The operation is not possible while the core is {status:?}.")]
    InvalidAccessInCurrentState {
        /// The state of the core at the time of the access.
        status: CoreStatus,
    },

    /// No debug probe was found.
    #[error("No debug probe was found.")]
    NoProbeFound,

    /// More than one probe was found, and no selector was given to pick one.
    #[error("{} probes were found, select one of them with a probe selector.", candidates.len())]
    AmbiguousProbeSelection {
        /// The probes which were found.
        candidates: Vec<DebugProbeInfo>,
    },

    /// The session has already been closed.
    #[error("The session is closed.")]
    SessionClosed,

    /// The operation needs a session connected to the target.
    #[error("The session is not connected to the target, call `connect` first.")]
    NotConnected,

    /// A memory check read back something different than what was written.
    #[error(transparent)]
    MemoryVerify(#[from] MemoryVerifyError),

    /// The access was not aligned.
    #[error(transparent)]
    MemoryNotAligned(#[from] MemoryNotAlignedError),

    /// All comparators of the breakpoint unit are in use.
    #[error("All {0} hardware breakpoint comparators are in use.")]
    BreakpointUnitsExhausted(usize),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The value read back from memory differs from the value written.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Memory at {address:#010x} reads {actual:#010x}, expected {expected:#010x}.")]
pub struct MemoryVerifyError {
    /// The address of the check.
    pub address: u64,
    /// The value which was written.
    pub expected: u32,
    /// The value which was read back.
    pub actual: u32,
}
