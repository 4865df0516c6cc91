//! All the interface bits for ARM.

pub mod ap;
pub mod communication_interface;
pub mod core;
pub mod dp;
pub mod memory;
mod traits;

pub use communication_interface::{
    ApInformation, ArmCommunicationInterface, MemoryApInformation, Register,
};
pub use traits::*;

use crate::memory::MemoryNotAlignedError;
use crate::probe::DebugProbeError;
use dp::DebugPortVersion;

/// ARM-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    /// The transfer was answered with WAIT more often than the retry policy allows.
    #[error("The target kept answering WAIT, giving up after {attempts} attempts")]
    AccessTimeout {
        /// How often the transfer was tried.
        attempts: u32,
    },

    /// The access port answered with FAULT. The sticky flags have been cleared.
    #[error("The access port reported a fault (CTRL/STAT = {ctrl_stat:#010x})")]
    AccessPortFault {
        /// CTRL/STAT, as read before the sticky flags were cleared.
        ctrl_stat: u32,
    },

    /// The access port answered with FAULT, and the sticky flags could not be cleared.
    #[error("The sticky error flags could not be cleared (CTRL/STAT = {ctrl_stat:#010x?})")]
    StickyFaultUnrecoverable {
        /// CTRL/STAT, if it could still be read.
        ctrl_stat: Option<u32>,
    },

    /// A transfer failed on the wire.
    #[error("An error occurred in the communication with an access port or debug port.")]
    Dap(#[from] DapError),

    /// The operation timed out.
    #[error("Timeout occurred during operation.")]
    Timeout,

    /// The access was not aligned.
    #[error(transparent)]
    MemoryNotAligned(#[from] MemoryNotAlignedError),

    /// The address does not fit into the 32-bit address space of the MEM-AP.
    #[error("Address {0:#x} is outside of the 32-bit address space.")]
    AddressOutOf32BitAddressSpace(u64),

    /// The debug port version is not supported.
    #[error("Debug port version {0} is not supported.")]
    UnsupportedDebugPort(DebugPortVersion),

    /// The access port is not a memory access port.
    #[error("Access port {0} is not a memory access port.")]
    WrongApType(u8),

    /// No memory access port was found during the access port scan.
    #[error("The target does not have a memory access port.")]
    NoMemoryAccessPort,

    /// The debug probe encountered an error.
    #[error("The debug probe encountered an error.")]
    Probe(#[from] DebugProbeError),
}

impl ArmError {
    /// The error reported for a memory access which is not aligned to `alignment` bytes.
    pub fn alignment_error(address: u64, alignment: usize) -> Self {
        ArmError::MemoryNotAligned(MemoryNotAlignedError { address, alignment })
    }
}
