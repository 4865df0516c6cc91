use crate::config::TargetDescriptionSource;
use crate::error;
use std::time::Duration;

/// Describes any error that happened during the or in preparation for the flashing procedure.
#[derive(thiserror::Error, Debug)]
pub enum FlashError {
    /// The data is not fully contained in the non-volatile memory of the target.
    #[error("The range {address:#010x}..{end:#010x} is not covered by the flash memory of the target.", end = address.saturating_add(*size as u64))]
    AddressOutOfRange {
        /// The start address of the data.
        address: u64,
        /// The size of the data in bytes.
        size: usize,
        /// Where the memory map of the target came from.
        description_source: TargetDescriptionSource,
    },

    /// The data overlaps data which was added before.
    #[error("The data at {0:#010x} overlaps data which was already added.")]
    DataOverlap(u64),

    /// The address is not in the range the flash algorithm can program.
    #[error("The flash algorithm can not program address {0:#010x}.")]
    InvalidFlashAddress(u64),

    /// None of the flash algorithms of the target covers the region.
    #[error("No flash algorithm of '{name}' is able to program {start:#010x}..{end:#010x}.")]
    NoFlashLoaderAlgorithmAttached {
        /// The name of the target.
        name: String,
        /// Start of the region.
        start: u64,
        /// End of the region.
        end: u64,
    },

    /// The target has no RAM the flash algorithm can be run from.
    #[error("No RAM to run the flash algorithm from is defined for '{name}'.")]
    NoRamDefined {
        /// The name of the target.
        name: String,
    },

    /// The page size is not a multiple of 4 bytes.
    #[error("The page size {size:#x} is not a multiple of 4 bytes.")]
    InvalidPageSize {
        /// The page size of the flash algorithm.
        size: u32,
    },

    /// The load address of the flash algorithm is not usable.
    #[error("The flash algorithm can not be loaded to {address:#010x}.")]
    InvalidFlashAlgorithmLoadAddress {
        /// The address the algorithm would be loaded to, including its header.
        address: u64,
    },

    /// Code, page buffer and stack do not fit into the RAM region.
    #[error("The flash algorithm does not fit into RAM together with its page buffer and stack.")]
    InvalidFlashAlgorithmStackSize,

    /// The algorithm read back from RAM differs from what was written.
    #[error(
        "The RAM contents did not match the expected contents after loading the flash algorithm."
    )]
    FlashAlgorithmNotLoaded,

    /// A routine of the flash algorithm did not return in time.
    #[error("The '{routine}' routine did not finish within {timeout:?}. The state of the flash is undefined.")]
    AlgorithmExecutionTimeout {
        /// The routine which was called.
        routine: &'static str,
        /// How long the host waited.
        timeout: Duration,
    },

    /// A routine of the flash algorithm returned an error code.
    #[error("The execution of '{name}' failed with code {error_code}")]
    RoutineCallFailed {
        /// The routine which was called.
        name: &'static str,
        /// The value of R0 after the call.
        error_code: u32,
    },

    /// The flash algorithm does not implement the routine.
    #[error("The '{0}' routine is not supported with the given flash algorithm.")]
    RoutineNotSupported(&'static str),

    /// The value does not fit into a 32-bit core register.
    #[error("The value {0:#x} does not fit into a core register.")]
    RegisterValueNotSupported(u64),

    /// The flash contents differ from the programmed data.
    #[error("Verification failed, the flash at {address:#010x} differs from the programmed data.")]
    VerifyFailed {
        /// The first address which differs.
        address: u64,
    },

    /// The operation was cancelled between two sector or page operations.
    #[error("Flashing was cancelled. Sectors which were already erased or programmed stay that way.")]
    Cancelled,

    /// Something during memory interaction went wrong.
    #[error("Something during memory interaction went wrong")]
    Memory(#[source] error::Error),

    /// Something during the interaction with the core went wrong.
    #[error("Something during the interaction with the core went wrong")]
    Core(#[source] error::Error),
}
