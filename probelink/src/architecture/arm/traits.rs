use crate::probe::DebugProbeError;

/// Selects which register set a raw DAP transfer addresses.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PortType {
    /// The debug port registers (DPIDR, CTRL/STAT, SELECT, ...).
    DebugPort,
    /// The registers of the access port currently selected in SELECT.
    AccessPort,
}

/// The acknowledge of a single SWD or JTAG transfer, if it was not OK.
#[derive(thiserror::Error, Debug)]
pub enum DapError {
    /// An error occurred in the SWD communication between probe and device.
    #[error("An error occurred in the SWD communication between probe and device.")]
    SwdProtocol,
    /// The target did not respond to the request.
    #[error("Target device did not respond to request.")]
    NoAcknowledge,
    /// The target responded with FAULT. The sticky error flags are set.
    #[error("Target device responded with FAULT response to request.")]
    FaultResponse,
    /// The target responded with WAIT, the transfer has to be repeated.
    #[error("Target device responded with WAIT response to request.")]
    WaitResponse,
    /// The parity of the data returned by a read did not match.
    #[error("Incorrect parity on READ request.")]
    IncorrectParity,
    /// The transfer could not be handed to the probe at all.
    #[error("Error in the probe transport")]
    Probe(#[from] DebugProbeError),
}

/// Low-level DAP register access.
///
/// Operations on this trait closely match the transactions on the wire. Implementors
/// report every non-OK acknowledge as a [`DapError`] and do not retry anything themselves.
///
/// Almost everything is the responsibility of the caller. For example, the caller must
/// handle bank switching, AP selection, WAIT retries and sticky error recovery.
pub trait RawDapAccess {
    /// Read a DAP register.
    ///
    /// Only the lowest 4 bits of `addr` are used. Bank switching is the caller's responsibility.
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DapError>;

    /// Read multiple values from the same DAP register.
    ///
    /// If possible, this uses optimized read functions, otherwise it
    /// falls back to the `raw_read_register` function.
    fn raw_read_block(
        &mut self,
        port: PortType,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DapError> {
        for val in values {
            *val = self.raw_read_register(port, addr)?;
        }

        Ok(())
    }

    /// Write a value to a DAP register.
    ///
    /// Only the lowest 4 bits of `addr` are used. Bank switching is the caller's responsibility.
    fn raw_write_register(&mut self, port: PortType, addr: u8, value: u32)
        -> Result<(), DapError>;

    /// Write multiple values to the same DAP register.
    ///
    /// If possible, this uses optimized write functions, otherwise it
    /// falls back to the `raw_write_register` function.
    fn raw_write_block(&mut self, port: PortType, addr: u8, values: &[u32]) -> Result<(), DapError> {
        for val in values {
            self.raw_write_register(port, addr, *val)?;
        }

        Ok(())
    }
}
