/// The run state of the core, as last seen by the host.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum CoreStatus {
    /// Nothing has been read from DHCSR yet.
    #[default]
    Unknown,
    /// The core executes code.
    Running,
    /// The core is in debug state.
    Halted(HaltReason),
    /// A reset was requested and the core has not been seen leaving it yet.
    Reset,
}

impl CoreStatus {
    /// Whether the core is in debug state.
    pub fn is_halted(&self) -> bool {
        matches!(self, CoreStatus::Halted(_))
    }

    /// Whether the core is known to execute code.
    pub fn is_running(&self) -> bool {
        *self == CoreStatus::Running
    }
}

/// Why the core entered debug state, decoded from DFSR.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HaltReason {
    /// More than one DFSR bit was set, e.g. a step which ended on a breakpoint.
    Multiple,
    /// A `BKPT` instruction or an FPB comparator.
    Breakpoint,
    /// A vector catch, e.g. `VC_CORERESET` after a reset.
    VectorCatch,
    /// A DWT comparator.
    Watchpoint,
    /// A single step finished.
    Step,
    /// The host wrote `C_HALT`.
    Request,
    /// The EDBGRQ input was asserted.
    External,
    /// DFSR was clear, e.g. because the core was already halted when the session connected.
    Unknown,
}

/// Where a halted core stopped.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct CoreInformation {
    /// The program counter.
    pub pc: u32,
}
