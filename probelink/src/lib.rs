//! # Bring-up of ARM Cortex-M microcontrollers through CMSIS-DAP probes
//!
//! probelink talks to a target through the ARM Debug Interface of a CMSIS-DAP
//! debug probe. It discovers and opens probes, brings up the debug port, controls
//! the core, walks the ROM table and programs the flash with flash algorithms
//! running on the target.
//!
//! # Prerequisites
//!
//! - Udev rules
//! - libusb
//!
//! # Examples
//!
//! ## Halting the attached chip
//!
//! ```no_run
//! use probelink::config::{CoreType, SessionConfig, Target};
//! use probelink::Session;
//!
//! // Use the only probe which is connected.
//! let mut session = Session::open(&SessionConfig::default(), Target::generic(CoreType::Armv7em))?;
//! session.connect()?;
//!
//! // Halt the core.
//! let information = session.halt()?;
//! println!("Halted at {:#010x}", information.pc);
//!
//! session.close();
//! # Ok::<(), probelink::Error>(())
//! ```
//!
//! ## Reading from RAM
//!
//! ```no_run
//! use probelink::config::{CoreType, SessionConfig, Target};
//! use probelink::{MemoryInterface, Session};
//!
//! let mut session = Session::open(&SessionConfig::default(), Target::generic(CoreType::Armv7em))?;
//! session.connect()?;
//! let mut core = session.core()?;
//!
//! // Read a block of 50 32 bit words.
//! let mut buff = [0u32; 50];
//! core.read_32(0x2000_0000, &mut buff)?;
//!
//! // Read a single 32 bit word.
//! let word = core.read_word_32(0x2000_0000)?;
//!
//! // Writing is just as simple.
//! let buff = [0u32; 50];
//! core.write_32(0x2000_0000, &buff)?;
//!
//! # Ok::<(), probelink::Error>(())
//! ```
//!
//! probelink is built around 4 main interfaces: the [Probe],
//! [Target], [Session] and [Core] structs.

/// All the interface bits for the ARM debug architecture.
pub mod architecture;
pub mod config;

#[warn(missing_docs)]
mod core;
mod error;
#[warn(missing_docs)]
pub mod flashing;
#[warn(missing_docs)]
mod memory;
#[warn(missing_docs)]
pub mod probe;
#[warn(missing_docs)]
mod session;

pub use crate::config::{CoreType, SessionConfig, Target};
pub use crate::core::{
    Core, CoreInformation, CoreState, CoreStatus, CpuInfo, HaltReason, MemoryMappedRegister,
    RegisterId, ResetStrategy,
};
pub use crate::error::{Error, MemoryVerifyError};
pub use crate::memory::{MemoryInterface, MemoryNotAlignedError};
pub use crate::probe::{
    list::Lister, DebugProbe, DebugProbeError, DebugProbeInfo, DebugProbeSelector, Probe,
    ProbeCreationError, WireProtocol,
};
pub use crate::session::Session;

// Exports only used in tests
#[cfg(feature = "test")]
pub use crate::probe::fake_probe::{FakeLister, FakeProbe, FakeTarget};
#[cfg(feature = "test")]
pub use crate::probe::list::ProbeLister;
