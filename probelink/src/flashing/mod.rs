//! Flash programming operations.
//!
//! This modules provides a means to do flash erasing and programming.
//!
//! It provides a convenient high level interface that can flash an IHEX or BIN file
//! as well as a lower level block based interface.
//!
//! ## Examples
//!
//! ### Flashing a binary
//!
//! The easiest way to flash a binary is using the [`download_file`] function,
//! and looks like this:
//!
//! ```no_run
//! use probelink::config::{Registry, SessionConfig};
//! use probelink::{flashing, Session};
//!
//! let mut registry = Registry::new();
//! registry.add_target_from_yaml_file("nRF52840.yaml")?;
//! let target = registry.get_target_by_name("nRF52840_xxAA")?;
//! let mut session = Session::open(&SessionConfig::default(), target)?;
//! session.connect()?;
//!
//! flashing::download_file(&mut session, "binary.hex", flashing::Format::Hex)?;
//!
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ### Adding data manually
//!
//! ```no_run
//! use probelink::config::{Registry, SessionConfig};
//! use probelink::flashing::DownloadOptions;
//! use probelink::Session;
//!
//! let mut registry = Registry::new();
//! registry.add_target_from_yaml_file("nRF52840.yaml")?;
//! let target = registry.get_target_by_name("nRF52840_xxAA")?;
//! let mut session = Session::open(&SessionConfig::default(), target)?;
//! session.connect()?;
//!
//! let mut loader = session.flash_loader();
//!
//! loader.add_data(0x1000, &[0x1, 0x2, 0x3])?;
//!
//! // Finally, the data can be programmed:
//! loader.commit(&mut session, DownloadOptions::default())?;
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod builder;
mod download;
mod erase;
mod error;
mod flash_algorithm;
mod flasher;
mod loader;
mod progress;

use builder::FlashBuilder;

pub use builder::{FlashFill, FlashLayout, FlashPage, FlashSector};
pub use download::*;
pub use erase::*;
pub use error::*;
pub use flash_algorithm::*;
pub use flasher::{FlashState, Flasher};
pub use loader::*;
pub use progress::*;
