//! Library target for the `tvplay` package.
//!
//! The binary wires these pieces together; they live here so the playback
//! session can be driven from tests with in-memory transports and displays.

pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod session;

pub use config::{AppConfig, DisplayConfig};
pub use display::StaticDisplay;
pub use error::{Result, TvplayError};
pub use session::{AudioSink, PlaybackReport, PlaybackSession};
