//! # afr-engine
//!
//! Auto frame rate: find out how fast a video's frames really advance and
//! drive the display at a refresh rate that shows them without judder.
//!
//! - [`FrameRateDetector`] reads the rate from container metadata, or
//!   measures it from sample timestamps when the metadata is missing.
//! - [`snap_to_standard_rate`] pulls measurements onto broadcast cadences.
//! - [`DisplayRateMatcher`] picks the best mode at the current resolution,
//!   switches to it and waits for the display to settle, then restores the
//!   original mode at the end of the session.

pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod ffprobe;
pub mod matcher;
pub mod mode;
pub mod rate;

pub use config::AfrConfig;
pub use detect::{
    DetectedFrameRate, DetectionMethod, FrameRateDetector, MediaInfoProbe, SampleTimestampProbe,
    compute_fps_from_samples, should_try_media_info,
};
pub use display::{DisplayController, DisplayHandle};
pub use error::AfrError;
pub use ffprobe::{FfprobeMediaInfoProbe, FfprobeSampleProbe};
pub use matcher::{DisplayRateMatcher, SwitchOutcome, SwitchStatus, pick_best_mode};
pub use mode::DisplayMode;
pub use rate::snap_to_standard_rate;
