use std::fmt;

use serde::{Deserialize, Serialize};

/// Refresh rates closer than this are the same rate.
pub const RATE_TOLERANCE: f64 = 0.01;

/// One output mode a display can be driven at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    /// Hz.
    pub refresh_rate: f64,
}

impl DisplayMode {
    pub fn new(id: u32, width: u32, height: u32, refresh_rate: f64) -> Self {
        Self {
            id,
            width,
            height,
            refresh_rate,
        }
    }

    pub fn same_resolution(&self, other: &DisplayMode) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Whether `other` is this mode, by id or by resolution and rate.
    pub fn matches(&self, other: &DisplayMode) -> bool {
        self.id == other.id
            || (self.same_resolution(other)
                && (self.refresh_rate - other.refresh_rate).abs() < RATE_TOLERANCE)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}x{}@{:.3}",
            self.id, self.width, self.height, self.refresh_rate
        )
    }
}
