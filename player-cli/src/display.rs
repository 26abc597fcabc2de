//! A display described by configuration rather than by hardware.

use afr_engine::{AfrError, DisplayController, DisplayMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::DisplayConfig;

/// Switches between the configured modes instantly.
///
/// Useful for dry runs: the matcher goes through its whole decision and
/// confirmation cycle, and the log shows what a real output would be asked to do.
#[derive(Debug)]
pub struct StaticDisplay {
    modes: Vec<DisplayMode>,
    active: Mutex<DisplayMode>,
}

impl StaticDisplay {
    /// `None` when no modes are configured.
    pub fn from_config(config: &DisplayConfig) -> Option<Self> {
        let first = *config.modes.first()?;
        let active = config
            .active
            .and_then(|id| config.modes.iter().find(|m| m.id == id).copied())
            .unwrap_or(first);
        Some(Self {
            modes: config.modes.clone(),
            active: Mutex::new(active),
        })
    }

    pub fn current(&self) -> DisplayMode {
        *self.active.lock()
    }
}

#[async_trait]
impl DisplayController for StaticDisplay {
    async fn active_mode(&self) -> Result<DisplayMode, AfrError> {
        Ok(self.current())
    }

    async fn supported_modes(&self) -> Result<Vec<DisplayMode>, AfrError> {
        Ok(self.modes.clone())
    }

    async fn request_mode(&self, mode_id: u32) -> Result<(), AfrError> {
        let mode = self
            .modes
            .iter()
            .find(|m| m.id == mode_id)
            .copied()
            .ok_or_else(|| AfrError::ModeSwitch {
                mode_id,
                reason: "not a configured mode".to_owned(),
            })?;
        debug!(%mode, "Display mode set");
        *self.active.lock() = mode;
        Ok(())
    }
}
