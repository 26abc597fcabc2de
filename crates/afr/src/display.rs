//! Display capability and the optional handle the matcher reaches it through.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::AfrError;
use crate::mode::DisplayMode;

/// Mode enumeration and selection on the physical output.
#[async_trait]
pub trait DisplayController: Send + Sync {
    async fn active_mode(&self) -> Result<DisplayMode, AfrError>;

    async fn supported_modes(&self) -> Result<Vec<DisplayMode>, AfrError>;

    /// Ask for a mode. The switch may complete asynchronously.
    async fn request_mode(&self, mode_id: u32) -> Result<(), AfrError>;
}

/// A display that may come and go with the screen hosting playback.
///
/// Clones share the same slot, so a detach is seen by every holder.
#[derive(Clone, Default)]
pub struct DisplayHandle {
    slot: Arc<RwLock<Option<Arc<dyn DisplayController>>>>,
}

impl DisplayHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(controller: Arc<dyn DisplayController>) -> Self {
        let handle = Self::new();
        handle.attach(controller);
        handle
    }

    pub fn attach(&self, controller: Arc<dyn DisplayController>) {
        debug!("Display attached");
        *self.slot.write() = Some(controller);
    }

    pub fn detach(&self) {
        if self.slot.write().take().is_some() {
            debug!("Display detached");
        }
    }

    pub fn get(&self) -> Option<Arc<dyn DisplayController>> {
        self.slot.read().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl std::fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted display for tests.

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    pub struct FakeDisplay {
        modes: Vec<DisplayMode>,
        active: Mutex<DisplayMode>,
        /// Modes reported by successive polls after a request, before the
        /// requested mode shows up.
        transitions: Mutex<VecDeque<DisplayMode>>,
        pending: Mutex<Option<DisplayMode>>,
        /// Never apply requested modes.
        stuck: bool,
        requests: Mutex<Vec<u32>>,
    }

    impl FakeDisplay {
        pub fn new(modes: Vec<DisplayMode>, active_id: u32) -> Self {
            let active = modes
                .iter()
                .copied()
                .find(|m| m.id == active_id)
                .unwrap_or(modes[0]);
            Self {
                modes,
                active: Mutex::new(active),
                transitions: Mutex::new(VecDeque::new()),
                pending: Mutex::new(None),
                stuck: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn with_transitions(self, modes: Vec<DisplayMode>) -> Self {
            *self.transitions.lock() = modes.into();
            self
        }

        pub fn stuck(mut self) -> Self {
            self.stuck = true;
            self
        }

        pub fn requests(&self) -> Vec<u32> {
            self.requests.lock().clone()
        }

        pub fn current(&self) -> DisplayMode {
            *self.active.lock()
        }
    }

    #[async_trait]
    impl DisplayController for FakeDisplay {
        async fn active_mode(&self) -> Result<DisplayMode, AfrError> {
            let mut pending = self.pending.lock();
            let mut active = self.active.lock();
            if pending.is_some() {
                match self.transitions.lock().pop_front() {
                    Some(next) => *active = next,
                    None => *active = pending.take().unwrap_or(*active),
                }
            }
            Ok(*active)
        }

        async fn supported_modes(&self) -> Result<Vec<DisplayMode>, AfrError> {
            Ok(self.modes.clone())
        }

        async fn request_mode(&self, mode_id: u32) -> Result<(), AfrError> {
            self.requests.lock().push(mode_id);
            let mode = self
                .modes
                .iter()
                .copied()
                .find(|m| m.id == mode_id)
                .ok_or_else(|| AfrError::ModeSwitch {
                    mode_id,
                    reason: "unknown mode".into(),
                })?;
            if !self.stuck {
                *self.pending.lock() = Some(mode);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDisplay;
    use super::*;

    #[tokio::test]
    async fn test_detach_is_shared_between_clones() {
        let display = Arc::new(FakeDisplay::new(
            vec![DisplayMode::new(1, 1920, 1080, 60.0)],
            1,
        ));
        let handle = DisplayHandle::attached(display);
        let clone = handle.clone();
        assert!(clone.get().is_some());

        handle.detach();
        assert!(clone.get().is_none());
        assert!(!clone.is_attached());
    }
}
