//! Mode selection and switching.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::config::AfrConfig;
use crate::detect::FrameRateDetector;
use crate::display::{DisplayController, DisplayHandle};
use crate::error::AfrError;
use crate::mode::DisplayMode;

const EXACT_TOLERANCE: f64 = 0.01;
const DOUBLE_TOLERANCE: f64 = 0.02;
const TWO_AND_HALF_TOLERANCE: f64 = 0.025;

/// Cost per unit of distance between refresh/fps and the nearest whole multiple.
const MISMATCH_WEIGHT: f64 = 10.0;
/// Cost per Hz, so the lowest of several clean multiples wins.
const REFRESH_WEIGHT: f64 = 0.001;

fn mode_cost(refresh: f64, fps: f64) -> f64 {
    let ratio = refresh / fps;
    let multiple = ratio.round().max(1.0);
    (ratio - multiple).abs() * MISMATCH_WEIGHT + refresh * REFRESH_WEIGHT
}

/// Best mode for `fps` among those sharing `active`'s resolution.
///
/// In order: an exact rate match, twice the rate, two and a half times the
/// rate, else the lowest [`mode_cost`]. Within a tier the active mode is kept
/// when it qualifies, otherwise the first listed mode wins.
pub fn pick_best_mode(modes: &[DisplayMode], active: &DisplayMode, fps: f64) -> Option<DisplayMode> {
    if !(fps.is_finite() && fps > 0.0) {
        return None;
    }
    let candidates: Vec<DisplayMode> = modes
        .iter()
        .copied()
        .filter(|m| m.same_resolution(active))
        .collect();

    let tiers = [
        (1.0, EXACT_TOLERANCE),
        (2.0, DOUBLE_TOLERANCE),
        (2.5, TWO_AND_HALF_TOLERANCE),
    ];
    for (factor, tolerance) in tiers {
        let fits = |m: &DisplayMode| (m.refresh_rate - fps * factor).abs() < tolerance;
        if let Some(mode) = candidates
            .iter()
            .find(|m| m.id == active.id && fits(m))
            .or_else(|| candidates.iter().find(|m| fits(m)))
        {
            return Some(*mode);
        }
    }

    candidates.into_iter().min_by(|a, b| {
        mode_cost(a.refresh_rate, fps).total_cmp(&mode_cost(b.refresh_rate, fps))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchStatus {
    /// The best mode was already active.
    Unchanged,
    /// The display reported the target for enough consecutive polls.
    Confirmed,
    /// The display never settled; `applied` is the last mode seen.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwitchOutcome {
    pub target: DisplayMode,
    pub applied: DisplayMode,
    pub status: SwitchStatus,
}

/// Switches the display to suit the content and back again.
///
/// The mode active before the first switch of a session is remembered until
/// [`restore`](Self::restore). Every operation is a no-op without an attached
/// display.
pub struct DisplayRateMatcher {
    display: DisplayHandle,
    config: AfrConfig,
    original: Mutex<Option<DisplayMode>>,
}

impl DisplayRateMatcher {
    pub fn new(display: DisplayHandle, config: AfrConfig) -> Self {
        Self {
            display,
            config,
            original: Mutex::new(None),
        }
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    /// Mode to return to on [`restore`](Self::restore).
    pub fn original_mode(&self) -> Option<DisplayMode> {
        *self.original.lock()
    }

    /// Detect the frame rate of `url` and switch to match it.
    pub async fn match_url(
        &self,
        detector: &FrameRateDetector,
        url: &str,
    ) -> Result<Option<SwitchOutcome>, AfrError> {
        if !self.display.is_attached() {
            return Ok(None);
        }
        let Some(detected) = detector.detect(url).await else {
            debug!(url, "Frame rate unknown; leaving display alone");
            return Ok(None);
        };
        self.apply_frame_rate(detected.fps).await
    }

    #[instrument(skip(self))]
    pub async fn apply_frame_rate(&self, fps: f64) -> Result<Option<SwitchOutcome>, AfrError> {
        let Some(display) = self.display.get() else {
            debug!("No display attached");
            return Ok(None);
        };

        let active = display.active_mode().await?;
        let modes = display.supported_modes().await?;
        let Some(target) = pick_best_mode(&modes, &active, fps) else {
            debug!(%active, "No candidate modes");
            return Ok(Some(SwitchOutcome {
                target: active,
                applied: active,
                status: SwitchStatus::Unchanged,
            }));
        };

        if target.id == active.id {
            debug!(%active, "Display already at best mode");
            return Ok(Some(SwitchOutcome {
                target,
                applied: active,
                status: SwitchStatus::Unchanged,
            }));
        }

        {
            let mut original = self.original.lock();
            if original.is_none() {
                *original = Some(active);
            }
        }
        info!(from = %active, to = %target, fps, "Switching display mode");
        display.request_mode(target.id).await?;
        Ok(Some(self.await_mode(display.as_ref(), target, active).await))
    }

    /// Switch back to the mode remembered by the first switch and forget it.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<Option<SwitchOutcome>, AfrError> {
        let Some(original) = self.original.lock().take() else {
            return Ok(None);
        };
        let Some(display) = self.display.get() else {
            debug!(%original, "No display attached; forgetting original mode");
            return Ok(None);
        };

        let active = display.active_mode().await?;
        if active.id == original.id {
            return Ok(Some(SwitchOutcome {
                target: original,
                applied: active,
                status: SwitchStatus::Unchanged,
            }));
        }

        info!(from = %active, to = %original, "Restoring display mode");
        display.request_mode(original.id).await?;
        Ok(Some(self.await_mode(display.as_ref(), original, active).await))
    }

    /// Poll until `target` is reported `stable_polls` times in a row or the
    /// switch timeout passes.
    async fn await_mode(
        &self,
        display: &dyn DisplayController,
        target: DisplayMode,
        mut last: DisplayMode,
    ) -> SwitchOutcome {
        let deadline = Instant::now() + self.config.switch_timeout;
        let mut stable = 0;

        while Instant::now() < deadline {
            sleep(self.config.poll_interval).await;
            match display.active_mode().await {
                Ok(mode) => {
                    last = mode;
                    if mode.matches(&target) {
                        stable += 1;
                        if stable >= self.config.stable_polls {
                            info!(mode = %mode, "Display mode confirmed");
                            return SwitchOutcome {
                                target,
                                applied: mode,
                                status: SwitchStatus::Confirmed,
                            };
                        }
                    } else {
                        stable = 0;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Polling active mode failed");
                    stable = 0;
                }
            }
        }

        warn!(%target, applied = %last, "Display did not settle before timeout");
        SwitchOutcome {
            target,
            applied: last,
            status: SwitchStatus::TimedOut,
        }
    }
}
