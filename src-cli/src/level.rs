//! Level gate.
//!
//! A capture only fires while the rig is level. A capture asked for while
//! the rig is tilted is remembered and fires on the first level sample that
//! follows. Only one deferred capture is ever remembered.

use tracing::{debug, info};

/// Accelerometer reading, in g, on the x and y axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tilt {
    pub x: f64,
    pub y: f64,
}

impl Tilt {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// `|x| <= tolerance && |y| <= tolerance`.
pub fn within_tolerance(x: f64, y: f64, tolerance: f64) -> bool {
    x.abs() <= tolerance && y.abs() <= tolerance
}

/// What to do with a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Level now; capture immediately
    Fire,
    /// Tilted; the capture waits for the next level sample
    Deferred,
}

/// Tracks the latest sample and any deferred capture.
#[derive(Debug, Clone)]
pub struct LevelGate {
    tolerance: f64,
    latest: Tilt,
    waiting: bool,
}

impl LevelGate {
    /// Gate fed by an accelerometer.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            latest: Tilt::default(),
            waiting: false,
        }
    }

    /// Gate for a rig without an accelerometer. The tilt stays at zero, so
    /// every request fires.
    pub fn disabled() -> Self {
        Self::new(f64::INFINITY)
    }

    /// Most recent sample (zero before the first one).
    pub fn latest(&self) -> Tilt {
        self.latest
    }

    pub fn is_level(&self) -> bool {
        within_tolerance(self.latest.x, self.latest.y, self.tolerance)
    }

    /// Whether a capture is waiting for the rig to level.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Ask for a capture against the latest sample.
    pub fn request(&mut self) -> GateDecision {
        if self.is_level() {
            self.waiting = false;
            GateDecision::Fire
        } else {
            if !self.waiting {
                info!("Waiting until the camera is level to take the picture");
            }
            self.waiting = true;
            GateDecision::Deferred
        }
    }

    /// Record a new sample. Returns `true` when a deferred capture should
    /// fire now; it then stops waiting.
    pub fn on_sample(&mut self, tilt: Tilt) -> bool {
        let was_level = self.is_level();
        self.latest = tilt;
        let level = self.is_level();
        if level != was_level {
            debug!(
                "Camera is {} (x={:.3}, y={:.3})",
                if level { "level" } else { "not level" },
                tilt.x,
                tilt.y
            );
        }

        if level && self.waiting {
            self.waiting = false;
            return true;
        }
        false
    }

    /// Drop any deferred capture.
    pub fn cancel(&mut self) {
        self.waiting = false;
    }
}
