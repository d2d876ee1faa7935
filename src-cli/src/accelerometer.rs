//! Accelerometer access.
//!
//! The console polls the sensor on its own timer and feeds each sample to
//! the [`LevelGate`](crate::level::LevelGate). When no sensor attaches the
//! rig runs without level gating.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::{AccelerometerConfig, AccelerometerKind};
use crate::level::Tilt;

/// Error type for accelerometer access.
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerometerError {
    /// No sensor attached within the timeout
    AttachTimeout(Duration),
}

impl std::fmt::Display for AccelerometerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccelerometerError::AttachTimeout(timeout) => {
                write!(f, "No accelerometer attached within {:?}", timeout)
            }
        }
    }
}

impl std::error::Error for AccelerometerError {}

/// A tilt sensor that can be sampled on demand.
pub trait Accelerometer: Send {
    fn sample(&mut self) -> Tilt;
}

/// Sensor stand-in: starts tilted, settles towards level with a damped
/// wobble, and tips over again every `retilt_every` samples.
#[derive(Debug, Clone)]
pub struct SimulatedAccelerometer {
    initial: Tilt,
    damping: f64,
    retilt_every: u64,
    samples: u64,
}

impl SimulatedAccelerometer {
    pub fn new(initial: Tilt, damping: f64, retilt_every: u64) -> Self {
        Self {
            initial,
            damping,
            retilt_every: retilt_every.max(1),
            samples: 0,
        }
    }
}

impl Default for SimulatedAccelerometer {
    /// Settles in about a second at the default 100 ms period, re-tilts
    /// every 30 seconds.
    fn default() -> Self {
        Self::new(Tilt::new(0.6, -0.4), 0.7, 300)
    }
}

impl Accelerometer for SimulatedAccelerometer {
    fn sample(&mut self) -> Tilt {
        let step = self.samples % self.retilt_every;
        self.samples += 1;

        let envelope = self.damping.powi(step.min(i32::MAX as u64) as i32);
        let phase = step as f64 * 0.9;
        Tilt::new(
            self.initial.x * envelope * phase.cos(),
            self.initial.y * envelope * (phase * 1.3).cos(),
        )
    }
}

/// Attach the configured sensor.
///
/// Returns `None` (after logging) when no sensor is configured or it fails
/// to attach; the caller then runs without level gating.
pub fn attach(config: &AccelerometerConfig) -> Option<Box<dyn Accelerometer>> {
    let timeout = Duration::from_millis(config.attach_timeout_ms);
    let result: Result<Box<dyn Accelerometer>, AccelerometerError> = match config.kind {
        AccelerometerKind::Simulated => Ok(Box::new(SimulatedAccelerometer::default())),
        AccelerometerKind::None => Err(AccelerometerError::AttachTimeout(timeout)),
    };

    match result {
        Ok(sensor) => {
            info!(
                "Created accelerometer, polling every {} ms",
                config.period_ms
            );
            Some(sensor)
        }
        Err(e) => {
            warn!("No accelerometer connected: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::within_tolerance;

    #[test]
    fn test_simulated_sensor_starts_tilted_and_settles() {
        let mut sensor = SimulatedAccelerometer::default();
        let first = sensor.sample();
        assert!(!within_tolerance(first.x, first.y, 0.2));

        let settled = (0..20).map(|_| sensor.sample()).last().unwrap();
        assert!(within_tolerance(settled.x, settled.y, 0.2));
    }

    #[test]
    fn test_simulated_sensor_retilts() {
        let mut sensor = SimulatedAccelerometer::new(Tilt::new(1.0, 1.0), 0.5, 10);
        let samples: Vec<Tilt> = (0..11).map(|_| sensor.sample()).collect();
        assert_eq!(samples[0], samples[10]);
        assert!(within_tolerance(samples[9].x, samples[9].y, 0.01));
    }

    #[test]
    fn test_attach_honours_kind() {
        let mut config = AccelerometerConfig::default();
        assert!(attach(&config).is_some());

        config.kind = AccelerometerKind::None;
        assert!(attach(&config).is_none());
    }
}
