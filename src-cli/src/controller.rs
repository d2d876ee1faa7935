//! Capture flow of the operator console.
//!
//! Holds the working experiment, the current plot number and the level gate,
//! and decides when a save is issued. It performs no I/O on the control
//! channel itself: the caller runs the returned [`SaveJob`] and reports the
//! result back.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::experiment::{next_plot_number, Experiment, ExperimentError};
use crate::level::{GateDecision, LevelGate, Tilt};
use crate::metadata::{pad_plot_number, MetadataError, MetadataRecord, MetadataStore};

/// A save the caller should issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveJob {
    pub experiment_path: PathBuf,
    pub base_name: String,
    pub plot_number: u32,
}

/// Outcome of asking for a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Fire(SaveJob),
    /// The picture is taken on the next level sample
    Deferred,
}

/// Why a picture cannot be taken right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NoExperiment,
    /// A save is still in flight
    Busy,
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Refusal::NoExperiment => write!(f, "no experiment is open"),
            Refusal::Busy => write!(f, "a picture is still being saved"),
        }
    }
}

struct ActiveExperiment {
    experiment: Experiment,
    metadata: MetadataStore,
}

pub struct Controller {
    active: Option<ActiveExperiment>,
    plot_number: u32,
    padding: usize,
    gate: LevelGate,
    in_flight: bool,
}

impl Controller {
    pub fn new(gate: LevelGate, padding: usize) -> Self {
        Self {
            active: None,
            plot_number: 0,
            padding,
            gate,
            in_flight: false,
        }
    }

    /// Make `experiment` the working experiment.
    ///
    /// Metadata of the previous experiment is flushed first. The plot number
    /// continues after the last recorded capture unless `plot_number` is given.
    pub fn open_experiment(
        &mut self,
        experiment: Experiment,
        plot_number: Option<u32>,
    ) -> Result<(), ExperimentError> {
        self.flush()?;

        let metadata = experiment.open_metadata()?;
        self.plot_number = plot_number.unwrap_or_else(|| next_plot_number(&metadata));
        info!(
            "Opened experiment {} at plot {}",
            experiment.name(),
            self.plot_label()
        );
        self.gate.cancel();
        self.active = Some(ActiveExperiment {
            experiment,
            metadata,
        });
        Ok(())
    }

    pub fn experiment(&self) -> Option<&Experiment> {
        self.active.as_ref().map(|active| &active.experiment)
    }

    pub fn plot_number(&self) -> u32 {
        self.plot_number
    }

    /// Zero-padded plot number.
    pub fn plot_label(&self) -> String {
        pad_plot_number(self.plot_number, self.padding)
    }

    /// Jump to `plot_number`. Refused while a save is in flight, since
    /// completing that save advances the number it was taken at.
    pub fn set_plot_number(&mut self, plot_number: u32) -> Result<(), Refusal> {
        if self.in_flight {
            return Err(Refusal::Busy);
        }
        self.plot_number = plot_number;
        Ok(())
    }

    pub fn gate(&self) -> &LevelGate {
        &self.gate
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Ask for a picture at the current plot number.
    pub fn take_picture(&mut self) -> Result<Trigger, Refusal> {
        if self.active.is_none() {
            return Err(Refusal::NoExperiment);
        }
        if self.in_flight {
            return Err(Refusal::Busy);
        }

        match self.gate.request() {
            GateDecision::Fire => Ok(Trigger::Fire(self.begin_save()?)),
            GateDecision::Deferred => Ok(Trigger::Deferred),
        }
    }

    /// Feed an accelerometer sample. Returns a job when a deferred picture
    /// should fire now.
    pub fn on_sample(&mut self, tilt: Tilt) -> Option<SaveJob> {
        if !self.gate.on_sample(tilt) {
            return None;
        }
        match self.begin_save() {
            Ok(job) => Some(job),
            Err(refusal) => {
                debug!("Deferred picture dropped: {}", refusal);
                None
            }
        }
    }

    fn begin_save(&mut self) -> Result<SaveJob, Refusal> {
        let active = self.active.as_ref().ok_or(Refusal::NoExperiment)?;
        if self.in_flight {
            return Err(Refusal::Busy);
        }
        self.in_flight = true;

        let base_name = format!("{}_{}", active.experiment.name(), self.plot_label());
        Ok(SaveJob {
            experiment_path: active.experiment.path().to_path_buf(),
            base_name,
            plot_number: self.plot_number,
        })
    }

    /// Record a completed save: append and flush the metadata record, then
    /// advance the plot number.
    pub fn complete_save(
        &mut self,
        job: &SaveJob,
        now: chrono::DateTime<chrono::Local>,
    ) -> Result<MetadataRecord, MetadataError> {
        self.in_flight = false;
        let tilt = self.gate.latest();
        let padding = self.padding;

        let Some(active) = self.active.as_mut() else {
            warn!("Save {} completed with no experiment open", job.base_name);
            return Err(MetadataError::Io(std::io::Error::other(
                "no experiment open",
            )));
        };

        let record = MetadataRecord::new(
            job.plot_number,
            padding,
            now,
            (tilt.x, tilt.y),
            active.experiment.name(),
        );
        active.metadata.append(record.clone());
        // Advance even if the flush fails: the images are on disk.
        self.plot_number = job.plot_number.saturating_add(1);
        active.metadata.flush()?;

        debug!("Image <{}> successfully saved", job.base_name);
        Ok(record)
    }

    /// Re-enable capture after a failed save. The plot number is kept.
    pub fn fail_save(&mut self) {
        self.in_flight = false;
    }

    /// Write pending metadata to disk.
    pub fn flush(&mut self) -> Result<(), MetadataError> {
        match self.active.as_mut() {
            Some(active) => active.metadata.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentStore;
    use chrono::TimeZone;

    fn now() -> chrono::DateTime<chrono::Local> {
        chrono::Local
            .with_ymd_and_hms(2026, 6, 1, 12, 30, 0)
            .single()
            .unwrap()
    }

    fn setup() -> (tempfile::TempDir, ExperimentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_refuses_without_experiment() {
        let mut controller = Controller::new(LevelGate::disabled(), 3);
        assert_eq!(controller.take_picture(), Err(Refusal::NoExperiment));
    }

    #[test]
    fn test_level_capture_fires_with_padded_name() {
        let (_dir, store) = setup();
        let experiment = store.create("field").unwrap();
        let path = experiment.path().to_path_buf();

        let mut controller = Controller::new(LevelGate::disabled(), 3);
        controller.open_experiment(experiment, None).unwrap();
        assert_eq!(controller.plot_number(), 1);

        match controller.take_picture().unwrap() {
            Trigger::Fire(job) => {
                assert_eq!(job.base_name, "field_001");
                assert_eq!(job.experiment_path, path);
                assert_eq!(job.plot_number, 1);
            }
            other => panic!("expected fire, got {:?}", other),
        }
        assert!(controller.is_in_flight());
        assert_eq!(controller.take_picture(), Err(Refusal::Busy));
    }

    #[test]
    fn test_completed_save_records_metadata_and_advances() {
        let (_dir, store) = setup();
        let experiment = store.create("field").unwrap();
        let metadata_path = experiment.metadata_path();

        let mut controller = Controller::new(LevelGate::disabled(), 3);
        controller.open_experiment(experiment, None).unwrap();
        let Trigger::Fire(job) = controller.take_picture().unwrap() else {
            panic!("expected fire");
        };

        let record = controller.complete_save(&job, now()).unwrap();
        assert_eq!(record.number, "001");
        assert_eq!(record.time, "12:30:00");
        assert_eq!(record.name, "field");
        assert_eq!(controller.plot_number(), 2);
        assert!(!controller.is_in_flight());

        let stored = MetadataStore::open(metadata_path).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_failed_save_keeps_plot_number() {
        let (_dir, store) = setup();
        let mut controller = Controller::new(LevelGate::disabled(), 3);
        controller
            .open_experiment(store.create("field").unwrap(), Some(7))
            .unwrap();
        controller.take_picture().unwrap();
        controller.fail_save();
        assert_eq!(controller.plot_number(), 7);
        assert!(!controller.is_in_flight());
    }

    #[test]
    fn test_plot_number_is_locked_while_saving() {
        let (_dir, store) = setup();
        let mut controller = Controller::new(LevelGate::disabled(), 3);
        controller
            .open_experiment(store.create("field").unwrap(), None)
            .unwrap();
        let Trigger::Fire(job) = controller.take_picture().unwrap() else {
            panic!("expected fire");
        };

        assert_eq!(controller.set_plot_number(50), Err(Refusal::Busy));
        controller.complete_save(&job, now()).unwrap();
        assert_eq!(controller.plot_number(), 2);

        controller.set_plot_number(50).unwrap();
        assert_eq!(controller.plot_label(), "050");
    }

    #[test]
    fn test_tilted_capture_fires_once_when_level() {
        let (_dir, store) = setup();
        let mut controller = Controller::new(LevelGate::new(0.2), 3);
        controller
            .open_experiment(store.create("field").unwrap(), None)
            .unwrap();

        assert!(controller.on_sample(Tilt::new(0.5, 0.0)).is_none());
        assert_eq!(controller.take_picture(), Ok(Trigger::Deferred));
        assert_eq!(controller.take_picture(), Ok(Trigger::Deferred));
        assert!(controller.on_sample(Tilt::new(0.4, 0.4)).is_none());

        let job = controller.on_sample(Tilt::new(0.1, 0.0)).unwrap();
        assert_eq!(job.base_name, "field_001");
        assert!(controller.on_sample(Tilt::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn test_resume_continues_after_last_record() {
        let (_dir, store) = setup();
        let experiment = store.create("field").unwrap();
        {
            let mut metadata = experiment.open_metadata().unwrap();
            metadata.append(MetadataRecord::new(41, 3, now(), (0.0, 0.0), "field"));
            metadata.flush().unwrap();
        }

        let mut controller = Controller::new(LevelGate::disabled(), 3);
        controller
            .open_experiment(store.open("field").unwrap(), None)
            .unwrap();
        assert_eq!(controller.plot_number(), 42);
        assert_eq!(controller.plot_label(), "042");
    }
}
