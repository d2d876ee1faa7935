//! Experiment directories.
//!
//! An experiment is a directory under the experiments root holding exactly
//! the `RGB`, `Depth` and `Metadata` subdirectories. It is valid only when
//! all three exist.

use std::path::{Path, PathBuf};

use plotcam_common::security::validation::{validate_experiment_name, ValidationError};
use tracing::{debug, info, warn};

use crate::metadata::{MetadataError, MetadataStore};

pub const RGB_DIR: &str = "RGB";
pub const DEPTH_DIR: &str = "Depth";
pub const METADATA_DIR: &str = "Metadata";

const SUBDIRS: [&str; 3] = [RGB_DIR, DEPTH_DIR, METADATA_DIR];

/// First plot number of a fresh experiment.
pub const FIRST_PLOT_NUMBER: u32 = 1;

/// Error type for experiment operations.
#[derive(Debug)]
pub enum ExperimentError {
    InvalidName(ValidationError),
    /// Creating: an entry with this name already exists
    AlreadyExists(PathBuf),
    /// Opening: no experiment with this name
    NotFound(PathBuf),
    /// Opening: the directory lacks one of its subdirectories
    MissingDirectory { experiment: PathBuf, dir: &'static str },
    Io(std::io::Error),
    Metadata(MetadataError),
}

impl std::fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentError::InvalidName(e) => write!(f, "{}", e),
            ExperimentError::AlreadyExists(path) => {
                write!(f, "Experiment already exists: {}", path.display())
            }
            ExperimentError::NotFound(path) => write!(f, "No experiment at {}", path.display()),
            ExperimentError::MissingDirectory { experiment, dir } => write!(
                f,
                "Experiment {} is missing its {} directory",
                experiment.display(),
                dir
            ),
            ExperimentError::Io(e) => write!(f, "I/O error: {}", e),
            ExperimentError::Metadata(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ExperimentError {}

impl From<std::io::Error> for ExperimentError {
    fn from(e: std::io::Error) -> Self {
        ExperimentError::Io(e)
    }
}

impl From<ValidationError> for ExperimentError {
    fn from(e: ValidationError) -> Self {
        ExperimentError::InvalidName(e)
    }
}

impl From<MetadataError> for ExperimentError {
    fn from(e: MetadataError) -> Self {
        ExperimentError::Metadata(e)
    }
}

/// A validated experiment directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    name: String,
    path: PathBuf,
}

impl Experiment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the experiment directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Metadata/<name>.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.path
            .join(METADATA_DIR)
            .join(format!("{}.json", self.name))
    }

    pub fn open_metadata(&self) -> Result<MetadataStore, ExperimentError> {
        Ok(MetadataStore::open(self.metadata_path())?)
    }

    /// Number of colour captures on disk.
    pub fn capture_count(&self) -> usize {
        std::fs::read_dir(self.path.join(RGB_DIR))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| entry.path().is_file())
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Plot number for the next capture given the experiment's metadata.
pub fn next_plot_number(metadata: &MetadataStore) -> u32 {
    metadata
        .last_index()
        .map(|last| last.saturating_add(1))
        .unwrap_or(FIRST_PLOT_NUMBER)
}

/// Check that `path` holds all three experiment subdirectories.
pub fn validate_layout(path: &Path) -> Result<(), ExperimentError> {
    if !path.is_dir() {
        return Err(ExperimentError::NotFound(path.to_path_buf()));
    }
    for dir in SUBDIRS {
        if !path.join(dir).is_dir() {
            return Err(ExperimentError::MissingDirectory {
                experiment: path.to_path_buf(),
                dir,
            });
        }
    }
    Ok(())
}

/// Listing entry for one directory under the experiments root.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExperimentSummary {
    pub name: String,
    pub path: PathBuf,
    pub valid: bool,
    pub captures: usize,
}

/// The directory all experiments live in.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    root: PathBuf,
}

impl ExperimentStore {
    /// Use `root` as the experiments directory; relative paths are resolved
    /// against the current directory.
    pub fn new(root: &Path) -> Result<Self, ExperimentError> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create experiment `name` with all of its subdirectories.
    ///
    /// Fails without touching the filesystem if anything named `name`
    /// already exists. The tree is assembled under a hidden temporary name
    /// and renamed into place, so a failure leaves nothing behind.
    pub fn create(&self, name: &str) -> Result<Experiment, ExperimentError> {
        validate_experiment_name(name)?;
        let target = self.path_of(name);
        if target.exists() {
            return Err(ExperimentError::AlreadyExists(target));
        }

        std::fs::create_dir_all(&self.root)?;

        let staging = self
            .root
            .join(format!(".{}.tmp-{}", name, std::process::id()));
        if staging.exists() {
            debug!("Removing stale staging directory {}", staging.display());
            std::fs::remove_dir_all(&staging)?;
        }

        let result = build_tree(&staging).and_then(|()| {
            // Re-check: another process may have claimed the name meanwhile.
            if target.exists() {
                return Err(ExperimentError::AlreadyExists(target.clone()));
            }
            std::fs::rename(&staging, &target)?;
            Ok(())
        });

        if let Err(e) = result {
            if staging.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    warn!(
                        "Failed to remove staging directory {}: {}",
                        staging.display(),
                        cleanup
                    );
                }
            }
            return Err(e);
        }

        info!("Created experiment {} at {}", name, target.display());
        Ok(Experiment {
            name: name.to_string(),
            path: target,
        })
    }

    /// Open an existing, valid experiment.
    pub fn open(&self, name: &str) -> Result<Experiment, ExperimentError> {
        validate_experiment_name(name)?;
        let path = self.path_of(name);
        validate_layout(&path)?;
        Ok(Experiment {
            name: name.to_string(),
            path,
        })
    }

    /// All non-hidden directories under the root, sorted by name.
    pub fn list(&self) -> Result<Vec<ExperimentSummary>, ExperimentError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !path.is_dir() {
                continue;
            }

            let valid = validate_layout(&path).is_ok();
            let captures = if valid {
                Experiment {
                    name: name.clone(),
                    path: path.clone(),
                }
                .capture_count()
            } else {
                0
            };
            summaries.push(ExperimentSummary {
                name,
                path,
                valid,
                captures,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

fn build_tree(staging: &Path) -> Result<(), ExperimentError> {
    std::fs::create_dir(staging)?;
    for dir in SUBDIRS {
        std::fs::create_dir(staging.join(dir))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRecord;

    fn store() -> (tempfile::TempDir, ExperimentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn entries(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_yields_all_three_subdirs() {
        let (_dir, store) = store();
        let experiment = store.create("field7").unwrap();

        assert_eq!(experiment.path(), store.path_of("field7"));
        assert_eq!(entries(experiment.path()), vec!["Depth", "Metadata", "RGB"]);
        assert!(validate_layout(experiment.path()).is_ok());
        // No staging directory left behind.
        assert_eq!(entries(store.root()), vec!["field7"]);
    }

    #[test]
    fn test_create_existing_fails_without_creating_subdirs() {
        let (_dir, store) = store();
        let existing = store.path_of("field7");
        std::fs::create_dir(&existing).unwrap();

        let result = store.create("field7");
        assert!(matches!(result, Err(ExperimentError::AlreadyExists(_))));
        assert!(entries(&existing).is_empty());
        assert_eq!(entries(store.root()), vec!["field7"]);
    }

    #[test]
    fn test_create_existing_file_fails() {
        let (_dir, store) = store();
        std::fs::write(store.path_of("field7"), b"").unwrap();
        assert!(matches!(
            store.create("field7"),
            Err(ExperimentError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let (_dir, store) = store();
        assert!(matches!(
            store.create("../escape"),
            Err(ExperimentError::InvalidName(_))
        ));
        assert!(matches!(
            store.create(".hidden"),
            Err(ExperimentError::InvalidName(_))
        ));
        assert!(entries(store.root()).is_empty());
    }

    #[test]
    fn test_create_makes_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(&dir.path().join("nested").join("experiments")).unwrap();
        assert!(store.create("a").is_ok());
    }

    #[test]
    fn test_open_requires_every_subdir() {
        let (_dir, store) = store();
        assert!(matches!(
            store.open("missing"),
            Err(ExperimentError::NotFound(_))
        ));

        let path = store.path_of("partial");
        std::fs::create_dir_all(path.join(RGB_DIR)).unwrap();
        std::fs::create_dir_all(path.join(DEPTH_DIR)).unwrap();
        assert!(matches!(
            store.open("partial"),
            Err(ExperimentError::MissingDirectory { dir: "Metadata", .. })
        ));

        store.create("full").unwrap();
        assert!(store.open("full").is_ok());
    }

    #[test]
    fn test_resume_continues_after_last_entry() {
        let (_dir, store) = store();
        let experiment = store.create("field7").unwrap();

        let mut metadata = experiment.open_metadata().unwrap();
        assert_eq!(next_plot_number(&metadata), FIRST_PLOT_NUMBER);

        let now = chrono::Local::now();
        metadata.append(MetadataRecord::new(41, 3, now, (0.0, 0.0), "field7"));
        metadata.flush().unwrap();

        let reopened = store.open("field7").unwrap().open_metadata().unwrap();
        assert_eq!(next_plot_number(&reopened), 42);
    }

    #[test]
    fn test_list_reports_validity_and_captures() {
        let (_dir, store) = store();
        let good = store.create("b-good").unwrap();
        std::fs::write(good.path().join(RGB_DIR).join("b-good_001.bmp"), b"x").unwrap();
        std::fs::create_dir(store.path_of("a-broken")).unwrap();
        std::fs::create_dir(store.root().join(".staging")).unwrap();

        let listed = store.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a-broken", "b-good"]);
        assert!(!listed[0].valid);
        assert!(listed[1].valid);
        assert_eq!(listed[1].captures, 1);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(&dir.path().join("nope")).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
