//! Checks on the experiment directory named in a save request.
//!
//! The worker writes below this directory, so it has to be an absolute path
//! that cannot climb out of where the console put it.

use std::path::{Component, Path};

/// Longest experiment path accepted, in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    NotAbsolute,
    /// A `..` component
    ContainsTraversal,
    ContainsNullByte,
    TooLong(usize),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::NotAbsolute => write!(f, "experiment path is relative"),
            PathError::ContainsTraversal => write!(f, "experiment path contains '..'"),
            PathError::ContainsNullByte => write!(f, "experiment path contains a NUL byte"),
            PathError::TooLong(len) => {
                write!(f, "experiment path is {} bytes (max {})", len, MAX_PATH_LENGTH)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Accept `path` as a save target.
///
/// The directory does not need to exist yet; a missing `RGB/` or `Depth/`
/// is reported by the save itself.
pub fn validate_experiment_path(path: &Path) -> Result<(), PathError> {
    let raw = path.as_os_str().as_encoded_bytes();
    if raw.contains(&0) {
        return Err(PathError::ContainsNullByte);
    }
    if raw.len() > MAX_PATH_LENGTH {
        return Err(PathError::TooLong(raw.len()));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(PathError::ContainsTraversal);
    }
    if !path.is_absolute() {
        return Err(PathError::NotAbsolute);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn check(path: &str) -> Result<(), PathError> {
        validate_experiment_path(&PathBuf::from(path))
    }

    #[test]
    fn absolute_experiment_dir_is_accepted() {
        assert_eq!(check("/srv/plotcam/experiments/field-7"), Ok(()));
        assert_eq!(check("/srv/plotcam/./field-7"), Ok(()));
    }

    #[test]
    fn parent_components_are_rejected() {
        assert_eq!(check("/srv/plotcam/../etc"), Err(PathError::ContainsTraversal));
        assert_eq!(check("../field-7"), Err(PathError::ContainsTraversal));
    }

    #[test]
    fn relative_dir_is_rejected() {
        assert_eq!(check("experiments/field-7"), Err(PathError::NotAbsolute));
    }

    #[test]
    fn nul_and_length_are_rejected() {
        assert_eq!(check("/srv/plot\0cam"), Err(PathError::ContainsNullByte));
        let long = format!("/{}", "a".repeat(MAX_PATH_LENGTH));
        assert_eq!(check(&long), Err(PathError::TooLong(MAX_PATH_LENGTH + 1)));
    }
}
