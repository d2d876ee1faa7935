//! Input validation for control-channel and configuration parameters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Capture base name: letters, digits, dot, dash, underscore, 1-128 chars.
/// Examples: "P001", "plot_12.left"
static BASE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,128}$").unwrap());

/// Experiment directory name. Must not start with a dot so experiments never
/// collide with hidden or in-progress directories.
static EXPERIMENT_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9_.\-]{0,63}$").unwrap());

/// Maximum dimension value (must be positive)
pub const MAX_DIMENSION: u32 = 16384;

/// Maximum frame rate accepted for the camera or the display loop
pub const MAX_FPS: u32 = 240;

/// Validation error types.
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Base name contains invalid characters, is a dot name, or is too long
    InvalidBaseName(String),
    /// Experiment name contains invalid characters or is too long
    InvalidExperimentName(String),
    /// Dimension (width/height) is out of valid range
    DimensionOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    /// Frame rate is zero or above [`MAX_FPS`]
    FpsOutOfRange { field: &'static str, value: u32 },
    /// Experiment path failed path checks
    InvalidPath(super::path_validation::PathError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBaseName(name) => write!(f, "Invalid base name: {:?}", name),
            ValidationError::InvalidExperimentName(name) => {
                write!(f, "Invalid experiment name: {:?}", name)
            }
            ValidationError::DimensionOutOfRange { field, value, max } => {
                write!(f, "{} out of range: {} (max {})", field, value, max)
            }
            ValidationError::FpsOutOfRange { field, value } => {
                write!(f, "{} out of range: {} (must be 1..={})", field, value, MAX_FPS)
            }
            ValidationError::InvalidPath(e) => write!(f, "Invalid experiment path: {}", e),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<super::path_validation::PathError> for ValidationError {
    fn from(e: super::path_validation::PathError) -> Self {
        ValidationError::InvalidPath(e)
    }
}

/// Validate the base name a capture is saved under.
///
/// The name becomes a file stem inside `RGB/` and `Depth/`, so path
/// separators and the `.`/`..` names are rejected.
pub fn validate_base_name(name: &str) -> Result<(), ValidationError> {
    if name == "." || name == ".." || !BASE_NAME_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidBaseName(name.to_string()));
    }
    Ok(())
}

/// Validate an experiment directory name.
pub fn validate_experiment_name(name: &str) -> Result<(), ValidationError> {
    if !EXPERIMENT_NAME_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidExperimentName(name.to_string()));
    }
    Ok(())
}

/// Validate dimension values (width, height).
///
/// Dimensions must be positive and not exceed MAX_DIMENSION (16384).
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    if width == 0 || width > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "width",
            value: width,
            max: MAX_DIMENSION,
        });
    }
    if height == 0 || height > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "height",
            value: height,
            max: MAX_DIMENSION,
        });
    }
    Ok(())
}

/// Validate a frame rate.
pub fn validate_fps(field: &'static str, fps: u32) -> Result<(), ValidationError> {
    if fps == 0 || fps > MAX_FPS {
        return Err(ValidationError::FpsOutOfRange { field, value: fps });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_base_names() {
        assert!(validate_base_name("001").is_ok());
        assert!(validate_base_name("P001").is_ok());
        assert!(validate_base_name("plot_12.left").is_ok());
        assert!(validate_base_name("a-b").is_ok());
        assert!(validate_base_name(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_invalid_base_names() {
        assert!(validate_base_name("").is_err());
        assert!(validate_base_name(".").is_err());
        assert!(validate_base_name("..").is_err());
        assert!(validate_base_name("a/b").is_err());
        assert!(validate_base_name("plot 1").is_err());
        assert!(validate_base_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_experiment_names() {
        assert!(validate_experiment_name("field-7_2026").is_ok());
        assert!(validate_experiment_name("trial.v2").is_ok());

        assert!(validate_experiment_name("").is_err());
        assert!(validate_experiment_name(".hidden").is_err());
        assert!(validate_experiment_name("a/b").is_err());
        assert!(validate_experiment_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_dimensions() {
        assert!(validate_dimensions(640, 480).is_ok());
        assert!(validate_dimensions(1, 1).is_ok());
        assert!(validate_dimensions(MAX_DIMENSION, MAX_DIMENSION).is_ok());

        assert!(validate_dimensions(0, 480).is_err());
        assert!(validate_dimensions(640, 0).is_err());
        assert!(validate_dimensions(MAX_DIMENSION + 1, 480).is_err());
    }

    #[test]
    fn test_fps() {
        assert!(validate_fps("fps", 30).is_ok());
        assert!(validate_fps("fps", MAX_FPS).is_ok());
        assert!(validate_fps("fps", 0).is_err());
        assert!(validate_fps("fps", MAX_FPS + 1).is_err());
    }
}
