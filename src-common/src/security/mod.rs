//! Validation of values that cross the process boundary or reach the filesystem.

pub mod path_validation;
pub mod validation;
