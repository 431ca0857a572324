//! Custom error types for the application.
//!
//! This module defines the primary error type, `WizardError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle everything that can go wrong between session
//! setup and the final report.
//!
//! ## Error Hierarchy
//!
//! `WizardError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the configuration file.
//! - **`InvalidConfig`**: Semantic errors in the session plan that pass
//!   parsing but are logically incorrect (e.g. a hole count of zero).
//! - **`CoverageMismatch` / `IncompleteCoverage`**: The hole-to-image or
//!   hole-to-annotation mapping is incomplete. Recoverable; blocks the state
//!   machine from leaving setup and names the offending identifiers.
//! - **`UnknownHole` / `UnknownImage`**: Referential errors. These indicate a
//!   caller defect and are surfaced immediately.
//! - **`SessionLocked`**: A setup mutation was attempted after the first
//!   measurement was recorded. Recoverable by starting a new session.
//! - **`DuplicateKey`**: An attempt to record a second measurement for the
//!   same (sample, hole) pair. Fatal to the operation, not the process.
//! - **`ControllerDisconnected` / `CaptureAborted`**: The capture attempt did
//!   not produce a measurement; the same (sample, hole) is retried once
//!   connectivity is restored.
//! - **`EmptyDataset`**: No report can be generated from zero rows.
//!
//! By using `#[from]`, `WizardError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator.

use crate::session::{HoleId, SampleIndex};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, WizardError>;

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Per-image hole counts sum to {assigned}, expected {expected}")]
    CoverageMismatch { expected: usize, assigned: usize },

    #[error("Holes without an annotation: {}", format_hole_list(.0))]
    IncompleteCoverage(Vec<HoleId>),

    #[error("Unknown hole '{0}'")]
    UnknownHole(HoleId),

    #[error("Unknown image {0}")]
    UnknownImage(usize),

    #[error("Hole '{hole}' is not assigned to image {image}")]
    HoleNotOnImage { hole: HoleId, image: usize },

    #[error("Session is locked: measurements exist, setup can no longer change")]
    SessionLocked,

    #[error("Measurement for sample {sample}, hole '{hole}' already recorded")]
    DuplicateKey { sample: SampleIndex, hole: HoleId },

    #[error("Torque controller is not connected")]
    ControllerDisconnected,

    #[error("Capture aborted for sample {sample}, hole '{hole}'")]
    CaptureAborted { sample: SampleIndex, hole: HoleId },

    #[error("No measurements available, cannot generate a report")]
    EmptyDataset,

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Operator interaction failed: {0}")]
    Operator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Results file malformed: {0}")]
    ResultsParse(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

fn format_hole_list(holes: &[HoleId]) -> String {
    let ids: Vec<String> = holes.iter().map(|h| h.to_string()).collect();
    format!("[{}]", ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WizardError::UnknownHole(HoleId::from_ordinal(2));
        assert_eq!(err.to_string(), "Unknown hole 'C'");
    }

    #[test]
    fn test_incomplete_coverage_lists_holes() {
        let err =
            WizardError::IncompleteCoverage(vec![HoleId::from_ordinal(3), HoleId::from_ordinal(5)]);
        assert_eq!(err.to_string(), "Holes without an annotation: [D, F]");
    }

    #[test]
    fn test_duplicate_key_names_position() {
        let err = WizardError::DuplicateKey {
            sample: SampleIndex(2),
            hole: HoleId::from_ordinal(0),
        };
        assert!(err.to_string().contains("sample 2"));
        assert!(err.to_string().contains("'A'"));
    }
}
