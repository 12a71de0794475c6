use thiserror::Error;

/// Errors reported at the configuration boundary.
///
/// Geometric degeneracies never surface here: sweeps fail open and keep moving.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CctError {
    #[error("invalid controller descriptor: {0}")]
    InvalidDescriptor(&'static str),

    #[error("invalid dimension `{name}`: {value} (must be positive and finite)")]
    InvalidDimension { name: &'static str, value: f32 },

    #[error("unknown controller handle")]
    UnknownController,

    #[error("unknown obstacle context handle")]
    UnknownObstacleContext,

    #[error("unknown obstacle handle")]
    UnknownObstacle,

    #[error("invalid triangle mesh: {0}")]
    InvalidMesh(String),
}

/// Reject non-positive or non-finite dimensions.
pub(crate) fn check_dimension(name: &'static str, value: f32) -> Result<f32, CctError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        log::warn!("rejected {name} = {value}");
        Err(CctError::InvalidDimension { name, value })
    }
}
