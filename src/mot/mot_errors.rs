use crate::utils::Resolution;

/// Reasons a configured boundary cannot be used for side classification
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundaryError {
    #[error("calibration resolution {0} has a zero dimension")]
    InvalidResolution(Resolution),
    #[error("boundary endpoints coincide at ({x}, {y})")]
    Degenerate { x: f32, y: f32 },
    #[error("boundary coordinate is not finite")]
    NotFinite,
}
