use thiserror::Error;

#[derive(Error, Debug)]
pub enum KratkyError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Empty abscissa bin sequence")]
    EmptyBins,

    #[error("Abscissa bin centers must be non-decreasing (violated at index {index})")]
    NonAscendingBins { index: usize },

    #[error("No valid pixels to derive an abscissa range from")]
    EmptyRange,

    #[error("Empty image sequence")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, KratkyError>;
