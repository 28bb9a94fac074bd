use thiserror::Error;

/// Unrecoverable initial-condition problems, reported before any
/// integration work starts.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot integrate an empty particle set")]
    EmptyCluster,

    #[error("particle {id}: non-finite {quantity}")]
    NonFinite { id: usize, quantity: &'static str },

    #[error("particle {id}: negative mass {mass}")]
    NegativeMass { id: usize, mass: f64 },

    #[error("softening squared must be finite and non-negative, got {value}")]
    InvalidSoftening { value: f64 },
}
