// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HydroError {
    #[error("Invalid domain: {0}")]
    DomainInvalid(String),

    #[error("Rainfall unavailable at t={time_s} s: {message}")]
    RainfallUnavailable { time_s: f64, message: String },

    #[error(
        "Mass conservation violated: relative error {relative_error:.3e} exceeds {tolerance:.3e}"
    )]
    MassConservationViolation {
        relative_error: f64,
        tolerance: f64,
    },

    #[error("Transport failure: {0}")]
    TransportError(String),

    #[error("Restart state incompatible: {0}")]
    StateIncompatible(String),

    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    #[error("Grid index out of bounds: row={row}, col={col}")]
    GridOutOfBounds { row: usize, col: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HydroResult<T> = Result<T, HydroError>;
