// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Millimetres per metre (depth/volume conversions).
pub const MM_PER_M: f64 = 1000.0;

/// Seconds per hour (rain intensity conversions).
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// SCS-CN potential-retention numerator (mm): S = 25400/CN - 254.
pub const CN_RETENTION_NUMERATOR_MM: f64 = 25400.0;

/// SCS-CN potential-retention offset (mm).
pub const CN_RETENTION_OFFSET_MM: f64 = 254.0;

/// Mean spherical Earth radius (m), used for geodetic cell areas.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default initial-abstraction ratio alpha.
pub const DEFAULT_IA_RATIO: f64 = 0.2;

/// Default runoff/accumulation balance beta of the risk index.
pub const DEFAULT_RISK_BALANCE: f64 = 0.5;

/// Default low percentile of the robust normalization.
pub const DEFAULT_PCT_LOW: f64 = 5.0;

/// Default high percentile of the robust normalization.
pub const DEFAULT_PCT_HIGH: f64 = 95.0;

/// Relative mass-balance drift that triggers a warning.
pub const MASS_TOLERANCE_REL: f64 = 1.0e-6;

/// Factor on the warning tolerance above which mass drift is fatal.
pub const MASS_FATAL_FACTOR: f64 = 1.0e3;

/// f64 lanes per particle wire record: iy, ix, volume, timer, class.
pub const PARTICLE_RECORD_WIDTH: usize = 5;

/// CF conventions string written to every output container.
pub const CF_CONVENTIONS: &str = "CF-1.10";
