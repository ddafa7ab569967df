// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use ndarray::{Array1, Array2};

use crate::constants::{EARTH_RADIUS_M, PARTICLE_RECORD_WIDTH};
use crate::error::{HydroError, HydroResult};

/// Particle class bit: hillslope cell.
pub const CLASS_HILLSLOPE: u8 = 0;
/// Particle class bit: channel cell.
pub const CLASS_CHANNEL: u8 = 1;

/// Rectilinear grid geometry: 1-D coordinate center axes plus derived
/// per-cell areas. Immutable after construction.
#[derive(Debug, Clone)]
pub struct GridGeometry {
    pub ny: usize,
    pub nx: usize,
    pub latitude: Array1<f64>,
    pub longitude: Array1<f64>,
    pub cell_area: CellArea,
}

/// Cell area in m^2: constant for projected metre grids, per-row for
/// geographic degree grids (area varies with latitude only).
#[derive(Debug, Clone)]
pub enum CellArea {
    Uniform(f64),
    PerRow(Array1<f64>),
}

impl CellArea {
    pub fn at(&self, iy: usize) -> f64 {
        match self {
            CellArea::Uniform(a) => *a,
            CellArea::PerRow(rows) => rows[iy],
        }
    }
}

fn validate_axis(axis: &Array1<f64>, label: &str) -> HydroResult<()> {
    if axis.is_empty() {
        return Err(HydroError::DomainInvalid(format!(
            "{label} axis must be non-empty"
        )));
    }
    if axis.iter().any(|v| !v.is_finite()) {
        return Err(HydroError::DomainInvalid(format!(
            "{label} axis contains non-finite coordinates"
        )));
    }
    if axis.len() >= 2 {
        let ascending = axis[1] > axis[0];
        for i in 1..axis.len() {
            let step_ok = if ascending {
                axis[i] > axis[i - 1]
            } else {
                axis[i] < axis[i - 1]
            };
            if !step_ok {
                return Err(HydroError::DomainInvalid(format!(
                    "{label} axis is not strictly monotonic at index {i}"
                )));
            }
        }
    }
    Ok(())
}

fn median_abs_spacing(axis: &Array1<f64>) -> f64 {
    if axis.len() < 2 {
        return 1.0;
    }
    let mut steps: Vec<f64> = axis
        .iter()
        .zip(axis.iter().skip(1))
        .map(|(a, b)| (b - a).abs())
        .collect();
    steps.sort_by(f64::total_cmp);
    steps[steps.len() / 2]
}

impl GridGeometry {
    /// Geometry for a projected grid with metre axes: constant dx*dy area.
    pub fn from_metre_axes(latitude: Array1<f64>, longitude: Array1<f64>) -> HydroResult<Self> {
        validate_axis(&latitude, "latitude")?;
        validate_axis(&longitude, "longitude")?;
        let dy = median_abs_spacing(&latitude);
        let dx = median_abs_spacing(&longitude);
        Ok(Self {
            ny: latitude.len(),
            nx: longitude.len(),
            cell_area: CellArea::Uniform(dx * dy),
            latitude,
            longitude,
        })
    }

    /// Geometry for a geographic grid with degree axes: per-row spherical
    /// band areas, a = R^2 * dlon * |sin(lat_b) - sin(lat_t)|.
    pub fn from_degree_axes(latitude: Array1<f64>, longitude: Array1<f64>) -> HydroResult<Self> {
        validate_axis(&latitude, "latitude")?;
        validate_axis(&longitude, "longitude")?;
        let dy = median_abs_spacing(&latitude);
        let dx = median_abs_spacing(&longitude);
        let dlon = dx.to_radians();
        let areas = Array1::from_shape_fn(latitude.len(), |i| {
            let lat_top = latitude[i] + 0.5 * dy;
            let lat_bot = latitude[i] - 0.5 * dy;
            EARTH_RADIUS_M
                * EARTH_RADIUS_M
                * dlon
                * (lat_bot.to_radians().sin() - lat_top.to_radians().sin()).abs()
        });
        if areas.iter().any(|a| !a.is_finite() || *a <= 0.0) {
            return Err(HydroError::DomainInvalid(
                "derived geodetic cell areas must be finite and > 0".to_string(),
            ));
        }
        Ok(Self {
            ny: latitude.len(),
            nx: longitude.len(),
            cell_area: CellArea::PerRow(areas),
            latitude,
            longitude,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    pub fn contains(&self, iy: i64, ix: i64) -> bool {
        iy >= 0 && ix >= 0 && (iy as usize) < self.ny && (ix as usize) < self.nx
    }

    pub fn cell_area_m2(&self, iy: usize, ix: usize) -> HydroResult<f64> {
        if iy >= self.ny || ix >= self.nx {
            return Err(HydroError::GridOutOfBounds { row: iy, col: ix });
        }
        Ok(self.cell_area.at(iy))
    }
}

/// Structure-of-arrays particle container. The index of a particle in
/// the buffer is its rank-local debug identifier; indices are stable
/// within a step and not preserved across migration.
#[derive(Debug, Clone, Default)]
pub struct ParticleBuffer {
    pub iy: Vec<i32>,
    pub ix: Vec<i32>,
    pub volume_m3: Vec<f64>,
    pub timer_s: Vec<f64>,
    pub class: Vec<u8>,
}

impl ParticleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            iy: Vec::with_capacity(n),
            ix: Vec::with_capacity(n),
            volume_m3: Vec::with_capacity(n),
            timer_s: Vec::with_capacity(n),
            class: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.iy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iy.is_empty()
    }

    pub fn push(&mut self, iy: i32, ix: i32, volume_m3: f64, timer_s: f64, class: u8) {
        self.iy.push(iy);
        self.ix.push(ix);
        self.volume_m3.push(volume_m3);
        self.timer_s.push(timer_s);
        self.class.push(class);
    }

    /// Append all particles of `other`, preserving insertion order.
    pub fn append(&mut self, other: &mut ParticleBuffer) {
        self.iy.append(&mut other.iy);
        self.ix.append(&mut other.ix);
        self.volume_m3.append(&mut other.volume_m3);
        self.timer_s.append(&mut other.timer_s);
        self.class.append(&mut other.class);
    }

    /// Keep only particles where `keep[i]` is true, preserving order.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.len());
        let mut write = 0usize;
        for read in 0..self.len() {
            if keep[read] {
                if write != read {
                    self.iy[write] = self.iy[read];
                    self.ix[write] = self.ix[read];
                    self.volume_m3[write] = self.volume_m3[read];
                    self.timer_s[write] = self.timer_s[read];
                    self.class[write] = self.class[read];
                }
                write += 1;
            }
        }
        self.iy.truncate(write);
        self.ix.truncate(write);
        self.volume_m3.truncate(write);
        self.timer_s.truncate(write);
        self.class.truncate(write);
    }

    pub fn total_volume_m3(&self) -> f64 {
        self.volume_m3.iter().sum()
    }

    /// Pack particle `i` into five f64 wire lanes.
    pub fn pack_record(&self, i: usize, out: &mut Vec<f64>) {
        out.push(self.iy[i] as f64);
        out.push(self.ix[i] as f64);
        out.push(self.volume_m3[i]);
        out.push(self.timer_s[i]);
        out.push(self.class[i] as f64);
    }

    /// Unpack a flat wire buffer of five-lane records.
    pub fn from_records(records: &[f64]) -> HydroResult<Self> {
        if records.len() % PARTICLE_RECORD_WIDTH != 0 {
            return Err(HydroError::TransportError(format!(
                "particle payload length {} is not a multiple of {}",
                records.len(),
                PARTICLE_RECORD_WIDTH
            )));
        }
        let n = records.len() / PARTICLE_RECORD_WIDTH;
        let mut out = Self::with_capacity(n);
        for chunk in records.chunks_exact(PARTICLE_RECORD_WIDTH) {
            if chunk.iter().any(|v| !v.is_finite()) {
                return Err(HydroError::TransportError(
                    "received particle record contains non-finite values".to_string(),
                ));
            }
            out.push(
                chunk[0] as i32,
                chunk[1] as i32,
                chunk[2],
                chunk[3],
                chunk[4] as u8,
            );
        }
        Ok(out)
    }
}

/// Slab-local mutable fields: cumulative precipitation and runoff (mm)
/// plus the sub-threshold spawn residual (m^3).
#[derive(Debug, Clone)]
pub struct SlabFields {
    pub p_cum_mm: Array2<f64>,
    pub q_cum_mm: Array2<f64>,
    pub residual_m3: Array2<f64>,
}

impl SlabFields {
    pub fn zeros(rows: usize, ncols: usize) -> Self {
        Self {
            p_cum_mm: Array2::zeros((rows, ncols)),
            q_cum_mm: Array2::zeros((rows, ncols)),
            residual_m3: Array2::zeros((rows, ncols)),
        }
    }
}

/// Per-rank mass accounting used by the conservation diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MassLedger {
    /// Total volume handed to the particle pool since start [m^3].
    pub spawned_m3: f64,
    /// Volume retired through sink cells [m^3].
    pub outflow_m3: f64,
    /// Volume retired across the domain boundary [m^3].
    pub boundary_loss_m3: f64,
}

impl MassLedger {
    pub fn merge(&mut self, other: &MassLedger) {
        self.spawned_m3 += other.spawned_m3;
        self.outflow_m3 += other.outflow_m3;
        self.boundary_loss_m3 += other.boundary_loss_m3;
    }

    /// Relative closure error of stored + retired + residual volume
    /// against everything spawned (0 when nothing has spawned yet).
    pub fn relative_error(&self, stored_m3: f64, residual_m3: f64) -> f64 {
        if self.spawned_m3 + residual_m3 <= 0.0 {
            return 0.0;
        }
        let accounted = stored_m3 + self.outflow_m3 + self.boundary_loss_m3;
        (accounted - self.spawned_m3).abs() / (self.spawned_m3 + residual_m3)
    }
}
