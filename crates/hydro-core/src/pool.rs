//! Particle spawning from incremental runoff and the co-location merge
//! heuristic. Spawn order is cell-major over the slab, so a fixed rank
//! count reproduces bit-identical particle streams.

use hydro_types::constants::MM_PER_M;
use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::{MassLedger, ParticleBuffer, CLASS_CHANNEL, CLASS_HILLSLOPE};
use ndarray::{Array2, ArrayView2};
use std::collections::HashMap;

use crate::terrain::Terrain;

/// Spawn tuning: nominal particle volume, minimum spawnable volume and
/// the per-cell per-step particle cap.
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams {
    pub target_volume_m3: f64,
    pub min_volume_m3: f64,
    pub max_per_cell: usize,
}

impl SpawnParams {
    pub fn validate(&self) -> HydroResult<()> {
        if !self.target_volume_m3.is_finite() || self.target_volume_m3 <= 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "target_volume_m3 must be finite and > 0, got {}",
                self.target_volume_m3
            )));
        }
        if !self.min_volume_m3.is_finite() || self.min_volume_m3 < 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "min_volume_m3 must be finite and >= 0, got {}",
                self.min_volume_m3
            )));
        }
        if self.max_per_cell == 0 {
            return Err(HydroError::ConfigurationInvalid(
                "max_per_cell must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpawnStats {
    pub particles: usize,
    pub volume_m3: f64,
}

/// Convert incremental runoff depth (mm) on a slab into particles.
///
/// Per cell: ΔV = ΔQ · area / 1000 plus whatever residual the cell has
/// accrued. Below `min_volume_m3` the total stays in the residual;
/// otherwise N = ceil(ΔV / target), capped at `max_per_cell`, each
/// particle carrying ΔV/N with τ = 0 and the class of the cell.
pub fn spawn_from_runoff(
    pool: &mut ParticleBuffer,
    dq_mm: ArrayView2<f64>,
    row0: usize,
    terrain: &Terrain,
    residual_m3: &mut Array2<f64>,
    params: &SpawnParams,
    ledger: &mut MassLedger,
) -> HydroResult<SpawnStats> {
    params.validate()?;
    if dq_mm.dim() != residual_m3.dim() {
        return Err(HydroError::DomainInvalid(format!(
            "spawn input shape {:?} does not match residual field {:?}",
            dq_mm.dim(),
            residual_m3.dim()
        )));
    }
    let (rows, ncols) = dq_mm.dim();
    let mut stats = SpawnStats::default();
    for iy_local in 0..rows {
        let iy = row0 + iy_local;
        for ix in 0..ncols {
            let dq = dq_mm[[iy_local, ix]];
            if !dq.is_finite() || dq < 0.0 {
                return Err(HydroError::DomainInvalid(format!(
                    "incremental runoff at ({iy}, {ix}) must be finite and >= 0, got {dq}"
                )));
            }
            if !terrain.is_active(iy, ix) {
                continue;
            }
            let dv = dq * terrain.cell_area_m2(iy, ix)? / MM_PER_M;
            let total = residual_m3[[iy_local, ix]] + dv;
            if total <= 0.0 {
                continue;
            }
            if total < params.min_volume_m3 {
                residual_m3[[iy_local, ix]] = total;
                continue;
            }
            residual_m3[[iy_local, ix]] = 0.0;
            let n = ((total / params.target_volume_m3).ceil() as usize)
                .max(1)
                .min(params.max_per_cell);
            let volume = total / n as f64;
            let class = if terrain.is_channel(iy, ix) {
                CLASS_CHANNEL
            } else {
                CLASS_HILLSLOPE
            };
            for _ in 0..n {
                pool.push(iy as i32, ix as i32, volume, 0.0, class);
            }
            ledger.spawned_m3 += total;
            stats.particles += n;
            stats.volume_m3 += total;
        }
    }
    Ok(stats)
}

/// Merge co-located idle particles: particles sharing (iy, ix) with
/// τ = 0 collapse onto the first-inserted one with summed volume.
/// Insertion-order stable, hence deterministic.
pub fn merge_colocated(pool: &mut ParticleBuffer) -> usize {
    let n = pool.len();
    if n < 2 {
        return 0;
    }
    let mut first_at: HashMap<(i32, i32), usize> = HashMap::new();
    let mut keep = vec![true; n];
    let mut merged = 0usize;
    for i in 0..n {
        if pool.timer_s[i] > 0.0 {
            continue;
        }
        let key = (pool.iy[i], pool.ix[i]);
        match first_at.get(&key) {
            Some(&target) => {
                pool.volume_m3[target] += pool.volume_m3[i];
                keep[i] = false;
                merged += 1;
            }
            None => {
                first_at.insert(key, i);
            }
        }
    }
    if merged > 0 {
        pool.retain_mask(&keep);
    }
    merged
}
