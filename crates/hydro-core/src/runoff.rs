// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — SCS-CN Runoff
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Cumulative SCS Curve Number runoff:
//!   S  = 25400/CN - 254  [mm]
//!   Ia = alpha * S       [mm]
//!   Q  = (P - Ia)^2 / (P - Ia + S)   for P > Ia, else 0
//!
//! CN = 100 gives S = 0: an impervious cell where all precipitation
//! runs off. CN outside (0, 100] retains everything.

use hydro_types::constants::{CN_RETENTION_NUMERATOR_MM, CN_RETENTION_OFFSET_MM};
use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::SlabFields;
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

/// Cumulative runoff Q (mm) for one cell from cumulative P (mm).
pub fn scs_cn_cumulative_runoff_mm(p_cum_mm: f64, cn: f64, ia_ratio: f64) -> f64 {
    if !cn.is_finite() || cn <= 0.0 || cn > 100.0 || !p_cum_mm.is_finite() {
        return 0.0;
    }
    let s = CN_RETENTION_NUMERATOR_MM / cn - CN_RETENTION_OFFSET_MM;
    let ia = ia_ratio * s;
    if p_cum_mm <= ia {
        return 0.0;
    }
    let excess = p_cum_mm - ia;
    excess * excess / (excess + s)
}

/// Incremental-runoff generator over a field slab. Owns no state; the
/// cumulative fields live in `SlabFields` so checkpoints capture them.
#[derive(Debug, Clone, Copy)]
pub struct RunoffGenerator {
    ia_ratio: f64,
}

impl RunoffGenerator {
    pub fn new(ia_ratio: f64) -> HydroResult<Self> {
        if !ia_ratio.is_finite() || !(0.0..=1.0).contains(&ia_ratio) {
            return Err(HydroError::ConfigurationInvalid(format!(
                "ia_ratio must be finite and in [0, 1], got {ia_ratio}"
            )));
        }
        Ok(Self { ia_ratio })
    }

    pub fn ia_ratio(&self) -> f64 {
        self.ia_ratio
    }

    /// Advance the cumulative fields by one step of rain and return the
    /// incremental runoff depth ΔQ (mm) per cell. Rows are independent,
    /// so the sweep runs them in parallel with rayon; the commit is
    /// sequential and cell-deterministic.
    pub fn step(
        &self,
        fields: &mut SlabFields,
        cn: ArrayView2<f64>,
        active: ArrayView2<bool>,
        rain_step_mm: ArrayView2<f64>,
    ) -> HydroResult<Array2<f64>> {
        let shape = fields.p_cum_mm.dim();
        if cn.dim() != shape || active.dim() != shape || rain_step_mm.dim() != shape {
            return Err(HydroError::DomainInvalid(format!(
                "runoff input shapes {:?}/{:?}/{:?} do not match fields {:?}",
                cn.dim(),
                active.dim(),
                rain_step_mm.dim(),
                shape
            )));
        }
        if rain_step_mm.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(HydroError::DomainInvalid(
                "rain step field must be finite and >= 0".to_string(),
            ));
        }
        let (rows, ncols) = shape;
        let ia_ratio = self.ia_ratio;
        let p_cum = &fields.p_cum_mm;
        let q_cum = &fields.q_cum_mm;

        let row_updates: Vec<(Array1<f64>, Array1<f64>, Array1<f64>)> = (0..rows)
            .into_par_iter()
            .map(|iy| {
                let mut p_new = Array1::zeros(ncols);
                let mut q_new = Array1::zeros(ncols);
                let mut dq = Array1::zeros(ncols);
                for ix in 0..ncols {
                    let p_old = p_cum[[iy, ix]];
                    let q_old = q_cum[[iy, ix]];
                    if !active[[iy, ix]] {
                        p_new[ix] = p_old;
                        q_new[ix] = q_old;
                        continue;
                    }
                    let p = p_old + rain_step_mm[[iy, ix]];
                    let q = scs_cn_cumulative_runoff_mm(p, cn[[iy, ix]], ia_ratio);
                    // Cumulative Q never decreases.
                    let q = q.max(q_old);
                    p_new[ix] = p;
                    q_new[ix] = q;
                    dq[ix] = q - q_old;
                }
                (p_new, q_new, dq)
            })
            .collect();

        let mut dq_mm = Array2::zeros(shape);
        for (iy, (p_new, q_new, dq)) in row_updates.into_iter().enumerate() {
            fields.p_cum_mm.row_mut(iy).assign(&p_new);
            fields.q_cum_mm.row_mut(iy).assign(&q_new);
            dq_mm.row_mut(iy).assign(&dq);
        }
        if fields.q_cum_mm.iter().any(|v| !v.is_finite()) {
            return Err(HydroError::DomainInvalid(
                "runoff update produced non-finite cumulative values".to_string(),
            ));
        }
        Ok(dq_mm)
    }
}
