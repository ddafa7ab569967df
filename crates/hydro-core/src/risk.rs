// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Risk Reducer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Hydrogeological risk index: R = beta * Q_norm + (1 - beta) * A_norm,
//! where both maps are robust-percentile-normalized to [0, 1] over the
//! active domain. Inactive cells carry NaN.

use hydro_types::error::{HydroError, HydroResult};
use ndarray::Array2;

/// Linear-interpolated percentile of an ascending-sorted slice.
fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi.min(sorted.len() - 1)] - sorted[lo]) * frac
}

/// Rescale a field to [0, 1] using low/high percentiles of its active
/// cells; clipping makes the scaling robust to outliers. A degenerate
/// spread (hi <= lo, e.g. a constant field) maps active cells to the
/// midpoint 0.5. Inactive cells are NaN.
pub fn robust_normalize(
    field: &Array2<f64>,
    active: &Array2<bool>,
    pct_low: f64,
    pct_high: f64,
) -> HydroResult<Array2<f64>> {
    if field.dim() != active.dim() {
        return Err(HydroError::DomainInvalid(format!(
            "field shape {:?} does not match mask shape {:?}",
            field.dim(),
            active.dim()
        )));
    }
    if !pct_low.is_finite()
        || !pct_high.is_finite()
        || pct_low < 0.0
        || pct_high > 100.0
        || pct_low >= pct_high
    {
        return Err(HydroError::ConfigurationInvalid(format!(
            "percentiles must satisfy 0 <= low < high <= 100, got {pct_low} and {pct_high}"
        )));
    }
    let mut values: Vec<f64> = field
        .iter()
        .zip(active.iter())
        .filter(|(v, a)| **a && v.is_finite())
        .map(|(v, _)| *v)
        .collect();
    let mut out = Array2::from_elem(field.dim(), f64::NAN);
    if values.is_empty() {
        return Ok(out);
    }
    values.sort_by(f64::total_cmp);
    let lo = percentile_sorted(&values, pct_low);
    let hi = percentile_sorted(&values, pct_high);
    for (o, (v, a)) in out.iter_mut().zip(field.iter().zip(active.iter())) {
        if !*a {
            continue;
        }
        *o = if hi <= lo {
            0.5
        } else {
            ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
        };
    }
    Ok(out)
}

/// Combine normalized cumulative runoff and flow accumulation.
/// Deterministic for fixed inputs; values lie in [0, 1] on active
/// cells, NaN elsewhere.
pub fn risk_index(
    runoff_cum_mm: &Array2<f64>,
    flow_accum_m2: &Array2<f64>,
    active: &Array2<bool>,
    balance: f64,
    pct_low: f64,
    pct_high: f64,
) -> HydroResult<Array2<f64>> {
    if !balance.is_finite() || !(0.0..=1.0).contains(&balance) {
        return Err(HydroError::ConfigurationInvalid(format!(
            "risk balance must be in [0, 1], got {balance}"
        )));
    }
    if runoff_cum_mm.dim() != flow_accum_m2.dim() {
        return Err(HydroError::DomainInvalid(format!(
            "runoff shape {:?} does not match accumulation shape {:?}",
            runoff_cum_mm.dim(),
            flow_accum_m2.dim()
        )));
    }
    let q_norm = robust_normalize(runoff_cum_mm, active, pct_low, pct_high)?;
    let a_norm = robust_normalize(flow_accum_m2, active, pct_low, pct_high)?;
    let mut out = Array2::from_elem(runoff_cum_mm.dim(), f64::NAN);
    for ((o, (q, a)), is_active) in out
        .iter_mut()
        .zip(q_norm.iter().zip(a_norm.iter()))
        .zip(active.iter())
    {
        if *is_active {
            *o = balance * q + (1.0 - balance) * a;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_spans_unit_interval() {
        let field = Array2::from_shape_fn((1, 101), |(_, ix)| ix as f64);
        let active = Array2::from_elem((1, 101), true);
        let norm = robust_normalize(&field, &active, 5.0, 95.0).unwrap();
        assert_eq!(norm[[0, 0]], 0.0, "below p5 clips to 0");
        assert_eq!(norm[[0, 100]], 1.0, "above p95 clips to 1");
        let mid = norm[[0, 50]];
        assert!((mid - 0.5).abs() < 1e-12, "median maps to 0.5, got {mid}");
    }

    #[test]
    fn test_constant_fields_give_midpoint_risk() {
        let q = Array2::from_elem((3, 3), 7.0);
        let a = Array2::from_elem((3, 3), 1.0e6);
        let active = Array2::from_elem((3, 3), true);
        let risk = risk_index(&q, &a, &active, 0.5, 5.0, 95.0).unwrap();
        assert!(risk.iter().all(|r| (*r - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_inactive_cells_are_nan() {
        let field = Array2::from_shape_fn((1, 4), |(_, ix)| ix as f64);
        let mut active = Array2::from_elem((1, 4), true);
        active[[0, 2]] = false;
        let norm = robust_normalize(&field, &active, 5.0, 95.0).unwrap();
        assert!(norm[[0, 2]].is_nan());
        assert!(norm[[0, 0]].is_finite());
    }

    #[test]
    fn test_outliers_do_not_stretch_the_scale() {
        let mut values = vec![1.0; 100];
        values[0] = 0.0;
        values[99] = 1.0e9; // single outlier
        let field = Array2::from_shape_vec((1, 100), values).unwrap();
        let active = Array2::from_elem((1, 100), true);
        let norm = robust_normalize(&field, &active, 5.0, 95.0).unwrap();
        // Percentile clip keeps the bulk of the field at the degenerate
        // midpoint instead of collapsing it near zero.
        assert!((norm[[0, 50]] - 0.5).abs() < 1e-12);
        assert!((norm[[0, 99]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_balance_weights_the_two_maps() {
        // Runoff rises east, accumulation rises west.
        let q = Array2::from_shape_fn((1, 11), |(_, ix)| ix as f64);
        let a = Array2::from_shape_fn((1, 11), |(_, ix)| 10.0 - ix as f64);
        let active = Array2::from_elem((1, 11), true);
        let pure_q = risk_index(&q, &a, &active, 1.0, 5.0, 95.0).unwrap();
        let pure_a = risk_index(&q, &a, &active, 0.0, 5.0, 95.0).unwrap();
        assert!(pure_q[[0, 10]] > pure_q[[0, 0]]);
        assert!(pure_a[[0, 0]] > pure_a[[0, 10]]);
    }

    #[test]
    fn test_invalid_balance_is_rejected() {
        let q = Array2::zeros((1, 1));
        let active = Array2::from_elem((1, 1), true);
        for bad in [f64::NAN, -0.5, 1.5] {
            let err = risk_index(&q, &q, &active, bad, 5.0, 95.0)
                .expect_err("invalid balance must fail");
            match err {
                HydroError::ConfigurationInvalid(msg) => assert!(msg.contains("balance")),
                other => panic!("Unexpected error: {other:?}"),
            }
        }
    }
}
