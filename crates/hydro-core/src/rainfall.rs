// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Rainfall Source
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Time-aware rainfall lookup: a finite list of weighted sources the
//! engine pulls one step-depth field from per step. No callbacks.

use hydro_types::config::RainMode;
use hydro_types::constants::SECONDS_PER_HOUR;
use hydro_types::error::{HydroError, HydroResult};
use ndarray::Array2;
use tracing::warn;

/// One rainfall source aligned to the domain grid.
#[derive(Debug, Clone)]
pub enum RainfallSource {
    /// Spatially uniform rate or depth.
    Constant {
        name: String,
        weight: f64,
        mode: RainMode,
        value: f64,
    },
    /// Time-indexed raster frames, strictly increasing times. A `None`
    /// frame marks a raster that was listed but could not be provided;
    /// hitting it strictly inside the run window is an error.
    Frames {
        name: String,
        weight: f64,
        mode: RainMode,
        times_s: Vec<f64>,
        fields: Vec<Option<Array2<f64>>>,
    },
}

impl RainfallSource {
    fn name(&self) -> &str {
        match self {
            RainfallSource::Constant { name, .. } => name,
            RainfallSource::Frames { name, .. } => name,
        }
    }
}

/// The blended rainfall stack the engine pulls from.
#[derive(Debug, Clone)]
pub struct RainfallStack {
    sources: Vec<RainfallSource>,
    shape: (usize, usize),
    /// Configured run window [t0, t1) in seconds.
    window_s: (f64, f64),
}

/// Convert a raw field to depth per step (mm), sanitizing non-finite
/// and negative values to zero.
fn to_step_depth_mm(value: f64, mode: RainMode, dt_s: f64) -> f64 {
    let v = if value.is_finite() { value.max(0.0) } else { 0.0 };
    match mode {
        RainMode::IntensityMmPerHour => v * (dt_s / SECONDS_PER_HOUR),
        RainMode::DepthMmPerStep => v,
    }
}

impl RainfallStack {
    pub fn new(
        sources: Vec<RainfallSource>,
        shape: (usize, usize),
        window_s: (f64, f64),
    ) -> HydroResult<Self> {
        if !window_s.0.is_finite() || !window_s.1.is_finite() || window_s.1 < window_s.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "rain window must be finite with t1 >= t0, got {:?}",
                window_s
            )));
        }
        for source in &sources {
            match source {
                RainfallSource::Constant { name, weight, value, .. } => {
                    if !weight.is_finite() || *weight < 0.0 {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{name}' weight must be finite and >= 0"
                        )));
                    }
                    if !value.is_finite() || *value < 0.0 {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{name}' value must be finite and >= 0"
                        )));
                    }
                }
                RainfallSource::Frames {
                    name,
                    weight,
                    times_s,
                    fields,
                    ..
                } => {
                    if !weight.is_finite() || *weight < 0.0 {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{name}' weight must be finite and >= 0"
                        )));
                    }
                    if times_s.len() != fields.len() {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{name}' has {} times but {} fields",
                            times_s.len(),
                            fields.len()
                        )));
                    }
                    if times_s.windows(2).any(|w| w[1] <= w[0]) {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{name}' time axis must be strictly increasing"
                        )));
                    }
                    for (i, field) in fields.iter().enumerate() {
                        if let Some(f) = field {
                            if f.dim() != shape {
                                return Err(HydroError::DomainInvalid(format!(
                                    "rain source '{name}' frame {i} shape {:?} != domain {:?}",
                                    f.dim(),
                                    shape
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(Self {
            sources,
            shape,
            window_s,
        })
    }

    /// Zero-source stack (dry run).
    pub fn dry(shape: (usize, usize), window_s: (f64, f64)) -> HydroResult<Self> {
        Self::new(Vec::new(), shape, window_s)
    }

    /// Blended precipitation depth per step (mm) at simulation time
    /// `time_s`. Times outside a source's coverage contribute a zero
    /// field; a listed-but-missing frame strictly inside the run window
    /// raises `RainfallUnavailable`.
    pub fn step_depth_mm(&self, time_s: f64, dt_s: f64) -> HydroResult<Array2<f64>> {
        if !time_s.is_finite() || !dt_s.is_finite() || dt_s <= 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "rain lookup requires finite time and dt > 0, got t={time_s}, dt={dt_s}"
            )));
        }
        let mut total = Array2::zeros(self.shape);
        for source in &self.sources {
            match source {
                RainfallSource::Constant {
                    weight,
                    mode,
                    value,
                    ..
                } => {
                    let depth = *weight * to_step_depth_mm(*value, *mode, dt_s);
                    total += depth;
                }
                RainfallSource::Frames {
                    weight,
                    mode,
                    times_s,
                    fields,
                    ..
                } => {
                    if *weight == 0.0 || times_s.is_empty() {
                        continue;
                    }
                    if time_s < times_s[0] || time_s > *times_s.last().unwrap_or(&f64::MIN) {
                        warn!(
                            source = source.name(),
                            time_s, "rain lookup outside frame coverage, using zero field"
                        );
                        continue;
                    }
                    let idx = nearest_index(times_s, time_s);
                    match &fields[idx] {
                        Some(field) => {
                            for (acc, raw) in total.iter_mut().zip(field.iter()) {
                                *acc += *weight * to_step_depth_mm(*raw, *mode, dt_s);
                            }
                        }
                        None => {
                            let strictly_inside =
                                time_s > self.window_s.0 && time_s < self.window_s.1;
                            if strictly_inside {
                                return Err(HydroError::RainfallUnavailable {
                                    time_s,
                                    message: format!(
                                        "source '{}' frame {} at t={} s is missing",
                                        source.name(),
                                        idx,
                                        times_s[idx]
                                    ),
                                });
                            }
                            warn!(
                                source = source.name(),
                                time_s,
                                "missing rain frame outside run window, using zero field"
                            );
                        }
                    }
                }
            }
        }
        Ok(total)
    }
}

/// Index of the frame time nearest to `t` (first wins on exact ties).
fn nearest_index(times_s: &[f64], t: f64) -> usize {
    let mut best = 0usize;
    let mut best_dist = f64::INFINITY;
    for (i, ts) in times_s.iter().enumerate() {
        let d = (ts - t).abs();
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_source(fields: Vec<Option<Array2<f64>>>) -> RainfallSource {
        let times_s = (0..fields.len()).map(|i| i as f64 * 600.0).collect();
        RainfallSource::Frames {
            name: "radar".to_string(),
            weight: 1.0,
            mode: RainMode::IntensityMmPerHour,
            times_s,
            fields,
        }
    }

    #[test]
    fn test_constant_source_intensity_scaling() {
        let stack = RainfallStack::new(
            vec![RainfallSource::Constant {
                name: "uniform".to_string(),
                weight: 1.0,
                mode: RainMode::IntensityMmPerHour,
                value: 6.0,
            }],
            (2, 2),
            (0.0, 3600.0),
        )
        .unwrap();
        // 6 mm/h over a 600 s step = 1 mm.
        let field = stack.step_depth_mm(0.0, 600.0).unwrap();
        assert!(field.iter().all(|v| (*v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_nearest_frame_is_selected() {
        let f0 = Array2::from_elem((1, 1), 10.0);
        let f1 = Array2::from_elem((1, 1), 20.0);
        let stack = RainfallStack::new(
            vec![RainfallSource::Frames {
                name: "radar".to_string(),
                weight: 1.0,
                mode: RainMode::DepthMmPerStep,
                times_s: vec![0.0, 600.0],
                fields: vec![Some(f0), Some(f1)],
            }],
            (1, 1),
            (0.0, 1200.0),
        )
        .unwrap();
        let near_first = stack.step_depth_mm(200.0, 60.0).unwrap();
        assert!((near_first[[0, 0]] - 10.0).abs() < 1e-12);
        let near_second = stack.step_depth_mm(500.0, 60.0).unwrap();
        assert!((near_second[[0, 0]] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_coverage_yields_zero_field() {
        let stack = RainfallStack::new(
            vec![frames_source(vec![Some(Array2::from_elem((1, 1), 5.0))])],
            (1, 1),
            (0.0, 7200.0),
        )
        .unwrap();
        let field = stack.step_depth_mm(3600.0, 60.0).unwrap();
        assert_eq!(field[[0, 0]], 0.0);
    }

    #[test]
    fn test_missing_frame_inside_window_is_fatal() {
        let stack = RainfallStack::new(
            vec![frames_source(vec![
                Some(Array2::zeros((1, 1))),
                None,
                Some(Array2::zeros((1, 1))),
            ])],
            (1, 1),
            (0.0, 7200.0),
        )
        .unwrap();
        let err = stack
            .step_depth_mm(600.0, 60.0)
            .expect_err("missing frame inside window must fail");
        match err {
            HydroError::RainfallUnavailable { time_s, message } => {
                assert!((time_s - 600.0).abs() < 1e-12);
                assert!(message.contains("missing"));
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_frame_outside_window_is_zero() {
        // Window ends at 300 s; the missing frame at 600 s is outside.
        let stack = RainfallStack::new(
            vec![frames_source(vec![Some(Array2::zeros((1, 1))), None])],
            (1, 1),
            (0.0, 300.0),
        )
        .unwrap();
        let field = stack.step_depth_mm(600.0, 60.0).unwrap();
        assert_eq!(field[[0, 0]], 0.0);
    }

    #[test]
    fn test_negative_and_non_finite_values_are_sanitized() {
        let raw = Array2::from_shape_vec((1, 3), vec![-4.0, f64::NAN, 12.0]).unwrap();
        let stack = RainfallStack::new(
            vec![RainfallSource::Frames {
                name: "noisy".to_string(),
                weight: 1.0,
                mode: RainMode::DepthMmPerStep,
                times_s: vec![0.0],
                fields: vec![Some(raw)],
            }],
            (1, 3),
            (0.0, 600.0),
        )
        .unwrap();
        let field = stack.step_depth_mm(0.0, 60.0).unwrap();
        assert_eq!(field[[0, 0]], 0.0);
        assert_eq!(field[[0, 1]], 0.0);
        assert!((field[[0, 2]] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_monotonic_time_axis_is_rejected() {
        let err = RainfallStack::new(
            vec![RainfallSource::Frames {
                name: "bad".to_string(),
                weight: 1.0,
                mode: RainMode::DepthMmPerStep,
                times_s: vec![600.0, 0.0],
                fields: vec![None, None],
            }],
            (1, 1),
            (0.0, 600.0),
        )
        .expect_err("decreasing times must fail");
        match err {
            HydroError::ConfigurationInvalid(msg) => assert!(msg.contains("strictly increasing")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }
}
