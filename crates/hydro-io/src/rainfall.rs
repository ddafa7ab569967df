// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Rainfall Container
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Rainfall container: `time` axis plus a `precipitation` cube over
//! (time, latitude, longitude). Cells equal to the fill value are
//! missing; a frame that is entirely fill counts as a missing raster.

use hydro_core::rainfall::RainfallSource;
use hydro_types::config::{RainMode, RainSourceConfig, RainSourceKind};
use hydro_types::error::{HydroError, HydroResult};
use ndarray::{Array1, Array3, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;

use crate::container::{read_metadata, write_metadata, FILL_VALUE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainMeta {
    pub conventions: String,
    /// Units of the `time` axis, e.g. "seconds since run start".
    pub time_units: String,
    /// Units of the precipitation values ("mm h-1" or "mm").
    pub rate_units: String,
    pub fill_value: f64,
}

/// Load one rainfall container as a frames source.
pub fn read_rainfall_frames(
    path: &str,
    name: &str,
    weight: f64,
    mode: RainMode,
    domain_shape: (usize, usize),
) -> HydroResult<RainfallSource> {
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file).map_err(|e| {
        HydroError::DomainInvalid(format!("failed to open rainfall '{path}': {e}"))
    })?;
    let meta: RainMeta = read_metadata(&mut npz)?;

    let times: Array1<f64> = npz
        .by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>("time.npy")
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>("time"))
        .map_err(|e| HydroError::DomainInvalid(format!("failed to read time axis: {e}")))?;
    let cube: Array3<f64> = npz
        .by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix3>("precipitation.npy")
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix3>("precipitation"))
        .map_err(|e| {
            HydroError::DomainInvalid(format!("failed to read precipitation cube: {e}"))
        })?;

    let (nt, ny, nx) = cube.dim();
    if nt != times.len() {
        return Err(HydroError::DomainInvalid(format!(
            "precipitation cube has {nt} frames but time axis has {}",
            times.len()
        )));
    }
    if (ny, nx) != domain_shape {
        return Err(HydroError::DomainInvalid(format!(
            "rainfall frames are ({ny}, {nx}) but the domain is {:?}",
            domain_shape
        )));
    }

    let fill = meta.fill_value;
    let mut fields = Vec::with_capacity(nt);
    for frame in cube.axis_iter(Axis(0)) {
        let all_missing = frame.iter().all(|v| !v.is_finite() || *v == fill);
        if all_missing {
            fields.push(None);
            continue;
        }
        fields.push(Some(frame.mapv(|v| if v == fill { f64::NAN } else { v })));
    }
    Ok(RainfallSource::Frames {
        name: name.to_string(),
        weight,
        mode,
        times_s: times.to_vec(),
        fields,
    })
}

/// Resolve every configured rain source against the domain shape.
pub fn build_rain_sources(
    sources: &[RainSourceConfig],
    domain_shape: (usize, usize),
) -> HydroResult<Vec<RainfallSource>> {
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        match source.kind {
            RainSourceKind::Constant => {
                let value = source.value.ok_or_else(|| {
                    HydroError::ConfigurationInvalid(format!(
                        "rain source '{}' of kind constant requires 'value'",
                        source.name
                    ))
                })?;
                out.push(RainfallSource::Constant {
                    name: source.name.clone(),
                    weight: source.weight,
                    mode: source.mode,
                    value,
                });
            }
            RainSourceKind::Container => {
                let path = source.path.as_deref().ok_or_else(|| {
                    HydroError::ConfigurationInvalid(format!(
                        "rain source '{}' of kind container requires 'path'",
                        source.name
                    ))
                })?;
                out.push(read_rainfall_frames(
                    path,
                    &source.name,
                    source.weight,
                    source.mode,
                    domain_shape,
                )?);
            }
        }
    }
    Ok(out)
}

/// Write a rainfall container (used by tests and domain preparation).
pub fn write_rainfall_frames(
    path: &str,
    times_s: &Array1<f64>,
    precipitation: &Array3<f64>,
    rate_units: &str,
) -> HydroResult<()> {
    let file = File::create(path)?;
    let mut writer = NpzWriter::new(file);
    let io_err = |e: ndarray_npy::WriteNpzError| {
        HydroError::Io(std::io::Error::other(format!(
            "failed to write rainfall member: {e}"
        )))
    };
    writer.add_array("time", times_s).map_err(io_err)?;
    writer
        .add_array("precipitation", precipitation)
        .map_err(io_err)?;
    let meta = RainMeta {
        conventions: hydro_types::constants::CF_CONVENTIONS.to_string(),
        time_units: "seconds since run start".to_string(),
        rate_units: rate_units.to_string(),
        fill_value: FILL_VALUE,
    };
    write_metadata(&mut writer, &meta)?;
    writer.finish().map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_core::rainfall::RainfallStack;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> String {
        let epoch_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!(
                "hydro_rain_{tag}_{}_{}.npz",
                std::process::id(),
                epoch_ns
            ))
            .to_string_lossy()
            .to_string()
    }

    #[test]
    fn test_frames_roundtrip_through_container() {
        let path = temp_path("roundtrip");
        let times = Array1::from_vec(vec![0.0, 600.0, 1200.0]);
        let mut cube = Array3::from_elem((3, 2, 2), 4.0);
        // Second frame entirely fill: a missing raster.
        cube.index_axis_mut(Axis(0), 1).fill(FILL_VALUE);
        write_rainfall_frames(&path, &times, &cube, "mm h-1").unwrap();

        let source =
            read_rainfall_frames(&path, "radar", 1.0, RainMode::IntensityMmPerHour, (2, 2))
                .unwrap();
        let RainfallSource::Frames { fields, times_s, .. } = &source else {
            panic!("expected frames source");
        };
        assert_eq!(times_s.len(), 3);
        assert!(fields[0].is_some());
        assert!(fields[1].is_none());
        assert!(fields[2].is_some());

        // The missing middle frame is fatal inside the window.
        let stack = RainfallStack::new(vec![source], (2, 2), (0.0, 1800.0)).unwrap();
        let err = stack
            .step_depth_mm(600.0, 600.0)
            .expect_err("missing frame inside window");
        assert!(matches!(err, HydroError::RainfallUnavailable { .. }));
        // 4 mm/h over 600 s = 2/3 mm on the first frame.
        let depth = stack.step_depth_mm(0.0, 600.0).unwrap();
        assert!((depth[[0, 0]] - 4.0 / 6.0).abs() < 1e-12);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let path = temp_path("shape");
        let times = Array1::from_vec(vec![0.0]);
        let cube = Array3::zeros((1, 3, 3));
        write_rainfall_frames(&path, &times, &cube, "mm").unwrap();
        let err = read_rainfall_frames(&path, "radar", 1.0, RainMode::DepthMmPerStep, (2, 2))
            .expect_err("frame shape mismatch");
        match err {
            HydroError::DomainInvalid(msg) => assert!(msg.contains("domain")),
            other => panic!("Unexpected error: {other:?}"),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_frame_count_mismatch_is_rejected() {
        let path = temp_path("count");
        let times = Array1::from_vec(vec![0.0, 600.0]);
        let cube = Array3::zeros((1, 2, 2));
        write_rainfall_frames(&path, &times, &cube, "mm").unwrap();
        let err = read_rainfall_frames(&path, "radar", 1.0, RainMode::DepthMmPerStep, (2, 2))
            .expect_err("time axis mismatch");
        match err {
            HydroError::DomainInvalid(msg) => assert!(msg.contains("time axis")),
            other => panic!("Unexpected error: {other:?}"),
        }
        std::fs::remove_file(&path).ok();
    }
}
