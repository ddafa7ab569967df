// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Results Output
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Results container: `flood_depth` (m) and `risk_index` (unitless)
//! over (time, latitude, longitude), with fill values on masked cells
//! and the configuration echoed for provenance.

use hydro_types::constants::CF_CONVENTIONS;
use hydro_types::error::{HydroError, HydroResult};
use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;

use crate::container::{apply_fill, read_metadata, write_metadata, FILL_VALUE};
use crate::domain::GridMappingMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMeta {
    pub conventions: String,
    pub title: String,
    pub source: String,
    pub flood_depth_units: String,
    pub risk_index_units: String,
    pub fill_value: f64,
    pub grid_mapping: Option<GridMappingMeta>,
    /// Full configuration document echoed for provenance.
    pub config_echo: Option<serde_json::Value>,
}

/// Write the results container on the root rank.
#[allow(clippy::too_many_arguments)]
pub fn write_results(
    path: &str,
    title: &str,
    latitude: &Array1<f64>,
    longitude: &Array1<f64>,
    elapsed_s: f64,
    flood_depth_m: &Array2<f64>,
    risk_index: &Array2<f64>,
    grid_mapping: Option<GridMappingMeta>,
    config_echo: Option<serde_json::Value>,
) -> HydroResult<()> {
    let shape = (latitude.len(), longitude.len());
    if flood_depth_m.dim() != shape || risk_index.dim() != shape {
        return Err(HydroError::DomainInvalid(format!(
            "result fields {:?}/{:?} do not match axes {:?}",
            flood_depth_m.dim(),
            risk_index.dim(),
            shape
        )));
    }
    let file = File::create(path)?;
    let mut writer = NpzWriter::new(file);
    let io_err = |e: ndarray_npy::WriteNpzError| {
        HydroError::Io(std::io::Error::other(format!(
            "failed to write results member: {e}"
        )))
    };
    writer.add_array("latitude", latitude).map_err(io_err)?;
    writer.add_array("longitude", longitude).map_err(io_err)?;
    writer
        .add_array("time", &Array1::from_vec(vec![elapsed_s]))
        .map_err(io_err)?;

    let mut depth_cube = Array3::zeros((1, shape.0, shape.1));
    depth_cube
        .index_axis_mut(Axis(0), 0)
        .assign(&apply_fill(flood_depth_m));
    let mut risk_cube = Array3::zeros((1, shape.0, shape.1));
    risk_cube
        .index_axis_mut(Axis(0), 0)
        .assign(&apply_fill(risk_index));
    writer.add_array("flood_depth", &depth_cube).map_err(io_err)?;
    writer.add_array("risk_index", &risk_cube).map_err(io_err)?;

    let meta = OutputMeta {
        conventions: CF_CONVENTIONS.to_string(),
        title: title.to_string(),
        source: format!("anulum-hydro-core {}", env!("CARGO_PKG_VERSION")),
        flood_depth_units: "m".to_string(),
        risk_index_units: "1".to_string(),
        fill_value: FILL_VALUE,
        grid_mapping,
        config_echo,
    };
    write_metadata(&mut writer, &meta)?;
    writer.finish().map_err(io_err)?;
    Ok(())
}

/// Read back a results container (first time slice).
pub fn read_results(path: &str) -> HydroResult<(OutputMeta, Array2<f64>, Array2<f64>)> {
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| HydroError::DomainInvalid(format!("failed to open results '{path}': {e}")))?;
    let meta: OutputMeta = read_metadata(&mut npz)?;
    let read_cube = |npz: &mut NpzReader<File>, key: &str| -> HydroResult<Array2<f64>> {
        let cube: Array3<f64> = npz
            .by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix3>(&format!("{key}.npy"))
            .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix3>(key))
            .map_err(|e| HydroError::DomainInvalid(format!("failed to read {key}: {e}")))?;
        if cube.dim().0 == 0 {
            return Err(HydroError::DomainInvalid(format!(
                "{key} cube has no time slices"
            )));
        }
        Ok(cube.index_axis(Axis(0), 0).to_owned())
    };
    let depth = read_cube(&mut npz, "flood_depth")?;
    let risk = read_cube(&mut npz, "risk_index")?;
    Ok((meta, depth, risk))
}
