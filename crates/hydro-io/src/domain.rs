// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Domain Container
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Domain container: coordinate axes, `dem`, `d8`, `cn`, optional
//! `channel_mask`, plus the CRS descriptor and D8 encoding tag in the
//! metadata document.

use hydro_core::d8::D8Encoding;
use hydro_core::terrain::Terrain;
use hydro_types::constants::CF_CONVENTIONS;
use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::GridGeometry;
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;

use crate::container::{read_metadata, write_metadata};

/// CF grid-mapping description carried through to outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMappingMeta {
    pub grid_mapping_name: String,
    pub epsg_code: u32,
    pub semi_major_axis: f64,
    pub inverse_flattening: f64,
}

impl Default for GridMappingMeta {
    fn default() -> Self {
        // WGS84 geographic.
        Self {
            grid_mapping_name: "latitude_longitude".to_string(),
            epsg_code: 4326,
            semi_major_axis: 6_378_137.0,
            inverse_flattening: 298.257_223_563,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMeta {
    pub conventions: String,
    /// "degrees" or "metres"; selects the cell-area derivation.
    pub axis_units: String,
    pub d8_encoding: String,
    pub grid_mapping: Option<GridMappingMeta>,
}

fn read_axis(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array1<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(key))
        .map_err(|e| HydroError::DomainInvalid(format!("failed to read {key}: {e}")))
}

fn read_field_f64(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array2<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(key))
        .map_err(|e| HydroError::DomainInvalid(format!("failed to read {key}: {e}")))
}

fn read_field_i32(npz: &mut NpzReader<File>, key: &str) -> Option<Array2<i32>> {
    npz.by_name::<ndarray::OwnedRepr<i32>, ndarray::Ix2>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<i32>, ndarray::Ix2>(key))
        .ok()
}

/// Load the domain container into an immutable [`Terrain`].
pub fn read_domain(path: &str) -> HydroResult<Terrain> {
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| HydroError::DomainInvalid(format!("failed to open domain '{path}': {e}")))?;
    let meta: DomainMeta = read_metadata(&mut npz)?;
    let encoding = D8Encoding::from_tag(&meta.d8_encoding)?;

    let latitude = read_axis(&mut npz, "latitude")?;
    let longitude = read_axis(&mut npz, "longitude")?;
    let geometry = match meta.axis_units.as_str() {
        "degrees" => GridGeometry::from_degree_axes(latitude, longitude)?,
        "metres" | "meters" | "m" => GridGeometry::from_metre_axes(latitude, longitude)?,
        other => {
            return Err(HydroError::DomainInvalid(format!(
                "unsupported axis_units '{other}'; use 'degrees' or 'metres'"
            )))
        }
    };

    let dem = read_field_f64(&mut npz, "dem")?;
    let cn = read_field_f64(&mut npz, "cn")?;
    let d8 = read_field_i32(&mut npz, "d8");
    let channel = read_field_i32(&mut npz, "channel_mask").map(|m| m.mapv(|v| v != 0));

    Terrain::new(geometry, dem, d8, cn, channel, encoding)
}

/// Write a domain container (used by tests and domain preparation).
pub fn write_domain(
    path: &str,
    terrain: &Terrain,
    axis_units: &str,
    grid_mapping: Option<GridMappingMeta>,
) -> HydroResult<()> {
    let file = File::create(path)?;
    let mut writer = NpzWriter::new(file);
    let io_err = |e: ndarray_npy::WriteNpzError| {
        HydroError::Io(std::io::Error::other(format!(
            "failed to write domain member: {e}"
        )))
    };
    writer
        .add_array("latitude", &terrain.geometry.latitude)
        .map_err(io_err)?;
    writer
        .add_array("longitude", &terrain.geometry.longitude)
        .map_err(io_err)?;
    writer.add_array("dem", &terrain.dem).map_err(io_err)?;
    writer.add_array("d8", &terrain.d8).map_err(io_err)?;
    writer.add_array("cn", &terrain.cn).map_err(io_err)?;
    if let Some(channel) = &terrain.channel {
        let as_i32 = channel.mapv(|v| i32::from(v));
        writer
            .add_array("channel_mask", &as_i32)
            .map_err(io_err)?;
    }
    let meta = DomainMeta {
        conventions: CF_CONVENTIONS.to_string(),
        axis_units: axis_units.to_string(),
        d8_encoding: terrain.encoding.as_tag().to_string(),
        grid_mapping,
    };
    write_metadata(&mut writer, &meta)?;
    writer.finish().map_err(io_err)?;
    Ok(())
}
