// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Container Helpers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Shared pieces of the container format: the embedded JSON metadata
//! entry and the fill-value convention for masked cells.

use hydro_types::error::{HydroError, HydroResult};
use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;

/// Member name of the embedded JSON metadata document.
pub const METADATA_MEMBER: &str = "metadata";

/// Fill value written for masked (NaN) cells in output fields.
pub const FILL_VALUE: f64 = -9999.0;

/// Serialize `meta` into the metadata member as UTF-8 JSON bytes.
pub fn write_metadata<M: Serialize>(
    writer: &mut NpzWriter<File>,
    meta: &M,
) -> HydroResult<()> {
    let bytes = serde_json::to_vec(meta)?;
    let array = Array1::from_vec(bytes);
    writer
        .add_array(METADATA_MEMBER, &array)
        .map_err(|e| HydroError::Io(std::io::Error::other(format!(
            "failed to write container metadata: {e}"
        ))))
}

/// Read and parse the metadata member.
pub fn read_metadata<M: DeserializeOwned>(npz: &mut NpzReader<File>) -> HydroResult<M> {
    let array: Array1<u8> = npz
        .by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(&format!("{METADATA_MEMBER}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(METADATA_MEMBER))
        .map_err(|e| {
            HydroError::DomainInvalid(format!("container has no metadata member: {e}"))
        })?;
    let meta = serde_json::from_slice(array.as_slice().ok_or_else(|| {
        HydroError::DomainInvalid("metadata member is not contiguous".to_string())
    })?)?;
    Ok(meta)
}

/// Replace NaN cells by the fill value for writing.
pub fn apply_fill(values: &ndarray::Array2<f64>) -> ndarray::Array2<f64> {
    values.mapv(|v| if v.is_finite() { v } else { FILL_VALUE })
}
