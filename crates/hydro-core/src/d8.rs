// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — D8 Directions
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! D8 direction encodings and the pure neighbor function.
//!
//! Two encodings are supported: ESRI powers of two (1=E, 2=SE, 4=S,
//! 8=SW, 16=W, 32=NW, 64=N, 128=NE; 0 = sink) and clockwise 0..7
//! starting east (sink = any code outside 0..7, canonically -1).

use hydro_types::error::{HydroError, HydroResult};
use ndarray::Array2;
use std::f64::consts::SQRT_2;

/// Row/column offsets in clockwise order starting east:
/// E, SE, S, SW, W, NW, N, NE.
pub const CLOCKWISE_OFFSETS: [(i64, i64); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

/// ESRI code for each clockwise slot.
pub const ESRI_CODES: [i32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Sink sentinel for the clockwise encoding (0 already means east).
pub const CLOCKWISE_SINK: i32 = -1;

/// Sink sentinel for the ESRI encoding.
pub const ESRI_SINK: i32 = 0;

/// Supported D8 direction encodings; recorded in domain metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum D8Encoding {
    Esri,
    Clockwise,
}

impl D8Encoding {
    /// Metadata tag written to containers.
    pub fn as_tag(&self) -> &'static str {
        match self {
            D8Encoding::Esri => "esri",
            D8Encoding::Clockwise => "clockwise0_7",
        }
    }

    pub fn from_tag(tag: &str) -> HydroResult<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "esri" => Ok(D8Encoding::Esri),
            "clockwise0_7" | "cw0_7" | "0_7" => Ok(D8Encoding::Clockwise),
            other => Err(HydroError::DomainInvalid(format!(
                "unsupported D8 encoding '{other}'; use 'esri' or 'clockwise0_7'"
            ))),
        }
    }

    /// Sink sentinel value of this encoding.
    pub fn sink_code(&self) -> i32 {
        match self {
            D8Encoding::Esri => ESRI_SINK,
            D8Encoding::Clockwise => CLOCKWISE_SINK,
        }
    }

    /// Clockwise slot (0..7) of a direction code; None for sink or any
    /// code outside the encoding table.
    pub fn slot_of(&self, code: i32) -> Option<usize> {
        match self {
            D8Encoding::Esri => ESRI_CODES.iter().position(|c| *c == code),
            D8Encoding::Clockwise => {
                if (0..8).contains(&code) {
                    Some(code as usize)
                } else {
                    None
                }
            }
        }
    }

    /// Direction code of a clockwise slot in this encoding.
    pub fn code_of_slot(&self, slot: usize) -> i32 {
        match self {
            D8Encoding::Esri => ESRI_CODES[slot],
            D8Encoding::Clockwise => slot as i32,
        }
    }
}

/// Outcome of following a D8 code from a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTarget {
    /// Downstream cell inside the grid.
    Interior { iy: usize, ix: usize },
    /// The code is the sink/outlet sentinel: no downstream neighbor.
    Sink,
    /// The coded neighbor falls outside the grid bounds.
    OutOfDomain,
}

/// Pure neighbor lookup over the encoding tag.
pub fn neighbor(
    ny: usize,
    nx: usize,
    iy: usize,
    ix: usize,
    code: i32,
    encoding: D8Encoding,
) -> FlowTarget {
    let Some(slot) = encoding.slot_of(code) else {
        return FlowTarget::Sink;
    };
    let (dy, dx) = CLOCKWISE_OFFSETS[slot];
    let iy2 = iy as i64 + dy;
    let ix2 = ix as i64 + dx;
    if iy2 < 0 || ix2 < 0 || iy2 >= ny as i64 || ix2 >= nx as i64 {
        return FlowTarget::OutOfDomain;
    }
    FlowTarget::Interior {
        iy: iy2 as usize,
        ix: ix2 as usize,
    }
}

/// Re-express a whole D8 field in another encoding. Sink and unknown
/// codes map to the target sink sentinel.
pub fn convert_field(d8: &Array2<i32>, from: D8Encoding, to: D8Encoding) -> Array2<i32> {
    d8.mapv(|code| match from.slot_of(code) {
        Some(slot) => to.code_of_slot(slot),
        None => to.sink_code(),
    })
}

/// Candidate order for steepest-descent derivation: cardinal slots
/// first, then diagonals, each by ascending clockwise index from east.
const DESCENT_PREFERENCE: [usize; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

/// Derive a D8 field from a DEM by steepest descent.
///
/// Gradient uses the inter-cell distance in grid units (1 for cardinal,
/// sqrt(2) for diagonal). Ties prefer cardinal neighbors over diagonal,
/// then the lowest clockwise slot starting east. Cells with no strictly
/// descending neighbor (flats, pits) and inactive cells get the sink
/// sentinel.
pub fn derive_from_dem(
    dem: &Array2<f64>,
    active: &Array2<bool>,
    encoding: D8Encoding,
) -> HydroResult<Array2<i32>> {
    if dem.dim() != active.dim() {
        return Err(HydroError::DomainInvalid(format!(
            "DEM shape {:?} does not match active mask shape {:?}",
            dem.dim(),
            active.dim()
        )));
    }
    let (ny, nx) = dem.dim();
    let mut out = Array2::from_elem((ny, nx), encoding.sink_code());
    for iy in 0..ny {
        for ix in 0..nx {
            if !active[[iy, ix]] {
                continue;
            }
            let z0 = dem[[iy, ix]];
            let mut best_slot: Option<usize> = None;
            let mut best_gradient = 0.0f64;
            for slot in DESCENT_PREFERENCE {
                let (dy, dx) = CLOCKWISE_OFFSETS[slot];
                let iy2 = iy as i64 + dy;
                let ix2 = ix as i64 + dx;
                if iy2 < 0 || ix2 < 0 || iy2 >= ny as i64 || ix2 >= nx as i64 {
                    continue;
                }
                let (iy2, ix2) = (iy2 as usize, ix2 as usize);
                if !active[[iy2, ix2]] {
                    continue;
                }
                let distance = if dy != 0 && dx != 0 { SQRT_2 } else { 1.0 };
                let gradient = (z0 - dem[[iy2, ix2]]) / distance;
                if gradient > best_gradient {
                    best_gradient = gradient;
                    best_slot = Some(slot);
                }
            }
            if let Some(slot) = best_slot {
                out[[iy, ix]] = encoding.code_of_slot(slot);
            }
        }
    }
    Ok(out)
}
