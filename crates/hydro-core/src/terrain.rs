// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Terrain
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Immutable domain: DEM, D8 codes, curve numbers, channel mask, cell
//! areas and the flow-accumulation field derived once at load.

use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::GridGeometry;
use ndarray::Array2;

use crate::d8::{self, D8Encoding, FlowTarget};

/// Immutable gridded domain. Replicated on every rank, so slab-edge
/// hops never need a separate halo exchange.
#[derive(Debug, Clone)]
pub struct Terrain {
    pub geometry: GridGeometry,
    pub dem: Array2<f64>,
    pub d8: Array2<i32>,
    pub cn: Array2<f64>,
    pub channel: Option<Array2<bool>>,
    pub active: Array2<bool>,
    pub encoding: D8Encoding,
    flow_accum_m2: Array2<f64>,
}

impl Terrain {
    /// Assemble and validate a domain. The active mask is the set of
    /// finite DEM cells; CN is zeroed outside it; a missing D8 field is
    /// derived from the DEM by steepest descent.
    pub fn new(
        geometry: GridGeometry,
        dem: Array2<f64>,
        d8: Option<Array2<i32>>,
        cn: Array2<f64>,
        channel: Option<Array2<bool>>,
        encoding: D8Encoding,
    ) -> HydroResult<Self> {
        let shape = geometry.shape();
        if dem.dim() != shape {
            return Err(HydroError::DomainInvalid(format!(
                "dem shape {:?} does not match coordinate axes {:?}",
                dem.dim(),
                shape
            )));
        }
        if cn.dim() != shape {
            return Err(HydroError::DomainInvalid(format!(
                "cn shape {:?} does not match coordinate axes {:?}",
                cn.dim(),
                shape
            )));
        }
        if let Some(ch) = &channel {
            if ch.dim() != shape {
                return Err(HydroError::DomainInvalid(format!(
                    "channel_mask shape {:?} does not match coordinate axes {:?}",
                    ch.dim(),
                    shape
                )));
            }
        }
        let active = dem.mapv(|z| z.is_finite());
        let d8 = match d8 {
            Some(field) => {
                if field.dim() != shape {
                    return Err(HydroError::DomainInvalid(format!(
                        "d8 shape {:?} does not match coordinate axes {:?}",
                        field.dim(),
                        shape
                    )));
                }
                for (idx, code) in field.indexed_iter() {
                    if *code != encoding.sink_code() && encoding.slot_of(*code).is_none() {
                        return Err(HydroError::DomainInvalid(format!(
                            "d8 code {code} at ({}, {}) is not valid for encoding '{}'",
                            idx.0,
                            idx.1,
                            encoding.as_tag()
                        )));
                    }
                }
                field
            }
            None => d8::derive_from_dem(&dem, &active, encoding)?,
        };
        let cn = Array2::from_shape_fn(shape, |idx| {
            let v = cn[idx];
            if active[idx] && v.is_finite() {
                v
            } else {
                0.0
            }
        });
        let channel = channel.map(|ch| {
            Array2::from_shape_fn(shape, |idx| ch[idx] && active[idx])
        });

        let mut terrain = Self {
            geometry,
            dem,
            d8,
            cn,
            channel,
            active,
            encoding,
            flow_accum_m2: Array2::zeros(shape),
        };
        terrain.flow_accum_m2 = terrain.compute_flow_accumulation()?;
        Ok(terrain)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.geometry.shape()
    }

    pub fn is_active(&self, iy: usize, ix: usize) -> bool {
        self.active[[iy, ix]]
    }

    pub fn is_channel(&self, iy: usize, ix: usize) -> bool {
        match &self.channel {
            Some(mask) => mask[[iy, ix]],
            None => false,
        }
    }

    pub fn cell_area_m2(&self, iy: usize, ix: usize) -> HydroResult<f64> {
        self.geometry.cell_area_m2(iy, ix)
    }

    /// True when the cell carries the sink sentinel or sits outside the
    /// active mask; particles occupying such cells terminate.
    pub fn is_sink_cell(&self, iy: usize, ix: usize) -> bool {
        !self.active[[iy, ix]] || self.encoding.slot_of(self.d8[[iy, ix]]).is_none()
    }

    /// Downstream target of a cell. Inactive downstream neighbors count
    /// as out-of-domain: masked cells behave like the grid edge.
    pub fn flow_target(&self, iy: usize, ix: usize) -> HydroResult<FlowTarget> {
        let (ny, nx) = self.shape();
        if iy >= ny || ix >= nx {
            return Err(HydroError::GridOutOfBounds { row: iy, col: ix });
        }
        if !self.active[[iy, ix]] {
            return Ok(FlowTarget::Sink);
        }
        let target = d8::neighbor(ny, nx, iy, ix, self.d8[[iy, ix]], self.encoding);
        if let FlowTarget::Interior { iy: iy2, ix: ix2 } = target {
            if !self.active[[iy2, ix2]] {
                return Ok(FlowTarget::OutOfDomain);
            }
        }
        Ok(target)
    }

    /// Area-weighted flow accumulation [m^2], computed once at load.
    pub fn flow_accumulation_m2(&self) -> &Array2<f64> {
        &self.flow_accum_m2
    }

    /// Kahn-style topological sweep over the inverse D8 graph: each
    /// active cell starts with its own area and pushes its total to its
    /// downstream neighbor once all upstream contributions arrived.
    fn compute_flow_accumulation(&self) -> HydroResult<Array2<f64>> {
        let (ny, nx) = self.shape();
        let mut accum = Array2::zeros((ny, nx));
        let mut downstream: Vec<Option<(usize, usize)>> = vec![None; ny * nx];
        let mut indegree = vec![0u32; ny * nx];

        for iy in 0..ny {
            for ix in 0..nx {
                if !self.active[[iy, ix]] {
                    continue;
                }
                accum[[iy, ix]] = self.geometry.cell_area.at(iy);
                if let FlowTarget::Interior { iy: iy2, ix: ix2 } = self.flow_target(iy, ix)? {
                    downstream[iy * nx + ix] = Some((iy2, ix2));
                    indegree[iy2 * nx + ix2] += 1;
                }
            }
        }

        let mut stack: Vec<(usize, usize)> = Vec::new();
        for iy in 0..ny {
            for ix in 0..nx {
                if self.active[[iy, ix]] && indegree[iy * nx + ix] == 0 {
                    stack.push((iy, ix));
                }
            }
        }

        let mut visited = 0usize;
        while let Some((iy, ix)) = stack.pop() {
            visited += 1;
            let Some((iy2, ix2)) = downstream[iy * nx + ix] else {
                continue;
            };
            let upstream = accum[[iy, ix]];
            accum[[iy2, ix2]] += upstream;
            indegree[iy2 * nx + ix2] -= 1;
            if indegree[iy2 * nx + ix2] == 0 {
                stack.push((iy2, ix2));
            }
        }

        let n_active = self.active.iter().filter(|a| **a).count();
        if visited < n_active {
            return Err(HydroError::DomainInvalid(format!(
                "D8 field contains a cycle: {} of {} active cells resolved",
                visited, n_active
            )));
        }
        Ok(accum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_types::state::CellArea;
    use ndarray::{array, Array1};

    fn metre_geometry(ny: usize, nx: usize) -> GridGeometry {
        GridGeometry::from_metre_axes(
            Array1::linspace(0.0, 100.0 * (ny as f64 - 1.0).max(1.0), ny),
            Array1::linspace(0.0, 100.0 * (nx as f64 - 1.0).max(1.0), nx),
        )
        .expect("valid axes")
    }

    fn east_chain_terrain(nx: usize) -> Terrain {
        // 1 x nx channel draining east, last cell a sink.
        let mut d8 = Array2::from_elem((1, nx), 1);
        d8[[0, nx - 1]] = 0;
        Terrain::new(
            metre_geometry(1, nx),
            Array2::from_shape_fn((1, nx), |(_, ix)| (nx - ix) as f64),
            Some(d8),
            Array2::from_elem((1, nx), 80.0),
            None,
            D8Encoding::Esri,
        )
        .expect("valid terrain")
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = Terrain::new(
            metre_geometry(2, 2),
            Array2::zeros((3, 2)),
            None,
            Array2::zeros((2, 2)),
            None,
            D8Encoding::Esri,
        )
        .expect_err("dem shape mismatch must fail");
        match err {
            HydroError::DomainInvalid(msg) => assert!(msg.contains("dem shape")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_d8_code_is_rejected() {
        let err = Terrain::new(
            metre_geometry(1, 2),
            Array2::zeros((1, 2)),
            Some(array![[3, 0]]),
            Array2::zeros((1, 2)),
            None,
            D8Encoding::Esri,
        )
        .expect_err("3 is not an ESRI code");
        match err {
            HydroError::DomainInvalid(msg) => assert!(msg.contains("not valid for encoding")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_flow_accumulation_on_east_chain() {
        let terrain = east_chain_terrain(5);
        let CellArea::Uniform(area) = &terrain.geometry.cell_area else {
            panic!("metre grid must have uniform area");
        };
        let accum = terrain.flow_accumulation_m2();
        for ix in 0..5 {
            let expected = area * (ix as f64 + 1.0);
            assert!(
                (accum[[0, ix]] - expected).abs() < 1e-9,
                "col {ix}: {} != {expected}",
                accum[[0, ix]]
            );
        }
    }

    #[test]
    fn test_cycle_detection() {
        // Two cells pointing at each other: E then W.
        let err = Terrain::new(
            metre_geometry(1, 2),
            Array2::zeros((1, 2)),
            Some(array![[1, 16]]),
            Array2::zeros((1, 2)),
            None,
            D8Encoding::Esri,
        )
        .expect_err("cyclic D8 must fail");
        match err {
            HydroError::DomainInvalid(msg) => assert!(msg.contains("cycle")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_inactive_downstream_counts_as_out_of_domain() {
        let dem = array![[1.0, f64::NAN]];
        let terrain = Terrain::new(
            metre_geometry(1, 2),
            dem,
            Some(array![[1, 0]]),
            Array2::zeros((1, 2)),
            None,
            D8Encoding::Esri,
        )
        .expect("valid terrain");
        assert_eq!(terrain.flow_target(0, 0).unwrap(), FlowTarget::OutOfDomain);
        assert!(terrain.is_sink_cell(0, 1));
    }

    #[test]
    fn test_missing_d8_is_derived_from_dem() {
        let dem = array![[3.0, 2.0, 1.0]];
        let terrain = Terrain::new(
            metre_geometry(1, 3),
            dem,
            None,
            Array2::zeros((1, 3)),
            None,
            D8Encoding::Esri,
        )
        .expect("valid terrain");
        assert_eq!(terrain.d8[[0, 0]], 1);
        assert_eq!(terrain.d8[[0, 1]], 1);
        assert_eq!(terrain.d8[[0, 2]], 0);
    }

    #[test]
    fn test_channel_mask_restricted_to_active_cells() {
        let dem = array![[1.0, f64::NAN]];
        let terrain = Terrain::new(
            metre_geometry(1, 2),
            dem,
            Some(array![[0, 0]]),
            Array2::zeros((1, 2)),
            Some(array![[true, true]]),
            D8Encoding::Esri,
        )
        .expect("valid terrain");
        assert!(terrain.is_channel(0, 0));
        assert!(!terrain.is_channel(0, 1));
    }
}
