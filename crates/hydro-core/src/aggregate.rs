//! Flood-depth reconstruction: bin owned particle volumes into the
//! slab grid and divide by cell area. Ownership follows the particle
//! row, so the local sum already equals the global sum per cell.

use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::ParticleBuffer;
use ndarray::Array2;

use crate::slab::SlabPartition;
use crate::terrain::Terrain;

/// Slab-local flood depth h = sum(V) / area [m]. Gated particles
/// (τ > 0) are present in their cell and therefore count.
pub fn flood_depth_slab(
    pool: &ParticleBuffer,
    slab: &SlabPartition,
    terrain: &Terrain,
) -> HydroResult<Array2<f64>> {
    let (ny, nx) = terrain.shape();
    if slab.ny_global != ny {
        return Err(HydroError::DomainInvalid(format!(
            "slab ny_global {} does not match terrain rows {ny}",
            slab.ny_global
        )));
    }
    let mut volume = Array2::zeros((slab.nrows(), nx));
    for i in 0..pool.len() {
        let iy = pool.iy[i];
        let ix = pool.ix[i];
        if iy < 0 || ix < 0 || iy as usize >= ny || ix as usize >= nx {
            return Err(HydroError::GridOutOfBounds {
                row: iy.max(0) as usize,
                col: ix.max(0) as usize,
            });
        }
        let (iy, ix) = (iy as usize, ix as usize);
        if !slab.contains_row(iy) {
            return Err(HydroError::TransportError(format!(
                "particle at row {iy} is outside owned slab [{}, {})",
                slab.row_start, slab.row_end
            )));
        }
        volume[[iy - slab.row_start, ix]] += pool.volume_m3[i];
    }
    let mut depth = volume;
    for iy_local in 0..slab.nrows() {
        let area = terrain.geometry.cell_area.at(slab.row_start + iy_local);
        for ix in 0..nx {
            depth[[iy_local, ix]] /= area;
        }
    }
    Ok(depth)
}
