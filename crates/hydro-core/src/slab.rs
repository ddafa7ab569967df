// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Slab Decomposition
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Row-slab domain decomposition: rank r of R owns global rows
//! [floor(r·Ny/R), floor((r+1)·Ny/R)). Particle ownership is a pure
//! function of the particle row.

use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::ParticleBuffer;
use ndarray::{s, Array2};

/// Row range owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabPartition {
    pub rank: usize,
    pub nranks: usize,
    pub ny_global: usize,
    pub row_start: usize,
    pub row_end: usize,
}

impl SlabPartition {
    pub fn nrows(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn contains_row(&self, iy: usize) -> bool {
        (self.row_start..self.row_end).contains(&iy)
    }
}

/// Partition Ny rows across R ranks.
pub fn decompose_rows(ny: usize, nranks: usize) -> HydroResult<Vec<SlabPartition>> {
    if nranks < 1 {
        return Err(HydroError::ConfigurationInvalid(
            "slab decomposition requires nranks >= 1".to_string(),
        ));
    }
    if ny < nranks {
        return Err(HydroError::ConfigurationInvalid(format!(
            "cannot split ny={ny} rows across nranks={nranks}"
        )));
    }
    let mut out = Vec::with_capacity(nranks);
    for rank in 0..nranks {
        out.push(SlabPartition {
            rank,
            nranks,
            ny_global: ny,
            row_start: rank * ny / nranks,
            row_end: (rank + 1) * ny / nranks,
        });
    }
    Ok(out)
}

/// Slab of a single rank.
pub fn slab_for_rank(ny: usize, nranks: usize, rank: usize) -> HydroResult<SlabPartition> {
    let slabs = decompose_rows(ny, nranks)?;
    slabs.get(rank).copied().ok_or_else(|| {
        HydroError::ConfigurationInvalid(format!("rank {rank} out of range for nranks {nranks}"))
    })
}

/// Owning rank of a global row; inverse of the partition formula.
pub fn rank_of_row(iy: usize, ny: usize, nranks: usize) -> usize {
    debug_assert!(iy < ny);
    ((iy + 1) * nranks - 1) / ny
}

/// Split a global field into owned slab blocks.
pub fn split_rows(global: &Array2<f64>, slabs: &[SlabPartition]) -> HydroResult<Vec<Array2<f64>>> {
    if slabs.is_empty() {
        return Err(HydroError::ConfigurationInvalid(
            "no slabs provided for split_rows".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(slabs.len());
    for slab in slabs {
        if slab.ny_global != global.nrows() {
            return Err(HydroError::DomainInvalid(format!(
                "slab/global mismatch: slab.ny_global={} global rows={}",
                slab.ny_global,
                global.nrows()
            )));
        }
        out.push(global.slice(s![slab.row_start..slab.row_end, ..]).to_owned());
    }
    Ok(out)
}

/// Reassemble a global field from per-rank slab blocks.
pub fn stitch_rows(
    locals: &[Array2<f64>],
    slabs: &[SlabPartition],
    ncols: usize,
) -> HydroResult<Array2<f64>> {
    if locals.len() != slabs.len() || slabs.is_empty() {
        return Err(HydroError::DomainInvalid(format!(
            "locals/slabs mismatch: {} vs {}",
            locals.len(),
            slabs.len()
        )));
    }
    let ny = slabs[0].ny_global;
    let mut global = Array2::zeros((ny, ncols));
    for (local, slab) in locals.iter().zip(slabs.iter()) {
        if local.nrows() != slab.nrows() || local.ncols() != ncols {
            return Err(HydroError::DomainInvalid(format!(
                "slab block shape {:?} does not match partition ({}, {ncols})",
                local.dim(),
                slab.nrows()
            )));
        }
        global
            .slice_mut(s![slab.row_start..slab.row_end, ..])
            .assign(local);
    }
    Ok(global)
}

/// Remove emigrants from the pool and pack them into per-destination
/// wire buffers (bucket for the local rank stays empty). Buffer order
/// follows pool order, so a fixed rank count is reproducible.
pub fn partition_migrants(
    pool: &mut ParticleBuffer,
    slab: &SlabPartition,
) -> HydroResult<Vec<Vec<f64>>> {
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); slab.nranks];
    let n = pool.len();
    if n == 0 {
        return Ok(buckets);
    }
    let mut keep = vec![true; n];
    for i in 0..n {
        let iy = usize::try_from(pool.iy[i]).map_err(|_| HydroError::GridOutOfBounds {
            row: pool.iy[i].max(0) as usize,
            col: pool.ix[i].max(0) as usize,
        })?;
        if iy >= slab.ny_global {
            return Err(HydroError::GridOutOfBounds {
                row: iy,
                col: pool.ix[i].max(0) as usize,
            });
        }
        let dest = rank_of_row(iy, slab.ny_global, slab.nranks);
        if dest == slab.rank {
            continue;
        }
        pool.pack_record(i, &mut buckets[dest]);
        keep[i] = false;
    }
    pool.retain_mask(&keep);
    Ok(buckets)
}
