// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Checkpoint Store
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Checkpoint container: cumulative fields `P`/`Q`, the spawn residual,
//! the particle arrays `p_iy`/`p_ix`/`p_volume`/`p_timer`/`p_class`,
//! scalars `elapsed_time`/`step`, the mass ledger and a configuration
//! echo. Restart refuses a container whose grid shape, D8 encoding or
//! domain field digests differ from the loaded domain.

use hydro_core::engine::{CheckpointState, EngineParams};
use hydro_core::terrain::Terrain;
use hydro_types::constants::CF_CONVENTIONS;
use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::{MassLedger, ParticleBuffer};
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;

use crate::container::{read_metadata, write_metadata};

/// Engine parameters echoed into every checkpoint for reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub dt_s: f64,
    pub ia_ratio: f64,
    pub travel_time_hillslope_s: f64,
    pub travel_time_channel_s: f64,
    pub risk_balance: f64,
    pub target_volume_m3: f64,
    pub nranks: usize,
}

impl ConfigEcho {
    pub fn from_params(params: &EngineParams, nranks: usize) -> Self {
        Self {
            dt_s: params.dt_s,
            ia_ratio: params.ia_ratio,
            travel_time_hillslope_s: params.travel_time_hillslope_s,
            travel_time_channel_s: params.travel_time_channel_s,
            risk_balance: params.risk_balance,
            target_volume_m3: params.spawn.target_volume_m3,
            nranks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub conventions: String,
    pub grid_shape: (usize, usize),
    pub d8_encoding: String,
    pub dem_digest: u64,
    pub d8_digest: u64,
    pub cn_digest: u64,
    pub config: ConfigEcho,
}

/// FNV-1a over the little-endian bit patterns of a float field.
fn digest_f64(field: &Array2<f64>) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for v in field.iter() {
        for byte in v.to_bits().to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

fn digest_i32(field: &Array2<i32>) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for v in field.iter() {
        for byte in v.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

fn read_field(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array2<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(key))
        .map_err(|e| HydroError::StateIncompatible(format!("failed to read {key}: {e}")))
}

fn read_lane_f64(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array1<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(key))
        .map_err(|e| HydroError::StateIncompatible(format!("failed to read {key}: {e}")))
}

fn read_lane_i32(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array1<i32>> {
    npz.by_name::<ndarray::OwnedRepr<i32>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<i32>, ndarray::Ix1>(key))
        .map_err(|e| HydroError::StateIncompatible(format!("failed to read {key}: {e}")))
}

fn read_lane_u8(npz: &mut NpzReader<File>, key: &str) -> HydroResult<Array1<u8>> {
    npz.by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(key))
        .map_err(|e| HydroError::StateIncompatible(format!("failed to read {key}: {e}")))
}

fn read_scalar(npz: &mut NpzReader<File>, key: &str) -> HydroResult<f64> {
    let lane = read_lane_f64(npz, key)?;
    if lane.len() != 1 {
        return Err(HydroError::StateIncompatible(format!(
            "{key} must hold exactly one value, found {}",
            lane.len()
        )));
    }
    Ok(lane[0])
}

/// Write the full engine state gathered on the root rank.
pub fn save_checkpoint(
    path: &str,
    state: &CheckpointState,
    params: &EngineParams,
    terrain: &Terrain,
    nranks: usize,
) -> HydroResult<()> {
    let file = File::create(path)?;
    let mut writer = NpzWriter::new(file);
    let io_err = |e: ndarray_npy::WriteNpzError| {
        HydroError::Io(std::io::Error::other(format!(
            "failed to write checkpoint member: {e}"
        )))
    };
    writer.add_array("P", &state.p_cum_mm).map_err(io_err)?;
    writer.add_array("Q", &state.q_cum_mm).map_err(io_err)?;
    writer
        .add_array("residual", &state.residual_m3)
        .map_err(io_err)?;

    let particles = &state.particles;
    writer
        .add_array("p_iy", &Array1::from_vec(particles.iy.clone()))
        .map_err(io_err)?;
    writer
        .add_array("p_ix", &Array1::from_vec(particles.ix.clone()))
        .map_err(io_err)?;
    writer
        .add_array("p_volume", &Array1::from_vec(particles.volume_m3.clone()))
        .map_err(io_err)?;
    writer
        .add_array("p_timer", &Array1::from_vec(particles.timer_s.clone()))
        .map_err(io_err)?;
    writer
        .add_array("p_class", &Array1::from_vec(particles.class.clone()))
        .map_err(io_err)?;

    writer
        .add_array("elapsed_time", &Array1::from_vec(vec![state.elapsed_s]))
        .map_err(io_err)?;
    writer
        .add_array("step", &Array1::from_vec(vec![state.step as f64]))
        .map_err(io_err)?;
    writer
        .add_array(
            "mass_ledger",
            &Array1::from_vec(vec![
                state.ledger.spawned_m3,
                state.ledger.outflow_m3,
                state.ledger.boundary_loss_m3,
            ]),
        )
        .map_err(io_err)?;

    let meta = CheckpointMeta {
        conventions: CF_CONVENTIONS.to_string(),
        grid_shape: terrain.shape(),
        d8_encoding: terrain.encoding.as_tag().to_string(),
        dem_digest: digest_f64(&terrain.dem),
        d8_digest: digest_i32(&terrain.d8),
        cn_digest: digest_f64(&terrain.cn),
        config: ConfigEcho::from_params(params, nranks),
    };
    write_metadata(&mut writer, &meta)?;
    writer.finish().map_err(io_err)?;
    Ok(())
}

/// Load a checkpoint and verify it belongs to the given domain. The
/// echoed rank count is informative only: restart may proceed under a
/// different one.
pub fn load_checkpoint(path: &str, terrain: &Terrain) -> HydroResult<(CheckpointState, ConfigEcho)> {
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file).map_err(|e| {
        HydroError::StateIncompatible(format!("failed to open checkpoint '{path}': {e}"))
    })?;
    let meta: CheckpointMeta = read_metadata(&mut npz)?;

    if meta.grid_shape != terrain.shape() {
        return Err(HydroError::StateIncompatible(format!(
            "checkpoint grid {:?} does not match domain {:?}",
            meta.grid_shape,
            terrain.shape()
        )));
    }
    if meta.d8_encoding != terrain.encoding.as_tag() {
        return Err(HydroError::StateIncompatible(format!(
            "checkpoint D8 encoding '{}' does not match domain '{}'",
            meta.d8_encoding,
            terrain.encoding.as_tag()
        )));
    }
    let digests = [
        ("dem", meta.dem_digest, digest_f64(&terrain.dem)),
        ("d8", meta.d8_digest, digest_i32(&terrain.d8)),
        ("cn", meta.cn_digest, digest_f64(&terrain.cn)),
    ];
    for (label, stored, current) in digests {
        if stored != current {
            return Err(HydroError::StateIncompatible(format!(
                "checkpoint {label} digest {stored:#x} does not match domain {current:#x}"
            )));
        }
    }

    let p_cum_mm = read_field(&mut npz, "P")?;
    let q_cum_mm = read_field(&mut npz, "Q")?;
    let residual_m3 = read_field(&mut npz, "residual")?;
    for (label, field) in [("P", &p_cum_mm), ("Q", &q_cum_mm), ("residual", &residual_m3)] {
        if field.dim() != terrain.shape() {
            return Err(HydroError::StateIncompatible(format!(
                "checkpoint field {label} shape {:?} does not match domain {:?}",
                field.dim(),
                terrain.shape()
            )));
        }
    }

    let iy = read_lane_i32(&mut npz, "p_iy")?;
    let ix = read_lane_i32(&mut npz, "p_ix")?;
    let volume = read_lane_f64(&mut npz, "p_volume")?;
    let timer = read_lane_f64(&mut npz, "p_timer")?;
    let class = read_lane_u8(&mut npz, "p_class")?;
    let n = iy.len();
    if [ix.len(), volume.len(), timer.len(), class.len()]
        .iter()
        .any(|len| *len != n)
    {
        return Err(HydroError::StateIncompatible(
            "particle arrays have inconsistent lengths".to_string(),
        ));
    }
    let particles = ParticleBuffer {
        iy: iy.to_vec(),
        ix: ix.to_vec(),
        volume_m3: volume.to_vec(),
        timer_s: timer.to_vec(),
        class: class.to_vec(),
    };

    let elapsed_s = read_scalar(&mut npz, "elapsed_time")?;
    let step = read_scalar(&mut npz, "step")? as u64;
    let ledger_lanes = read_lane_f64(&mut npz, "mass_ledger")?;
    if ledger_lanes.len() != 3 {
        return Err(HydroError::StateIncompatible(format!(
            "mass ledger must hold 3 lanes, found {}",
            ledger_lanes.len()
        )));
    }

    Ok((
        CheckpointState {
            p_cum_mm,
            q_cum_mm,
            residual_m3,
            particles,
            elapsed_s,
            step,
            ledger: MassLedger {
                spawned_m3: ledger_lanes[0],
                outflow_m3: ledger_lanes[1],
                boundary_loss_m3: ledger_lanes[2],
            },
        },
        meta.config,
    ))
}
