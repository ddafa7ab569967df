// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Run Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Single-process run driver: load the domain and rainfall, build the
//! engine (fresh or from a checkpoint), loop the step pipeline with
//! checkpoint cadence and cancellation, write results at the end.
//! Rank-level parallelism is the transport's concern; this binary runs
//! the serial endpoint.

use hydro_core::engine::{HydroEngine, EngineParams};
use hydro_core::rainfall::RainfallStack;
use hydro_core::terrain::Terrain;
use hydro_core::transport::SerialTransport;
use hydro_types::config::SimulationConfig;
use hydro_types::error::{HydroError, HydroResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Operational overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub restart_in: Option<String>,
    pub restart_out: Option<String>,
    pub output: Option<String>,
}

fn checkpoint_now(
    engine: &mut HydroEngine<SerialTransport>,
    path: &str,
    params: &EngineParams,
    terrain: &Terrain,
) -> HydroResult<()> {
    let state = engine
        .gather_state()?
        .ok_or_else(|| HydroError::TransportError("root gather returned no state".to_string()))?;
    hydro_io::checkpoint::save_checkpoint(path, &state, params, terrain, 1)?;
    info!(path, step = state.step, "checkpoint written");
    Ok(())
}

/// Drive a configured run to completion. `cancel` is polled between
/// steps; a cancelled run checkpoints (when a path is configured) and
/// returns cleanly.
pub fn run_simulation(
    cfg: &SimulationConfig,
    overrides: &RunOverrides,
    cancel: &AtomicBool,
) -> HydroResult<()> {
    cfg.validate()?;
    let terrain = Arc::new(hydro_io::domain::read_domain(&cfg.domain.path)?);
    let (ny, nx) = terrain.shape();
    info!(ny, nx, encoding = terrain.encoding.as_tag(), "domain loaded");

    let params = EngineParams::from_config(cfg);
    let window_end = cfg.time.start_s + cfg.time.n_steps as f64 * cfg.time.dt_s;
    let sources = hydro_io::rainfall::build_rain_sources(&cfg.rain.sources, terrain.shape())?;
    let rain = Arc::new(RainfallStack::new(
        sources,
        terrain.shape(),
        (cfg.time.start_s, window_end),
    )?);

    let checkpoint_path = overrides
        .restart_out
        .clone()
        .or_else(|| cfg.output.checkpoint_path.clone());

    let mut engine = match &overrides.restart_in {
        Some(path) => {
            let (state, echo) = hydro_io::checkpoint::load_checkpoint(path, &terrain)?;
            info!(
                path,
                step = state.step,
                previous_ranks = echo.nranks,
                "resuming from checkpoint"
            );
            HydroEngine::from_checkpoint(
                Arc::clone(&terrain),
                Arc::clone(&rain),
                params,
                SerialTransport,
                Some(state),
            )?
        }
        None => HydroEngine::new(
            Arc::clone(&terrain),
            Arc::clone(&rain),
            params,
            SerialTransport,
        )?,
    };

    let result = drive_steps(&mut engine, cfg, checkpoint_path.as_deref(), &terrain, cancel);
    if let Err(err) = &result {
        // Fatal errors still get a best-effort final checkpoint.
        if let Some(path) = checkpoint_path.as_deref() {
            if let Err(ckpt_err) = checkpoint_now(&mut engine, path, &params, &terrain) {
                warn!(error = %ckpt_err, "final checkpoint after failure also failed");
            }
        }
        warn!(error = %err, "run aborted");
        return result;
    }

    engine.aggregate_now()?;
    let drift = engine.check_mass_conservation()?;
    info!(relative_error = drift, "final mass balance");

    if let Some(path) = checkpoint_path.as_deref() {
        checkpoint_now(&mut engine, path, &params, &terrain)?;
    }

    let flood_depth = engine
        .gather_flood_depth()?
        .ok_or_else(|| HydroError::TransportError("root gather returned no field".to_string()))?;
    let risk = engine
        .gather_risk_index()?
        .ok_or_else(|| HydroError::TransportError("root gather returned no field".to_string()))?;
    let out_path = overrides.output.as_deref().unwrap_or(&cfg.output.path);
    hydro_io::output::write_results(
        out_path,
        &cfg.output.title,
        &terrain.geometry.latitude,
        &terrain.geometry.longitude,
        engine.elapsed_s(),
        &flood_depth,
        &risk,
        None,
        Some(serde_json::to_value(cfg)?),
    )?;
    info!(path = out_path, steps = engine.step_count(), "results written");
    Ok(())
}

fn drive_steps(
    engine: &mut HydroEngine<SerialTransport>,
    cfg: &SimulationConfig,
    checkpoint_path: Option<&str>,
    terrain: &Terrain,
    cancel: &AtomicBool,
) -> HydroResult<()> {
    let params = *engine.params();
    let cadence = cfg.output.checkpoint_interval_steps as u64;
    while engine.step_count() < cfg.time.n_steps as u64 {
        if cancel.load(Ordering::Relaxed) {
            warn!(step = engine.step_count(), "cancellation requested");
            if let Some(path) = checkpoint_path {
                checkpoint_now(engine, path, &params, terrain)?;
            }
            return Ok(());
        }
        let report = engine.step()?;
        if cadence > 0 && report.step % cadence == 0 {
            engine.check_mass_conservation()?;
            if let Some(path) = checkpoint_path {
                checkpoint_now(engine, path, &params, terrain)?;
            }
        }
    }
    Ok(())
}
