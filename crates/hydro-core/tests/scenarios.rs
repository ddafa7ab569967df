// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — End-to-End Scenarios
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Engine-level scenarios: single-cell outflow accounting, linear
//! channel transit, cross-rank migration, and restart under a changed
//! rank count.

use hydro_core::d8::D8Encoding;
use hydro_core::engine::{EngineParams, HydroEngine};
use hydro_core::pool::SpawnParams;
use hydro_core::rainfall::{RainfallSource, RainfallStack};
use hydro_core::terrain::Terrain;
use hydro_core::transport::{InMemoryTransport, SerialTransport};
use hydro_types::config::RainMode;
use hydro_types::state::GridGeometry;
use ndarray::{Array1, Array2};
use std::sync::Arc;
use std::thread;

fn params(dt_s: f64, hillslope_s: f64, channel_s: f64) -> EngineParams {
    EngineParams {
        dt_s,
        start_s: 0.0,
        ia_ratio: 0.2,
        travel_time_hillslope_s: hillslope_s,
        travel_time_channel_s: channel_s,
        spawn: SpawnParams {
            target_volume_m3: 1.0,
            min_volume_m3: 0.0,
            max_per_cell: 64,
        },
        risk_balance: 0.5,
        pct_low: 5.0,
        pct_high: 95.0,
        aggregation_interval_steps: 1,
        mass_tolerance_rel: 1.0e-6,
    }
}

/// One burst of rain at t = 0 on selected cells, nothing afterwards.
fn burst_rain(shape: (usize, usize), field: Array2<f64>, window_s: f64) -> Arc<RainfallStack> {
    Arc::new(
        RainfallStack::new(
            vec![RainfallSource::Frames {
                name: "burst".to_string(),
                weight: 1.0,
                mode: RainMode::DepthMmPerStep,
                times_s: vec![0.0],
                fields: vec![Some(field)],
            }],
            shape,
            (0.0, window_s),
        )
        .unwrap(),
    )
}

#[test]
fn scenario_single_impervious_cell_routes_rain_to_outflow() {
    // One active 100 m^2 cell (the rest masked out), CN = 100, D8 sink.
    // 10 mm of rain in one step spawns 1 m^3, which retires to outflow
    // in the same step leaving an empty pool.
    let mut dem = Array2::from_elem((2, 2), f64::NAN);
    dem[[0, 0]] = 5.0;
    let terrain = Arc::new(
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 10.0, 2),
                Array1::linspace(0.0, 10.0, 2),
            )
            .unwrap(),
            dem,
            Some(Array2::zeros((2, 2))),
            Array2::from_elem((2, 2), 100.0),
            None,
            D8Encoding::Esri,
        )
        .unwrap(),
    );
    let mut rain_field = Array2::zeros((2, 2));
    rain_field.fill(10.0);
    let rain = burst_rain((2, 2), rain_field, 600.0);
    let mut engine =
        HydroEngine::new(terrain, rain, params(60.0, 60.0, 60.0), SerialTransport).unwrap();

    let report = engine.step().unwrap();
    assert_eq!(report.spawn.particles, 1);
    assert!((report.spawn.volume_m3 - 1.0).abs() < 1e-12);
    assert!((report.route.outflow_m3 - 1.0).abs() < 1e-12);
    assert_eq!(engine.pool().len(), 0);
    assert!(engine.check_mass_conservation().unwrap() < 1e-12);
}

#[test]
fn scenario_linear_channel_transit() {
    // 1x5 channel draining east with the sink at the last column and
    // t_channel = dt: a single 1 m^3 parcel spawned at column 0 reaches
    // the sink after 4 steps and the final flood depth is zero.
    let mut d8 = Array2::from_elem((1, 5), 1);
    d8[[0, 4]] = 0;
    let terrain = Arc::new(
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 10.0, 1),
                Array1::linspace(0.0, 40.0, 5),
            )
            .unwrap(),
            Array2::from_shape_fn((1, 5), |(_, ix)| (5 - ix) as f64),
            Some(d8),
            Array2::from_elem((1, 5), 100.0),
            Some(Array2::from_elem((1, 5), true)),
            D8Encoding::Esri,
        )
        .unwrap(),
    );
    // 100 mm on the 10 m^2 first cell only: exactly 1 m^3.
    let mut rain_field = Array2::zeros((1, 5));
    rain_field[[0, 0]] = 100.0;
    let rain = burst_rain((1, 5), rain_field, 3600.0);
    let mut engine =
        HydroEngine::new(terrain, rain, params(60.0, 600.0, 60.0), SerialTransport).unwrap();

    for step in 1..=3 {
        let report = engine.step().unwrap();
        assert_eq!(engine.pool().len(), 1, "in transit at step {step}");
        assert_eq!(engine.pool().ix[0] as usize, step);
        assert_eq!(report.route.retired, 0);
    }
    let report = engine.step().unwrap();
    assert_eq!(report.route.hops, 1, "fourth hop lands on the sink");
    assert!((report.route.outflow_m3 - 1.0).abs() < 1e-9);
    assert_eq!(engine.pool().len(), 0);
    assert!(engine.flood_depth_m().iter().all(|h| *h == 0.0));
    assert!(engine.check_mass_conservation().unwrap() < 1e-9);
}

#[test]
fn scenario_two_rank_split_migrates_particle() {
    // 4x1 south-draining column split {0,1} | {2,3}; a parcel spawned
    // on row 0 crosses the slab boundary through the exchange and
    // retires through the bottom sink, mass conserved globally.
    let mut d8 = Array2::from_elem((4, 1), 4);
    d8[[3, 0]] = 0;
    let terrain = Arc::new(
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 30.0, 4),
                Array1::linspace(0.0, 10.0, 1),
            )
            .unwrap(),
            Array2::from_shape_fn((4, 1), |(iy, _)| (4 - iy) as f64),
            Some(d8),
            Array2::from_elem((4, 1), 100.0),
            None,
            D8Encoding::Esri,
        )
        .unwrap(),
    );
    let mut rain_field = Array2::zeros((4, 1));
    rain_field[[0, 0]] = 100.0;
    let rain = burst_rain((4, 1), rain_field, 3600.0);
    let engine_params = params(60.0, 60.0, 60.0);

    let endpoints = InMemoryTransport::fabric(2).unwrap();
    let handles: Vec<_> = endpoints
        .into_iter()
        .map(|transport| {
            let terrain = Arc::clone(&terrain);
            let rain = Arc::clone(&rain);
            thread::spawn(move || {
                let mut engine =
                    HydroEngine::new(terrain, rain, engine_params, transport).unwrap();
                let mut migrated_out = 0usize;
                let mut migrated_in = 0usize;
                for _ in 0..5 {
                    let report = engine.step().unwrap();
                    migrated_out += report.migration.sent;
                    migrated_in += report.migration.received;
                }
                let drift = engine.check_mass_conservation().unwrap();
                let depth = engine.gather_flood_depth().unwrap();
                (engine.slab().rank, migrated_out, migrated_in, drift, depth)
            })
        })
        .collect();

    for handle in handles {
        let (rank, out, inbound, drift, depth) = handle.join().expect("rank thread");
        assert!(drift < 1e-12, "rank {rank} mass drift {drift}");
        if rank == 0 {
            assert_eq!(out, 1, "rank 0 must emit the southbound parcel");
            assert_eq!(inbound, 0);
            let depth = depth.expect("root holds the gathered field");
            assert!(
                depth.iter().all(|h| *h == 0.0),
                "parcel retired through the sink"
            );
        } else {
            assert_eq!(out, 0);
            assert_eq!(inbound, 1, "rank 1 must receive the parcel");
            assert!(depth.is_none());
        }
    }
}

#[test]
fn scenario_restart_with_different_rank_count() {
    // Run 14 steps on two ranks, checkpoint, resume on a single rank
    // and compare against the two-rank run carried to 28 steps.
    let terrain = Arc::new(
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 70.0, 8),
                Array1::linspace(0.0, 50.0, 6),
            )
            .unwrap(),
            Array2::from_shape_fn((8, 6), |(iy, ix)| 50.0 - 2.0 * iy as f64 - ix as f64),
            None,
            Array2::from_elem((8, 6), 85.0),
            Some(Array2::from_shape_fn((8, 6), |(_, ix)| ix == 3)),
            D8Encoding::Esri,
        )
        .unwrap(),
    );
    let rain = Arc::new(
        RainfallStack::new(
            vec![RainfallSource::Constant {
                name: "steady".to_string(),
                weight: 1.0,
                mode: RainMode::IntensityMmPerHour,
                value: 40.0,
            }],
            (8, 6),
            (0.0, 28.0 * 60.0),
        )
        .unwrap(),
    );
    let mut engine_params = params(60.0, 120.0, 60.0);
    engine_params.spawn.target_volume_m3 = 0.5;
    engine_params.aggregation_interval_steps = 7;

    let endpoints = InMemoryTransport::fabric(2).unwrap();
    let handles: Vec<_> = endpoints
        .into_iter()
        .map(|transport| {
            let terrain = Arc::clone(&terrain);
            let rain = Arc::clone(&rain);
            thread::spawn(move || {
                let mut engine =
                    HydroEngine::new(terrain, rain, engine_params, transport).unwrap();
                for _ in 0..14 {
                    engine.step().unwrap();
                }
                let midpoint = engine.gather_state().unwrap();
                for _ in 0..14 {
                    engine.step().unwrap();
                }
                engine.aggregate_now().unwrap();
                let depth = engine.gather_flood_depth().unwrap();
                let drift = engine.check_mass_conservation().unwrap();
                (midpoint, depth, drift)
            })
        })
        .collect();

    let mut midpoint = None;
    let mut reference_depth = None;
    for handle in handles {
        let (state, depth, drift) = handle.join().expect("rank thread");
        assert!(drift < 1e-9);
        if let Some(state) = state {
            midpoint = Some(state);
        }
        if let Some(depth) = depth {
            reference_depth = Some(depth);
        }
    }
    let midpoint = midpoint.expect("rank 0 gathered the midpoint state");
    let reference_depth = reference_depth.expect("rank 0 gathered the reference depth");
    assert_eq!(midpoint.step, 14);

    // Resume the midpoint on one rank.
    let mut resumed = HydroEngine::from_checkpoint(
        Arc::clone(&terrain),
        Arc::clone(&rain),
        engine_params,
        SerialTransport,
        Some(midpoint),
    )
    .unwrap();
    assert_eq!(resumed.step_count(), 14);
    for _ in 0..14 {
        resumed.step().unwrap();
    }
    resumed.aggregate_now().unwrap();
    let resumed_depth = resumed
        .gather_flood_depth()
        .unwrap()
        .expect("serial root field");
    assert!(resumed.check_mass_conservation().unwrap() < 1e-9);

    assert_eq!(reference_depth.dim(), resumed_depth.dim());
    for (a, b) in reference_depth.iter().zip(resumed_depth.iter()) {
        assert!(
            (a - b).abs() <= 1e-12 * a.abs().max(1.0),
            "depth mismatch after rank-count change: {a} vs {b}"
        );
    }
}

#[test]
fn scenario_checkpoint_restart_with_no_rain_is_identity() {
    // Checkpoint, then restart against a dry rainfall stack: stepping
    // zero times leaves the gathered state identical.
    let terrain = Arc::new(
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 30.0, 4),
                Array1::linspace(0.0, 30.0, 4),
            )
            .unwrap(),
            Array2::from_shape_fn((4, 4), |(iy, ix)| 20.0 - iy as f64 - ix as f64),
            None,
            Array2::from_elem((4, 4), 90.0),
            None,
            D8Encoding::Esri,
        )
        .unwrap(),
    );
    let rain = Arc::new(
        RainfallStack::new(
            vec![RainfallSource::Constant {
                name: "steady".to_string(),
                weight: 1.0,
                mode: RainMode::DepthMmPerStep,
                value: 5.0,
            }],
            (4, 4),
            (0.0, 600.0),
        )
        .unwrap(),
    );
    let engine_params = params(60.0, 120.0, 60.0);
    let mut engine = HydroEngine::new(
        Arc::clone(&terrain),
        Arc::clone(&rain),
        engine_params,
        SerialTransport,
    )
    .unwrap();
    for _ in 0..6 {
        engine.step().unwrap();
    }
    let state = engine.gather_state().unwrap().expect("root state");

    let dry = Arc::new(RainfallStack::dry((4, 4), (0.0, 600.0)).unwrap());
    let mut restarted = HydroEngine::from_checkpoint(
        terrain,
        dry,
        engine_params,
        SerialTransport,
        Some(state.clone()),
    )
    .unwrap();
    let state_back = restarted.gather_state().unwrap().expect("root state");
    assert_eq!(state_back.step, state.step);
    assert_eq!(state_back.p_cum_mm, state.p_cum_mm);
    assert_eq!(state_back.q_cum_mm, state.q_cum_mm);
    assert_eq!(state_back.residual_m3, state.residual_m3);
    assert_eq!(state_back.particles.iy, state.particles.iy);
    assert_eq!(state_back.particles.volume_m3, state.particles.volume_m3);
    assert!((state_back.elapsed_s - state.elapsed_s).abs() < 1e-12);
}
