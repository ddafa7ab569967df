// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Router
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Single-hop particle advance with per-cell travel-time gating.
//!
//! Sub-step precision comes from the timer, never from repeated hops,
//! so the router stays O(N_particles) without a CFL constraint. Channel
//! acceleration is expressed as travel_time_channel < travel_time_hillslope.

use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::{MassLedger, ParticleBuffer, CLASS_CHANNEL, CLASS_HILLSLOPE};

use crate::d8::FlowTarget;
use crate::terrain::Terrain;

#[derive(Debug, Clone, Copy)]
pub struct RouterParams {
    pub dt_s: f64,
    pub travel_time_hillslope_s: f64,
    pub travel_time_channel_s: f64,
}

impl RouterParams {
    pub fn validate(&self) -> HydroResult<()> {
        if !self.dt_s.is_finite() || self.dt_s <= 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "router dt_s must be finite and > 0, got {}",
                self.dt_s
            )));
        }
        for (label, value) in [
            ("travel_time_hillslope_s", self.travel_time_hillslope_s),
            ("travel_time_channel_s", self.travel_time_channel_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(HydroError::ConfigurationInvalid(format!(
                    "router {label} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteReport {
    /// Particles that performed a D8 hop this step.
    pub hops: usize,
    /// Particles retired this step (sink + boundary).
    pub retired: usize,
    /// Volume retired through sinks this step [m^3].
    pub outflow_m3: f64,
    /// Volume retired across the domain boundary this step [m^3].
    pub boundary_loss_m3: f64,
}

/// Advance every local particle by at most one D8 hop.
///
/// Pass order: gated particles (τ > 0) hold position; eligible ones
/// resolve their cell's code once. A sink retires to outflow, an
/// off-grid neighbor retires to boundary loss, an interior neighbor
/// moves the particle and reloads τ from the class of the destination
/// cell. Particles ending the pass on a sink-coded cell retire at the
/// end of the step. Finally every timer is decremented by Δt (floor 0).
pub fn route_step(
    pool: &mut ParticleBuffer,
    terrain: &Terrain,
    params: &RouterParams,
    ledger: &mut MassLedger,
) -> HydroResult<RouteReport> {
    params.validate()?;
    let n = pool.len();
    let mut report = RouteReport::default();
    if n == 0 {
        return Ok(report);
    }
    let mut keep = vec![true; n];

    for i in 0..n {
        if pool.timer_s[i] > 0.0 {
            continue;
        }
        let iy = usize::try_from(pool.iy[i]).map_err(|_| HydroError::GridOutOfBounds {
            row: pool.iy[i].max(0) as usize,
            col: pool.ix[i].max(0) as usize,
        })?;
        let ix = usize::try_from(pool.ix[i]).map_err(|_| HydroError::GridOutOfBounds {
            row: iy,
            col: pool.ix[i].max(0) as usize,
        })?;
        match terrain.flow_target(iy, ix)? {
            FlowTarget::Sink => {
                ledger.outflow_m3 += pool.volume_m3[i];
                report.outflow_m3 += pool.volume_m3[i];
                report.retired += 1;
                keep[i] = false;
            }
            FlowTarget::OutOfDomain => {
                ledger.boundary_loss_m3 += pool.volume_m3[i];
                report.boundary_loss_m3 += pool.volume_m3[i];
                report.retired += 1;
                keep[i] = false;
            }
            FlowTarget::Interior { iy: iy2, ix: ix2 } => {
                pool.iy[i] = iy2 as i32;
                pool.ix[i] = ix2 as i32;
                let channel = terrain.is_channel(iy2, ix2);
                pool.class[i] = if channel { CLASS_CHANNEL } else { CLASS_HILLSLOPE };
                pool.timer_s[i] = if channel {
                    params.travel_time_channel_s
                } else {
                    params.travel_time_hillslope_s
                };
                report.hops += 1;
            }
        }
    }

    // Particles occupying a sink-coded cell retire at the end of the
    // step that put them there, timer state notwithstanding.
    for i in 0..n {
        if !keep[i] {
            continue;
        }
        let (iy, ix) = (pool.iy[i] as usize, pool.ix[i] as usize);
        if terrain.is_sink_cell(iy, ix) {
            ledger.outflow_m3 += pool.volume_m3[i];
            report.outflow_m3 += pool.volume_m3[i];
            report.retired += 1;
            keep[i] = false;
        }
    }

    pool.retain_mask(&keep);
    for timer in pool.timer_s.iter_mut() {
        *timer = (*timer - params.dt_s).max(0.0);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d8::D8Encoding;
    use hydro_types::state::GridGeometry;
    use ndarray::{Array1, Array2};

    fn params(dt_s: f64, hillslope_s: f64, channel_s: f64) -> RouterParams {
        RouterParams {
            dt_s,
            travel_time_hillslope_s: hillslope_s,
            travel_time_channel_s: channel_s,
        }
    }

    /// 1 x n east-draining channel, last cell sink.
    fn east_channel(n: usize) -> Terrain {
        let mut d8 = Array2::from_elem((1, n), 1);
        d8[[0, n - 1]] = 0;
        Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 1.0, 1),
                Array1::linspace(0.0, 10.0 * (n as f64 - 1.0), n),
            )
            .unwrap(),
            Array2::from_shape_fn((1, n), |(_, ix)| (n - ix) as f64),
            Some(d8),
            Array2::from_elem((1, n), 80.0),
            Some(Array2::from_elem((1, n), true)),
            D8Encoding::Esri,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_channel_reaches_sink_in_four_steps() {
        // Channel travel time equals dt: one hop per step. A particle
        // spawned at column 0 of a 1x5 grid lands on the sink at step 4
        // and retires there with its full volume.
        let terrain = east_channel(5);
        let p = params(60.0, 600.0, 60.0);
        let mut pool = ParticleBuffer::new();
        pool.push(0, 0, 1.0, 0.0, CLASS_CHANNEL);
        let mut ledger = MassLedger::default();

        for step in 1..=3 {
            let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
            assert_eq!(report.hops, 1, "step {step} must hop");
            assert_eq!(pool.len(), 1);
            assert_eq!(pool.ix[0] as usize, step);
        }
        let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(report.hops, 1);
        assert_eq!(report.retired, 1);
        assert!((report.outflow_m3 - 1.0).abs() < 1e-12);
        assert_eq!(pool.len(), 0);
        assert!((ledger.outflow_m3 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gated_particle_holds_position() {
        let terrain = east_channel(4);
        let p = params(60.0, 600.0, 180.0);
        let mut pool = ParticleBuffer::new();
        pool.push(0, 0, 1.0, 0.0, CLASS_CHANNEL);
        let mut ledger = MassLedger::default();

        // First step hops and reloads τ = 180 s.
        route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(pool.ix[0], 1);
        assert!((pool.timer_s[0] - 120.0).abs() < 1e-12);
        // Two gated steps: position frozen while τ decays.
        for expected_timer in [60.0, 0.0] {
            let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
            assert_eq!(report.hops, 0);
            assert_eq!(pool.ix[0], 1);
            assert!((pool.timer_s[0] - expected_timer).abs() < 1e-12);
        }
        // Timer expired: next step hops again.
        let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(report.hops, 1);
        assert_eq!(pool.ix[0], 2);
    }

    #[test]
    fn test_spawn_on_sink_retires_in_same_step() {
        let terrain = east_channel(2);
        let p = params(60.0, 600.0, 60.0);
        let mut pool = ParticleBuffer::new();
        pool.push(0, 1, 2.5, 0.0, CLASS_CHANNEL);
        let mut ledger = MassLedger::default();
        let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(report.hops, 0);
        assert_eq!(report.retired, 1);
        assert!((report.outflow_m3 - 2.5).abs() < 1e-12);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_boundary_exit_counts_as_boundary_loss() {
        // Single cell pointing east out of the grid.
        let terrain = Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 1.0, 1),
                Array1::linspace(0.0, 1.0, 1),
            )
            .unwrap(),
            Array2::zeros((1, 1)),
            Some(Array2::from_elem((1, 1), 1)),
            Array2::from_elem((1, 1), 80.0),
            None,
            D8Encoding::Esri,
        )
        .unwrap();
        let p = params(60.0, 60.0, 60.0);
        let mut pool = ParticleBuffer::new();
        pool.push(0, 0, 0.75, 0.0, CLASS_HILLSLOPE);
        let mut ledger = MassLedger::default();
        let report = route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(report.retired, 1);
        assert!((report.boundary_loss_m3 - 0.75).abs() < 1e-12);
        assert!((ledger.boundary_loss_m3 - 0.75).abs() < 1e-12);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_class_follows_destination_cell() {
        // Channel mask only on the last cell of a 1x3 east chain.
        let mut channel = Array2::from_elem((1, 3), false);
        channel[[0, 2]] = true;
        let mut d8 = Array2::from_elem((1, 3), 1);
        d8[[0, 2]] = 0;
        let terrain = Terrain::new(
            GridGeometry::from_metre_axes(
                Array1::linspace(0.0, 1.0, 1),
                Array1::linspace(0.0, 20.0, 3),
            )
            .unwrap(),
            Array2::zeros((1, 3)),
            Some(d8),
            Array2::from_elem((1, 3), 80.0),
            Some(channel),
            D8Encoding::Esri,
        )
        .unwrap();
        let p = params(60.0, 60.0, 30.0);
        let mut pool = ParticleBuffer::new();
        pool.push(0, 0, 1.0, 0.0, CLASS_HILLSLOPE);
        let mut ledger = MassLedger::default();

        route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        assert_eq!(pool.class, vec![CLASS_HILLSLOPE]);
        route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        // Hopped onto the channel sink cell: class switched, then the
        // end-of-step sweep retired it.
        assert_eq!(pool.len(), 0);
        assert!((ledger.outflow_m3 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mass_is_conserved_through_routing() {
        let terrain = east_channel(4);
        let p = params(60.0, 600.0, 60.0);
        let mut pool = ParticleBuffer::new();
        for ix in 0..3 {
            pool.push(0, ix, 1.0 + ix as f64, 0.0, CLASS_CHANNEL);
        }
        let spawned: f64 = pool.total_volume_m3();
        let mut ledger = MassLedger::default();
        ledger.spawned_m3 = spawned;
        for _ in 0..10 {
            route_step(&mut pool, &terrain, &p, &mut ledger).unwrap();
        }
        assert_eq!(pool.len(), 0);
        let err = ledger.relative_error(pool.total_volume_m3(), 0.0);
        assert!(err < 1e-12, "mass closure error {err}");
    }
}
