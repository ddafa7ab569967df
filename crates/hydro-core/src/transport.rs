// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Migration Transport
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Collective particle exchange behind a two-operation transport trait,
//! so a mock fabric can drive multi-rank tests in one process.
//!
//! The exchange is the only synchronization point between ranks: counts
//! first, then one all-to-all-variable payload move. Gather, scatter
//! and reductions are expressed through the same two operations.

use hydro_types::constants::PARTICLE_RECORD_WIDTH;
use hydro_types::error::{HydroError, HydroResult};
use hydro_types::state::ParticleBuffer;
use std::sync::{Arc, Condvar, Mutex};

use crate::slab::{partition_migrants, SlabPartition};

/// Collective exchange between ranks. `exchange_particles` returns the
/// received payloads concatenated in source-rank order.
pub trait ParticleTransport: Send {
    fn rank(&self) -> usize;
    fn nranks(&self) -> usize;
    fn exchange_counts(&mut self, send_counts: &[usize]) -> HydroResult<Vec<usize>>;
    fn exchange_particles(&mut self, send: &[Vec<f64>]) -> HydroResult<Vec<f64>>;
}

/// Single-rank transport: every exchange is a self-delivery.
#[derive(Debug, Default, Clone)]
pub struct SerialTransport;

impl ParticleTransport for SerialTransport {
    fn rank(&self) -> usize {
        0
    }

    fn nranks(&self) -> usize {
        1
    }

    fn exchange_counts(&mut self, send_counts: &[usize]) -> HydroResult<Vec<usize>> {
        if send_counts.len() != 1 {
            return Err(HydroError::TransportError(format!(
                "serial transport expects 1 destination, got {}",
                send_counts.len()
            )));
        }
        Ok(send_counts.to_vec())
    }

    fn exchange_particles(&mut self, send: &[Vec<f64>]) -> HydroResult<Vec<f64>> {
        if send.len() != 1 {
            return Err(HydroError::TransportError(format!(
                "serial transport expects 1 destination, got {}",
                send.len()
            )));
        }
        Ok(send[0].clone())
    }
}

/// All-to-all rendezvous board shared by the in-memory fabric. The last
/// rank to post a round distributes every column, so no participant can
/// observe a half-reset board.
struct Board<T> {
    state: Mutex<BoardState<T>>,
    cond: Condvar,
}

struct BoardState<T> {
    posted: Vec<Option<Vec<T>>>,
    delivery: Vec<Option<Vec<T>>>,
}

impl<T> Board<T> {
    fn new(nranks: usize) -> Self {
        Self {
            state: Mutex::new(BoardState {
                posted: (0..nranks).map(|_| None).collect(),
                delivery: (0..nranks).map(|_| None).collect(),
            }),
            cond: Condvar::new(),
        }
    }

    fn exchange(&self, rank: usize, send: Vec<T>) -> HydroResult<Vec<T>> {
        let nranks = send.len();
        let mut state = self
            .state
            .lock()
            .map_err(|_| HydroError::TransportError("fabric lock poisoned".to_string()))?;
        if state.posted.len() != nranks {
            return Err(HydroError::TransportError(format!(
                "send buffer count {} does not match fabric size {}",
                nranks,
                state.posted.len()
            )));
        }
        // Wait until our slots from the previous round are drained.
        while state.posted[rank].is_some() || state.delivery[rank].is_some() {
            state = self
                .cond
                .wait(state)
                .map_err(|_| HydroError::TransportError("fabric wait poisoned".to_string()))?;
        }
        state.posted[rank] = Some(send);
        if state.posted.iter().all(Option::is_some) {
            let mut columns: Vec<Vec<T>> =
                (0..nranks).map(|_| Vec::with_capacity(nranks)).collect();
            for src in 0..nranks {
                let sent = state.posted[src]
                    .take()
                    .ok_or_else(|| HydroError::TransportError("fabric slot vanished".to_string()))?;
                if sent.len() != nranks {
                    return Err(HydroError::TransportError(format!(
                        "rank {src} posted {} buffers for {} ranks",
                        sent.len(),
                        nranks
                    )));
                }
                for (dst, item) in sent.into_iter().enumerate() {
                    columns[dst].push(item);
                }
            }
            for (dst, column) in columns.into_iter().enumerate() {
                state.delivery[dst] = Some(column);
            }
        }
        self.cond.notify_all();
        while state.delivery[rank].is_none() {
            state = self
                .cond
                .wait(state)
                .map_err(|_| HydroError::TransportError("fabric wait poisoned".to_string()))?;
        }
        let out = state.delivery[rank]
            .take()
            .ok_or_else(|| HydroError::TransportError("fabric delivery vanished".to_string()))?;
        self.cond.notify_all();
        Ok(out)
    }
}

/// One in-process endpoint of the mock fabric; drive one rank per
/// thread and the exchanges line up like the real collective.
pub struct InMemoryTransport {
    rank: usize,
    nranks: usize,
    counts: Arc<Board<usize>>,
    payloads: Arc<Board<Vec<f64>>>,
}

impl InMemoryTransport {
    /// Build connected endpoints for `nranks` ranks.
    pub fn fabric(nranks: usize) -> HydroResult<Vec<InMemoryTransport>> {
        if nranks == 0 {
            return Err(HydroError::TransportError(
                "fabric requires nranks >= 1".to_string(),
            ));
        }
        let counts = Arc::new(Board::new(nranks));
        let payloads = Arc::new(Board::new(nranks));
        Ok((0..nranks)
            .map(|rank| InMemoryTransport {
                rank,
                nranks,
                counts: Arc::clone(&counts),
                payloads: Arc::clone(&payloads),
            })
            .collect())
    }
}

impl ParticleTransport for InMemoryTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nranks(&self) -> usize {
        self.nranks
    }

    fn exchange_counts(&mut self, send_counts: &[usize]) -> HydroResult<Vec<usize>> {
        self.counts.exchange(self.rank, send_counts.to_vec())
    }

    fn exchange_particles(&mut self, send: &[Vec<f64>]) -> HydroResult<Vec<f64>> {
        let received = self.payloads.exchange(self.rank, send.to_vec())?;
        Ok(received.into_iter().flatten().collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub sent: usize,
    pub received: usize,
}

/// Post-route collective migration: partition emigrants by owning rank,
/// publish counts, move payloads, ingest arrivals.
pub fn migrate(
    pool: &mut ParticleBuffer,
    slab: &SlabPartition,
    transport: &mut dyn ParticleTransport,
) -> HydroResult<MigrationReport> {
    if transport.rank() != slab.rank || transport.nranks() != slab.nranks {
        return Err(HydroError::TransportError(format!(
            "transport endpoint {}/{} does not match slab {}/{}",
            transport.rank(),
            transport.nranks(),
            slab.rank,
            slab.nranks
        )));
    }
    let buckets = partition_migrants(pool, slab)?;
    let send_counts: Vec<usize> = buckets
        .iter()
        .map(|b| b.len() / PARTICLE_RECORD_WIDTH)
        .collect();
    let sent = send_counts.iter().sum();
    let recv_counts = transport.exchange_counts(&send_counts)?;
    let payload = transport.exchange_particles(&buckets)?;
    let expected = recv_counts.iter().sum::<usize>() * PARTICLE_RECORD_WIDTH;
    if payload.len() != expected {
        return Err(HydroError::TransportError(format!(
            "received payload length {} does not match announced counts ({expected})",
            payload.len()
        )));
    }
    let mut arrivals = ParticleBuffer::from_records(&payload)?;
    #[cfg(debug_assertions)]
    for i in 0..arrivals.len() {
        let iy = arrivals.iy[i];
        if iy < 0 || !slab.contains_row(iy as usize) {
            return Err(HydroError::TransportError(format!(
                "arrival row {iy} is outside owned slab [{}, {})",
                slab.row_start, slab.row_end
            )));
        }
    }
    let received = arrivals.len();
    pool.append(&mut arrivals);
    Ok(MigrationReport { sent, received })
}

/// Gather a flat f64 payload to rank 0 (concatenated in rank order on
/// the root, `None` elsewhere). Built on the same two collective ops.
pub fn gather_to_root(
    transport: &mut dyn ParticleTransport,
    payload: Vec<f64>,
) -> HydroResult<Option<Vec<f64>>> {
    let nranks = transport.nranks();
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); nranks];
    let mut counts = vec![0usize; nranks];
    counts[0] = payload.len();
    buckets[0] = payload;
    let recv_counts = transport.exchange_counts(&counts)?;
    let received = transport.exchange_particles(&buckets)?;
    if transport.rank() != 0 {
        return Ok(None);
    }
    let expected: usize = recv_counts.iter().sum();
    if received.len() != expected {
        return Err(HydroError::TransportError(format!(
            "gather received {} values, expected {expected}",
            received.len()
        )));
    }
    Ok(Some(received))
}

/// Scatter per-rank f64 payloads from rank 0; every rank receives its
/// bucket. Non-root ranks pass `None`.
pub fn scatter_from_root(
    transport: &mut dyn ParticleTransport,
    buckets: Option<Vec<Vec<f64>>>,
) -> HydroResult<Vec<f64>> {
    let nranks = transport.nranks();
    let buckets = match buckets {
        Some(buckets) => {
            if transport.rank() != 0 {
                return Err(HydroError::TransportError(
                    "only rank 0 may provide scatter buckets".to_string(),
                ));
            }
            if buckets.len() != nranks {
                return Err(HydroError::TransportError(format!(
                    "scatter requires {nranks} buckets, got {}",
                    buckets.len()
                )));
            }
            buckets
        }
        None => vec![Vec::new(); nranks],
    };
    let counts: Vec<usize> = buckets.iter().map(Vec::len).collect();
    let _ = transport.exchange_counts(&counts)?;
    transport.exchange_particles(&buckets)
}

/// Lane-wise global sum of a small diagnostic vector, delivered to
/// every rank (each rank broadcasts its lanes to all peers).
pub fn allreduce_sum(
    transport: &mut dyn ParticleTransport,
    lanes: &[f64],
) -> HydroResult<Vec<f64>> {
    let nranks = transport.nranks();
    let counts = vec![lanes.len(); nranks];
    let _ = transport.exchange_counts(&counts)?;
    let buckets: Vec<Vec<f64>> = (0..nranks).map(|_| lanes.to_vec()).collect();
    let received = transport.exchange_particles(&buckets)?;
    if received.len() != lanes.len() * nranks {
        return Err(HydroError::TransportError(format!(
            "allreduce received {} values, expected {}",
            received.len(),
            lanes.len() * nranks
        )));
    }
    let mut out = vec![0.0; lanes.len()];
    for chunk in received.chunks_exact(lanes.len()) {
        for (acc, v) in out.iter_mut().zip(chunk.iter()) {
            *acc += v;
        }
    }
    Ok(out)
}
