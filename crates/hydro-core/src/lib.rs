// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Hydro Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Lagrangian flood-transport engine over D8 terrain.
//!
//! Per-step pipeline: rainfall lookup, SCS-CN runoff, particle spawning,
//! travel-time-gated D8 routing, slab migration, periodic flood-depth
//! aggregation and risk reduction.

pub mod aggregate;
pub mod d8;
pub mod engine;
pub mod pool;
pub mod rainfall;
pub mod risk;
pub mod router;
pub mod runoff;
pub mod slab;
pub mod terrain;
pub mod transport;
