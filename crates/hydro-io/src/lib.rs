// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Hydro IO
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Self-describing container I/O: domain input, rainfall frames,
//! results output and the checkpoint store. Containers are NPZ archives
//! of named arrays with an embedded JSON metadata document carrying the
//! CF-style attributes.

pub mod checkpoint;
pub mod container;
pub mod domain;
pub mod output;
pub mod rainfall;
