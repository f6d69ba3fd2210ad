//! Purpose: Shared library crate for the termlog append engine.
//! Exports: `api` (stable public surface), `notice` (structured stderr notices).
//! Role: Public API boundary over the internal log-buffer storage modules.
//! Invariants: Additive-only changes to `api`; `core` is reachable for tests
//! Invariants: and benches but carries no stability promise.

// Tail counters and frame-length fields are operated on as native integers
// while the wire contract is little-endian.
#[cfg(target_endian = "big")]
compile_error!("termlog requires a little-endian target");

pub mod api;
pub mod core;
pub mod notice;
