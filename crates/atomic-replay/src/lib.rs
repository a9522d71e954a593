//! `atomic-replay` — Deterministic re-execution of recorded atomics.
//!
//! # Design
//! - xorshift128+ seeded from a 64-bit mix of the seed string
//! - Fixed clock: `base + k` milliseconds on the k-th read
//! - Determinism check is byte equality of `hash` and `signature.sig`

pub mod clock;
pub mod controller;
pub mod rng;

pub use clock::FixedClock;
pub use controller::{ReplayController, ReplayOptions, ReplayReport};
pub use rng::SeededRng;
