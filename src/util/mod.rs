//! Internal utilities.

pub mod det_rng;

pub use det_rng::{mix_seed, DetRng};
