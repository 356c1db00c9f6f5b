//! Utilities shared by the demand-generation crates: reproducible random
//! sampling, a small multivariate Gaussian sampler, and a bounded parallel
//! map for fanning work across agents.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod logger;

mod gaussian;
mod parallel;
mod random;

pub use crate::gaussian::sample_multivariate_gaussian;
pub use crate::parallel::{parallel_map, Parallelism};
pub use crate::random::{
    build_cumulative, fork_rng, sample_cumulative, sample_weighted, WeightedPool,
};

/// How often parallel drivers report progress.
pub const PROGRESS_FREQUENCY_SECONDS: f64 = 2.0;

pub fn prettyprint_usize(x: usize) -> String {
    let num = format!("{}", x);
    let mut result = String::new();
    let mut i = num.len();
    for c in num.chars() {
        result.push(c);
        i -= 1;
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
    }
    result
}
