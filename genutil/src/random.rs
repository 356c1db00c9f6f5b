use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

/// Deterministically seed a new generator from an existing one. The draw
/// happens on the calling thread, so the order of forks (not the order of
/// task completion) fixes every downstream stream.
pub fn fork_rng(base_rng: &mut XorShiftRng) -> XorShiftRng {
    XorShiftRng::seed_from_u64(base_rng.gen())
}

/// Turn nonnegative weights into a normalized running sum, ending at 1.0.
///
/// The caller must guarantee a positive total weight; a zero total yields a
/// degenerate all-NaN distribution.
pub fn build_cumulative(weights: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    let mut result = Vec::with_capacity(weights.len());
    for w in weights {
        assert!(*w >= 0.0, "negative weight {} in distribution", w);
        total += w;
        result.push(total);
    }
    for x in &mut result {
        *x /= total;
    }
    result
}

/// Smallest index i with draw < dist[i]. Floating rounding at the tail (a
/// draw at or above every entry) lands on the last index.
pub fn sample_cumulative(dist: &[f64], draw: f64) -> usize {
    assert!(!dist.is_empty());
    for (idx, x) in dist.iter().enumerate() {
        if draw < *x {
            return idx;
        }
    }
    dist.len() - 1
}

/// Sample an index from nonnegative weights in one step.
pub fn sample_weighted(weights: &[f64], rng: &mut XorShiftRng) -> usize {
    sample_cumulative(&build_cumulative(weights), rng.gen_range(0.0..1.0))
}

/// A finite pool of buckets with integer capacities, sampled without
/// replacement. Used to spread a population over buildings so that each
/// resident occupies one distinct slot.
#[derive(Clone, Debug)]
pub struct WeightedPool {
    remaining: Vec<usize>,
    total: usize,
}

impl WeightedPool {
    pub fn new(capacities: Vec<usize>) -> WeightedPool {
        let total = capacities.iter().sum();
        WeightedPool {
            remaining: capacities,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Draw one bucket, weighted by its remaining capacity, and decrement
    /// it. Returns None when the pool is exhausted.
    pub fn draw(&mut self, rng: &mut XorShiftRng) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let mut target = rng.gen_range(0..self.total);
        for (idx, count) in self.remaining.iter_mut().enumerate() {
            if target < *count {
                *count -= 1;
                self.total -= 1;
                return Some(idx);
            }
            target -= *count;
        }
        unreachable!("WeightedPool invariant broken: total doesn't match buckets");
    }
}
