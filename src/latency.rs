//! Emulated secondary storage latency.
//!
//! Table and block accesses spin for a configurable number of iterations
//! before touching state, as if that state lived on a slow device. The spin
//! shapes throughput only; nothing relies on it for correctness.

use std::hint::black_box;
use std::sync::atomic::{compiler_fence, Ordering};

pub fn insert_delay(iterations: usize) {
    for i in 0..iterations {
        // keep the optimizer from dropping the loop
        compiler_fence(Ordering::SeqCst);
        black_box(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_iterations_returns() {
        insert_delay(0);
        insert_delay(16);
    }
}
