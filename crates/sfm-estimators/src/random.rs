//! Per-thread pseudo-random generator with explicit reseeding.
//!
//! Every thread owns an independent generator, so concurrent consensus runs
//! never contend on shared state and their trial sequences stay independent.
//! `set_prng_seed` replaces the calling thread's generator atomically with
//! respect to that thread, which makes sampling reproducible in tests.

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::SeedableRng;

thread_local! {
    static PRNG: RefCell<StdRng> = RefCell::new(StdRng::from_os_rng());
}

/// Reseed the calling thread's pseudo-random generator.
///
/// Any generator previously held by this thread is replaced. Other threads
/// are unaffected.
pub fn set_prng_seed(seed: u64) {
    PRNG.with(|prng| *prng.borrow_mut() = StdRng::seed_from_u64(seed));
}

/// Derive a fresh generator from the calling thread's generator.
pub(crate) fn derived_rng() -> StdRng {
    PRNG.with(|prng| StdRng::from_rng(&mut *prng.borrow_mut()))
}
