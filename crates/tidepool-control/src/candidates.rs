//! Candidate selection for management-service leader discovery.
//!
//! When a management request names no target and we don't know where the
//! leader is, we guess: pick a few hosts at random from the configured
//! list and ask them. Whoever answers will either be the leader or tell us
//! where it is.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Most hosts contacted while looking for the leader.
pub const MAX_MS_CANDIDATES: usize = 5;

/// Samples candidate hosts from a host list.
///
/// One sampler is shared by every call an invoker makes, so the generator
/// sits behind a mutex.
#[derive(Debug)]
pub struct CandidateSampler {
    rng: Mutex<StdRng>,
    cap: usize,
}

impl CandidateSampler {
    /// Creates a sampler seeded from the operating system.
    pub fn new(cap: usize) -> Self {
        Self::with_rng(cap, StdRng::from_os_rng())
    }

    /// Creates a deterministic sampler, for tests.
    pub fn seeded(cap: usize, seed: u64) -> Self {
        Self::with_rng(cap, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cap: usize, rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            cap: cap.max(1),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Returns up to `cap` distinct hosts chosen at random from `hosts`.
    pub fn sample(&self, hosts: &[String]) -> Vec<String> {
        let mut seen = HashSet::with_capacity(hosts.len());
        let unique: Vec<&String> = hosts.iter().filter(|h| seen.insert(h.as_str())).collect();

        if unique.len() <= self.cap {
            return unique.into_iter().cloned().collect();
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        unique
            .choose_multiple(&mut *rng, self.cap)
            .map(|h| (*h).clone())
            .collect()
    }
}
