//! Fault-injection sampling (§4.2, §4.3).
//!
//! Three independent Bernoulli samples per request, applied in the order the
//! handler steps through them: drop (exclusive — it short-circuits
//! everything else), delay (a sleep, not an exit), wrong (decides the final
//! reply). The RNG is owned per-handler so outcomes across the fleet (and
//! across concurrent requests to the same worker) are never correlated.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use qrd_core::FaultSpec;

/// A per-handler random source. Construct with [`FaultSampler::seeded`] in
/// tests for reproducible scenarios (§8.1); [`FaultSampler::from_entropy`]
/// in production so the fleet's outcomes are not correlated with each other.
pub struct FaultSampler {
    rng: StdRng,
}

impl FaultSampler {
    pub fn from_entropy() -> Self {
        FaultSampler { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        FaultSampler { rng: StdRng::seed_from_u64(seed) }
    }

    /// §4.2 step 2: connection-loss die. If this hits, the handler closes
    /// without writing and nothing else is sampled.
    pub fn sample_drop(&mut self, spec: &FaultSpec) -> bool {
        self.hits(spec.drop_pct)
    }

    /// §4.2 step 3: delay die. Returns the sleep duration if hit, including
    /// the worker's fixed per-instance stagger (§4.3) so worst-case delays
    /// are staggered across the fleet.
    pub fn sample_delay(&mut self, spec: &FaultSpec, stagger_ms: u64) -> Option<Duration> {
        if !self.hits(spec.delay_pct) {
            return None;
        }
        let base = if spec.delay_max_ms > spec.delay_min_ms {
            self.rng.gen_range(spec.delay_min_ms..=spec.delay_max_ms)
        } else {
            spec.delay_min_ms
        };
        Some(Duration::from_millis(base + stagger_ms))
    }

    /// §4.2 step 4: wrong-reply die.
    pub fn sample_wrong(&mut self, spec: &FaultSpec) -> bool {
        self.hits(spec.wrong_pct)
    }

    fn hits(&mut self, pct: u8) -> bool {
        if pct == 0 {
            return false;
        }
        if pct >= 100 {
            return true;
        }
        self.rng.gen_range(0..100) < u32::from(pct)
    }

    /// A random suffix for a distinguishable wrong reply (§4.2 step 4).
    pub fn wrong_suffix(&mut self) -> u32 {
        self.rng.gen_range(0..1_000_000)
    }

    /// A worker's fixed per-instance stagger, sampled once at creation (§4.3).
    pub fn sample_stagger_ms(&mut self, max_stagger_ms: u64) -> u64 {
        if max_stagger_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=max_stagger_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rates_never_hit() {
        let spec = FaultSpec::none();
        let mut sampler = FaultSampler::seeded(1);
        for _ in 0..100 {
            assert!(!sampler.sample_drop(&spec));
            assert!(sampler.sample_delay(&spec, 0).is_none());
            assert!(!sampler.sample_wrong(&spec));
        }
    }

    #[test]
    fn hundred_percent_drop_always_hits() {
        let spec = FaultSpec::new(100, 0, 0, 0, 0).unwrap();
        let mut sampler = FaultSampler::seeded(2);
        for _ in 0..20 {
            assert!(sampler.sample_drop(&spec));
        }
    }

    #[test]
    fn hundred_percent_delay_samples_within_range_plus_stagger() {
        let spec = FaultSpec::new(0, 100, 0, 10, 20).unwrap();
        let mut sampler = FaultSampler::seeded(3);
        for _ in 0..20 {
            let duration = sampler.sample_delay(&spec, 5).unwrap();
            let millis = duration.as_millis() as u64;
            assert!((15..=25).contains(&millis));
        }
    }

    #[test]
    fn delay_and_wrong_are_independent_dice() {
        let spec = FaultSpec::new(0, 100, 100, 1, 1).unwrap();
        let mut sampler = FaultSampler::seeded(4);
        assert!(sampler.sample_delay(&spec, 0).is_some());
        assert!(sampler.sample_wrong(&spec));
    }

    #[test]
    fn seeded_samplers_are_deterministic() {
        let spec = FaultSpec::new(30, 30, 30, 1, 5).unwrap();
        let mut a = FaultSampler::seeded(42);
        let mut b = FaultSampler::seeded(42);
        for _ in 0..50 {
            assert_eq!(a.sample_drop(&spec), b.sample_drop(&spec));
            assert_eq!(a.sample_delay(&spec, 0), b.sample_delay(&spec, 0));
            assert_eq!(a.sample_wrong(&spec), b.sample_wrong(&spec));
        }
    }
}
