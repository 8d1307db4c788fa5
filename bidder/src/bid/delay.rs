//! Sampling of the response delay for a bid request.

use super::MAX_TMAX_MS;

/// Source of randomness for the [`DelayPolicy`].
///
/// The sampler is the only non-deterministic input of a decision,
/// which allows tests to script it.
pub trait DelaySampler {
    /// Uniform roll within `[0, 1)`.
    fn roll(&mut self) -> f64;

    /// Uniform integer within `[0, bound)`, with `bound >= 1`.
    fn below(&mut self, bound: u64) -> u64;
}

/// [`DelaySampler`] backed by the thread local rng.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct ThreadRngSampler;

impl DelaySampler for ThreadRngSampler {
    #[inline]
    fn roll(&mut self) -> f64 {
        rand::random()
    }

    #[inline]
    fn below(&mut self, bound: u64) -> u64 {
        rand::random_range(0..bound.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayDecision {
    pub delay_ms: u64,
    pub on_time: bool,
}

/// Picks how long to wait before answering a bid request,
/// such that on average `late_fraction` of all responses miss their `tmax`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    pub min_delay_ms: u64,
    pub headroom_ms: u64,
    pub late_fraction: f64,
    /// Spread of late delays, derived from tmax if undefined.
    pub late_span_ms: Option<u64>,
}

impl DelayPolicy {
    /// Latest delay which still counts as on-time for the given deadline.
    #[inline]
    pub fn max_on_time(&self, tmax: u64) -> u64 {
        tmax.saturating_sub(self.headroom_ms)
    }

    /// Minimum delay actually used for the given deadline.
    ///
    /// When the configured minimum leaves no room for an on-time response
    /// it is shrunk to keep an on-time window of at least 1ms,
    /// whenever the deadline allows any on-time window at all.
    pub fn effective_min_delay(&self, tmax: u64) -> u64 {
        let max_on_time = self.max_on_time(tmax);
        if self.min_delay_ms >= max_on_time {
            self.min_delay_ms.min(max_on_time.saturating_sub(1))
        } else {
            self.min_delay_ms
        }
    }

    /// Spread of late delays for the given deadline.
    #[inline]
    pub fn late_span(&self, tmax: u64) -> u64 {
        self.late_span_ms.unwrap_or_else(|| (tmax / 2).max(20))
    }

    /// Decide the delay for a request with the given deadline,
    /// normalized to `1 ..= MAX_TMAX_MS`.
    pub fn decide(&self, tmax: u64, sampler: &mut impl DelaySampler) -> DelayDecision {
        let tmax = tmax.clamp(1, MAX_TMAX_MS);
        let max_on_time = self.max_on_time(tmax);
        let eff_min = self.effective_min_delay(tmax);

        let roll = sampler.roll();
        if roll < self.late_fraction || eff_min >= max_on_time {
            let base = eff_min.max(tmax + 1);
            let spread = sampler.below(self.late_span(tmax).max(1));
            DelayDecision {
                delay_ms: base.saturating_add(spread),
                on_time: false,
            }
        } else {
            let spread = sampler.below(max_on_time - eff_min + 1);
            DelayDecision {
                delay_ms: eff_min + spread,
                on_time: true,
            }
        }
    }
}
