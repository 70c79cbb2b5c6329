// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Randomised pacing between links.

use std::time::Duration;

use muster_config::model::ThrottleConfig;
use muster_core::LinkKind;
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    lo: f64,
    hi: f64,
}

impl Range {
    /// Negative bounds clamp to zero; an inverted pair collapses onto `lo`.
    fn clamped(lo: f64, hi: f64) -> Self {
        let lo = lo.max(0.0);
        Self { lo, hi: hi.max(lo) }
    }

    fn sample(self, rng: &mut impl Rng) -> Duration {
        let secs = if self.hi > self.lo {
            rng.gen_range(self.lo..=self.hi)
        } else {
            self.lo
        };
        Duration::from_secs_f64(secs)
    }
}

/// Inter-link delays. Invites wait longer than public joins.
#[derive(Debug, Clone)]
pub struct Throttle {
    public: Range,
    invite: Range,
    local_pause: Duration,
}

impl Throttle {
    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self {
            public: Range::clamped(config.public_delay_min_secs, config.public_delay_max_secs),
            invite: Range::clamped(config.invite_delay_min_secs, config.invite_delay_max_secs),
            local_pause: Duration::from_millis(config.local_pause_ms),
        }
    }

    /// No delays at all.
    pub fn disabled() -> Self {
        Self {
            public: Range::clamped(0.0, 0.0),
            invite: Range::clamped(0.0, 0.0),
            local_pause: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, kind: LinkKind, rng: &mut impl Rng) -> Duration {
        match kind {
            LinkKind::Public => self.public.sample(rng),
            LinkKind::Invite => self.invite.sample(rng),
        }
    }

    /// Sleep after a link that touched the network.
    pub async fn between_links(&self, kind: LinkKind) {
        let delay = self.delay_for(kind, &mut rand::thread_rng());
        if delay.is_zero() {
            return;
        }
        debug!(kind = %kind, delay_ms = delay.as_millis() as u64, "throttle sleep");
        tokio::time::sleep(delay).await;
    }

    /// Short pause after a link settled locally.
    pub async fn local_pause(&self) {
        if !self.local_pause.is_zero() {
            tokio::time::sleep(self.local_pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn defaults_keep_invites_slower() {
        let throttle = Throttle::from_config(&ThrottleConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let public = throttle.delay_for(LinkKind::Public, &mut rng);
            let invite = throttle.delay_for(LinkKind::Invite, &mut rng);
            assert!(public >= Duration::from_secs(2) && public <= Duration::from_secs(4));
            assert!(invite >= Duration::from_secs(6) && invite <= Duration::from_secs(10));
        }
    }

    #[test]
    fn inverted_range_collapses() {
        let range = Range::clamped(5.0, 1.0);
        assert_eq!(range, Range { lo: 5.0, hi: 5.0 });
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(range.sample(&mut rng), Duration::from_secs(5));
        assert_eq!(Range::clamped(-3.0, -1.0), Range { lo: 0.0, hi: 0.0 });
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_throttle_does_not_sleep() {
        let throttle = Throttle::disabled();
        let start = tokio::time::Instant::now();
        throttle.between_links(LinkKind::Invite).await;
        throttle.local_pause().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn samples_stay_in_range(lo in 0.0f64..20.0, span in 0.0f64..20.0, seed in any::<u64>()) {
            let range = Range::clamped(lo, lo + span);
            let mut rng = StdRng::seed_from_u64(seed);
            let d = range.sample(&mut rng).as_secs_f64();
            prop_assert!(d >= lo - 1e-9 && d <= lo + span + 1e-9);
        }
    }
}
