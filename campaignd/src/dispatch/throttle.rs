//! Adaptive send-rate limiter.
//!
//! Additive increase, multiplicative decrease: the rate climbs by `increase_step` after every
//! `increase_every` consecutive successes and is multiplied by `backoff_factor` whenever WhatsApp
//! reports a rate limit. Callers are spaced `1 / rate` seconds apart.

use std::sync::Mutex;
use std::time::Duration;

use metrics::gauge;
use tokio::time::{Instant, sleep_until};

use crate::config::ThrottleConfig;

#[derive(Debug)]
struct State {
    rate: f64,
    streak: u32,
    next_slot: Instant,
}

#[derive(Debug)]
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    state: Mutex<State>,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let rate = config.initial_rate.clamp(config.min_rate, config.max_rate);
        gauge!("campaignd_throttle_rate").set(rate);
        Self {
            config,
            state: Mutex::new(State {
                rate,
                streak: 0,
                next_slot: Instant::now(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current rate in messages per second.
    pub fn rate(&self) -> f64 {
        self.state().rate
    }

    /// Wait for the next send slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut state = self.state();
            let now = Instant::now();
            let slot = state.next_slot.max(now);
            state.next_slot = slot + Duration::from_secs_f64(1.0 / state.rate);
            slot
        };
        sleep_until(slot).await;
    }

    pub fn on_success(&self) {
        let mut state = self.state();
        state.streak += 1;
        if state.streak >= self.config.increase_every {
            state.streak = 0;
            state.rate = (state.rate + self.config.increase_step).min(self.config.max_rate);
            gauge!("campaignd_throttle_rate").set(state.rate);
        }
    }

    pub fn on_rate_limited(&self) {
        let mut state = self.state();
        state.streak = 0;
        state.rate = (state.rate * self.config.backoff_factor).max(self.config.min_rate);
        gauge!("campaignd_throttle_rate").set(state.rate);
        tracing::info!(rate = state.rate, "Rate limited by WhatsApp, slowing down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            min_rate: 1.0,
            max_rate: 12.0,
            initial_rate: 10.0,
            increase_step: 1.0,
            increase_every: 3,
            backoff_factor: 0.5,
        }
    }

    #[test]
    fn test_additive_increase_capped() {
        let throttle = AdaptiveThrottle::new(config());

        for _ in 0..2 {
            throttle.on_success();
        }
        assert_eq!(throttle.rate(), 10.0);
        throttle.on_success();
        assert_eq!(throttle.rate(), 11.0);

        for _ in 0..30 {
            throttle.on_success();
        }
        assert_eq!(throttle.rate(), 12.0);
    }

    #[test]
    fn test_multiplicative_decrease_floored_and_resets_streak() {
        let throttle = AdaptiveThrottle::new(config());

        throttle.on_success();
        throttle.on_success();
        throttle.on_rate_limited();
        assert_eq!(throttle.rate(), 5.0);

        // Streak restarted: two more successes are not enough
        throttle.on_success();
        throttle.on_success();
        assert_eq!(throttle.rate(), 5.0);

        for _ in 0..10 {
            throttle.on_rate_limited();
        }
        assert_eq!(throttle.rate(), 1.0);
    }

    #[test]
    fn test_initial_rate_clamped() {
        let throttle = AdaptiveThrottle::new(ThrottleConfig {
            initial_rate: 100.0,
            ..config()
        });
        assert_eq!(throttle.rate(), 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_sends() {
        let throttle = AdaptiveThrottle::new(config());
        let start = Instant::now();

        for _ in 0..5 {
            throttle.acquire().await;
        }

        // First slot is immediate, then four gaps of 100ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_does_not_bank_slots() {
        let throttle = AdaptiveThrottle::new(config());
        tokio::time::sleep(Duration::from_secs(10)).await;

        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
