// ── Backoff calculation ──

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// Doubles from `initial_delay` up to `max_delay`, then spreads the result
/// by up to 25% either way. The spread follows a low-discrepancy sequence
/// over the attempt number: the same attempt always waits the same time.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::as_conversions)]
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    const GOLDEN: f64 = 0.618_033_988_75;

    let doubled = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = doubled.min(config.max_delay.as_secs_f64());
    let spread = ((f64::from(attempt) * GOLDEN).fract() - 0.5) * 0.5;

    Duration::from_secs_f64((capped * (1.0 + spread)).max(0.0))
}

/// `true` once `attempt` has used up the configured retry budget.
pub fn retries_exhausted(attempt: u32, config: &ReconnectConfig) -> bool {
    config.max_retries.is_some_and(|max| attempt >= max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(initial: u64, max: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(initial),
            max_delay: Duration::from_secs(max),
            max_retries: None,
        }
    }

    #[test]
    fn first_attempts_grow() {
        let config = secs(1, 60);
        let delays: Vec<Duration> = (0..4).map(|a| calculate_backoff(a, &config)).collect();
        assert!(delays.windows(2).all(|w| w[1] > w[0]), "{delays:?}");
    }

    #[test]
    fn spread_stays_within_a_quarter() {
        let config = secs(2, 2);
        for attempt in 0..50 {
            let d = calculate_backoff(attempt, &config).as_secs_f64();
            assert!((1.5..=2.5).contains(&d), "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn large_attempts_are_capped() {
        let config = secs(1, 10);
        assert!(calculate_backoff(12, &config) <= Duration::from_millis(12_500));
        assert!(calculate_backoff(u32::MAX, &config) <= Duration::from_millis(12_500));
    }

    #[test]
    fn retry_budget() {
        let unlimited = ReconnectConfig::default();
        assert!(!retries_exhausted(1_000, &unlimited));

        let limited = ReconnectConfig {
            max_retries: Some(3),
            ..ReconnectConfig::default()
        };
        assert!(!retries_exhausted(2, &limited));
        assert!(retries_exhausted(3, &limited));
    }
}
