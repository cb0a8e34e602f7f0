use std::cmp::min;
use std::time::Duration;
use crate::config::ReconnectConfig;
use crate::util::random::Random;

/// Delays between reconnect attempts, growing by a configurable factor per failed attempt
///  up to a maximum, with part of each delay randomized.
pub struct ExponentialBackoff {
    delay: Duration,

    config_initial_delay: Duration,
    config_max_delay: Duration,
    config_factor_eighths: u32,
    config_jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        assert!(config.factor_eighths >= 8);

        ExponentialBackoff {
            delay: config.initial_delay,
            config_initial_delay: config.initial_delay,
            config_max_delay: config.max_delay,
            config_factor_eighths: config.factor_eighths,
            config_jitter: config.jitter,
        }
    }

    /// after a successful connection
    pub fn reset(&mut self) {
        self.delay = self.config_initial_delay;
    }

    #[must_use]
    pub fn next_delay(&mut self, random: &dyn Random) -> Duration {
        let base = self.delay;
        self.delay = min(self.delay * self.config_factor_eighths / 8, self.config_max_delay);

        if self.config_jitter > 0.0 {
            base.mul_f64(random.gen_f64_range(1.0 - self.config_jitter..1.0))
        }
        else {
            base
        }
    }
}
