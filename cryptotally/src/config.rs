use crate::*;
use std::env::var;
use std::time::Duration;

/// Field and pacing parameters shared by voters and counters.
///
/// The retry cadences and windows are liveness knobs, not safety knobs: the
/// protocol stays correct under any values, it just decides slower or gives
/// up earlier.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prime modulus of the share field.
    pub prime: i64,
    /// Cadence of the voter's share submission retries.
    pub submit_retry: Duration,
    /// Cadence of the counter's partial-sum broadcast retries.
    pub broadcast_retry: Duration,
    /// How long a counter stays in Open waiting for the full voter set.
    pub voting_window: Duration,
    /// How long a counter stays in Ready waiting for threshold-many sums.
    pub exchange_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prime: DEFAULT_PRIME,
            submit_retry: Duration::from_millis(100),
            broadcast_retry: Duration::from_millis(500),
            voting_window: Duration::from_secs(3),
            exchange_window: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(val) = var("CRYPTOTALLY_PRIME") {
            config.prime = val
                .parse()
                .expect("CRYPTOTALLY_PRIME must be a prime that fits in an i64");
        }
        if let Ok(val) = var("CRYPTOTALLY_SUBMIT_RETRY_MS") {
            config.submit_retry = millis(&val, "CRYPTOTALLY_SUBMIT_RETRY_MS");
        }
        if let Ok(val) = var("CRYPTOTALLY_BROADCAST_RETRY_MS") {
            config.broadcast_retry = millis(&val, "CRYPTOTALLY_BROADCAST_RETRY_MS");
        }
        if let Ok(val) = var("CRYPTOTALLY_VOTING_WINDOW_MS") {
            config.voting_window = millis(&val, "CRYPTOTALLY_VOTING_WINDOW_MS");
        }
        if let Ok(val) = var("CRYPTOTALLY_EXCHANGE_WINDOW_MS") {
            config.exchange_window = millis(&val, "CRYPTOTALLY_EXCHANGE_WINDOW_MS");
        }

        config
    }
}

fn millis(val: &str, name: &str) -> Duration {
    let ms: u64 = val
        .parse()
        .unwrap_or_else(|_| panic!("{} must be an integer number of milliseconds", name));
    Duration::from_millis(ms)
}
