//! Coordinator timing configuration.

use std::time::Duration;

/// Timing knobs for election, failure detection and publishing.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long an election collects candidates before finalizing (default: 2s)
    pub election_settle: Duration,
    /// How often the host emits a heartbeat (default: 1s)
    pub heartbeat_interval: Duration,
    /// How often followers check host liveness (default: 3s)
    pub liveness_check_interval: Duration,
    /// Heartbeat silence after which the host is presumed dead (default: 5s)
    pub host_timeout: Duration,
    /// A snapshot seen within this window means a host is alive (default: 10s)
    pub state_guard_window: Duration,
    /// Minimum spacing between state publishes (default: 50ms, i.e. 20 Hz)
    pub publish_interval: Duration,
    /// Every Nth publish slot carries a full snapshot (default: 20)
    pub keyframe_every: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            election_settle: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(1),
            liveness_check_interval: Duration::from_secs(3),
            host_timeout: Duration::from_secs(5),
            state_guard_window: Duration::from_secs(10),
            publish_interval: Duration::from_millis(50),
            keyframe_every: 20,
        }
    }
}

pub(crate) fn ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(ms(config.election_settle), 2000);
        assert_eq!(ms(config.heartbeat_interval), 1000);
        assert_eq!(ms(config.liveness_check_interval), 3000);
        assert_eq!(ms(config.host_timeout), 5000);
        assert_eq!(ms(config.state_guard_window), 10_000);
        assert_eq!(ms(config.publish_interval), 50);
    }
}
