use std::time::Duration;

use crate::link::{DEFAULT_BAUD_RATE, LinkTransport, NetworkTransport, SerialTransport};

/// Where the bus is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    Serial { port_name: String, baud_rate: u32 },
    Network { host: String, port: u16 },
}

impl LinkConfig {
    pub fn serial(port_name: impl Into<String>) -> Self {
        LinkConfig::Serial {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn network(host: impl Into<String>, port: u16) -> Self {
        LinkConfig::Network {
            host: host.into(),
            port,
        }
    }

    /// Builds the (closed) transport this configuration describes.
    pub fn transport(&self, config: &BridgeConfig) -> Box<dyn LinkTransport> {
        match self {
            LinkConfig::Serial {
                port_name,
                baud_rate,
            } => Box::new(SerialTransport::new(
                port_name.clone(),
                *baud_rate,
                config.read_timeout,
            )),
            LinkConfig::Network { host, port } => Box::new(NetworkTransport::new(
                host.clone(),
                *port,
                config.read_timeout,
                config.connect_timeout,
            )),
        }
    }
}

/// Delay between connection attempts: `initial_interval` doubling per consecutive failure,
/// capped at `max_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Consecutive failed attempts after which the session gives up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failed attempts, or `None`
    /// once the attempts are exhausted. The first retry, and a reconnect after losing an
    /// established link (`failures == 0`), waits `initial_interval`.
    pub fn delay(&self, failures: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| failures >= max) {
            return None;
        }

        let doublings = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        Some(
            self.initial_interval
                .saturating_mul(factor)
                .min(self.max_interval),
        )
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub link: LinkConfig,
    pub reconnect: ReconnectPolicy,
    pub max_queue_depth: usize,
    /// Minimum gap between two frames written to the bus.
    pub min_send_interval: Duration,
    /// Longest a read blocks before the worker checks its queue again.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Broadcast the host time to every module this often, starting at each connect.
    pub clock_sync_interval: Option<Duration>,
}

impl BridgeConfig {
    pub fn new(link: LinkConfig) -> Self {
        Self {
            link,
            reconnect: ReconnectPolicy::default(),
            max_queue_depth: 256,
            min_send_interval: Duration::ZERO,
            read_timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(5),
            clock_sync_interval: None,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_reconnect_interval_ms(mut self, interval: u64) -> Self {
        self.reconnect.initial_interval = Duration::from_millis(interval);
        self.reconnect.max_interval = self
            .reconnect
            .max_interval
            .max(self.reconnect.initial_interval);
        self
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth.max(1);
        self
    }

    pub fn with_min_send_interval(mut self, interval: Duration) -> Self {
        self.min_send_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_clock_sync_interval(mut self, interval: Duration) -> Self {
        self.clock_sync_interval = Some(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            max_attempts: None,
        };

        let delays: Vec<_> = (1..=5).map(|n| policy.delay(n).unwrap()).collect();
        assert_eq!(delays, [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec());
        assert_eq!(policy.delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(200), Some(Duration::from_secs(5)));
    }

    #[test]
    fn backoff_gives_up_after_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };

        assert!(policy.delay(2).is_some());
        assert!(policy.delay(3).is_none());
    }

    #[test]
    fn serial_defaults_to_velbus_baud_rate() {
        assert_eq!(
            LinkConfig::serial("/dev/ttyACM0"),
            LinkConfig::Serial {
                port_name: String::from("/dev/ttyACM0"),
                baud_rate: 38_400
            }
        );
    }

    #[test]
    fn builder_options() {
        let config = BridgeConfig::new(LinkConfig::network("velserv.local", 6000))
            .with_reconnect_interval_ms(500_000)
            .with_max_queue_depth(0)
            .with_clock_sync_interval(Duration::from_secs(3600));

        assert_eq!(config.reconnect.initial_interval, Duration::from_secs(500));
        assert_eq!(config.reconnect.max_interval, Duration::from_secs(500));
        assert_eq!(config.max_queue_depth, 1);
        assert_eq!(config.clock_sync_interval, Some(Duration::from_secs(3600)));

        let transport = config.link.transport(&config);
        assert_eq!(transport.describe(), "network bridge velserv.local:6000");
        assert!(!transport.is_open());
    }
}
