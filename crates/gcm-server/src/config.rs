use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Process configuration for the GCM HTTP/WebSocket front end. Follows
/// `task_queue::config::Config`'s shape: `clap::Parser` derive with
/// `env`-backed fields and `default_value`s, plus `Config::default()` and a
/// `#[cfg(test)]` constructor.
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "GCM_HOST", default_value = "127.0.0.1")]
	pub host: IpAddr,

	#[arg(long, env = "GCM_PORT", default_value = "8080")]
	pub port: u16,

	#[arg(long, env = "GCM_EVENT_RING_CAPACITY", default_value = "1000", help = "Max Lock/Conflict events retained per ring before drop-oldest")]
	pub event_ring_capacity: usize,

	#[arg(
        long = "monitor-interval-secs",
        env = "GCM_MONITOR_INTERVAL_SECS",
        default_value = "5",
        value_parser = parse_duration,
        help = "Background Monitor scan interval in seconds"
    )]
	pub monitor_interval: Duration,

	#[arg(long, env = "GCM_AUTO_RESOLVE", default_value_t = true, help = "Resolve detected deadlocks automatically")]
	pub auto_resolve: bool,

	#[arg(long, env = "GCM_DEFAULT_STRATEGY", default_value = "priority", help = "priority|youngest|oldest|random|manual")]
	pub default_strategy: String,

	#[arg(long = "default-acquire-timeout-secs", env = "GCM_DEFAULT_ACQUIRE_TIMEOUT_SECS", default_value = "30", value_parser = parse_duration)]
	pub default_acquire_timeout: Duration,
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}

	#[must_use]
	pub fn socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.host, self.port)
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			host: IpAddr::V4(Ipv4Addr::LOCALHOST),
			port: 0,
			event_ring_capacity: 16,
			monitor_interval: Duration::from_millis(50),
			auto_resolve: true,
			default_strategy: "priority".to_string(),
			default_acquire_timeout: Duration::from_secs(1),
		}
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
			port: 8080,
			event_ring_capacity: 1000,
			monitor_interval: Duration::from_secs(5),
			auto_resolve: true,
			default_strategy: "priority".to_string(),
			default_acquire_timeout: Duration::from_secs(30),
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_matches_documented_defaults() {
		let config = Config::default();
		assert_eq!(config.port, 8080);
		assert_eq!(config.event_ring_capacity, 1000);
		assert_eq!(config.monitor_interval, Duration::from_secs(5));
		assert!(config.auto_resolve);
	}

	#[test]
	fn parses_from_cli_args() {
		let args = ["program", "--port", "9090", "--monitor-interval-secs", "5", "--auto-resolve", "false", "--default-strategy", "youngest"];
		let config = Config::try_parse_from(args).unwrap();
		assert_eq!(config.port, 9090);
		assert_eq!(config.monitor_interval, Duration::from_secs(5));
		assert_eq!(config.default_strategy, "youngest");
	}

	#[test]
	fn test_config_is_fast_for_integration_tests() {
		let config = Config::test();
		assert_eq!(config.monitor_interval, Duration::from_millis(50));
	}
}
