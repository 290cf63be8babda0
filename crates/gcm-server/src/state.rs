use crate::config::Config;
use gcm_core::{BackgroundMonitor, GlobalConcurrencyManager, Strategy};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Shared process state, wired once in `main` and cloned into every axum
/// handler via `State` (mirrors `nest::http::serve::ApiContext`).
#[derive(Clone)]
pub struct AppState {
	pub gcm: GlobalConcurrencyManager,
	pub monitor: Arc<BackgroundMonitor>,
	pub default_strategy: Strategy,
	pub default_acquire_timeout: Duration,
}

impl AppState {
	#[must_use]
	pub fn new(config: &Config) -> Self {
		let gcm = GlobalConcurrencyManager::new(config.event_ring_capacity);
		let default_strategy = Strategy::from_str(&config.default_strategy).unwrap_or(Strategy::PriorityBased);
		let monitor = Arc::new(gcm.spawn_monitor(config.monitor_interval, config.auto_resolve, default_strategy));

		Self {
			gcm,
			monitor,
			default_strategy,
			default_acquire_timeout: config.default_acquire_timeout,
		}
	}
}
