//! Runtime settings shared by the resolver, prober and monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dns::RecordType;
use crate::error::{Error, Result};

/// Per-attempt resolver timeout
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-server propagation query timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Settings supplied by the command layer.
///
/// Call [`Settings::validate`] before using them; nothing touches the network
/// until validation has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub record_type: RecordType,
	pub resolver_timeout: Duration,
	/// Extra attempts per resolution method after the first one fails
	pub resolver_retries: u32,
	pub retry_backoff: Duration,
	pub probe_timeout: Duration,
	pub monitor_interval: Duration,
	/// Snapshots to take while monitoring, 0 for no limit
	pub max_iterations: u64,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			record_type: RecordType::A,
			resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
			resolver_retries: 1,
			retry_backoff: DEFAULT_RETRY_BACKOFF,
			probe_timeout: DEFAULT_PROBE_TIMEOUT,
			monitor_interval: DEFAULT_MONITOR_INTERVAL,
			max_iterations: 0,
		}
	}
}

/// Upper bound on resolver retries; more than this only delays the fallback chain
const MAX_RESOLVER_RETRIES: u32 = 5;

impl Settings {
	/// Validate the settings
	pub fn validate(&self) -> Result<()> {
		if self.resolver_timeout.is_zero() {
			return Err(Error::config("resolver timeout must be greater than zero"));
		}
		if self.probe_timeout.is_zero() {
			return Err(Error::config("probe timeout must be greater than zero"));
		}
		if self.monitor_interval.is_zero() {
			return Err(Error::config("monitor interval must be greater than zero"));
		}
		if self.resolver_retries > MAX_RESOLVER_RETRIES {
			return Err(Error::config(format!(
				"resolver retries must be at most {} (got {})",
				MAX_RESOLVER_RETRIES, self.resolver_retries,
			)));
		}
		Ok(())
	}
}
