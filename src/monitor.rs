use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dns::RecordType;
use crate::error::{Error, Result};
use crate::propagation::{PropagationProber, PropagationSnapshot};

/// Cooperative cancellation flag for a monitoring session.
///
/// Cancelling never interrupts an in-flight snapshot; the monitor finishes
/// it, keeps it in history, and then stops instead of sleeping again.
#[derive(Debug, Clone)]
pub struct CancelHandle {
	tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
	fn new() -> Self {
		let (tx, _rx) = watch::channel(false);
		Self { tx: Arc::new(tx) }
	}

	pub fn cancel(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		*self.tx.borrow()
	}

	fn subscribe(&self) -> watch::Receiver<bool> {
		self.tx.subscribe()
	}
}

/// Parameters and accumulated history of one monitoring run
#[derive(Debug)]
pub struct MonitorSession {
	domain: String,
	record_type: RecordType,
	interval: Duration,
	/// 0 means unbounded
	max_iterations: u64,
	history: Vec<PropagationSnapshot>,
	cancel: CancelHandle,
}

impl MonitorSession {
	pub fn new(
		domain: impl Into<String>,
		record_type: RecordType,
		interval: Duration,
		max_iterations: u64,
	) -> Result<Self> {
		let domain = domain.into().trim().to_string();
		if domain.is_empty() {
			return Err(Error::config("domain must not be empty"));
		}
		if interval.is_zero() {
			return Err(Error::config("monitor interval must be greater than zero"));
		}
		Ok(Self {
			domain,
			record_type,
			interval,
			max_iterations,
			history: Vec::new(),
			cancel: CancelHandle::new(),
		})
	}

	pub fn from_settings(domain: impl Into<String>, settings: &Settings) -> Result<Self> {
		settings.validate()?;
		Self::new(domain, settings.record_type, settings.monitor_interval, settings.max_iterations)
	}

	pub fn domain(&self) -> &str {
		&self.domain
	}

	pub fn record_type(&self) -> RecordType {
		self.record_type
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	pub fn max_iterations(&self) -> u64 {
		self.max_iterations
	}

	/// Snapshots taken so far, oldest first
	pub fn history(&self) -> &[PropagationSnapshot] {
		&self.history
	}

	pub fn into_history(self) -> Vec<PropagationSnapshot> {
		self.history
	}

	pub fn cancel_handle(&self) -> CancelHandle {
		self.cancel.clone()
	}
}

/// One step of a monitoring run
#[derive(Debug)]
pub struct MonitorTick<'a> {
	/// 1-based count of probes started, including failed ones
	pub iteration: u64,
	pub snapshot: &'a PropagationSnapshot,
	/// Majority value differs from the preceding snapshot's
	pub changed: bool,
	pub previous_majority: Option<&'a str>,
	/// Values present now but not in the preceding snapshot
	pub appeared: Vec<String>,
	/// Values present in the preceding snapshot but gone now
	pub vanished: Vec<String>,
}

/// Whether the majority value moved between two snapshots.
///
/// Having no majority (nobody answered) is a value of its own, so a record
/// that disappears everywhere or shows up from nothing counts as a change.
pub fn majority_changed(previous: &PropagationSnapshot, current: &PropagationSnapshot) -> bool {
	previous.majority_value() != current.majority_value()
}

fn value_diff(previous: &PropagationSnapshot, current: &PropagationSnapshot) -> (Vec<String>, Vec<String>) {
	let appeared = current.unique_values().iter()
		.filter(|v| !previous.unique_values().contains(v))
		.cloned()
		.collect();
	let vanished = previous.unique_values().iter()
		.filter(|v| !current.unique_values().contains(v))
		.cloned()
		.collect();
	(appeared, vanished)
}

/// Repeats propagation probes on an interval and flags majority changes.
///
/// Snapshots are taken one at a time so history is strictly time-ordered.
/// The monitor sleeps only between snapshots: never before the first, never
/// after the last, and a cancellation during a sleep ends it immediately.
pub struct Monitor {
	prober: PropagationProber,
	session: MonitorSession,
	cancel_rx: watch::Receiver<bool>,
	iterations: u64,
}

impl Monitor {
	pub fn new(prober: PropagationProber, session: MonitorSession) -> Self {
		let cancel_rx = session.cancel.subscribe();
		Self {
			prober,
			session,
			cancel_rx,
			iterations: 0,
		}
	}

	pub fn cancel_handle(&self) -> CancelHandle {
		self.session.cancel_handle()
	}

	pub fn session(&self) -> &MonitorSession {
		&self.session
	}

	pub fn iterations(&self) -> u64 {
		self.iterations
	}

	fn limit_reached(&self) -> bool {
		self.session.max_iterations > 0 && self.iterations >= self.session.max_iterations
	}

	/// Sleep for the interval; false if cancelled first.
	async fn pause(&mut self) -> bool {
		let interval = self.session.interval;
		tokio::select! {
			_ = tokio::time::sleep(interval) => true,
			_ = self.cancel_rx.wait_for(|cancelled| *cancelled) => false,
		}
	}

	/// Take the next snapshot, or `None` once the session is over.
	///
	/// A probe that fails outright is logged and counted as an iteration but
	/// does not end the session.
	pub async fn next(&mut self) -> Option<MonitorTick<'_>> {
		loop {
			if self.limit_reached() || self.session.cancel.is_cancelled() {
				return None;
			}
			if self.iterations > 0 && !self.pause().await {
				info!(domain = %self.session.domain, "monitoring cancelled");
				return None;
			}
			if self.session.cancel.is_cancelled() {
				return None;
			}

			self.iterations += 1;
			let probe = self.prober.probe(&self.session.domain, self.session.record_type).await;
			match probe {
				Ok(snapshot) => {
					self.session.history.push(snapshot);
					break;
				}
				Err(e) => {
					warn!(
						domain = %self.session.domain,
						iteration = self.iterations,
						error = %e,
						"propagation probe failed, continuing",
					);
				}
			}
		}

		let iteration = self.iterations;
		let (current, earlier) = self.session.history.split_last()?;
		let previous = earlier.last();
		let changed = previous.map_or(false, |p| majority_changed(p, current));
		let (appeared, vanished) = previous
			.map(|p| value_diff(p, current))
			.unwrap_or_default();

		if changed {
			warn!(
				domain = %self.session.domain,
				from = previous.and_then(|p| p.majority_value()).unwrap_or(""),
				to = current.majority_value().unwrap_or(""),
				"majority value changed",
			);
		}

		Some(MonitorTick {
			iteration,
			snapshot: current,
			changed,
			previous_majority: previous.and_then(|p| p.majority_value()),
			appeared,
			vanished,
		})
	}

	/// Drive the session to completion, calling `on_tick` for every snapshot.
	///
	/// Returns the full history whether the run ended on its iteration limit
	/// or through cancellation.
	pub async fn run<F>(mut self, mut on_tick: F) -> Vec<PropagationSnapshot>
	where
		F: FnMut(&MonitorTick<'_>),
	{
		while let Some(tick) = self.next().await {
			on_tick(&tick);
		}
		self.session.into_history()
	}

	pub fn into_history(self) -> Vec<PropagationSnapshot> {
		self.session.into_history()
	}
}
