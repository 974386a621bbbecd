use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Named-timer recorder used to instrument resolution, probing and monitoring.
///
/// Timers are keyed by operation name. Only one timer per name can be open at
/// a time: calling [`start`](Self::start) twice for the same name without a
/// [`stop`](Self::stop) in between replaces the first start instant (last
/// start wins). A name may be started and stopped repeatedly; each completed
/// run adds to that name's accumulated duration and run count.
///
/// All durations come from [`Instant`], which is monotonic. The internal state
/// sits behind a mutex so one recorder can be shared through an `Arc` by
/// concurrent callers.
#[derive(Debug, Default)]
pub struct BenchmarkRecorder {
	inner: Mutex<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
	open: HashMap<String, Instant>,
	/// Completed records in order of first completion
	records: Vec<BenchmarkRecord>,
}

impl RecorderState {
	fn add_run(&mut self, name: &str, elapsed: Duration) {
		match self.records.iter_mut().find(|r| r.name == name) {
			Some(record) => {
				record.duration += elapsed;
				record.runs += 1;
			}
			None => self.records.push(BenchmarkRecord {
				name: name.to_string(),
				duration: elapsed,
				runs: 1,
			}),
		}
	}
}

/// Accumulated timing for one operation name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkRecord {
	pub name: String,
	pub duration: Duration,
	pub runs: u32,
}

/// Snapshot of all completed timers plus their sum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkReport {
	pub records: Vec<BenchmarkRecord>,
	pub total: Duration,
}

impl BenchmarkReport {
	/// Accumulated duration for a name, if it was ever stopped.
	pub fn get(&self, name: &str) -> Option<Duration> {
		self.records.iter()
			.find(|r| r.name == name)
			.map(|r| r.duration)
	}
}

impl BenchmarkRecorder {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, RecorderState> {
		// A panic while holding the lock cannot leave the maps half-updated,
		// so a poisoned lock is still safe to use.
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Open a timer for `name`, replacing any timer already open under it.
	pub fn start(&self, name: &str) {
		let mut state = self.state();
		if state.open.insert(name.to_string(), Instant::now()).is_some() {
			debug!(timer = name, "timer restarted before stop, keeping latest start");
		}
	}

	/// Close the timer for `name` and return the elapsed time of this run.
	///
	/// Fails with [`Error::Benchmark`] when no timer is open under `name`.
	pub fn stop(&self, name: &str) -> Result<Duration> {
		let mut state = self.state();
		let started = state.open.remove(name)
			.ok_or_else(|| Error::Benchmark(name.to_string()))?;
		let elapsed = started.elapsed();
		state.add_run(name, elapsed);
		debug!(timer = name, elapsed_ms = elapsed.as_millis() as u64, "timer stopped");
		Ok(elapsed)
	}

	/// Time a future under `name` and return its output.
	///
	/// The run is timed locally rather than through the open-timer map, so
	/// overlapping calls with the same name each record their own run.
	pub async fn measure<F, T>(&self, name: &str, fut: F) -> T
	where
		F: Future<Output = T>,
	{
		let started = Instant::now();
		let output = fut.await;
		let elapsed = started.elapsed();
		self.state().add_run(name, elapsed);
		debug!(timer = name, elapsed_ms = elapsed.as_millis() as u64, "measured");
		output
	}

	/// Whether a timer is currently open under `name`.
	pub fn is_running(&self, name: &str) -> bool {
		self.state().open.contains_key(name)
	}

	/// Build a report of every completed timer. Open timers are not included.
	pub fn report(&self) -> BenchmarkReport {
		let state = self.state();
		let records = state.records.clone();
		let total = records.iter().map(|r| r.duration).sum();
		BenchmarkReport { records, total }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn test_start_stop_records_duration() {
		let recorder = BenchmarkRecorder::new();
		recorder.start("lookup");
		std::thread::sleep(Duration::from_millis(5));
		let elapsed = recorder.stop("lookup").unwrap();
		assert!(elapsed >= Duration::from_millis(5));

		let report = recorder.report();
		assert_eq!(report.records.len(), 1);
		assert_eq!(report.get("lookup"), Some(elapsed));
		assert_eq!(report.total, elapsed);
	}

	#[test]
	fn test_stop_without_start_fails() {
		let recorder = BenchmarkRecorder::new();
		let err = recorder.stop("never-started").unwrap_err();
		assert_eq!(err, Error::Benchmark("never-started".to_string()));
	}

	#[test]
	fn test_double_stop_fails() {
		let recorder = BenchmarkRecorder::new();
		recorder.start("probe");
		recorder.stop("probe").unwrap();
		assert!(recorder.stop("probe").is_err());
	}

	#[test]
	fn test_restart_keeps_latest_start() {
		let recorder = BenchmarkRecorder::new();
		recorder.start("probe");
		std::thread::sleep(Duration::from_millis(30));
		recorder.start("probe");
		let elapsed = recorder.stop("probe").unwrap();
		// Measured from the second start, so well under the first sleep
		assert!(elapsed < Duration::from_millis(30));
		assert!(!recorder.is_running("probe"));
	}

	#[test]
	fn test_reused_name_accumulates() {
		let recorder = BenchmarkRecorder::new();
		let mut sum = Duration::ZERO;
		for _ in 0..3 {
			recorder.start("iteration");
			sum += recorder.stop("iteration").unwrap();
		}
		let report = recorder.report();
		assert_eq!(report.records[0].runs, 3);
		assert_eq!(report.records[0].duration, sum);
	}

	#[test]
	fn test_report_total_and_order() {
		let recorder = BenchmarkRecorder::new();
		recorder.start("resolve");
		recorder.start("probe");
		recorder.stop("probe").unwrap();
		recorder.stop("resolve").unwrap();
		// Open timers are not reported
		recorder.start("pending");

		let report = recorder.report();
		let names: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
		assert_eq!(names, vec!["probe", "resolve"]);
		let sum: Duration = report.records.iter().map(|r| r.duration).sum();
		assert_eq!(report.total, sum);
		assert_eq!(report.get("pending"), None);
	}

	#[tokio::test]
	async fn test_measure_async() {
		let recorder = BenchmarkRecorder::new();
		let value = recorder.measure("sleep", async {
			tokio::time::sleep(Duration::from_millis(5)).await;
			42
		}).await;
		assert_eq!(value, 42);
		assert!(recorder.report().get("sleep").unwrap() >= Duration::from_millis(5));
	}

	#[tokio::test]
	async fn test_overlapping_measure_same_name() {
		let recorder = Arc::new(BenchmarkRecorder::new());
		let spawn_run = |delay: u64| {
			let recorder = recorder.clone();
			tokio::spawn(async move {
				tokio::time::sleep(Duration::from_millis(delay)).await;
				recorder.measure("probe", tokio::time::sleep(Duration::from_millis(60))).await;
			})
		};
		let first = spawn_run(0);
		let second = spawn_run(30);
		first.await.unwrap();
		second.await.unwrap();

		let report = recorder.report();
		assert_eq!(report.records.len(), 1);
		assert_eq!(report.records[0].runs, 2);
		assert!(report.get("probe").unwrap() >= Duration::from_millis(120));
		assert!(!recorder.is_running("probe"));
	}

	#[tokio::test]
	async fn test_measure_leaves_manual_timer_alone() {
		let recorder = BenchmarkRecorder::new();
		recorder.start("resolve");
		recorder.measure("resolve", async {}).await;
		assert!(recorder.is_running("resolve"));
		recorder.stop("resolve").unwrap();
		assert_eq!(recorder.report().records[0].runs, 2);
	}

	#[test]
	fn test_shared_across_threads() {
		let recorder = Arc::new(BenchmarkRecorder::new());
		let handles: Vec<_> = (0..4)
			.map(|i| {
				let recorder = recorder.clone();
				std::thread::spawn(move || {
					let name = format!("worker-{}", i);
					recorder.start(&name);
					recorder.stop(&name).unwrap();
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}
		assert_eq!(recorder.report().records.len(), 4);
	}
}
