use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::transport::QueryResult;

/// Propagation verdict derived from the agreement ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationStatus {
	FullyPropagated,
	MostlyPropagated,
	PartiallyPropagated,
	NotPropagated,
	Unknown,
}

impl PropagationStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			PropagationStatus::FullyPropagated => "FULLY_PROPAGATED",
			PropagationStatus::MostlyPropagated => "MOSTLY_PROPAGATED",
			PropagationStatus::PartiallyPropagated => "PARTIALLY_PROPAGATED",
			PropagationStatus::NotPropagated => "NOT_PROPAGATED",
			PropagationStatus::Unknown => "UNKNOWN",
		}
	}
}

impl fmt::Display for PropagationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Consistency summary of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
	pub responding_count: usize,
	pub total_count: usize,
	pub unique_value_count: usize,
	pub majority_value: Option<String>,
	/// Majority group size over responding servers, 0.0 when none responded
	pub agreement_ratio: f64,
	pub status: PropagationStatus,
}

/// Group answering servers by value, in order of first occurrence.
///
/// Only results with an OK outcome contribute.
pub fn value_groups(results: &[QueryResult]) -> Vec<(String, usize)> {
	let mut groups: Vec<(String, usize)> = Vec::new();
	for value in results.iter().filter_map(QueryResult::value) {
		match groups.iter_mut().find(|(v, _)| v == value) {
			Some((_, count)) => *count += 1,
			None => groups.push((value.to_string(), 1)),
		}
	}
	groups
}

/// Map a majority group size onto a status.
///
/// Thresholds: >= 90% fully, >= 70% mostly, >= 30% partially, otherwise not
/// propagated. Compared in integer percent space so exact boundaries such as
/// 9 of 10 land on the intended tier.
pub fn status_for(majority: usize, responding: usize) -> PropagationStatus {
	if responding == 0 {
		return PropagationStatus::Unknown;
	}
	let scaled = majority * 100;
	if scaled >= responding * 90 {
		PropagationStatus::FullyPropagated
	} else if scaled >= responding * 70 {
		PropagationStatus::MostlyPropagated
	} else if scaled >= responding * 30 {
		PropagationStatus::PartiallyPropagated
	} else {
		PropagationStatus::NotPropagated
	}
}

/// Classify a list of per-server results.
///
/// Pure function of its input. The majority value is the largest group; on a
/// tie the group whose value appeared first in registry order wins.
pub fn classify(results: &[QueryResult]) -> Classification {
	let groups = value_groups(results);
	let responding_count: usize = groups.iter().map(|(_, n)| n).sum();

	// Strictly greater keeps the earliest group on ties
	let mut majority: Option<&(String, usize)> = None;
	for group in &groups {
		if majority.map_or(true, |m| group.1 > m.1) {
			majority = Some(group);
		}
	}
	let majority_count = majority.map_or(0, |m| m.1);

	let agreement_ratio = if responding_count > 0 {
		majority_count as f64 / responding_count as f64
	} else {
		0.0
	};

	Classification {
		responding_count,
		total_count: results.len(),
		unique_value_count: groups.len(),
		majority_value: majority.map(|m| m.0.clone()),
		agreement_ratio,
		status: status_for(majority_count, responding_count),
	}
}

/// Latency figures over responding servers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
	pub p50_ms: f64,
	pub p95_ms: f64,
	pub mean_ms: f64,
	pub max_ms: f64,
}

/// Summarize latencies of the results that answered.
pub fn latency_summary(results: &[QueryResult]) -> LatencySummary {
	let mut latencies: Vec<f64> = results.iter()
		.filter(|r| r.is_ok())
		.map(|r| r.latency().as_secs_f64() * 1000.0)
		.collect();
	latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

	LatencySummary {
		p50_ms: nearest_rank(&latencies, 50.0).unwrap_or(0.0),
		p95_ms: nearest_rank(&latencies, 95.0).unwrap_or(0.0),
		mean_ms: average_ms(&latencies).unwrap_or(0.0),
		max_ms: latencies.last().copied().unwrap_or(0.0),
	}
}

/// Responding and total server counts for one region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionCount {
	pub responding: usize,
	pub total: usize,
}

/// Per-region counts, for display only; classification ignores regions.
pub fn region_breakdown(results: &[QueryResult]) -> BTreeMap<String, RegionCount> {
	let mut regions: BTreeMap<String, RegionCount> = BTreeMap::new();
	for r in results {
		let entry = regions.entry(r.server().region.clone()).or_default();
		entry.total += 1;
		if r.is_ok() {
			entry.responding += 1;
		}
	}
	regions
}

/// Nearest-rank percentile of ascending latencies: the smallest sample with
/// at least `pct` percent of samples at or below it.
pub fn nearest_rank(sorted_ms: &[f64], pct: f64) -> Option<f64> {
	let count = sorted_ms.len();
	let rank = ((pct / 100.0) * count as f64).ceil() as usize;
	sorted_ms.get(rank.clamp(1, count.max(1)) - 1).copied()
}

pub fn average_ms(samples: &[f64]) -> Option<f64> {
	if samples.is_empty() {
		None
	} else {
		Some(samples.iter().sum::<f64>() / samples.len() as f64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::QueryError;
	use crate::transport::ServerEntry;
	use std::time::Duration;

	fn server(i: usize) -> ServerEntry {
		ServerEntry {
			id: format!("s{}", i),
			addr: format!("192.0.2.{}:53", i + 1).parse().unwrap(),
			region: if i % 2 == 0 { "US".to_string() } else { "EU".to_string() },
			label: format!("Server {}", i),
		}
	}

	fn ok(i: usize, value: &str) -> QueryResult {
		QueryResult::answered(server(i), value.to_string(), Duration::from_millis(10 + i as u64))
	}

	fn timeout(i: usize) -> QueryResult {
		let d = Duration::from_secs(5);
		QueryResult::failed(server(i), &QueryError::Timeout(d), d)
	}

	#[test]
	fn test_partial_propagation_scenario() {
		// 10 agree, 6 distinct others
		let mut results: Vec<QueryResult> = (0..10).map(|i| ok(i, "93.184.216.34")).collect();
		for i in 10..16 {
			results.push(ok(i, &format!("198.51.100.{}", i)));
		}
		let c = classify(&results);
		assert_eq!(c.responding_count, 16);
		assert_eq!(c.total_count, 16);
		assert!(c.unique_value_count >= 2);
		assert_eq!(c.majority_value.as_deref(), Some("93.184.216.34"));
		assert!((c.agreement_ratio - 0.625).abs() < 1e-9);
		assert_eq!(c.status, PropagationStatus::PartiallyPropagated);
	}

	#[test]
	fn test_fully_propagated_scenario() {
		let results: Vec<QueryResult> = (0..16).map(|i| ok(i, "93.184.216.34")).collect();
		let c = classify(&results);
		assert_eq!(c.agreement_ratio, 1.0);
		assert_eq!(c.unique_value_count, 1);
		assert_eq!(c.status, PropagationStatus::FullyPropagated);
	}

	#[test]
	fn test_no_responders_is_unknown() {
		let results: Vec<QueryResult> = (0..16).map(timeout).collect();
		let c = classify(&results);
		assert_eq!(c.responding_count, 0);
		assert_eq!(c.total_count, 16);
		assert_eq!(c.majority_value, None);
		assert_eq!(c.agreement_ratio, 0.0);
		assert_eq!(c.status, PropagationStatus::Unknown);
	}

	#[test]
	fn test_empty_results_is_unknown() {
		let c = classify(&[]);
		assert_eq!(c.total_count, 0);
		assert_eq!(c.status, PropagationStatus::Unknown);
	}

	#[test]
	fn test_ratio_ignores_non_responders() {
		// 3 of 3 responders agree; 5 timeouts do not lower the ratio
		let mut results: Vec<QueryResult> = (0..3).map(|i| ok(i, "192.0.2.80")).collect();
		results.extend((3..8).map(timeout));
		let c = classify(&results);
		assert_eq!(c.responding_count, 3);
		assert_eq!(c.status, PropagationStatus::FullyPropagated);
	}

	#[test]
	fn test_tie_broken_by_first_occurrence() {
		let results = vec![
			ok(0, "192.0.2.2"),
			ok(1, "192.0.2.1"),
			ok(2, "192.0.2.1"),
			ok(3, "192.0.2.2"),
		];
		let c = classify(&results);
		assert_eq!(c.majority_value.as_deref(), Some("192.0.2.2"));
		assert!((c.agreement_ratio - 0.5).abs() < 1e-9);
	}

	#[test]
	fn test_threshold_boundaries() {
		assert_eq!(status_for(9, 10), PropagationStatus::FullyPropagated);
		assert_eq!(status_for(8, 10), PropagationStatus::MostlyPropagated);
		assert_eq!(status_for(7, 10), PropagationStatus::MostlyPropagated);
		assert_eq!(status_for(69, 100), PropagationStatus::PartiallyPropagated);
		assert_eq!(status_for(3, 10), PropagationStatus::PartiallyPropagated);
		assert_eq!(status_for(29, 100), PropagationStatus::NotPropagated);
		assert_eq!(status_for(0, 0), PropagationStatus::Unknown);
	}

	#[test]
	fn test_classify_is_deterministic() {
		let results = vec![ok(0, "a"), ok(1, "b"), timeout(2), ok(3, "b")];
		let first = classify(&results);
		for _ in 0..10 {
			assert_eq!(classify(&results), first);
		}
	}

	#[test]
	fn test_latency_summary_only_responders() {
		let results = vec![ok(0, "a"), ok(1, "a"), timeout(2)];
		let summary = latency_summary(&results);
		assert!((summary.max_ms - 11.0).abs() < 1e-6);
		assert!((summary.p50_ms - 10.0).abs() < 1e-6);
		assert!((summary.mean_ms - 10.5).abs() < 1e-6);
	}

	#[test]
	fn test_region_breakdown() {
		let results = vec![ok(0, "a"), ok(1, "a"), timeout(2), timeout(3)];
		let regions = region_breakdown(&results);
		assert_eq!(regions["US"], RegionCount { responding: 1, total: 2 });
		assert_eq!(regions["EU"], RegionCount { responding: 1, total: 2 });
	}

	#[test]
	fn test_nearest_rank() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
		assert_eq!(nearest_rank(&values, 50.0), Some(5.0));
		assert_eq!(nearest_rank(&values, 95.0), Some(10.0));
		assert_eq!(nearest_rank(&values, 10.0), Some(1.0));
	}

	#[test]
	fn test_nearest_rank_empty() {
		let values: Vec<f64> = vec![];
		assert_eq!(nearest_rank(&values, 50.0), None);
	}

	#[test]
	fn test_average_ms() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
		assert_eq!(average_ms(&values), Some(3.0));
	}
}
