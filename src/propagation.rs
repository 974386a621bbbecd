use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bench::BenchmarkRecorder;
use crate::dns::{normalize_answer, RecordType};
use crate::error::{Error, QueryError, Result};
use crate::registry::Registry;
use crate::stats::{
	classify, latency_summary, region_breakdown, value_groups,
	Classification, LatencySummary, RegionCount,
};
use crate::transport::{DnsTransport, QueryResult, ServerEntry};

/// Per-server results for one point-in-time propagation check.
///
/// Results are in registry order, one per entry, whatever order the queries
/// completed in. The unique values and classification are computed once on
/// construction and cannot change afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct PropagationSnapshot {
	domain: String,
	record_type: RecordType,
	timestamp: DateTime<Utc>,
	results: Vec<QueryResult>,
	unique_values: Vec<String>,
	classification: Classification,
	elapsed: Duration,
}

impl PropagationSnapshot {
	pub fn new(
		domain: impl Into<String>,
		record_type: RecordType,
		results: Vec<QueryResult>,
		elapsed: Duration,
	) -> Self {
		let unique_values = value_groups(&results).into_iter()
			.map(|(value, _)| value)
			.collect();
		let classification = classify(&results);
		Self {
			domain: domain.into(),
			record_type,
			timestamp: Utc::now(),
			results,
			unique_values,
			classification,
			elapsed,
		}
	}

	pub fn domain(&self) -> &str {
		&self.domain
	}

	pub fn record_type(&self) -> RecordType {
		self.record_type
	}

	pub fn timestamp(&self) -> DateTime<Utc> {
		self.timestamp
	}

	pub fn results(&self) -> &[QueryResult] {
		&self.results
	}

	/// Distinct answers, in order of first occurrence
	pub fn unique_values(&self) -> &[String] {
		&self.unique_values
	}

	pub fn classification(&self) -> &Classification {
		&self.classification
	}

	pub fn majority_value(&self) -> Option<&str> {
		self.classification.majority_value.as_deref()
	}

	/// Wall-clock time the probe took
	pub fn elapsed(&self) -> Duration {
		self.elapsed
	}

	pub fn result_for(&self, server_id: &str) -> Option<&QueryResult> {
		self.results.iter().find(|r| r.server().id == server_id)
	}

	pub fn latency(&self) -> LatencySummary {
		latency_summary(&self.results)
	}

	pub fn regions(&self) -> BTreeMap<String, RegionCount> {
		region_breakdown(&self.results)
	}
}

/// Fans one query out to every registry entry and collects a snapshot.
///
/// Each server runs in its own task under its own deadline, so the cost of a
/// probe is bounded by the per-server timeout rather than the number of
/// servers that hang.
#[derive(Clone)]
pub struct PropagationProber {
	registry: Arc<Registry>,
	transport: Arc<dyn DnsTransport>,
	timeout: Duration,
	recorder: Option<Arc<BenchmarkRecorder>>,
}

impl PropagationProber {
	pub fn new(registry: Arc<Registry>, transport: Arc<dyn DnsTransport>, timeout: Duration) -> Self {
		Self {
			registry,
			transport,
			timeout,
			recorder: None,
		}
	}

	/// Record each probe's duration under "propagation.probe".
	pub fn with_recorder(mut self, recorder: Arc<BenchmarkRecorder>) -> Self {
		self.recorder = Some(recorder);
		self
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Query every registry entry for `record_type` of `domain`.
	///
	/// Per-server failures and timeouts end up in the snapshot as
	/// non-responding results. Only invalid input is an error.
	pub async fn probe(&self, domain: &str, record_type: RecordType) -> Result<PropagationSnapshot> {
		let domain = domain.trim();
		if domain.is_empty() {
			return Err(Error::config("domain must not be empty"));
		}
		if self.timeout.is_zero() {
			return Err(Error::config("per-server timeout must be greater than zero"));
		}

		match &self.recorder {
			Some(recorder) => Ok(recorder.measure("propagation.probe", self.fan_out(domain, record_type)).await),
			None => Ok(self.fan_out(domain, record_type).await),
		}
	}

	async fn fan_out(&self, domain: &str, record_type: RecordType) -> PropagationSnapshot {
		let started = Instant::now();
		let servers = self.registry.entries();

		// One task per registry entry
		let mut handles = Vec::with_capacity(servers.len());
		for server in servers {
			let transport = Arc::clone(&self.transport);
			let server = server.clone();
			let domain = domain.to_string();
			let timeout = self.timeout;

			handles.push(tokio::spawn(async move {
				query_server(transport.as_ref(), server, &domain, record_type, timeout).await
			}));
		}

		// Awaiting in spawn order fills one slot per entry in registry order
		let mut results = Vec::with_capacity(servers.len());
		for (handle, server) in handles.into_iter().zip(servers) {
			match handle.await {
				Ok(result) => results.push(result),
				Err(e) => {
					warn!(server = %server.id, error = %e, "query task failed");
					let err = QueryError::failed(format!("query task failed: {}", e));
					results.push(QueryResult::failed(server.clone(), &err, started.elapsed()));
				}
			}
		}

		let snapshot = PropagationSnapshot::new(domain, record_type, results, started.elapsed());
		let c = snapshot.classification();
		info!(
			%domain,
			%record_type,
			status = %c.status,
			responding = c.responding_count,
			total = c.total_count,
			unique = c.unique_value_count,
			"propagation snapshot",
		);
		snapshot
	}
}

/// Query one server under a hard deadline and normalize its answer.
async fn query_server(
	transport: &dyn DnsTransport,
	server: ServerEntry,
	domain: &str,
	record_type: RecordType,
	timeout: Duration,
) -> QueryResult {
	let start = Instant::now();
	let outcome = tokio::time::timeout(timeout, transport.query(&server, domain, record_type, timeout)).await;
	let latency = start.elapsed();

	match outcome {
		Ok(Ok(values)) => {
			let value = normalize_answer(record_type, &values);
			debug!(server = %server.id, %value, latency_ms = latency.as_millis() as u64, "server answered");
			QueryResult::answered(server, value, latency)
		}
		Ok(Err(e)) => {
			debug!(server = %server.id, error = %e, "server query failed");
			QueryResult::failed(server, &e, latency)
		}
		Err(_) => {
			debug!(server = %server.id, "server query timed out");
			QueryResult::failed(server, &QueryError::Timeout(timeout), latency)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::parse_server;
	use crate::stats::PropagationStatus;
	use crate::transport::QueryOutcome;
	use async_trait::async_trait;
	use std::collections::HashMap;

	/// Per-server scripted behaviour
	#[derive(Clone)]
	enum Reply {
		Values(Vec<&'static str>, Duration),
		Fail,
		Hang,
	}

	struct ScriptedTransport {
		replies: HashMap<String, Reply>,
	}

	#[async_trait]
	impl DnsTransport for ScriptedTransport {
		async fn query(
			&self,
			server: &ServerEntry,
			_domain: &str,
			_record_type: RecordType,
			_timeout: Duration,
		) -> std::result::Result<Vec<String>, QueryError> {
			match self.replies.get(&server.id).cloned().unwrap_or(Reply::Fail) {
				Reply::Values(values, delay) => {
					tokio::time::sleep(delay).await;
					Ok(values.into_iter().map(String::from).collect())
				}
				Reply::Fail => Err(QueryError::failed("SERVFAIL")),
				Reply::Hang => std::future::pending().await,
			}
		}
	}

	fn registry(n: usize) -> Arc<Registry> {
		let mut registry = Registry::new();
		for i in 0..n {
			registry.push(parse_server(&format!("192.0.2.{} US S{}", i + 1, i)).unwrap()).unwrap();
		}
		Arc::new(registry)
	}

	fn prober(n: usize, replies: Vec<Reply>, timeout: Duration) -> PropagationProber {
		let registry = registry(n);
		let replies = registry.entries().iter()
			.map(|e| e.id.clone())
			.zip(replies)
			.collect();
		PropagationProber::new(registry, Arc::new(ScriptedTransport { replies }), timeout)
	}

	#[tokio::test(start_paused = true)]
	async fn test_hung_servers_do_not_extend_probe() {
		let timeout = Duration::from_secs(2);
		let mut replies = vec![Reply::Values(vec!["192.0.2.80"], Duration::from_millis(50)); 4];
		replies.extend(vec![Reply::Hang; 12]);
		let prober = prober(16, replies, timeout);

		let start = Instant::now();
		let snapshot = prober.probe("example.com", RecordType::A).await.unwrap();
		let elapsed = start.elapsed();

		assert!(elapsed >= timeout);
		assert!(elapsed < timeout + Duration::from_millis(100), "probe took {:?}", elapsed);
		let timeouts = snapshot.results().iter()
			.filter(|r| r.outcome() == QueryOutcome::Timeout)
			.count();
		assert_eq!(timeouts, 12);
		assert_eq!(snapshot.classification().responding_count, 4);
		assert_eq!(snapshot.classification().status, PropagationStatus::FullyPropagated);
	}

	#[tokio::test(start_paused = true)]
	async fn test_results_follow_registry_order() {
		// Later entries answer first
		let replies = (0..5)
			.map(|i| Reply::Values(vec!["192.0.2.80"], Duration::from_millis(500 - i * 100)))
			.collect();
		let prober = prober(5, replies, Duration::from_secs(1));
		let snapshot = prober.probe("example.com", RecordType::A).await.unwrap();

		let ids: Vec<&str> = snapshot.results().iter().map(|r| r.server().id.as_str()).collect();
		let expected: Vec<&str> = prober.registry().entries().iter().map(|e| e.id.as_str()).collect();
		assert_eq!(ids, expected);
	}

	#[tokio::test(start_paused = true)]
	async fn test_values_normalized_before_comparison() {
		let replies = vec![
			Reply::Values(vec!["Mail.Example.com.", "backup.example.com."], Duration::ZERO),
			Reply::Values(vec!["backup.example.com", "mail.example.com"], Duration::ZERO),
			Reply::Fail,
		];
		let prober = prober(3, replies, Duration::from_secs(1));
		let snapshot = prober.probe("example.com", RecordType::CNAME).await.unwrap();

		assert_eq!(snapshot.unique_values().len(), 1);
		assert_eq!(snapshot.majority_value(), Some("backup.example.com | mail.example.com"));
		let failed = snapshot.result_for("192.0.2.3").unwrap();
		assert_eq!(failed.outcome(), QueryOutcome::Error);
		assert_eq!(failed.value(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_all_timeouts_yield_unknown() {
		let prober = prober(16, vec![Reply::Hang; 16], Duration::from_secs(1));
		let snapshot = prober.probe("example.com", RecordType::A).await.unwrap();
		assert_eq!(snapshot.results().len(), 16);
		assert_eq!(snapshot.classification().responding_count, 0);
		assert_eq!(snapshot.classification().status, PropagationStatus::Unknown);
	}

	#[tokio::test]
	async fn test_empty_domain_rejected() {
		let prober = prober(1, vec![Reply::Fail], Duration::from_secs(1));
		assert!(matches!(prober.probe("  ", RecordType::A).await, Err(Error::Configuration(_))));
	}

	#[tokio::test]
	async fn test_zero_timeout_rejected() {
		let prober = prober(1, vec![Reply::Fail], Duration::ZERO);
		assert!(prober.probe("example.com", RecordType::A).await.is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_probe_recorded_in_benchmark() {
		let recorder = Arc::new(BenchmarkRecorder::new());
		let prober = prober(2, vec![Reply::Fail, Reply::Fail], Duration::from_secs(1))
			.with_recorder(recorder.clone());
		prober.probe("example.com", RecordType::TXT).await.unwrap();
		prober.probe("example.com", RecordType::TXT).await.unwrap();
		let report = recorder.report();
		assert_eq!(report.records[0].name, "propagation.probe");
		assert_eq!(report.records[0].runs, 2);
	}
}
