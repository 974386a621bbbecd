use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::dns::RecordType;
use crate::error::QueryError;

/// One probe target in the server registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEntry {
	/// Stable identifier used to key results across snapshots
	pub id: String,
	pub addr: SocketAddr,
	/// Region code, for presentation only
	pub region: String,
	pub label: String,
}

/// Outcome of a single per-server query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryOutcome {
	Ok,
	Timeout,
	Error,
}

impl QueryOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			QueryOutcome::Ok => "OK",
			QueryOutcome::Timeout => "TIMEOUT",
			QueryOutcome::Error => "ERROR",
		}
	}
}

/// Result of querying one registry entry.
///
/// `value` is `Some` (and non-empty) exactly when `outcome` is
/// [`QueryOutcome::Ok`]; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
	server: ServerEntry,
	value: Option<String>,
	latency: Duration,
	outcome: QueryOutcome,
	error: Option<String>,
}

impl QueryResult {
	/// Successful answer. An empty value is recorded as an error instead.
	pub fn answered(server: ServerEntry, value: String, latency: Duration) -> Self {
		if value.is_empty() {
			return Self::failed(server, &QueryError::failed("empty answer"), latency);
		}
		Self {
			server,
			value: Some(value),
			latency,
			outcome: QueryOutcome::Ok,
			error: None,
		}
	}

	pub fn failed(server: ServerEntry, err: &QueryError, latency: Duration) -> Self {
		let outcome = match err {
			QueryError::Timeout(_) => QueryOutcome::Timeout,
			QueryError::Failed(_) => QueryOutcome::Error,
		};
		Self {
			server,
			value: None,
			latency,
			outcome,
			error: Some(err.to_string()),
		}
	}

	pub fn server(&self) -> &ServerEntry {
		&self.server
	}

	pub fn value(&self) -> Option<&str> {
		self.value.as_deref()
	}

	pub fn latency(&self) -> Duration {
		self.latency
	}

	pub fn outcome(&self) -> QueryOutcome {
		self.outcome
	}

	pub fn error(&self) -> Option<&str> {
		self.error.as_deref()
	}

	pub fn is_ok(&self) -> bool {
		self.outcome == QueryOutcome::Ok
	}
}

/// Sends one record query to one server.
///
/// Implementations return the raw answer values; the prober normalizes them
/// and enforces the per-server deadline, so a transport that never returns is
/// still cut off.
#[async_trait]
pub trait DnsTransport: Send + Sync {
	async fn query(
		&self,
		server: &ServerEntry,
		domain: &str,
		record_type: RecordType,
		timeout: Duration,
	) -> Result<Vec<String>, QueryError>;
}
