//! Error types for resolution, probing, monitoring and benchmarking.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of the library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// Every resolution method was exhausted without an acceptable address
	#[error("could not resolve '{domain}' (tried: {})", format_attempted(.attempted))]
	Resolution {
		domain: String,
		attempted: Vec<String>,
	},

	/// A benchmark timer was stopped without a matching start
	#[error("benchmark timer '{0}' was stopped without being started")]
	Benchmark(String),

	/// Invalid settings or input, raised before any network activity
	#[error("configuration error: {0}")]
	Configuration(String),
}

impl Error {
	/// Create a configuration error
	pub fn config(msg: impl Into<String>) -> Self {
		Self::Configuration(msg.into())
	}
}

fn format_attempted(attempted: &[String]) -> String {
	if attempted.is_empty() {
		"no method available".to_string()
	} else {
		attempted.join(", ")
	}
}

/// Failure of a single query against a single server or resolution method.
///
/// Never escalated past the query that produced it: the prober records it as
/// a non-responding result and the resolver moves on to its next attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
	#[error("query timed out after {} ms", .0.as_millis())]
	Timeout(Duration),

	#[error("query failed: {0}")]
	Failed(String),
}

impl QueryError {
	pub fn failed(msg: impl Into<String>) -> Self {
		Self::Failed(msg.into())
	}
}
