//! Resolution of a domain to a single address through an ordered fallback
//! chain of methods.
//!
//! The default chain is:
//!
//! 1. `local`  -- nameservers from /etc/resolv.conf, queried directly
//! 2. `public` -- well-known public resolvers, queried directly
//! 3. `system` -- the platform's getaddrinfo
//! 4. `doh`    -- DNS-over-HTTPS JSON API
//!
//! The first method that yields a syntactically valid IPv4/IPv6 address wins.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bench::BenchmarkRecorder;
use crate::config::Settings;
use crate::dns::{build_resolver, lookup_first_address};
use crate::error::{Error, QueryError, Result};
use crate::registry::{public_resolvers, system_nameservers};

/// Default DNS-over-HTTPS JSON endpoint
pub const DEFAULT_DOH_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";

/// One strategy in the fallback chain.
///
/// Priority is the method's position in the resolver's list. A method may
/// return any string; the resolver decides whether it is a usable address.
#[async_trait]
pub trait ResolutionMethod: Send + Sync {
	fn name(&self) -> &str;

	/// Whether this method can run in the current environment
	fn is_available(&self) -> bool {
		true
	}

	async fn attempt(&self, domain: &str, timeout: Duration) -> std::result::Result<String, QueryError>;
}

/// Direct queries against a fixed set of nameservers
pub struct NameserverMethod {
	name: String,
	nameservers: Vec<SocketAddr>,
}

impl NameserverMethod {
	pub fn new(name: impl Into<String>, nameservers: Vec<SocketAddr>) -> Self {
		Self { name: name.into(), nameservers }
	}

	/// The host's configured nameservers
	pub fn local() -> Self {
		Self::new("local", system_nameservers())
	}

	/// Well-known public resolvers
	pub fn public() -> Self {
		Self::new("public", public_resolvers())
	}
}

#[async_trait]
impl ResolutionMethod for NameserverMethod {
	fn name(&self) -> &str {
		&self.name
	}

	fn is_available(&self) -> bool {
		!self.nameservers.is_empty()
	}

	async fn attempt(&self, domain: &str, timeout: Duration) -> std::result::Result<String, QueryError> {
		let resolver = build_resolver(&self.nameservers, timeout);
		lookup_first_address(&resolver, domain).await
	}
}

/// Hostname lookup through the platform resolver library
#[derive(Debug, Default)]
pub struct SystemLookupMethod;

#[async_trait]
impl ResolutionMethod for SystemLookupMethod {
	fn name(&self) -> &str {
		"system"
	}

	async fn attempt(&self, domain: &str, _timeout: Duration) -> std::result::Result<String, QueryError> {
		let host = domain.to_string();
		// getaddrinfo blocks; the resolver's deadline abandons the task if it hangs
		let addrs = tokio::task::spawn_blocking(move || {
			(host.as_str(), 0u16)
				.to_socket_addrs()
				.map(|iter| iter.collect::<Vec<_>>())
		})
		.await
		.map_err(|e| QueryError::failed(format!("lookup task failed: {}", e)))?
		.map_err(|e| QueryError::failed(e.to_string()))?;

		addrs.first()
			.map(|addr| addr.ip().to_string())
			.ok_or_else(|| QueryError::failed("no addresses returned by getaddrinfo"))
	}
}

/// DNS-over-HTTPS using the `application/dns-json` API
pub struct DohMethod {
	client: reqwest::Client,
	endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
	#[serde(rename = "Status")]
	status: u16,
	#[serde(rename = "Answer", default)]
	answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
	#[serde(rename = "type")]
	record_type: u16,
	data: String,
}

const DOH_TYPE_A: u16 = 1;
const DOH_TYPE_AAAA: u16 = 28;

impl DohMethod {
	pub fn new(endpoint: impl Into<String>) -> Result<Self> {
		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| Error::config(format!("failed to build HTTPS client: {}", e)))?;
		Ok(Self { client, endpoint: endpoint.into() })
	}
}

fn is_address_answer(answer: &DohAnswer) -> bool {
	answer.record_type == DOH_TYPE_A || answer.record_type == DOH_TYPE_AAAA
}

/// Pick the first address record out of a DoH JSON body.
fn first_doh_address(body: &DohResponse) -> std::result::Result<String, QueryError> {
	// Status is the DNS rcode; anything but NOERROR has no usable answer
	if body.status != 0 {
		return Err(QueryError::failed(format!("DoH rcode {}", body.status)));
	}
	body.answer.iter()
		.find(|a| is_address_answer(a))
		.map(|a| a.data.clone())
		.ok_or_else(|| QueryError::failed("no address records in DoH answer"))
}

/// NOERROR without any address: the name exists but may be IPv6-only.
fn is_nodata(body: &DohResponse) -> bool {
	body.status == 0 && !body.answer.iter().any(is_address_answer)
}

impl DohMethod {
	async fn query(
		&self,
		domain: &str,
		record_type: &str,
		timeout: Duration,
	) -> std::result::Result<DohResponse, QueryError> {
		let response = self.client
			.get(&self.endpoint)
			.query(&[("name", domain), ("type", record_type)])
			.header(reqwest::header::ACCEPT, "application/dns-json")
			.timeout(timeout)
			.send()
			.await
			.map_err(|e| QueryError::failed(e.to_string()))?
			.error_for_status()
			.map_err(|e| QueryError::failed(e.to_string()))?;
		response.json()
			.await
			.map_err(|e| QueryError::failed(format!("invalid DoH response: {}", e)))
	}
}

#[async_trait]
impl ResolutionMethod for DohMethod {
	fn name(&self) -> &str {
		"doh"
	}

	/// Ask for A first and fall back to AAAA when the name has no A records.
	async fn attempt(&self, domain: &str, timeout: Duration) -> std::result::Result<String, QueryError> {
		let started = Instant::now();
		let body = self.query(domain, "A", timeout).await?;
		if !is_nodata(&body) {
			return first_doh_address(&body);
		}

		let remaining = timeout.saturating_sub(started.elapsed());
		if remaining.is_zero() {
			return Err(QueryError::Timeout(timeout));
		}
		debug!(%domain, "no A records over DoH, asking for AAAA");
		let body = self.query(domain, "AAAA", remaining).await?;
		first_doh_address(&body)
	}
}

/// Accept a method's answer only if it is a well-formed IPv4/IPv6 address.
pub fn validate_address(value: &str) -> Option<IpAddr> {
	value.trim().parse().ok()
}

/// Successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
	pub address: IpAddr,
	/// Name of the method that produced the address
	pub method: String,
	/// 1-based position of that method in the chain
	pub priority: usize,
	pub elapsed: Duration,
}

/// Ordered fallback chain of resolution methods.
///
/// Methods run one after another; each attempt has its own deadline and a
/// method that fails or times out is retried a bounded number of times with a
/// short jittered backoff. A syntactically invalid answer is a miss for that
/// method and is not retried.
pub struct Resolver {
	methods: Vec<Box<dyn ResolutionMethod>>,
	attempt_timeout: Duration,
	retries: u32,
	backoff: Duration,
	recorder: Option<Arc<BenchmarkRecorder>>,
}

impl Resolver {
	pub fn new(methods: Vec<Box<dyn ResolutionMethod>>, attempt_timeout: Duration) -> Self {
		Self {
			methods,
			attempt_timeout,
			retries: 0,
			backoff: Duration::ZERO,
			recorder: None,
		}
	}

	/// The default four-method chain, configured from `settings`.
	pub fn from_settings(settings: &Settings) -> Result<Self> {
		settings.validate()?;
		let methods: Vec<Box<dyn ResolutionMethod>> = vec![
			Box::new(NameserverMethod::local()),
			Box::new(NameserverMethod::public()),
			Box::new(SystemLookupMethod),
			Box::new(DohMethod::new(DEFAULT_DOH_ENDPOINT)?),
		];
		Ok(Self::new(methods, settings.resolver_timeout)
			.with_retries(settings.resolver_retries, settings.retry_backoff))
	}

	pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
		self.retries = retries;
		self.backoff = backoff;
		self
	}

	/// Record each method's time under "resolve.<method>".
	pub fn with_recorder(mut self, recorder: Arc<BenchmarkRecorder>) -> Self {
		self.recorder = Some(recorder);
		self
	}

	/// Method names with their 1-based priority
	pub fn methods(&self) -> Vec<(usize, &str)> {
		self.methods.iter()
			.enumerate()
			.map(|(i, m)| (i + 1, m.name()))
			.collect()
	}

	/// Resolve `domain` to one address using the first method that succeeds.
	///
	/// Fails with [`Error::Resolution`] listing every method that was tried
	/// once all of them are exhausted. Unavailable methods are skipped and
	/// not listed.
	pub async fn resolve(&self, domain: &str) -> Result<Resolution> {
		let domain = domain.trim().trim_end_matches('.');
		if domain.is_empty() {
			return Err(Error::config("domain must not be empty"));
		}

		let started = Instant::now();
		let mut attempted = Vec::new();

		for (index, method) in self.methods.iter().enumerate() {
			if !method.is_available() {
				debug!(method = method.name(), "resolution method unavailable, skipping");
				continue;
			}
			attempted.push(method.name().to_string());

			let found = match &self.recorder {
				Some(recorder) => {
					let timer = format!("resolve.{}", method.name());
					recorder.measure(&timer, self.try_method(method.as_ref(), domain)).await
				}
				None => self.try_method(method.as_ref(), domain).await,
			};

			if let Some(address) = found {
				info!(%domain, %address, method = method.name(), "domain resolved");
				return Ok(Resolution {
					address,
					method: method.name().to_string(),
					priority: index + 1,
					elapsed: started.elapsed(),
				});
			}
		}

		warn!(%domain, attempted = ?attempted, "all resolution methods exhausted");
		Err(Error::Resolution {
			domain: domain.to_string(),
			attempted,
		})
	}

	/// Run one method with retries; `None` means move on to the next method.
	async fn try_method(&self, method: &dyn ResolutionMethod, domain: &str) -> Option<IpAddr> {
		for attempt in 0..=self.retries {
			if attempt > 0 {
				tokio::time::sleep(self.jittered_backoff()).await;
			}

			let outcome = tokio::time::timeout(
				self.attempt_timeout,
				method.attempt(domain, self.attempt_timeout),
			).await;

			match outcome {
				Ok(Ok(value)) => match validate_address(&value) {
					Some(address) => return Some(address),
					None => {
						warn!(method = method.name(), %value, "method returned an invalid address");
						return None;
					}
				},
				Ok(Err(e)) => {
					debug!(method = method.name(), attempt, error = %e, "resolution attempt failed");
				}
				Err(_) => {
					debug!(
						method = method.name(),
						attempt,
						timeout_ms = self.attempt_timeout.as_millis() as u64,
						"resolution attempt timed out",
					);
				}
			}
		}
		None
	}

	fn jittered_backoff(&self) -> Duration {
		let spread = self.backoff.as_millis() as u64 / 2;
		if spread == 0 {
			return self.backoff;
		}
		self.backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
	}
}
