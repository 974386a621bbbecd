use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::rr::{RData, Record, RecordType as WireType};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, QueryError};
use crate::transport::{DnsTransport, ServerEntry};

/// Separator between the individual records of one server's answer
pub const VALUE_SEPARATOR: &str = " | ";

/// DNS record types supported by lookups and propagation checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecordType {
	A,
	AAAA,
	MX,
	NS,
	TXT,
	SOA,
	CNAME,
	CAA,
	SRV,
	PTR,
	ANY,
}

impl RecordType {
	pub const ALL: [RecordType; 11] = [
		RecordType::A, RecordType::AAAA, RecordType::MX, RecordType::NS,
		RecordType::TXT, RecordType::SOA, RecordType::CNAME, RecordType::CAA,
		RecordType::SRV, RecordType::PTR, RecordType::ANY,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			RecordType::A => "A",
			RecordType::AAAA => "AAAA",
			RecordType::MX => "MX",
			RecordType::NS => "NS",
			RecordType::TXT => "TXT",
			RecordType::SOA => "SOA",
			RecordType::CNAME => "CNAME",
			RecordType::CAA => "CAA",
			RecordType::SRV => "SRV",
			RecordType::PTR => "PTR",
			RecordType::ANY => "ANY",
		}
	}

	fn to_wire(self) -> WireType {
		match self {
			RecordType::A => WireType::A,
			RecordType::AAAA => WireType::AAAA,
			RecordType::MX => WireType::MX,
			RecordType::NS => WireType::NS,
			RecordType::TXT => WireType::TXT,
			RecordType::SOA => WireType::SOA,
			RecordType::CNAME => WireType::CNAME,
			RecordType::CAA => WireType::CAA,
			RecordType::SRV => WireType::SRV,
			RecordType::PTR => WireType::PTR,
			RecordType::ANY => WireType::ANY,
		}
	}

	/// Record types whose data embeds domain names
	pub fn is_domain_valued(self) -> bool {
		matches!(
			self,
			RecordType::MX | RecordType::NS | RecordType::SOA
				| RecordType::CNAME | RecordType::SRV | RecordType::PTR
		)
	}
}

impl fmt::Display for RecordType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RecordType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let upper = s.trim().to_ascii_uppercase();
		RecordType::ALL.iter()
			.copied()
			.find(|rt| rt.as_str() == upper)
			.ok_or_else(|| Error::config(format!("unknown record type '{}'", s.trim())))
	}
}

impl TryFrom<String> for RecordType {
	type Error = Error;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<RecordType> for String {
	fn from(rt: RecordType) -> Self {
		rt.as_str().to_string()
	}
}

/// Normalize one record value so semantically identical answers compare equal.
///
/// Addresses are put in canonical form, domain-valued data is lower-cased with
/// trailing dots stripped from every name, and whitespace is collapsed.
pub fn normalize_value(record_type: RecordType, raw: &str) -> String {
	let trimmed = raw.trim();
	match record_type {
		RecordType::A | RecordType::AAAA => match trimmed.parse::<IpAddr>() {
			Ok(ip) => ip.to_string(),
			Err(_) => trimmed.to_ascii_lowercase(),
		},
		rt if rt.is_domain_valued() => trimmed
			.split_whitespace()
			.map(|token| token.trim_end_matches('.').to_ascii_lowercase())
			.collect::<Vec<_>>()
			.join(" "),
		RecordType::TXT => trimmed.trim_matches('"').to_string(),
		_ => trimmed.split_whitespace().collect::<Vec<_>>().join(" "),
	}
}

/// Combine a server's record values into one comparable answer string.
///
/// Values are normalized, sorted and de-duplicated, so record order within a
/// response never makes two servers disagree. Returns an empty string when
/// nothing usable remains.
pub fn normalize_answer(record_type: RecordType, values: &[String]) -> String {
	let mut normalized: Vec<String> = values.iter()
		.map(|v| normalize_value(record_type, v))
		.filter(|v| !v.is_empty())
		.collect();
	normalized.sort();
	normalized.dedup();
	normalized.join(VALUE_SEPARATOR)
}

/// Render record data as text.
pub fn rdata_to_string(data: &RData) -> String {
	match data {
		// TXT character-strings are concatenated without separators
		RData::TXT(txt) => txt.iter()
			.map(|chunk| String::from_utf8_lossy(chunk).into_owned())
			.collect::<String>(),
		other => other.to_string(),
	}
}

/// Extract the values of the requested type from a lookup's records.
///
/// Intermediate CNAME records from alias chains are skipped unless CNAME (or
/// ANY) was asked for.
pub fn answer_values<'a, I>(records: I, record_type: RecordType) -> Vec<String>
where
	I: IntoIterator<Item = &'a Record>,
{
	let wanted = record_type.to_wire();
	records.into_iter()
		.filter(|r| record_type == RecordType::ANY || r.record_type() == wanted)
		.map(|r| rdata_to_string(r.data()))
		.collect()
}

/// Build a non-caching resolver that talks only to the given nameservers.
///
/// One attempt per query; callers own retries.
pub fn build_resolver(nameservers: &[SocketAddr], timeout: Duration) -> TokioResolver {
	let mut group = NameServerConfigGroup::new();
	for addr in nameservers {
		group.merge(NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true));
	}
	let config = ResolverConfig::from_parts(None, vec![], group);
	let mut opts = ResolverOpts::default();
	opts.timeout = timeout;
	opts.attempts = 1;
	opts.cache_size = 0;
	TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
		.with_options(opts)
		.build()
}

/// Query `domain` through `resolver` and return the raw values of `record_type`.
pub async fn lookup_values(
	resolver: &TokioResolver,
	domain: &str,
	record_type: RecordType,
) -> Result<Vec<String>, QueryError> {
	let lookup = resolver.lookup(domain, record_type.to_wire())
		.await
		.map_err(|e| QueryError::failed(e.to_string()))?;
	Ok(answer_values(lookup.record_iter(), record_type))
}

/// Resolve `domain` to its first A or AAAA address, as text.
pub async fn lookup_first_address(resolver: &TokioResolver, domain: &str) -> Result<String, QueryError> {
	let lookup = resolver.lookup_ip(domain)
		.await
		.map_err(|e| QueryError::failed(e.to_string()))?;
	lookup.iter()
		.next()
		.map(|ip| ip.to_string())
		.ok_or_else(|| QueryError::failed("no addresses in answer"))
}

/// Transport that queries each registry server directly with hickory.
#[derive(Debug, Clone, Default)]
pub struct HickoryTransport;

impl HickoryTransport {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl DnsTransport for HickoryTransport {
	async fn query(
		&self,
		server: &ServerEntry,
		domain: &str,
		record_type: RecordType,
		timeout: Duration,
	) -> Result<Vec<String>, QueryError> {
		// The caller's deadline is the authoritative cutoff; give hickory
		// more room so an expiry is always reported as a timeout.
		let resolver = build_resolver(&[server.addr], timeout.saturating_mul(2));
		debug!(server = %server.id, %domain, %record_type, "querying server");
		lookup_values(&resolver, domain, record_type).await
	}
}
