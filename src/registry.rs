use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::error::{Error, Result};
use crate::transport::ServerEntry;

const DNS_PORT: u16 = 53;

/// Ordered, read-only collection of propagation probe targets.
///
/// Built once at startup (defaults, a server file, or both) and then shared
/// behind an `Arc`; nothing mutates it while probes are running.
#[derive(Debug, Clone, Default)]
pub struct Registry {
	entries: Vec<ServerEntry>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// The built-in set of globally distributed public resolvers.
	pub fn global() -> Self {
		Self { entries: default_servers() }
	}

	/// Add an entry at the end of the registry.
	///
	/// Ids key results across snapshots, so a duplicate id is rejected.
	pub fn push(&mut self, entry: ServerEntry) -> Result<()> {
		if self.entries.iter().any(|e| e.id == entry.id) {
			return Err(Error::config(format!("duplicate server id '{}'", entry.id)));
		}
		self.entries.push(entry);
		Ok(())
	}

	/// Add an entry unless its id or address is already present.
	///
	/// Returns whether the entry was added. Meant for sources such as
	/// resolv.conf that may repeat servers the registry already probes.
	pub fn add_if_new(&mut self, entry: ServerEntry) -> bool {
		if self.entries.iter().any(|e| e.id == entry.id || e.addr == entry.addr) {
			return false;
		}
		self.entries.push(entry);
		true
	}

	pub fn extend(&mut self, entries: impl IntoIterator<Item = ServerEntry>) -> Result<()> {
		for entry in entries {
			self.push(entry)?;
		}
		Ok(())
	}

	pub fn entries(&self) -> &[ServerEntry] {
		&self.entries
	}

	pub fn get(&self, id: &str) -> Option<&ServerEntry> {
		self.entries.iter().find(|e| e.id == id)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Parse a server address, defaulting the port to 53.
///
/// Accepts `ip`, `ipv4:port`, a bare IPv6 address or `[ipv6]:port`.
pub fn parse_addr(input: &str) -> Result<SocketAddr> {
	let text = input.trim();
	if text.is_empty() {
		return Err(Error::config("empty server address"));
	}
	if let Ok(addr) = text.parse::<SocketAddr>() {
		return Ok(addr);
	}
	text.trim_start_matches('[')
		.trim_end_matches(']')
		.parse::<IpAddr>()
		.map(|ip| SocketAddr::new(ip, DNS_PORT))
		.map_err(|e| Error::config(format!("invalid server address '{}': {}", text, e)))
}

/// Parse a registry line of the form `address [region] [label...]`.
///
/// Region defaults to "ZZ" and the label to the address. The id is derived
/// from the address so it stays stable across runs.
pub fn parse_server(line: &str) -> Result<ServerEntry> {
	let mut parts = line.split_whitespace();
	let addr = parse_addr(parts.next().unwrap_or(""))?;
	let region = parts.next()
		.map(|r| r.to_ascii_uppercase())
		.unwrap_or_else(|| "ZZ".to_string());
	let label: Vec<&str> = parts.collect();
	let label = if label.is_empty() {
		addr.ip().to_string()
	} else {
		label.join(" ")
	};

	Ok(ServerEntry {
		id: server_id(&addr),
		addr,
		region,
		label,
	})
}

fn server_id(addr: &SocketAddr) -> String {
	if addr.port() == DNS_PORT {
		addr.ip().to_string()
	} else {
		addr.to_string()
	}
}

/// Read registry entries from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_server_file(path: impl AsRef<Path>) -> Result<Vec<ServerEntry>> {
	let path = path.as_ref();
	let content = std::fs::read_to_string(path)
		.map_err(|e| Error::config(format!("failed to read server file '{}': {}", path.display(), e)))?;
	parse_server_list(&content)
}

fn parse_server_list(content: &str) -> Result<Vec<ServerEntry>> {
	let mut servers = Vec::new();
	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		servers.push(parse_server(trimmed)?);
	}
	Ok(servers)
}

/// Read the host's nameservers from /etc/resolv.conf (Unix only).
///
/// Returns an empty vec on non-Unix platforms or if the file cannot be read.
pub fn system_nameservers() -> Vec<SocketAddr> {
	match std::fs::read_to_string("/etc/resolv.conf") {
		Ok(content) => parse_resolv_conf(&content),
		Err(_) => Vec::new(),
	}
}

fn parse_resolv_conf(content: &str) -> Vec<SocketAddr> {
	content.lines()
		.map(str::trim)
		.filter(|line| line.starts_with("nameserver"))
		.filter_map(|line| line.split_whitespace().nth(1))
		.filter_map(|addr| parse_addr(addr).ok())
		.collect()
}

/// Well-known public resolvers, used by the resolver's public fallback.
pub fn public_resolvers() -> Vec<SocketAddr> {
	[
		IpAddr::from([1, 1, 1, 1]),
		IpAddr::from([8, 8, 8, 8]),
		IpAddr::from([9, 9, 9, 9]),
		IpAddr::from([208, 67, 222, 222]),
	]
	.into_iter()
	.map(|ip| SocketAddr::new(ip, DNS_PORT))
	.collect()
}

fn entry(id: &str, ip: [u8; 4], region: &str, label: &str) -> ServerEntry {
	ServerEntry {
		id: id.to_string(),
		addr: SocketAddr::new(IpAddr::from(ip), DNS_PORT),
		region: region.to_string(),
		label: label.to_string(),
	}
}

/// The default probe targets, spanning several regions.
pub fn default_servers() -> Vec<ServerEntry> {
	vec![
		// North America
		entry("google", [8, 8, 8, 8], "US", "Google"),
		entry("google-secondary", [8, 8, 4, 4], "US", "Google (secondary)"),
		entry("cloudflare", [1, 1, 1, 1], "US", "Cloudflare"),
		entry("cloudflare-secondary", [1, 0, 0, 1], "US", "Cloudflare (secondary)"),
		entry("quad9", [9, 9, 9, 9], "CH", "Quad9"),
		entry("opendns", [208, 67, 222, 222], "US", "OpenDNS"),
		entry("level3", [4, 2, 2, 2], "US", "Level3"),
		entry("comodo", [8, 26, 56, 26], "US", "Comodo Secure DNS"),
		// Europe
		entry("adguard", [94, 140, 14, 14], "CY", "AdGuard DNS"),
		entry("dnswatch", [84, 200, 69, 80], "DE", "DNS.WATCH"),
		entry("yandex", [77, 88, 8, 8], "RU", "Yandex DNS"),
		entry("cleanbrowsing", [185, 228, 168, 9], "GB", "CleanBrowsing"),
		// Asia and Oceania
		entry("alidns", [223, 5, 5, 5], "CN", "AliDNS"),
		entry("dnspod", [119, 29, 29, 29], "CN", "DNSPod"),
		entry("quad101", [101, 101, 101, 101], "TW", "Quad101"),
		entry("telstra", [139, 130, 4, 4], "AU", "Telstra"),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ipv4_no_port() {
		let addr = parse_addr("1.1.1.1").unwrap();
		assert_eq!(addr.port(), 53);
		assert_eq!(addr.ip().to_string(), "1.1.1.1");
	}

	#[test]
	fn test_ipv4_with_port() {
		let addr = parse_addr("8.8.8.8:5353").unwrap();
		assert_eq!(addr.port(), 5353);
		assert_eq!(addr.ip().to_string(), "8.8.8.8");
	}

	#[test]
	fn test_ipv6_bare() {
		let addr = parse_addr("2606:4700::1111").unwrap();
		assert_eq!(addr.port(), 53);
	}

	#[test]
	fn test_ipv6_bracketed() {
		let addr = parse_addr("[2606:4700::1111]:53").unwrap();
		assert_eq!(addr.port(), 53);
	}

	#[test]
	fn test_invalid_input() {
		assert!(matches!(parse_addr("not-an-ip"), Err(Error::Configuration(_))));
		assert!(parse_addr("   ").is_err());
	}

	#[test]
	fn test_parse_server_full_line() {
		let s = parse_server("9.9.9.9 ch Quad9 Zurich").unwrap();
		assert_eq!(s.id, "9.9.9.9");
		assert_eq!(s.region, "CH");
		assert_eq!(s.label, "Quad9 Zurich");
	}

	#[test]
	fn test_parse_server_defaults() {
		let s = parse_server("192.0.2.53:5353").unwrap();
		assert_eq!(s.id, "192.0.2.53:5353");
		assert_eq!(s.region, "ZZ");
		assert_eq!(s.label, "192.0.2.53");
	}

	#[test]
	fn test_parse_server_list_skips_comments() {
		let content = "# probe targets\n\n1.1.1.1 US Cloudflare\n  \n8.8.8.8 US Google\n";
		let servers = parse_server_list(content).unwrap();
		assert_eq!(servers.len(), 2);
		assert_eq!(servers[1].label, "Google");
	}

	#[test]
	fn test_parse_resolv_conf() {
		let content = "search lan\nnameserver 192.0.2.1\n# nameserver 192.0.2.9\nnameserver fe80::1\noptions ndots:1\n";
		let servers = parse_resolv_conf(content);
		assert_eq!(servers.len(), 2);
		assert_eq!(servers[0].ip().to_string(), "192.0.2.1");
	}

	#[test]
	fn test_defaults_span_regions() {
		let servers = default_servers();
		assert_eq!(servers.len(), 16);
		let mut regions: Vec<&str> = servers.iter().map(|s| s.region.as_str()).collect();
		regions.sort();
		regions.dedup();
		assert!(regions.len() >= 5);
	}

	#[test]
	fn test_default_ids_unique() {
		let mut registry = Registry::new();
		registry.extend(default_servers()).unwrap();
		assert_eq!(registry.len(), 16);
		assert!(registry.get("quad9").is_some());
	}

	#[test]
	fn test_push_rejects_duplicate_id() {
		let mut registry = Registry::global();
		let dup = parse_server("8.8.8.8").unwrap();
		// Derived id "8.8.8.8" does not clash with the named default "google"
		registry.push(dup.clone()).unwrap();
		assert!(matches!(registry.push(dup), Err(Error::Configuration(_))));
	}

	#[test]
	fn test_add_if_new_skips_known_servers() {
		let mut registry = Registry::global();
		let before = registry.len();
		// Same address as the "google" default under a different id
		assert!(!registry.add_if_new(parse_server("8.8.8.8 ZZ system").unwrap()));
		assert!(registry.add_if_new(parse_server("192.0.2.53 ZZ system").unwrap()));
		assert!(!registry.add_if_new(parse_server("192.0.2.53 ZZ system").unwrap()));
		assert_eq!(registry.len(), before + 1);
	}
}
