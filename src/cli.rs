use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use dns_propagation::config::Settings;
use dns_propagation::RecordType;

/// DNS propagation checker
#[derive(Parser, Debug)]
#[command(name = "dns-propagation")]
#[command(about = "Resolve domains and check DNS propagation across public resolvers worldwide")]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,

	/// Print results as JSON instead of tables
	#[arg(long = "json", global = true)]
	pub json: bool,

	/// Print timing of each stage after the run
	#[arg(long = "benchmark", global = true)]
	pub benchmark: bool,

	/// Increase log verbosity (-v info, -vv debug)
	#[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Resolve a domain to one address through the fallback chain
	Resolve(ResolveArgs),
	/// Take one propagation snapshot across all servers
	Check(CheckArgs),
	/// Repeat propagation checks on an interval and report majority changes
	Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
	pub domain: String,

	/// Per-attempt timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "3000")]
	pub timeout: u64,

	/// Extra attempts per method after a failure
	#[arg(long = "retries", default_value = "1")]
	pub retries: u32,

	/// Base delay between retries in milliseconds
	#[arg(long = "backoff", default_value = "250")]
	pub backoff: u64,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
	/// Extra server to query: "address [region] [label]" (repeatable)
	#[arg(short = 's', long = "server")]
	pub servers: Vec<String>,

	/// File with one server per line, same format as --server
	#[arg(short = 'f', long = "server-file")]
	pub server_file: Option<String>,

	/// Query only the servers given with --server/--server-file
	#[arg(long = "no-defaults")]
	pub no_defaults: bool,

	/// Also query the nameservers from /etc/resolv.conf
	#[arg(long = "system-servers")]
	pub system_servers: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
	pub domain: String,

	/// Record type to compare
	#[arg(short = 'r', long = "record-type", default_value = "A")]
	pub record_type: RecordType,

	/// Per-server query timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "5000")]
	pub timeout: u64,

	/// Skip resolving the domain before checking propagation
	#[arg(long = "no-resolve")]
	pub no_resolve: bool,

	#[command(flatten)]
	pub servers: ServerArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
	pub domain: String,

	/// Record type to compare
	#[arg(short = 'r', long = "record-type", default_value = "A")]
	pub record_type: RecordType,

	/// Per-server query timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "5000")]
	pub timeout: u64,

	/// Seconds between snapshots
	#[arg(short = 'i', long = "interval", default_value = "30")]
	pub interval: u64,

	/// Number of snapshots to take (0 runs until Ctrl-C)
	#[arg(short = 'n', long = "iterations", default_value = "0")]
	pub iterations: u64,

	/// Write the monitoring history to a CSV file
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,

	#[command(flatten)]
	pub servers: ServerArgs,
}

impl ResolveArgs {
	pub fn settings(&self) -> Settings {
		Settings {
			resolver_timeout: Duration::from_millis(self.timeout),
			resolver_retries: self.retries,
			retry_backoff: Duration::from_millis(self.backoff),
			..Settings::default()
		}
	}
}

impl CheckArgs {
	pub fn settings(&self) -> Settings {
		Settings {
			record_type: self.record_type,
			probe_timeout: Duration::from_millis(self.timeout),
			..Settings::default()
		}
	}
}

impl MonitorArgs {
	pub fn settings(&self) -> Settings {
		Settings {
			record_type: self.record_type,
			probe_timeout: Duration::from_millis(self.timeout),
			monitor_interval: Duration::from_secs(self.interval),
			max_iterations: self.iterations,
			..Settings::default()
		}
	}
}
