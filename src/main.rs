mod cli;
mod output;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use dns_propagation::registry::{self, Registry};
use dns_propagation::{
	BenchmarkRecorder, HickoryTransport, Monitor, MonitorSession, PropagationProber,
	PropagationSnapshot, Resolution, Resolver, Settings,
};

use crate::cli::{CheckArgs, Cli, Command, MonitorArgs, ResolveArgs, ServerArgs};

#[derive(Serialize)]
struct CheckReport<'a> {
	resolution: Option<&'a Resolution>,
	snapshot: &'a PropagationSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose)?;

	let recorder = Arc::new(BenchmarkRecorder::new());

	match &cli.command {
		Command::Resolve(args) => run_resolve(&cli, args, &recorder).await?,
		Command::Check(args) => run_check(&cli, args, &recorder).await?,
		Command::Monitor(args) => run_monitor(&cli, args, &recorder).await?,
	}

	if cli.benchmark {
		let report = recorder.report();
		if cli.json {
			output::print_json(&report)?;
		} else {
			output::print_benchmark(&report);
		}
	}

	Ok(())
}

/// Logs go to stderr so table and JSON output stay clean.
fn init_logging(verbose: u8) -> Result<()> {
	let level = match verbose {
		0 => Level::WARN,
		1 => Level::INFO,
		_ => Level::DEBUG,
	};
	let subscriber = FmtSubscriber::builder()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("failed to install log subscriber")?;
	Ok(())
}

/// Collect the servers to probe from defaults, flags, files and resolv.conf.
fn build_registry(args: &ServerArgs) -> Result<Registry> {
	let mut registry = if args.no_defaults {
		Registry::new()
	} else {
		Registry::global()
	};

	for line in &args.servers {
		registry.push(registry::parse_server(line)?)?;
	}

	if let Some(path) = &args.server_file {
		registry.extend(registry::read_server_file(path)?)?;
	}

	if args.system_servers {
		for addr in registry::system_nameservers() {
			let entry = registry::parse_server(&format!("{} ZZ system", addr))?;
			if !registry.add_if_new(entry) {
				warn!(%addr, "system nameserver already in registry, skipping");
			}
		}
	}

	if registry.is_empty() {
		bail!("no servers to query; pass --server or drop --no-defaults");
	}
	Ok(registry)
}

fn build_prober(args: &ServerArgs, settings: &Settings, recorder: &Arc<BenchmarkRecorder>) -> Result<PropagationProber> {
	let registry = build_registry(args)?;
	info!(servers = registry.len(), timeout_ms = settings.probe_timeout.as_millis() as u64, "server registry ready");
	Ok(PropagationProber::new(Arc::new(registry), Arc::new(HickoryTransport::new()), settings.probe_timeout)
		.with_recorder(recorder.clone()))
}

async fn run_resolve(cli: &Cli, args: &ResolveArgs, recorder: &Arc<BenchmarkRecorder>) -> Result<()> {
	let settings = args.settings();
	settings.validate()?;

	let resolver = Resolver::from_settings(&settings)?.with_recorder(recorder.clone());
	let resolution = resolver.resolve(&args.domain).await?;

	if cli.json {
		output::print_json(&resolution)?;
	} else {
		output::print_resolution(&resolution);
	}
	Ok(())
}

async fn run_check(cli: &Cli, args: &CheckArgs, recorder: &Arc<BenchmarkRecorder>) -> Result<()> {
	let settings = args.settings();
	settings.validate()?;

	// A failed resolution is reported but never blocks the propagation check
	let resolution = if args.no_resolve {
		None
	} else {
		let resolver = Resolver::from_settings(&settings)?.with_recorder(recorder.clone());
		match resolver.resolve(&args.domain).await {
			Ok(resolution) => Some(resolution),
			Err(e) => {
				warn!(error = %e, "resolution failed, checking propagation anyway");
				None
			}
		}
	};

	let prober = build_prober(&args.servers, &settings, recorder)?;
	let snapshot = prober.probe(&args.domain, settings.record_type).await?;

	if cli.json {
		output::print_json(&CheckReport { resolution: resolution.as_ref(), snapshot: &snapshot })?;
	} else {
		match &resolution {
			Some(r) => output::print_resolution(r),
			None if !args.no_resolve => eprintln!("Could not resolve {}", args.domain),
			None => {}
		}
		output::print_snapshot(&snapshot);
	}
	Ok(())
}

async fn run_monitor(cli: &Cli, args: &MonitorArgs, recorder: &Arc<BenchmarkRecorder>) -> Result<()> {
	let settings = args.settings();
	let session = MonitorSession::from_settings(args.domain.as_str(), &settings)?;
	let prober = build_prober(&args.servers, &settings, recorder)?;
	let monitor = Monitor::new(prober, session);

	let handle = monitor.cancel_handle();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("interrupt received, stopping after the current snapshot");
			handle.cancel();
		}
	});

	let json = cli.json;
	let mut changes = 0usize;
	let history = monitor.run(|tick| {
		if tick.changed {
			changes += 1;
		}
		if !json {
			output::print_tick(tick);
		}
	}).await;

	if json {
		output::print_json(&history)?;
	} else {
		println!("\n{} snapshot(s), {} majority change(s)", history.len(), changes);
	}

	if let Some(path) = &args.output {
		output::write_history_csv(path, &history)?;
	}
	Ok(())
}
