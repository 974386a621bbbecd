use std::io::Write;
use std::path::Path;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use dns_propagation::monitor::MonitorTick;
use dns_propagation::{
	BenchmarkReport, PropagationSnapshot, PropagationStatus, QueryOutcome, Resolution,
};

fn ms(d: std::time::Duration) -> String {
	format!("{:.1} ms", d.as_secs_f64() * 1000.0)
}

fn status_color(status: PropagationStatus) -> Color {
	match status {
		PropagationStatus::FullyPropagated => Color::Green,
		PropagationStatus::MostlyPropagated => Color::Cyan,
		PropagationStatus::PartiallyPropagated => Color::Yellow,
		PropagationStatus::NotPropagated => Color::Red,
		PropagationStatus::Unknown => Color::DarkGrey,
	}
}

/// Print any serializable result as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	serde_json::to_writer_pretty(&mut out, value)?;
	writeln!(out)?;
	Ok(())
}

/// Print the outcome of a one-shot resolution.
pub fn print_resolution(resolution: &Resolution) {
	println!(
		"{} via {} (method #{}, {})",
		resolution.address,
		resolution.method,
		resolution.priority,
		ms(resolution.elapsed),
	);
}

/// Print one snapshot: per-server table, then the consistency summary.
pub fn print_snapshot(snapshot: &PropagationSnapshot) {
	let majority = snapshot.majority_value();

	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Server", "Region", "Address", "Status", "Answer", "Latency"]);

	for r in snapshot.results() {
		let server = r.server();
		let status = Cell::new(r.outcome().as_str()).fg(match r.outcome() {
			QueryOutcome::Ok => Color::Green,
			QueryOutcome::Timeout => Color::Yellow,
			QueryOutcome::Error => Color::Red,
		});
		let answer = match r.value() {
			Some(v) if Some(v) != majority => Cell::new(v).fg(Color::Magenta),
			Some(v) => Cell::new(v),
			None => Cell::new(r.error().unwrap_or("")).fg(Color::DarkGrey),
		};
		table.add_row(vec![
			Cell::new(&server.label),
			Cell::new(&server.region),
			Cell::new(server.addr),
			status,
			answer,
			Cell::new(ms(r.latency())),
		]);
	}

	println!(
		"\nPropagation of {} {} at {}",
		snapshot.domain(),
		snapshot.record_type(),
		snapshot.timestamp().format("%Y-%m-%d %H:%M:%S UTC"),
	);
	println!("{table}");
	print_classification(snapshot);
}

fn print_classification(snapshot: &PropagationSnapshot) {
	let c = snapshot.classification();
	let latency = snapshot.latency();

	let mut summary = Table::new();
	summary.load_preset(UTF8_FULL);
	summary.add_row(vec![
		Cell::new("Status"),
		Cell::new(c.status).fg(status_color(c.status)),
	]);
	summary.add_row(vec![
		Cell::new("Agreement"),
		Cell::new(format!("{:.1}%", c.agreement_ratio * 100.0)),
	]);
	summary.add_row(vec![
		Cell::new("Responding"),
		Cell::new(format!("{}/{}", c.responding_count, c.total_count)),
	]);
	summary.add_row(vec![
		Cell::new("Majority"),
		Cell::new(c.majority_value.as_deref().unwrap_or("-")),
	]);
	summary.add_row(vec![
		Cell::new("Unique values"),
		Cell::new(c.unique_value_count),
	]);
	summary.add_row(vec![
		Cell::new("Latency p50/p95"),
		Cell::new(format!("{:.1} / {:.1} ms", latency.p50_ms, latency.p95_ms)),
	]);
	summary.add_row(vec![
		Cell::new("Elapsed"),
		Cell::new(ms(snapshot.elapsed())),
	]);
	println!("{summary}");

	let regions: Vec<String> = snapshot.regions()
		.iter()
		.map(|(region, count)| format!("{} {}/{}", region, count.responding, count.total))
		.collect();
	println!("Regions: {}", regions.join(", "));
}

/// One line per monitoring step, with the full table on the first one.
pub fn print_tick(tick: &MonitorTick<'_>) {
	if tick.iteration == 1 {
		print_snapshot(tick.snapshot);
		return;
	}
	let c = tick.snapshot.classification();
	println!(
		"[{}] #{} {} {:.1}% ({}/{}) majority={}",
		tick.snapshot.timestamp().format("%H:%M:%S"),
		tick.iteration,
		c.status,
		c.agreement_ratio * 100.0,
		c.responding_count,
		c.total_count,
		c.majority_value.as_deref().unwrap_or("-"),
	);
	if tick.changed {
		println!(
			"  CHANGED: {} -> {}",
			tick.previous_majority.unwrap_or("-"),
			c.majority_value.as_deref().unwrap_or("-"),
		);
	}
	for value in &tick.appeared {
		println!("  + {}", value);
	}
	for value in &tick.vanished {
		println!("  - {}", value);
	}
}

/// Print the benchmark timings collected during the run.
pub fn print_benchmark(report: &BenchmarkReport) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_header(vec!["Operation", "Runs", "Duration"]);
	for record in &report.records {
		table.add_row(vec![
			Cell::new(&record.name),
			Cell::new(record.runs),
			Cell::new(ms(record.duration)),
		]);
	}
	table.add_row(vec![Cell::new("total"), Cell::new(""), Cell::new(ms(report.total))]);

	println!("\nBenchmark");
	println!("{table}");
}

/// Write a monitoring history to CSV, one row per server per snapshot.
pub fn write_history_csv(path: impl AsRef<Path>, history: &[PropagationSnapshot]) -> Result<()> {
	let path = path.as_ref();
	let mut writer = csv::Writer::from_path(path)?;

	writer.write_record([
		"iteration", "timestamp", "domain", "record_type",
		"server", "region", "address", "outcome", "value", "latency_ms",
		"status", "agreement_ratio", "majority_value",
	])?;

	for (i, snapshot) in history.iter().enumerate() {
		let c = snapshot.classification();
		for r in snapshot.results() {
			writer.write_record([
				(i + 1).to_string(),
				snapshot.timestamp().to_rfc3339(),
				snapshot.domain().to_string(),
				snapshot.record_type().to_string(),
				r.server().id.clone(),
				r.server().region.clone(),
				r.server().addr.to_string(),
				r.outcome().as_str().to_string(),
				r.value().unwrap_or("").to_string(),
				format!("{:.2}", r.latency().as_secs_f64() * 1000.0),
				c.status.to_string(),
				format!("{:.4}", c.agreement_ratio),
				c.majority_value.clone().unwrap_or_default(),
			])?;
		}
	}

	writer.flush()?;
	eprintln!("History written to: {}", path.display());
	Ok(())
}
