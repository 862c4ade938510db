mod bus;
mod cache;
mod config;
mod hierarchy;
mod mesi;
mod op;
mod replace;
mod trace;

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use bus::Bus;
use hierarchy::Hierarchy;
use trace::{Record, Trace};

use crate::config::Config;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut args = pico_args::Arguments::from_env();

    let config_str: Option<String> = args.opt_value_from_str("--config")?;
    let mut config = if let Some(config_str) = config_str {
        Config::parse(&config_str)?
    } else if let Some(config_path) = args.opt_value_from_str::<_, PathBuf>("-p")? {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    if let Some(mode) = args
        .opt_value_from_str("--mode")
        .context("--mode should be 0 or 1")?
    {
        config.mode = mode;
    }
    if let Some(buffer_size) = args
        .opt_value_from_str("--buffer-size")
        .context("--buffer-size must be an integer")?
    {
        config.buffer_size = buffer_size;
    }
    if let Some(queue_size) = args
        .opt_value_from_str("--queue-size")
        .context("--queue-size must be an integer")?
    {
        config.queue_size = queue_size;
    }

    let trace_path: PathBuf = args
        .value_from_str(["-t", "--trace"])
        .context("Must provide a trace with --trace <path>")?;
    let stats_path: Option<PathBuf> = args.opt_value_from_str("--json")?;

    let rest = args.finish();
    if !rest.is_empty() {
        tracing::warn!(?rest, "ignoring unused arguments");
    }

    let mut hierarchy = config
        .to_hierarchy(io::stdout())
        .context("Bad cache geometry")?;
    let trace = Trace::read(trace_path.clone(), config.buffer_size, config.queue_size)
        .with_context(|| format!("Could not open trace {}", trace_path.display()))?;
    tracing::info!(trace = %trace_path.display(), mode = config.mode, "starting simulation");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut n_records = 0u64;
    for block in trace.rec.iter() {
        n_records += block.len() as u64;
        operate(&mut hierarchy, &block, &mut out)?;
    }
    let n_lines = trace.finish().context("Failed while reading trace")?;
    tracing::info!(n_lines, n_records, "trace done");

    hierarchy.write_stats(&mut out)?;
    out.flush()?;

    if let Some(stats_path) = stats_path {
        let stats_file = fs::File::create(&stats_path)
            .with_context(|| format!("Cannot open output file {}", stats_path.display()))?;
        serde_json::to_writer_pretty(stats_file, &hierarchy.make_stats())?;
    }
    Ok(())
}

fn operate<B: Bus>(
    hierarchy: &mut Hierarchy<B>,
    records: &[Record],
    out: &mut impl Write,
) -> io::Result<()> {
    for &record in records {
        hierarchy.dispatch(record, out)?;
    }
    Ok(())
}
