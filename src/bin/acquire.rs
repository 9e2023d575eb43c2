//! Acquisition binary - synthetic pulses through the event store into a sink
//!
//! Usage:
//!   cargo run --bin acquire                           # Use defaults
//!   cargo run --bin acquire -- --config config.toml   # Use config file
//!   cargo run --bin acquire -- --packets 500          # Run for 500 packets
//!   cargo run --bin acquire -- --interval 0 --seed 7  # Full speed, reproducible

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use spectral_acq::common::{
    setup_shutdown, AcquireArgs, AtomicCounters, PipelineResult, RateSnapshot,
};
use spectral_acq::config::Config;
use spectral_acq::data_sink::{ChannelSummary, DataSink};
use spectral_acq::data_source_emulator::{Emulator, PulseGenerator};
use spectral_acq::store::EventStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("spectral_acq=info".parse()?))
        .init();

    let args = AcquireArgs::parse();
    acquire(args).await?;
    Ok(())
}

/// Load the configuration file (or defaults) and apply CLI overrides
fn session_config(args: &AcquireArgs) -> PipelineResult<Config> {
    let config_path = &args.common.config_file;
    let mut config = if std::path::Path::new(config_path).exists() {
        let config = Config::load(config_path)?;
        info!(config_file = %config_path, "Loaded configuration");
        config
    } else {
        info!(config_file = %config_path, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(interval) = args.interval {
        config.emulator.packet_interval_ms = interval;
    }
    if let Some(events) = args.events {
        config.emulator.events_per_packet = events;
    }
    if let Some(chunk) = args.chunk {
        config.sink.chunk_events = chunk;
    }
    if args.seed.is_some() {
        config.emulator.seed = args.seed;
    }
    config.validate()?;
    Ok(config)
}

/// Run one acquisition session and print its summary
async fn acquire(args: AcquireArgs) -> PipelineResult<()> {
    let config = session_config(&args)?;

    let layout = config.record_layout()?;
    let (mut producer, mut consumer) = EventStore::new(layout).split();
    let counters = Arc::new(AtomicCounters::new());

    info!(
        channels = layout.channel_count(),
        samples_per_channel = layout.samples_per_channel(),
        capacity_events = layout.capacity_events(),
        bytes_per_event = layout.bytes_per_event(),
        "Event store ready"
    );

    let (shutdown_tx, _shutdown_rx) = setup_shutdown();

    let sink_config = config.sink.clone();
    let sink_counters = counters.clone();
    let sink_shutdown = shutdown_tx.subscribe();
    let sink_handle = tokio::spawn(async move {
        let mut sink = DataSink::new(sink_config, sink_counters);
        let mut summary = ChannelSummary::new(layout.channel_count());
        sink.run(&mut consumer, &mut summary, sink_shutdown).await;
        summary
    });

    let source = PulseGenerator::new(layout, &config.emulator)?;
    let mut emulator = Emulator::new(config.emulator.clone(), source, counters.clone());
    let start_time = Instant::now();

    if let Some(count) = args.packets {
        println!("Will push {} packets then drain the store.", count);
        emulator.run_packets(&mut producer, count).await;
        let _ = shutdown_tx.send(());
    } else {
        println!("Acquiring. Press Ctrl+C to stop.");
        emulator.run(&mut producer, shutdown_tx.subscribe()).await;
    }

    let summary = sink_handle.await?;
    let elapsed = start_time.elapsed().as_secs_f64();
    let snap = counters.snapshot();
    let rates = snap.rate_from(&Default::default(), elapsed);

    println!("\n=== Acquisition Summary ===");
    println!("Duration:          {:.2} s", elapsed);
    println!(
        "Packets:           {} pushed, {} dropped ({} retries)",
        snap.packets_pushed, snap.packets_dropped, snap.retries
    );
    println!(
        "Events:            {} pushed, {} popped, {} dropped ({:.2}%)",
        snap.events_pushed,
        snap.events_popped,
        snap.events_dropped,
        snap.drop_ratio() * 100.0
    );
    println!(
        "Throughput:        {} in, {} out, {}",
        RateSnapshot::format_events_rate(rates.push_rate),
        RateSnapshot::format_events_rate(rates.pop_rate),
        rates.format_bytes_rate()
    );
    println!(
        "Sink:              {} batches, {} underruns, {} continuity errors",
        snap.batches_popped, snap.underruns, snap.continuity_errors
    );
    println!("Left in store:     {}", snap.in_flight());

    if let Some(channel) = summary.brightest_channel() {
        println!("\nChannel  mean height  max height");
        for ch in 0..layout.channel_count() {
            let mean = summary.mean_height(ch).unwrap_or(0.0);
            let max = summary.max_height(ch).unwrap_or(0);
            let mark = if ch == channel { " *" } else { "" };
            println!("{:>7}  {:>11.1}  {:>10}{}", ch, mean, max, mark);
        }
    }

    println!("Acquisition stopped.");
    Ok(())
}
