//! 5G NR Downlink Control Channel Sniffer
//!
//! Reads a baseband I/Q capture, synchronizes to the cell carried in it
//! and blind-decodes the PDCCH of every configured bandwidth part,
//! emitting confirmed DCIs as JSON lines.

mod config;

use anyhow::Result;
use clap::Parser;
use config::SnifferConfig;
use interfaces::{DciSink, FileSink, FileSource};
use layers::phy::syncer::AlwaysDecodes;
use layers::phy::Phy;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// 5G NR downlink control channel sniffer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the input capture path from the configuration
    #[arg(long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(env_filter).with_target(true).init();

    info!("Starting 5G NR sniffer");
    info!("Configuration file: {}", args.config);

    let mut config = SnifferConfig::from_toml_file(&args.config)?;
    if let Some(input) = args.input {
        config.input_file = input;
    }
    config.validate()?;

    info!("Capture configuration:");
    info!("  Input: {}", config.input_file);
    info!("  Sample rate: {} MHz", config.sample_rate as f64 / 1e6);
    info!("  SSB numerology: {}", config.ssb_numerology);
    info!("  Bandwidth parts: {}", config.bwps.len());
    if let Some(nid2) = config.nid_2 {
        info!("  PSS search pinned to NID2 {}", nid2);
    }

    let phy_config = config.to_phy_config()?;
    let (dci_tx, mut dci_rx) = mpsc::unbounded_channel();
    let mut phy = Phy::new(phy_config, Box::new(AlwaysDecodes), dci_tx)?;

    let mut source = FileSource::open(&config.input_file, config.chunk_samples)?;
    let mut sample_sink = config
        .output_file
        .as_ref()
        .map(FileSink::create)
        .transpose()?;
    let mut dci_sink = match &config.dci_file {
        Some(path) => DciSink::create(path)?,
        None => DciSink::stdout(),
    };

    // Confirmed detections from every pipeline funnel into one writer.
    // The task ends once the last pipeline drops its sender.
    let writer = tokio::spawn(async move {
        while let Some(dci) = dci_rx.recv().await {
            info!(
                "DCI: rnti {} AL {} candidate {} slot {} payload {} (corr {:.2})",
                dci.rnti.value(),
                dci.aggregation_level,
                dci.candidate,
                dci.slot,
                dci.payload_hex(),
                dci.correlation
            );
            if let Err(e) = dci_sink.write_record(&dci) {
                error!("failed to write DCI record: {}", e);
            }
        }
        dci_sink.records_written()
    });

    let mut processing = tokio::spawn(async move {
        let mut relayed: u64 = 0;
        while let Some(chunk) = source.read_chunk()? {
            for batch in phy.process(&chunk)? {
                relayed += batch.samples.len() as u64;
                if let Some(sink) = sample_sink.as_mut() {
                    sink.write(&batch.samples)?;
                }
            }
            // Let the pipeline tasks make progress between chunks
            tokio::task::yield_now().await;
        }
        if let Some(sink) = sample_sink.as_mut() {
            sink.flush()?;
        }
        // Dropping the PHY closes the pipeline inputs; tasks drain their
        // queues and release the DCI channel
        drop(phy);
        anyhow::Ok((source.samples_read(), relayed))
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            processing.abort();
        }
        result = &mut processing => {
            match result? {
                Ok((read, relayed)) => {
                    info!("End of capture: {} samples read, {} synchronized", read, relayed);
                }
                Err(e) => error!("Processing failed: {}", e),
            }
        }
    }

    match tokio::time::timeout(std::time::Duration::from_secs(30), writer).await {
        Ok(Ok(records)) => info!("Wrote {} DCI record(s)", records),
        Ok(Err(e)) => error!("DCI writer task failed: {}", e),
        Err(_) => warn!("DCI writer did not finish in time"),
    }

    info!("Sniffer shutdown complete");
    Ok(())
}
