//! Slot-geometry and reference-clock master for a slotted UDP multicast bus.
//!
//! Attaches a sender-role channel on slot 0 and periodically broadcasts the
//! provisioned slot geometry and its own local clock so every other
//! participant on the bus can compute transmit windows and a shared time
//! reference.

mod config;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::MasterConfig;
use slotted_udp::{codec, Channel, Role};

/// Slotted UDP Multicast Bus/Clock Master.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a master.toml config file to use instead of the default search path.
    #[arg(long)]
    config: Option<String>,

    /// Number of slots to provision on the given multicast address.
    #[arg(short = 'c', long = "slot-count")]
    slot_count: Option<u32>,

    /// Width of each slot, in microseconds.
    #[arg(short = 'w', long = "slot-width-us")]
    slot_width_us: Option<u32>,

    /// How often to transmit the master clock, in microseconds.
    #[arg(short = 'i', long = "transmit-interval-us")]
    transmit_interval_us: Option<u32>,

    /// Multicast group address.
    #[arg(short = 'a', long)]
    address: Option<std::net::Ipv4Addr>,

    /// UDP port.
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let cli = Cli::parse();
    let mut config = MasterConfig::load(cli.config.as_deref())?;

    if let Some(v) = cli.slot_count {
        config.slot_count = v;
    }
    if let Some(v) = cli.slot_width_us {
        config.slot_width_us = v;
    }
    if let Some(v) = cli.transmit_interval_us {
        config.transmit_interval_us = v;
    }
    if let Some(v) = cli.address {
        config.address = v;
    }
    if let Some(v) = cli.port {
        config.port = v;
    }

    if config.slot_count == 0 {
        anyhow::bail!("slot_count must be non-zero (set -c or master.toml's slot_count)");
    }

    info!(
        address = %config.address,
        port = config.port,
        slot_count = config.slot_count,
        slot_width_us = config.slot_width_us,
        transmit_interval_us = config.transmit_interval_us,
        "starting slotted-udp master"
    );

    let mut channel = Channel::init(Role::Sender, config.address, config.port, 0)
        .context("channel init failed")?;
    channel.attach().context("channel attach failed")?;
    channel.seed_as_master(config.slot_count, config.slot_width_us);

    run_clock_loop(&channel, &config);

    channel.destroy().ok();
    Ok(())
}

/// Broadcast loop: sleep until slot 0's own window, send a sync packet
/// carrying the current slot geometry, then sleep the configured transmit
/// interval before repeating.
fn run_clock_loop(channel: &Channel, config: &MasterConfig) -> ! {
    let packed = codec::encode_sync_fields(config.slot_count, config.slot_width_us);
    let mut tick: u64 = 0;

    loop {
        match channel.sleep_duration() {
            Ok(wait_us) => thread::sleep(Duration::from_micros(wait_us)),
            Err(err) => {
                tracing::error!(%err, "sleep_duration failed, sending immediately");
            }
        }

        let clock = channel.master_clock();
        if let Err(err) = channel.send_raw(0, packed, clock, &[]) {
            tracing::error!(%err, "failed to send master sync");
        } else {
            tick += 1;
            debug!(tick, clock, "master sync sent");
        }

        thread::sleep(Duration::from_micros(config.transmit_interval_us as u64));
    }
}
