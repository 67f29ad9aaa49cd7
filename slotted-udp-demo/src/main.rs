//! Demo CLI exercising a slotted UDP multicast channel end-to-end: stream a
//! file or stdin over an owned slot, or receive traffic and print/write it
//! along with the transaction id, latency, and loss telemetry a receiver
//! observes on every accepted packet.

use std::fs::File;
use std::io::{Read, Write};
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use slotted_udp::{Channel, Role};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream a file (or stdin, with `-`) over the given slot.
    Send {
        /// Path to the file to send, or `-` to stream from stdin.
        file: String,
        #[arg(short = 'S', long, default_value_t = 1)]
        slot: u32,
        #[arg(short, long, default_value_t = slotted_udp::DEFAULT_GROUP)]
        address: Ipv4Addr,
        #[arg(short, long, default_value_t = slotted_udp::DEFAULT_PORT)]
        port: u16,
    },
    /// Receive data sent on the given slot and write it to a file (or
    /// stdout, with `-`).
    Receive {
        /// Path to write received data to, or `-` to stream to stdout.
        file: String,
        #[arg(short = 'S', long, default_value_t = 1)]
        slot: u32,
        #[arg(short, long, default_value_t = slotted_udp::DEFAULT_GROUP)]
        address: Ipv4Addr,
        #[arg(short, long, default_value_t = slotted_udp::DEFAULT_PORT)]
        port: u16,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Send {
            file,
            slot,
            address,
            port,
        } => {
            let mut channel = Channel::init(Role::Sender, address, port, slot)
                .context("channel init failed")?;
            channel.attach().context("channel attach failed")?;
            let input = InputSource::open(&file)?;
            send_loop(&mut channel, input)
        }
        Command::Receive {
            file,
            slot,
            address,
            port,
        } => {
            let mut channel = Channel::init(Role::Receiver, address, port, slot)
                .context("channel init failed")?;
            channel.attach().context("channel attach failed")?;
            let output = OutputSink::open(&file)?;
            recv_loop(&mut channel, output)
        }
    }
}

enum InputSource {
    Stdin(std::io::Stdin),
    File(File),
}

impl InputSource {
    fn open(path: &str) -> Result<Self> {
        if path == "-" {
            Ok(Self::Stdin(std::io::stdin()))
        } else {
            Ok(Self::File(
                File::open(path).with_context(|| format!("failed to open {}", path))?,
            ))
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdin(s) => s.read(buf),
            Self::File(f) => f.read(buf),
        }
    }
}

enum OutputSink {
    Stdout(std::io::Stdout),
    File(File),
}

impl OutputSink {
    fn open(path: &str) -> Result<Self> {
        if path == "-" {
            Ok(Self::Stdout(std::io::stdout()))
        } else {
            Ok(Self::File(
                File::create(path).with_context(|| format!("failed to create {}", path))?,
            ))
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Stdout(s) => s.write_all(buf),
            Self::File(f) => f.write_all(buf),
        }
    }
}

/// Mirrors the original test tool's `recv_data`: loop `receive`, which
/// internally absorbs master-sync and loopback traffic, and report every
/// accepted packet's transaction id, latency, and loss flag.
fn recv_loop(channel: &mut Channel, mut output: OutputSink) -> Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let outcome = channel.receive(&mut buf)?;
        if outcome.len == 0 {
            break;
        }
        info!(
            transaction_id = channel.transaction_id(),
            latency_us = outcome.latency_us,
            len = outcome.len,
            packet_loss = outcome.packet_loss_detected,
            "t_id[{:09}] lat[{:05}] len[{:04}] p_loss[{}]",
            channel.transaction_id(),
            outcome.latency_us,
            outcome.len,
            if outcome.packet_loss_detected { 'Y' } else { 'N' }
        );
        output.write_all(&buf[..outcome.len])?;
    }
    Ok(())
}

#[cfg(unix)]
fn send_loop(channel: &mut Channel, mut input: InputSource) -> Result<()> {
    use nix::poll::{poll, PollFd, PollFlags};
    use std::os::fd::AsFd;

    let channel_fd_holder = RawFdHolder(channel.socket_handle().context("channel not attached")?);
    let input_fd_holder = RawFdHolder(raw_fd_of(&input));

    let mut buf = [0u8; 1024];
    let mut pending: Option<usize> = None;
    // -1 blocks indefinitely until a readiness event; once input has been
    // read, this becomes the channel's own slot wait in milliseconds.
    let mut timeout_ms: i32 = -1;

    loop {
        let mut fds = [
            PollFd::new(channel_fd_holder.as_fd(), PollFlags::POLLIN),
            PollFd::new(input_fd_holder.as_fd(), PollFlags::POLLIN),
        ];

        let nfds = poll(&mut fds, timeout_ms).context("poll failed")?;

        if nfds == 0 {
            if let Some(len) = pending.take() {
                info!(bytes = len, "sending buffered bytes");
                channel.send(&buf[..len])?;
            }
            timeout_ms = -1;
            continue;
        }

        if fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false)
        {
            let mut discard = [0u8; 1024];
            match channel.receive_once(&mut discard) {
                Ok(_) | Err(slotted_udp::Error::TryAgain) => {}
                Err(err) => tracing::warn!(%err, "channel receive error while sending"),
            }
        }

        if fds[1]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false)
        {
            let n = input.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            let wait_us = channel.sleep_duration().unwrap_or(0);
            info!(bytes = n, wait_us, "read input, scheduling send");
            pending = Some(n);
            timeout_ms = (wait_us / 1000) as i32 + 1;
        }
    }
}

#[cfg(unix)]
fn raw_fd_of(input: &InputSource) -> std::os::fd::RawFd {
    use std::os::fd::AsRawFd;
    match input {
        InputSource::Stdin(s) => s.as_raw_fd(),
        InputSource::File(f) => f.as_raw_fd(),
    }
}

#[cfg(unix)]
struct RawFdHolder(std::os::fd::RawFd);

#[cfg(unix)]
impl std::os::fd::AsFd for RawFdHolder {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        unsafe { std::os::fd::BorrowedFd::borrow_raw(self.0) }
    }
}

#[cfg(not(unix))]
fn send_loop(channel: &mut Channel, mut input: InputSource) -> Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        channel.wait_and_send(&buf[..n])?;
    }
}
