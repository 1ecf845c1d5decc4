use std::{
    error::Error,
    sync::{Arc, mpsc},
    time::Duration,
};

use clap::{Args, Parser};
use log::{info, warn};
use velbus::{
    BridgeConfig, BridgeSession, DeviceHandler, LinkConfig,
    bridge::{HandlerError, HandlerTarget, LinkState},
    link::DEFAULT_BAUD_RATE,
    protocol::{
        Event, Frame,
        commands::{ModuleTypeRequest, PacketKind},
    },
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,
    /// Baud rate of the serial interface
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// TCP port of the network bridge
    #[arg(long, default_value_t = 6000)]
    port: u16,
    /// Delay before the first reconnect attempt, in milliseconds
    #[arg(long, default_value_t = 15_000)]
    reconnect_interval_ms: u64,
    /// Pending packets kept before the oldest is dropped
    #[arg(long, default_value_t = 256)]
    max_queue_depth: usize,
    /// Broadcast the host time every this many seconds
    #[arg(long, value_name = "SECS")]
    clock_sync: Option<u64>,
    /// Ask these module addresses for their type once connected
    #[arg(long, value_delimiter = ',', value_parser = parse_address)]
    scan: Vec<u8>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct LinkArgs {
    /// Serial device of a USB or RS-232 interface
    #[arg(long)]
    serial: Option<String>,
    /// Host of a TCP network bridge
    #[arg(long)]
    host: Option<String>,
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid module address '{s}': {e}"))
}

/// Logs every event seen on the bus.
struct Monitor;

impl DeviceHandler for Monitor {
    fn on_packet_received(&self, frame: &Frame, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::Raw => info!(
                "{:#04x} {:?}: {:02x?}",
                frame.packet.address(),
                frame.packet.priority(),
                frame.bytes
            ),
            event => info!("{:#04x}: {event:?}", frame.packet.address()),
        }
        Ok(())
    }

    fn on_link_state_changed(&self, state: LinkState) -> Result<(), HandlerError> {
        match state {
            LinkState::Connected => info!("bus connected"),
            LinkState::Disconnected => warn!("bus disconnected"),
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let link = match (cli.link.serial, cli.link.host) {
        (Some(port_name), _) => LinkConfig::Serial {
            port_name,
            baud_rate: cli.baud,
        },
        (None, Some(host)) => LinkConfig::network(host, cli.port),
        (None, None) => return Err("either --serial or --host is required".into()),
    };

    let mut config = BridgeConfig::new(link)
        .with_reconnect_interval_ms(cli.reconnect_interval_ms)
        .with_max_queue_depth(cli.max_queue_depth);
    if let Some(secs) = cli.clock_sync {
        config = config.with_clock_sync_interval(Duration::from_secs(secs));
    }

    let mut session = BridgeSession::new(config);
    let handle = session.handle();
    let monitor = Arc::new(Monitor);
    handle.register(HandlerTarget::All, &monitor)?;

    // Queued before start, so they go out as soon as the link is up.
    for address in cli.scan {
        handle.send_packet(ModuleTypeRequest { address }.to_packet());
    }

    let (shutdown, signal) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown.send(());
    })?;

    session.start()?;
    signal.recv()?;

    info!("shutting down");
    let cancelled = session.stop();
    if cancelled > 0 {
        warn!("{cancelled} packets were never sent");
    }
    Ok(())
}
