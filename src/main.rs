//! nscan — multi-source LAN discovery CLI

use anyhow::Result;

mod cli;

use crate::cli::{CliCommand, parse_cli_args, usage_text, version_text};
use nscan::config::OutputFormat;
use nscan::{
    DeviceRecord, EventBus, Orchestrator, ScanEvent, ScanStats, load_config_file, next_event,
};

#[tokio::main]
async fn main() {
    let command = match parse_cli_args(std::env::args()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(command).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Help => {
            println!("{}", usage_text());
            Ok(())
        }
        CliCommand::Version => {
            println!("{}", version_text());
            Ok(())
        }
        CliCommand::Interfaces => {
            if let Err(e) = nscan::logging::init_logging(false) {
                eprintln!("[WARN] logging unavailable: {e}");
            }
            for iface in nscan::list_interfaces() {
                let ipv4 = iface
                    .ipv4
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let ipv6 = iface
                    .ipv6
                    .iter()
                    .map(|i| i.addr.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{:<16} {:<16} {}", iface.name, ipv4, ipv6);
            }
            Ok(())
        }
        CliCommand::Scan(overrides) => {
            let file = load_config_file();
            let opts = overrides.apply(nscan::ScanOptions::from_config_file(&file))?;

            if let Err(e) = nscan::logging::init_logging(opts.verbose) {
                eprintln!("[WARN] logging unavailable: {e}");
            }

            let events = EventBus::new();
            spawn_console_observer(&events);

            let output = opts.output.clone();
            let format = opts.format;

            let orchestrator = Orchestrator::new(opts, events);
            let stop = orchestrator.stop_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, stopping scan");
                    stop.cancel();
                }
            });

            let (devices, stats) = orchestrator.run().await?;
            render(&devices, &stats, format, output.as_deref())
        }
    }
}

/// Log a running commentary of scan events.
fn spawn_console_observer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx).await {
            match event {
                ScanEvent::ScanPhaseChange { name, .. } => {
                    tracing::info!("phase: {}", name);
                }
                ScanEvent::ScanProgress { message, .. } => {
                    tracing::debug!("{}", message);
                }
                ScanEvent::DeviceDiscovered(record) => {
                    tracing::info!(
                        "discovered {} {}",
                        record
                            .ipv4
                            .map(|ip| ip.to_string())
                            .or_else(|| record.ipv6.first().map(|i| i.addr.clone()))
                            .unwrap_or_else(|| record.mac.clone().unwrap_or_default()),
                        record.hostname.as_deref().unwrap_or("")
                    );
                }
                ScanEvent::ScanError { message } => {
                    tracing::error!("{}", message);
                }
                ScanEvent::ScanCompleted { stats, .. } => {
                    tracing::info!(
                        "completed: {} devices in {}ms",
                        stats.devices,
                        stats.duration_ms
                    );
                }
                _ => {}
            }
        }
    });
}

fn render(
    devices: &[DeviceRecord],
    stats: &ScanStats,
    format: OutputFormat,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => nscan::export::to_json(devices, stats)?,
        OutputFormat::Csv => nscan::export::to_csv(devices)?,
        OutputFormat::Table => render_table(devices),
    };
    nscan::export::write_output(&rendered, output)
}

fn render_table(devices: &[DeviceRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:<18} {:<20} {:<24} {:<22} {:>5}\n",
        "IP", "MAC", "HOSTNAME", "MANUFACTURER", "USAGE", "CONF"
    ));
    for device in devices {
        let ip = device
            .ipv4
            .map(|ip| ip.to_string())
            .or_else(|| device.ipv6.first().map(|i| i.addr.clone()))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<16} {:<18} {:<20} {:<24} {:<22} {:>5}\n",
            ip,
            device.mac.as_deref().unwrap_or("-"),
            device.hostname.as_deref().unwrap_or("-"),
            device.manufacturer.as_deref().unwrap_or("-"),
            device.usage.map(|u| u.as_str()).unwrap_or("-"),
            device.confidence
        ));
    }
    out
}
