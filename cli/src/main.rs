// gattserial: serial terminal core over BLE GATT
//
// Runs the transport and session service against an in-process simulated
// Nordic UART peripheral, and manages the persisted configuration.

mod config;
mod sim;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use gattserial_core::{
    payload_size_for_mtu, DeliveryLoop, DeviceHandle, ForegroundNotifier, GattTransport,
    ProfileSelector, SerialError, SerialEvent, SerialListener, SerialService, ThreadLoop,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

#[derive(Parser)]
#[command(name = "gattserial")]
#[command(about = "Serial byte streams over BLE GATT", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the simulated peripheral and echo a message through it
    Simulate {
        #[arg(short, long, default_value = "hello over gatt")]
        message: String,
        /// Override the peripheral's MTU limit
        #[arg(long)]
        mtu: Option<u16>,
        /// Detach the consumer while the echo arrives, then re-attach
        #[arg(long)]
        detach: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the effective transport settings
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Simulate {
            message,
            mtu,
            detach,
        } => cmd_simulate(config, message, mtu, detach).await,
        Commands::Config { action } => cmd_config(config, action),
        Commands::Status => cmd_status(&config),
    }
}

// ============================================================================
// SIMULATE
// ============================================================================

/// Forwards consumer callbacks to the async side
struct ChannelListener {
    tx: mpsc::UnboundedSender<SerialEvent>,
}

impl SerialListener for ChannelListener {
    fn on_connected(&self) {
        let _ = self.tx.send(SerialEvent::Connected);
    }
    fn on_connect_error(&self, error: SerialError) {
        let _ = self.tx.send(SerialEvent::ConnectError(error));
    }
    fn on_data_read(&self, datas: VecDeque<Vec<u8>>) {
        let _ = self.tx.send(SerialEvent::DataRead(datas));
    }
    fn on_io_error(&self, error: SerialError) {
        let _ = self.tx.send(SerialEvent::IoError(error));
    }
}

struct ConsoleNotifier;

impl ForegroundNotifier for ConsoleNotifier {
    fn show_connected(&self, name: &str) {
        println!("  {} Running in background, connected to {}", "•".bright_blue(), name.bright_cyan());
    }

    fn cancel(&self) {
        info!("foreground notification cancelled");
    }
}

/// Run `attach` or `detach` on the delivery loop and wait for it
async fn on_loop<F>(looper: &Arc<ThreadLoop>, f: F) -> Result<()>
where
    F: FnOnce() -> Result<(), SerialError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    looper.post(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await.context("Delivery loop stopped")??;
    Ok(())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SerialEvent>) -> Result<SerialEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .context("Timed out waiting for the peripheral")?
        .context("Delivery stopped")
}

async fn cmd_simulate(
    config: config::Config,
    message: String,
    mtu: Option<u16>,
    detach: bool,
) -> Result<()> {
    config.transport.validate()?;
    let peripheral_mtu = mtu.unwrap_or(config.peripheral_mtu);

    let looper = Arc::new(ThreadLoop::spawn("gattserial-delivery")?);
    let service = Arc::new(SerialService::with_notifier(
        looper.clone(),
        Arc::new(ConsoleNotifier),
    ));
    let radio = sim::SimulatedPeripheral::spawn(peripheral_mtu)?;
    let transport = Arc::new(GattTransport::with_config(
        radio.clone(),
        config.transport.clone(),
        ProfileSelector::default(),
    ));
    radio.bind(&transport);

    let mut device = DeviceHandle::new(config.device_address.clone());
    if let Some(name) = &config.device_name {
        device = device.with_name(name.clone());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn SerialListener> = Arc::new(ChannelListener { tx });

    let attach_service = service.clone();
    let attach_listener = listener.clone();
    on_loop(&looper, move || attach_service.attach(attach_listener)).await?;

    println!("{}", "Connecting...".bold());
    service.connect(transport.clone(), &device)?;

    match next_event(&mut rx).await? {
        SerialEvent::Connected => {
            println!("  {} Connected to {}", "✓".green(), device.display_name().bright_cyan());
            println!(
                "  {} Profile {}, payload {} bytes",
                "✓".green(),
                transport.profile_name().unwrap_or("?"),
                transport.payload_size()
            );
        }
        SerialEvent::ConnectError(e) => anyhow::bail!("Connection failed: {}", e),
        other => anyhow::bail!("Unexpected event: {:?}", other),
    }

    if detach {
        let detach_service = service.clone();
        on_loop(&looper, move || {
            detach_service.detach();
            Ok(())
        })
        .await?;
    }

    let data = message.as_bytes().to_vec();
    service.write(&data)?;
    println!("  {} Sent {} bytes", "→".bright_green(), data.len());

    if detach {
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!(
            "  {} {} events queued while detached",
            "•".bright_blue(),
            service.queued_events()
        );
        let attach_service = service.clone();
        on_loop(&looper, move || attach_service.attach(listener)).await?;
    }

    let mut received = Vec::new();
    while received.len() < data.len() {
        match next_event(&mut rx).await? {
            SerialEvent::DataRead(datas) => {
                println!(
                    "  {} Read {} buffer(s)",
                    "←".bright_yellow(),
                    datas.len()
                );
                received.extend(datas.into_iter().flatten());
            }
            SerialEvent::IoError(e) => anyhow::bail!("Connection lost: {}", e),
            other => anyhow::bail!("Unexpected event: {:?}", other),
        }
    }

    println!(
        "  {} Echo: {}",
        "✓".green(),
        String::from_utf8_lossy(&received).bright_cyan()
    );
    service.disconnect();
    println!("{}", "Disconnected".bold());
    Ok(())
}

// ============================================================================
// CONFIG AND STATUS
// ============================================================================

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

fn cmd_status(config: &config::Config) -> Result<()> {
    let transport = &config.transport;
    println!("{}", "Transport".bold());
    println!("  Config file:      {}", config::Config::config_file()?.display());
    match transport.validate() {
        Ok(()) => println!("  Valid:            {}", "yes".green()),
        Err(e) => println!("  Valid:            {}", e.to_string().bright_red()),
    }
    println!("  Default payload:  {} bytes", transport.default_payload_size());
    if transport.request_mtu {
        let negotiated = transport.max_mtu.min(config.peripheral_mtu);
        println!(
            "  Negotiated:       MTU {} -> payload {} bytes",
            negotiated,
            payload_size_for_mtu(negotiated)
        );
    } else {
        println!("  Negotiated:       {}", "(MTU request disabled)".dimmed());
    }

    println!();
    println!("{}", "Profiles".bold());
    for family in ProfileSelector::default().families() {
        println!(
            "  {} {} ({})",
            "•".bright_green(),
            family.name().bright_cyan(),
            family.service_uuid().to_string().dimmed()
        );
    }
    Ok(())
}
