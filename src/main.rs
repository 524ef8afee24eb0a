use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use devscan_core::config::{AppConfig, LogFormat, LoggingConfig, ScannerConfig};
use devscan_core::types::{ConfigRequest, RegistryEntry};
use devscan_discovery::{ConfigChannel, ScanEvent, Scanner};
use devscan_filter::{available_capabilities, capabilities_of, Capability, FilterSpec};
use devscan_registry::{ConfigDispatcher, DeviceRegistry, NotificationKind, RegistryNotification};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// devscan - discover and configure measurement devices on the local network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "DEVSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover devices and report online/offline transitions
    Scan(ScanArgs),
    /// Discover devices, then send one network configuration request
    Configure(ConfigureArgs),
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    duration: Option<u64>,

    /// Disable the vendor announce transport
    #[arg(long)]
    no_vendor: bool,

    /// Disable the UPnP transport
    #[arg(long)]
    no_upnp: bool,

    /// Disable the mDNS transport
    #[arg(long)]
    no_mdns: bool,

    /// Only list devices whose name contains this text
    #[arg(long)]
    name: Option<String>,

    /// Only list devices of these families
    #[arg(long)]
    family: Vec<String>,

    /// Only list devices with one of these capabilities (HBM, DCP, UPNP, AVAHI)
    #[arg(long = "capability")]
    capabilities: Vec<Capability>,

    /// Only list devices whose first IPv4 address contains this text
    #[arg(long)]
    ip: Option<String>,

    /// Only list devices advertising a port containing this text
    #[arg(long)]
    port: Option<String>,

    /// Device uuids listed first
    #[arg(long = "favorite")]
    favorites: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ConfigureArgs {
    /// Target device uuid
    #[arg(long)]
    uuid: String,

    /// Switch the interface to DHCP
    #[arg(long, conflicts_with_all = ["ip", "netmask", "gateway"])]
    dhcp: bool,

    /// Static IPv4 address
    #[arg(long, required_unless_present = "dhcp")]
    ip: Option<String>,

    /// Static IPv4 netmask
    #[arg(long, required_unless_present = "dhcp")]
    netmask: Option<String>,

    /// Optional default gateway
    #[arg(long)]
    gateway: Option<String>,

    /// Interface to configure on the device
    #[arg(long, default_value = "eth0")]
    interface: String,

    /// How long to wait for the device to announce itself
    #[arg(long, default_value_t = 10)]
    discover_secs: u64,
}

/// A running scanner feeding a registry.
struct Session {
    scanner: Arc<Scanner>,
    registry: Arc<DeviceRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    async fn start(config: &AppConfig) -> Result<Self> {
        let scanner = Arc::new(Scanner::new(config).context("Failed to create scanner")?);
        let registry = Arc::new(DeviceRegistry::new(&config.registry));

        let tasks = vec![
            registry.attach(scanner.subscribe()),
            registry.spawn_sweeper(),
            tokio::spawn(report_scan_errors(scanner.subscribe())),
        ];

        scanner
            .start(&config.scanner)
            .await
            .context("Failed to start scanner")?;

        info!(transports = ?scanner.configured(), "Scanning");
        Ok(Self {
            scanner,
            registry,
            tasks,
        })
    }

    async fn shutdown(self) {
        if let Err(e) = self.scanner.stop().await {
            warn!(error = %e, "Scanner did not stop cleanly");
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration (file plus DEVSCAN__* overrides)
    let mut config = AppConfig::from_config_builder(cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging)?;

    match cli.command {
        Command::Scan(args) => run_scan(config, args).await,
        Command::Configure(args) => run_configure(config, args).await,
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directives()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

async fn run_scan(mut config: AppConfig, args: ScanArgs) -> Result<()> {
    config.scanner = ScannerConfig {
        vendor: config.scanner.vendor && !args.no_vendor,
        mdns: config.scanner.mdns && !args.no_mdns,
        upnp: config.scanner.upnp && !args.no_upnp,
    };
    if config.scanner.selected().is_empty() {
        bail!("All transports are disabled");
    }

    let session = Session::start(&config).await?;
    let mut notifications = session.registry.subscribe();

    let duration = args.duration;
    let deadline = async move {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping scan...");
                break;
            }
            _ = &mut deadline => break,
            notification = notifications.recv() => match notification {
                Ok(notification) => print_transition(&notification),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed liveness notifications"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let snapshot = session.registry.snapshot();
    session.shutdown().await;

    let spec = FilterSpec {
        name: args.name.unwrap_or_default(),
        families: args.family.into_iter().collect(),
        capabilities: args.capabilities.into_iter().collect(),
        ip: args.ip.unwrap_or_default(),
        port: args.port.unwrap_or_default(),
    }
    .sanitized();
    if !spec.is_unconstrained() {
        info!(filter = ?spec, "Listing matching devices only");
    }
    let favorites: HashSet<String> = args.favorites.into_iter().collect();

    print_table(&devscan_filter::filter(&snapshot, &spec, &favorites), &favorites);

    let available: Vec<String> = available_capabilities(&snapshot)
        .iter()
        .map(Capability::to_string)
        .collect();
    println!("Capabilities seen: {}", available.join(", "));

    Ok(())
}

async fn run_configure(mut config: AppConfig, args: ConfigureArgs) -> Result<()> {
    if !config.scanner.vendor {
        bail!("Configuration requires the vendor transport");
    }
    // Only the vendor channel can carry configuration
    config.scanner = ScannerConfig {
        vendor: true,
        mdns: false,
        upnp: false,
    };

    let request = if args.dhcp {
        ConfigRequest::dhcp(&args.uuid, &args.interface)
    } else {
        ConfigRequest::manual(
            &args.uuid,
            &args.interface,
            args.ip.unwrap_or_default(),
            args.netmask.unwrap_or_default(),
            args.gateway.unwrap_or_default(),
        )
    };

    let session = Session::start(&config).await?;
    let channel: Arc<dyn ConfigChannel> = session
        .scanner
        .vendor()
        .context("Vendor transport is not available")?;

    let found = wait_for_device(&session.registry, request.uuid.trim(), args.discover_secs).await;
    if !found {
        warn!(uuid = %request.uuid, "Device did not announce itself in time");
    }

    let dispatcher = ConfigDispatcher::new(&config.dispatch, session.registry.clone(), channel);
    let outcome = dispatcher.configure(&request).await;
    session.shutdown().await;

    match outcome {
        Ok(id) => {
            println!(
                "Sent {} configuration to {} (request {})",
                request.method(),
                request.uuid,
                id
            );
            Ok(())
        }
        Err(e) => Err(anyhow!(e)).context("Configuration failed"),
    }
}

/// Waits until `uuid` is in the registry or `secs` elapse.
async fn wait_for_device(registry: &DeviceRegistry, uuid: &str, secs: u64) -> bool {
    let mut notifications = registry.subscribe();
    if registry.contains(uuid) {
        return true;
    }

    let wait = async {
        loop {
            match notifications.recv().await {
                Ok(notification) if notification.uuid == uuid => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if registry.contains(uuid) {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(secs), wait)
        .await
        .unwrap_or(false)
}

async fn report_scan_errors(mut events: tokio::sync::broadcast::Receiver<ScanEvent>) {
    loop {
        match events.recv().await {
            Ok(ScanEvent::Error { origin, message }) => warn!(%origin, %message, "Discovery error"),
            Ok(ScanEvent::DeviceObserved { .. }) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_transition(notification: &RegistryNotification) {
    let label = match notification.kind {
        NotificationKind::NewDevice => "NEW",
        NotificationKind::BackOnline => "ONLINE",
        NotificationKind::WentOffline => "OFFLINE",
    };
    println!(
        "{} {:<8} {:<24} {}",
        notification.timestamp.format("%H:%M:%S"),
        label,
        notification.uuid,
        notification.name
    );
}

fn print_table(entries: &[RegistryEntry], favorites: &HashSet<String>) {
    println!(
        "\n{:<2}{:<24} {:<28} {:<14} {:<16} {:<8} CAPABILITIES",
        "", "UUID", "NAME", "FAMILY", "IPV4", "STATUS"
    );
    for entry in entries {
        let capabilities: Vec<String> = capabilities_of(&entry.record)
            .iter()
            .map(Capability::to_string)
            .collect();
        println!(
            "{:<2}{:<24} {:<28} {:<14} {:<16} {:<8} {}",
            if favorites.contains(entry.uuid()) { "*" } else { "" },
            entry.uuid(),
            entry.name(),
            entry.record.family_type,
            entry.record.primary_ipv4().unwrap_or("-"),
            if entry.is_online { "online" } else { "offline" },
            capabilities.join(",")
        );
    }
    println!("{} device(s)", entries.len());
}
