//! hublink CLI - drive and inspect wireless toy train hubs.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use hublink::cli::*;
use hublink::config::{init_logging, Config, HubProfile, LoggingConfig, PRESETS};
use hublink::error::{Error, Result};
use hublink::events::HubEvent;
use hublink::protocol::{info_type, mode_info_type, Message, ModeInfo, PortInfo};
use hublink::router::ResponseKey;
use hublink::session::ActiveSession;
use hublink::supervisor::ConnectionSupervisor;
use hublink::transport::{create_transport, TransportKind};
use hublink::types::PortId;
use hublink::VERSION;

/// How long to wait for the hub to report a port before commanding it.
const PORT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.as_str().into(),
        color: !cli.no_color,
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Commands that never touch a hub
    match cli.command {
        Commands::Completions(args) => return run_completions(args),
        Commands::Config(args) => return run_config(args),
        _ => {}
    }

    let config = load_config(&cli)?;
    let transport = create_transport(&config.transport).await?;
    let supervisor = Arc::new(ConnectionSupervisor::new(
        transport,
        config.hub.clone(),
        config.supervisor.clone(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    match cli.command {
        Commands::Run(args) => run_watch(args, supervisor, cancel).await,
        Commands::Drive(args) => run_drive(args, supervisor, cancel).await,
        Commands::Stop => run_stop(supervisor, cancel).await,
        Commands::Light(args) => run_light(args, supervisor, cancel).await,
        Commands::Sound(args) => run_sound(args, supervisor, cancel).await,
        Commands::Ports(args) => run_ports(args, supervisor, cancel).await,
        Commands::Probe(args) => run_probe(args, supervisor, cancel).await,
        Commands::Completions(_) | Commands::Config(_) => Ok(()),
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    if let Some(ref name) = cli.profile {
        config.hub = preset(name)?;
    }
    if let Some(ref addr) = cli.bridge {
        config.transport.kind = TransportKind::Bridge;
        config.transport.bridge_addr = Some(addr.clone());
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.supervisor.max_attempts = max_attempts;
    }

    config.validate()?;
    Ok(config)
}

fn preset(name: &str) -> Result<HubProfile> {
    HubProfile::preset(name).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "unknown profile '{name}' (expected one of: {})",
            PRESETS.join(", ")
        ))
    })
}

fn print_banner(title: &str) {
    println!(
        "{}",
        "╔══════════════════════════════════════════╗".bright_cyan()
    );
    println!("{}", format!("║     {title:<37}║").bright_cyan());
    println!("{}", format!("║     Version {VERSION:<29}║").bright_cyan());
    println!(
        "{}",
        "╚══════════════════════════════════════════╝".bright_cyan()
    );
    println!();
}

/// Connect, printing progress, and return the live session.
async fn connect(
    supervisor: &ConnectionSupervisor,
    cancel: &CancellationToken,
) -> Result<Arc<ActiveSession>> {
    println!("{} Searching for hub...", "→".cyan());
    let active = supervisor.run_until_connected(cancel).await?;
    println!(
        "{} Connected to {}",
        "✓".green(),
        active.device().to_string().bright_white()
    );
    Ok(active)
}

/// Wait until the hub reports a device on `port`.
async fn wait_for_port(active: &ActiveSession, port: PortId) -> bool {
    let deadline = tokio::time::Instant::now() + PORT_DISCOVERY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if active.ports().lookup(port).is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Keep the hub connected and print events.
async fn run_watch(
    args: RunArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    print_banner("HUBLINK");

    let mut events = supervisor.subscribe();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.supervise(&cancel).await })
    };

    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, HubEvent::SessionStateChanged { new, .. } if new.is_connected()) {
                        watch_ports(&supervisor, &args).await;
                    }
                    if matches!(event, HubEvent::SessionStateChanged { new, .. } if new.is_terminal()) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    println!("{} Dropped {} events", "⚠".yellow(), n);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(Error::Other(e.into())),
    };

    if args.history > 0 {
        print_history(&supervisor, args.history);
    }

    println!();
    match result {
        Ok(()) => {
            println!("{} Session closed", "✓".green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            Err(e)
        }
    }
}

/// Enable value notifications for the watched ports on a fresh session.
async fn watch_ports(supervisor: &ConnectionSupervisor, args: &RunArgs) {
    if args.watch.is_empty() {
        return;
    }
    // The connected event fires before activation completes.
    let Some(active) = wait_active(supervisor).await else {
        return;
    };
    for port in &args.watch {
        if let Err(e) = active
            .dispatcher()
            .subscribe_port_value(*port, args.mode, 1, true)
            .await
        {
            println!("{} Could not watch port {}: {}", "⚠".yellow(), port, e);
        }
    }
}

async fn wait_active(supervisor: &ConnectionSupervisor) -> Option<Arc<ActiveSession>> {
    let deadline = tokio::time::Instant::now() + PORT_DISCOVERY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Some(active) = supervisor.active() {
            return Some(active);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

fn print_event(event: &HubEvent) {
    match event {
        HubEvent::PortAttached { port, device_type } => {
            println!("  {} {} {}", "+".green(), port, device_type.to_string().bright_white());
        }
        HubEvent::PortDetached { port } => {
            println!("  {} {} detached", "-".red(), port);
        }
        HubEvent::PortValue { port, raw } => {
            println!("  {} {} {}", "·".cyan(), port, hex::encode(raw).dimmed());
        }
        HubEvent::CommandFeedback { port, code } => {
            println!("  {} {} {}", "←".cyan(), port, code);
        }
        HubEvent::ProtocolError { command_type, code } => {
            println!(
                "  {} command {:#04x} rejected: {}",
                "✗".red(),
                command_type,
                code
            );
        }
        HubEvent::SessionStateChanged { old, new } => {
            println!("{} {} → {}", "●".bright_white(), old, new.to_string().bold());
        }
    }
}

fn print_history(supervisor: &ConnectionSupervisor, count: usize) {
    println!();
    println!("{}", "Recent Commands:".bright_white().bold());
    println!("{}", "─".repeat(50));
    for record in supervisor.history().recent(count) {
        println!(
            "  {:<28} {}",
            record.command.to_string(),
            hex::encode(&record.frame).dimmed()
        );
    }
}

async fn run_drive(
    args: DriveArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;
    let port = supervisor.profile().motor_port;
    if !wait_for_port(&active, port).await {
        supervisor.shutdown().await?;
        return Err(Error::PortNotFound(port.as_u8()));
    }

    active.dispatcher().set_motor_speed(port, args.speed).await?;
    println!("{} Motor on {} set to {}", "✓".green(), port, args.speed);

    match args.duration {
        Some(secs) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            println!("{}", "Press Ctrl+C to stop".dimmed());
            cancel.cancelled().await;
        }
    }

    supervisor.shutdown().await?;
    println!("{} Motor stopped", "✓".green());
    Ok(())
}

async fn run_stop(supervisor: Arc<ConnectionSupervisor>, cancel: CancellationToken) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;
    let port = supervisor.profile().motor_port;
    if wait_for_port(&active, port).await {
        active.dispatcher().stop(port).await?;
        println!("{} Motor on {} stopped", "✓".green(), port);
    } else {
        println!("{} No motor reported on {}", "⚠".yellow(), port);
    }
    supervisor.shutdown().await
}

async fn run_light(
    args: LightArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;
    let port = supervisor.profile().light_port;
    let range = supervisor.profile().color_range;
    if range.clamp(args.color) != args.color {
        println!(
            "{} Colour {} outside {}..={}, clamped",
            "⚠".yellow(),
            args.color,
            range.min,
            range.max
        );
    }

    active.dispatcher().set_light(port, args.color).await?;
    println!("{} Light set to {}", "✓".green(), range.clamp(args.color));
    supervisor.shutdown().await
}

async fn run_sound(
    args: SoundArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;
    let range = supervisor.profile().sound_range;

    active.dispatcher().play_sound(args.id).await?;
    println!("{} Playing sound {}", "✓".green(), range.clamp(args.id));
    // Let the hub start playback before the link closes.
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.shutdown().await
}

async fn run_ports(
    args: PortsArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(args.wait)) => {}
    }

    println!();
    println!("{}", "Attached Devices:".bright_white().bold());
    println!("{}", "─".repeat(50));

    let entries = active.ports().snapshot();
    if entries.is_empty() {
        println!("  {}", "(none reported)".dimmed());
    }
    for entry in entries {
        let device = entry
            .attached
            .map_or_else(|| "detached".dimmed().to_string(), |d| d.to_string());
        let class = entry
            .class()
            .map_or_else(String::new, |c| format!("({c})"));
        println!("  {:<6} {} {}", entry.port.to_string().cyan(), device, class.dimmed());
    }

    let stats = active.router().stats();
    println!();
    println!(
        "  {} frames, {} malformed, {} unrecognized",
        stats.frames, stats.malformed, stats.unrecognized
    );

    supervisor.shutdown().await
}

async fn run_probe(
    args: ProbeArgs,
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
) -> Result<()> {
    let active = connect(&supervisor, &cancel).await?;
    let router = active.router();
    let dispatcher = active.dispatcher();
    let limit = Duration::from_millis(args.timeout);

    println!();
    println!("{} {}", "Port".bright_white().bold(), args.port.to_string().cyan());
    println!("{}", "─".repeat(50));

    let pending = router.expect(ResponseKey::port_info(args.port));
    dispatcher
        .query_port_info(args.port, info_type::MODE_INFO)
        .await?;
    let mut modes = args.modes;
    match pending.wait(limit).await {
        Some(Message::PortInformationResponse {
            info:
                Some(PortInfo::ModeInfo {
                    capabilities,
                    total_modes,
                    input_modes,
                    output_modes,
                }),
            ..
        }) => {
            if let Some(caps) = capabilities {
                println!("  Capabilities: {caps}");
            }
            if let Some(total) = total_modes {
                println!("  Modes:        {total}");
                if modes == 0 {
                    modes = total;
                }
            }
            if let Some(mask) = input_modes {
                println!("  Input mask:   {mask:#06x}");
            }
            if let Some(mask) = output_modes {
                println!("  Output mask:  {mask:#06x}");
            }
        }
        Some(other) => println!("  {} unexpected reply: {:?}", "⚠".yellow(), other),
        None => println!("  {} no port information", "⚠".yellow()),
    }

    for mode in 0..modes {
        let name = query_mode(&active, args.port, mode, mode_info_type::NAME, limit).await?;
        let format =
            query_mode(&active, args.port, mode, mode_info_type::VALUE_FORMAT, limit).await?;

        let name = match name {
            Some(ModeInfo::Name(name)) => name,
            _ => "?".into(),
        };
        let format = match format {
            Some(ModeInfo::ValueFormat {
                values,
                data_type,
                figures,
                decimals,
            }) => format!(
                "values={} type={} figures={} decimals={}",
                opt(values),
                opt(data_type),
                opt(figures),
                opt(decimals)
            ),
            _ => String::new(),
        };
        println!("  {:>2}  {:<12} {}", mode, name.bright_white(), format.dimmed());
    }

    supervisor.shutdown().await
}

async fn query_mode(
    active: &ActiveSession,
    port: PortId,
    mode: u8,
    info_type: u8,
    limit: Duration,
) -> Result<Option<ModeInfo>> {
    let pending = active.router().expect(ResponseKey::mode_info(port, mode));
    active
        .dispatcher()
        .query_port_mode_info(port, mode, info_type)
        .await?;
    Ok(match pending.wait(limit).await {
        Some(Message::PortModeInformationResponse { info, .. }) => info,
        _ => None,
    })
}

fn opt(value: Option<u8>) -> String {
    value.map_or_else(|| "?".into(), |v| v.to_string())
}

fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
    };

    generate(shell, &mut cmd, name, &mut std::io::stdout());

    Ok(())
}

fn run_config(args: ConfigArgs) -> Result<()> {
    let mut config = Config::example();
    if let Some(ref name) = args.preset {
        config.hub = preset(name)?;
    }

    let output = config.to_toml()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}
