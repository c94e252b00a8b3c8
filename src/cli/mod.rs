//! Command-line interface for hublink.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::PortId;

/// hublink - talk to a wireless hub vehicle
#[derive(Parser, Debug)]
#[command(
    name = "hublink",
    author,
    version,
    about = "Drive and inspect wireless toy train hubs",
    long_about = r#"
hublink connects to a hub over Bluetooth LE (or a TCP hub bridge), keeps the
link alive across drops, and lets you drive the motor, set the light, play
sounds and inspect the attached devices.

QUICK START:
  Watch events:  hublink run
  Drive:         hublink drive 40 --duration 3
  Inspect:       hublink ports
  Via bridge:    hublink --bridge 127.0.0.1:7070 run
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Hub profile preset (duplo-train, duplo-train-events)
    #[arg(short, long, global = true, env = "HUBLINK_PROFILE")]
    pub profile: Option<String>,

    /// Use the TCP bridge transport at this address
    #[arg(long, global = true, env = "HUBLINK_BRIDGE")]
    pub bridge: Option<String>,

    /// Maximum connection attempts
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Keep the hub connected and print events until Ctrl+C
    Run(RunArgs),

    /// Set the motor speed (-100..100)
    Drive(DriveArgs),

    /// Stop the motor
    Stop,

    /// Set the light colour
    Light(LightArgs),

    /// Play a sound
    Sound(SoundArgs),

    /// List attached devices
    Ports(PortsArgs),

    /// Query port and mode information
    Probe(ProbeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stream values from this port (can be specified multiple times)
    #[arg(long, value_parser = parse_port)]
    pub watch: Vec<PortId>,

    /// Input mode used for watched ports
    #[arg(long, default_value = "0")]
    pub mode: u8,

    /// Print this many recently issued commands on exit
    #[arg(long, default_value = "0")]
    pub history: usize,
}

/// Drive command arguments
#[derive(Args, Debug)]
pub struct DriveArgs {
    /// Signed speed, clamped to -100..100
    #[arg(allow_hyphen_values = true)]
    pub speed: i32,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<u64>,
}

/// Light command arguments
#[derive(Args, Debug)]
pub struct LightArgs {
    /// Colour index
    pub color: u8,
}

/// Sound command arguments
#[derive(Args, Debug)]
pub struct SoundArgs {
    /// Sound id
    pub id: u8,
}

/// Ports command arguments
#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Seconds to collect attach events
    #[arg(short, long, default_value = "2")]
    pub wait: u64,
}

/// Probe command arguments
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Port id (decimal or 0x-prefixed hex)
    #[arg(value_parser = parse_port)]
    pub port: PortId,

    /// Number of modes to query
    #[arg(short, long, default_value = "0")]
    pub modes: u8,

    /// Response timeout in milliseconds
    #[arg(short, long, default_value = "1000")]
    pub timeout: u64,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Start from this profile preset
    #[arg(long)]
    pub preset: Option<String>,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Shell for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Parse a port id given as decimal or `0x`-prefixed hex.
pub fn parse_port(s: &str) -> Result<PortId, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed
        .map(PortId)
        .map_err(|e| format!("invalid port '{s}': {e}"))
}
