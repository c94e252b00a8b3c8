//! Logical commands and their opcode layouts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{frame, MessageType, WRITE_DIRECT_MODE_DATA};
use crate::error::ProtocolError;
use crate::types::PortId;

/// Slowest reverse speed.
pub const MIN_SPEED: i32 = -100;

/// Fastest forward speed.
pub const MAX_SPEED: i32 = 100;

/// Startup/completion flags used by event-style output commands.
const EVENT_STARTUP: u8 = 0x11;

/// Mode byte used by event-style output commands.
const EVENT_MODE: u8 = 0x01;

/// Clamp a signed speed and map it to its two's-complement byte.
pub fn speed_to_byte(speed: i32) -> u8 {
    speed.clamp(MIN_SPEED, MAX_SPEED) as i8 as u8
}

/// Inclusive id range used to clamp sound and colour ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u8,
    pub max: u8,
}

impl IdRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    /// Clamp `id` into the range. An inverted range collapses to `max`.
    pub fn clamp(self, id: u8) -> u8 {
        id.max(self.min).min(self.max)
    }

    pub fn is_ordered(self) -> bool {
        self.min <= self.max
    }
}

/// How `SetLight` is laid out on the wire.
///
/// The bytes differ between hub firmware revisions, so they come from the
/// hub profile rather than being fixed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "kebab-case")]
pub enum LightLayout {
    /// `[0x81, port, startup_flag, 0x51, mode, color]`
    Direct { startup_flag: u8, mode: u8 },
    /// `[0x81, port, 0x11, 0x51, 0x01, event, 0x01, color]` on a fixed port.
    PortEvent { port: u8, event: u8 },
}

impl Default for LightLayout {
    fn default() -> Self {
        Self::Direct {
            startup_flag: 0x11,
            mode: 0x00,
        }
    }
}

/// How `PlaySound` is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "kebab-case")]
pub enum SoundLayout {
    /// `[0x02, action, sound_id]`
    HubAction { action: u8 },
    /// `[0x81, port, 0x11, 0x51, 0x01, event, 0x01, sound_id]`
    PortEvent { port: u8, event: u8 },
}

impl Default for SoundLayout {
    fn default() -> Self {
        Self::HubAction { action: 0x01 }
    }
}

/// Firmware-dependent parts of command encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLayout {
    pub light: LightLayout,
    pub sound: SoundLayout,
    pub sound_range: IdRange,
    pub color_range: IdRange,
}

impl Default for CommandLayout {
    fn default() -> Self {
        Self {
            light: LightLayout::default(),
            sound: SoundLayout::default(),
            sound_range: IdRange::new(1, 10),
            color_range: IdRange::new(0, 10),
        }
    }
}

/// A logical request to the hub, independent of its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMotorSpeed { port: PortId, speed: i32 },
    SetLight { port: PortId, color: u8 },
    PlaySound { sound_id: u8 },
    QueryPortInfo { port: PortId, info_type: u8 },
    QueryPortModeInfo { port: PortId, mode: u8, info_type: u8 },
    SubscribePortValue {
        port: PortId,
        mode: u8,
        delta: u32,
        notify: bool,
    },
    /// Event-style output command: `[0x81, port, 0x11, 0x51, 0x01, event, params..]`.
    PortEvent {
        port: PortId,
        event: u8,
        params: Vec<u8>,
    },
    HubProperty { property: u8, operation: u8 },
}

impl Command {
    /// Build the payload (message type first, no header).
    pub fn to_payload(&self, layout: &CommandLayout) -> Vec<u8> {
        let output = MessageType::PortOutputCommand.as_u8();
        match self {
            Self::SetMotorSpeed { port, speed } => vec![
                output,
                port.0,
                0x01,
                WRITE_DIRECT_MODE_DATA,
                0x00,
                speed_to_byte(*speed),
            ],
            Self::SetLight { port, color } => {
                let color = layout.color_range.clamp(*color);
                match layout.light {
                    LightLayout::Direct { startup_flag, mode } => vec![
                        output,
                        port.0,
                        startup_flag,
                        WRITE_DIRECT_MODE_DATA,
                        mode,
                        color,
                    ],
                    LightLayout::PortEvent { port, event } => event_payload(port, event, &[1, color]),
                }
            }
            Self::PlaySound { sound_id } => {
                let id = layout.sound_range.clamp(*sound_id);
                match layout.sound {
                    SoundLayout::HubAction { action } => {
                        vec![MessageType::HubActions.as_u8(), action, id]
                    }
                    SoundLayout::PortEvent { port, event } => event_payload(port, event, &[1, id]),
                }
            }
            Self::QueryPortInfo { port, info_type } => {
                vec![MessageType::PortInformationRequest.as_u8(), port.0, *info_type]
            }
            Self::QueryPortModeInfo {
                port,
                mode,
                info_type,
            } => vec![
                MessageType::PortModeInformationRequest.as_u8(),
                port.0,
                *mode,
                *info_type,
            ],
            Self::SubscribePortValue {
                port,
                mode,
                delta,
                notify,
            } => {
                let mut payload = vec![MessageType::PortInputFormatSetupSingle.as_u8(), port.0, *mode];
                payload.extend_from_slice(&delta.to_le_bytes());
                payload.push(u8::from(*notify));
                payload
            }
            Self::PortEvent {
                port,
                event,
                params,
            } => event_payload(port.0, *event, params),
            Self::HubProperty {
                property,
                operation,
            } => vec![MessageType::HubProperties.as_u8(), *property, *operation],
        }
    }

    /// Build the complete frame.
    pub fn to_frame(&self, layout: &CommandLayout) -> Result<Vec<u8>, ProtocolError> {
        frame::encode(&self.to_payload(layout))
    }

    /// Port the command drives, if it targets one.
    pub fn port(&self) -> Option<PortId> {
        match self {
            Self::SetMotorSpeed { port, .. }
            | Self::SetLight { port, .. }
            | Self::QueryPortInfo { port, .. }
            | Self::QueryPortModeInfo { port, .. }
            | Self::SubscribePortValue { port, .. }
            | Self::PortEvent { port, .. } => Some(*port),
            Self::PlaySound { .. } | Self::HubProperty { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetMotorSpeed { .. } => "set-motor-speed",
            Self::SetLight { .. } => "set-light",
            Self::PlaySound { .. } => "play-sound",
            Self::QueryPortInfo { .. } => "query-port-info",
            Self::QueryPortModeInfo { .. } => "query-port-mode-info",
            Self::SubscribePortValue { .. } => "subscribe-port-value",
            Self::PortEvent { .. } => "port-event",
            Self::HubProperty { .. } => "hub-property",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetMotorSpeed { port, speed } => write!(f, "set-motor-speed({port}, {speed})"),
            Self::SetLight { port, color } => write!(f, "set-light({port}, {color})"),
            Self::PlaySound { sound_id } => write!(f, "play-sound({sound_id})"),
            Self::PortEvent {
                port,
                event,
                params,
            } => write!(f, "port-event({port}, {event}, {})", hex::encode(params)),
            other => match other.port() {
                Some(port) => write!(f, "{}({port})", other.name()),
                None => f.write_str(other.name()),
            },
        }
    }
}

fn event_payload(port: u8, event: u8, params: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6 + params.len());
    payload.extend_from_slice(&[
        MessageType::PortOutputCommand.as_u8(),
        port,
        EVENT_STARTUP,
        WRITE_DIRECT_MODE_DATA,
        EVENT_MODE,
        event,
    ]);
    payload.extend_from_slice(params);
    payload
}
