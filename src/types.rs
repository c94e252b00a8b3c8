//! Core types used throughout hublink.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port identifier on the hub (0–255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u8);

impl PortId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<u8> for PortId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// Device type reported by an attach event (16-bit, little-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub u16);

impl DeviceType {
    pub const SIMPLE_MEDIUM_MOTOR: Self = Self(0x0001);
    pub const TRAIN_MOTOR: Self = Self(0x0002);
    pub const LIGHT: Self = Self(0x0008);
    pub const VOLTAGE_SENSOR: Self = Self(0x0014);
    pub const CURRENT_SENSOR: Self = Self(0x0015);
    pub const PIEZO_BUZZER: Self = Self(0x0016);
    pub const HUB_LED: Self = Self(0x0017);
    pub const DUPLO_TRAIN_MOTOR: Self = Self(0x0029);
    pub const DUPLO_TRAIN_SPEAKER: Self = Self(0x002A);
    pub const DUPLO_TRAIN_COLOR_SENSOR: Self = Self(0x002B);
    pub const DUPLO_TRAIN_SPEEDOMETER: Self = Self(0x002C);
    pub const DUPLO_TRAIN_BASE_SPEAKER: Self = Self(0x005A);
    pub const DUPLO_TRAIN_BASE_LIGHT: Self = Self(0x005B);

    /// Capability class of this device type.
    pub fn class(self) -> DeviceClass {
        match self {
            Self::SIMPLE_MEDIUM_MOTOR | Self::TRAIN_MOTOR | Self::DUPLO_TRAIN_MOTOR => {
                DeviceClass::Motor
            }
            Self::LIGHT | Self::HUB_LED | Self::DUPLO_TRAIN_BASE_LIGHT => DeviceClass::Light,
            Self::PIEZO_BUZZER | Self::DUPLO_TRAIN_SPEAKER | Self::DUPLO_TRAIN_BASE_SPEAKER => {
                DeviceClass::Speaker
            }
            Self::VOLTAGE_SENSOR | Self::CURRENT_SENSOR => DeviceClass::VoltageSensor,
            Self::DUPLO_TRAIN_COLOR_SENSOR | Self::DUPLO_TRAIN_SPEEDOMETER => {
                DeviceClass::MotionSensor
            }
            _ => DeviceClass::Unknown,
        }
    }

    pub fn is_motor(self) -> bool {
        self.class() == DeviceClass::Motor
    }

    /// Human-readable name, if the type is known.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SIMPLE_MEDIUM_MOTOR => "Simple Medium Motor",
            Self::TRAIN_MOTOR => "Train Motor",
            Self::LIGHT => "Light",
            Self::VOLTAGE_SENSOR => "Voltage Sensor",
            Self::CURRENT_SENSOR => "Current Sensor",
            Self::PIEZO_BUZZER => "Piezo Buzzer",
            Self::HUB_LED => "Hub LED",
            Self::DUPLO_TRAIN_MOTOR => "Duplo Train Motor",
            Self::DUPLO_TRAIN_SPEAKER => "Duplo Train Speaker",
            Self::DUPLO_TRAIN_COLOR_SENSOR => "Duplo Train Color Sensor",
            Self::DUPLO_TRAIN_SPEEDOMETER => "Duplo Train Speedometer",
            Self::DUPLO_TRAIN_BASE_SPEAKER => "Duplo Train Base Speaker",
            Self::DUPLO_TRAIN_BASE_LIGHT => "Duplo Train Base Light",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#06x})", self.0),
            None => write!(f, "unknown ({:#06x})", self.0),
        }
    }
}

impl From<u16> for DeviceType {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

/// Capability class a port can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    Motor,
    Light,
    Speaker,
    VoltageSensor,
    MotionSensor,
    Unknown,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Motor => write!(f, "motor"),
            Self::Light => write!(f, "light"),
            Self::Speaker => write!(f, "speaker"),
            Self::VoltageSensor => write!(f, "voltage-sensor"),
            Self::MotionSensor => write!(f, "motion-sensor"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Attach/detach event byte of an attached-IO message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachEvent {
    Detached,
    Attached,
    AttachedVirtual,
    Other(u8),
}

impl AttachEvent {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::Detached,
            0x01 => Self::Attached,
            0x02 => Self::AttachedVirtual,
            other => Self::Other(other),
        }
    }

    /// Whether the event carries a device type.
    pub fn is_attach(self) -> bool {
        matches!(self, Self::Attached | Self::AttachedVirtual)
    }
}

/// Port capability bits from a port information response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Port accepts output commands.
    pub const OUTPUT: u8 = 1 << 0;

    /// Port produces input values.
    pub const INPUT: u8 = 1 << 1;

    /// Modes can be combined.
    pub const LOGICAL_COMBINABLE: u8 = 1 << 2;

    /// Modes can be synchronized.
    pub const LOGICAL_SYNCHRONIZABLE: u8 = 1 << 3;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.has(Self::OUTPUT) {
            parts.push("output");
        }
        if self.has(Self::INPUT) {
            parts.push("input");
        }
        if self.has(Self::LOGICAL_COMBINABLE) {
            parts.push("combinable");
        }
        if self.has(Self::LOGICAL_SYNCHRONIZABLE) {
            parts.push("synchronizable");
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// Port output command feedback code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackCode(pub u8);

impl FeedbackCode {
    pub const IN_PROGRESS: Self = Self(0x01);
    pub const COMPLETED_ONLY: Self = Self(0x02);
    pub const DISCARDED: Self = Self(0x05);
    pub const COMPLETED: Self = Self(0x0A);
    pub const IDLE: Self = Self(0x10);

    pub fn describe(self) -> &'static str {
        match self {
            Self::IN_PROGRESS => "buffer empty, command in progress",
            Self::COMPLETED_ONLY => "buffer empty, command completed",
            Self::DISCARDED => "command discarded",
            Self::COMPLETED => "command completed",
            Self::IDLE => "idle",
            _ => "unknown",
        }
    }
}

impl fmt::Display for FeedbackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.describe())
    }
}

/// Error code carried by a generic error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubErrorCode(pub u8);

impl HubErrorCode {
    pub fn describe(self) -> &'static str {
        match self.0 {
            0x01 => "ack",
            0x02 => "mack",
            0x03 => "buffer overflow",
            0x04 => "timeout",
            0x05 => "command not recognized",
            0x06 => "invalid use",
            0x07 => "overcurrent",
            0x08 => "internal error",
            _ => "unknown",
        }
    }
}

impl fmt::Display for HubErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.describe())
    }
}

/// Connection supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No link, may retry
    Disconnected,
    /// Looking for a hub
    Scanning,
    /// Hub found, establishing link
    Connecting,
    /// Link up and activated
    Connected,
    /// Terminal, no further reconnection
    Draining,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Draining)
    }

    /// Whether the supervisor may move from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Scanning)
                | (Scanning, Connecting)
                | (Scanning, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (_, Draining)
        ) && self != Draining
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Scanning => write!(f, "scanning"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class() {
        assert_eq!(DeviceType::DUPLO_TRAIN_MOTOR.class(), DeviceClass::Motor);
        assert_eq!(DeviceType::DUPLO_TRAIN_BASE_LIGHT.class(), DeviceClass::Light);
        assert_eq!(DeviceType(0x7777).class(), DeviceClass::Unknown);
        assert!(DeviceType(0x0029).is_motor());
        assert!(!DeviceType(0x005B).is_motor());
    }

    #[test]
    fn test_display() {
        assert_eq!(PortId(0x32).to_string(), "0x32");
        assert_eq!(
            DeviceType::DUPLO_TRAIN_MOTOR.to_string(),
            "Duplo Train Motor (0x0029)"
        );
        assert_eq!(DeviceType(0x7777).to_string(), "unknown (0x7777)");
        assert_eq!(Capabilities::new(0b11).to_string(), "output|input");
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Disconnected.can_transition_to(Scanning));
        assert!(Scanning.can_transition_to(Disconnected));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Draining));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Draining.can_transition_to(Scanning));
        assert!(!Draining.can_transition_to(Draining));
    }

    #[test]
    fn test_attach_event() {
        assert!(AttachEvent::from_u8(1).is_attach());
        assert!(AttachEvent::from_u8(2).is_attach());
        assert!(!AttachEvent::from_u8(0).is_attach());
        assert_eq!(AttachEvent::from_u8(9), AttachEvent::Other(9));
    }
}
